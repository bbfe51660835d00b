use causa_crypto::CanonError;
use causa_kernel::KernelError;
use thiserror::Error;

/// Infrastructure faults while probing. A probe that catches a violation
/// returns it as an outcome, never as an error.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("encoding error: {0}")]
    Canon(#[from] CanonError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
