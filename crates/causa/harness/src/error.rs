use causa_audit::AuditError;
use causa_crypto::{CanonError, CommitError};
use causa_kernel::KernelError;
use causa_probe::ProbeError;
use causa_replay::ReplayError;
use causa_types::ShapeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("encoding error: {0}")]
    Canon(#[from] CanonError),

    #[error("commitment error: {0}")]
    Commit(#[from] CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("agent model error: {0}")]
    Model(#[from] ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
