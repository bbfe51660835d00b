use causa_crypto::CanonError;
use thiserror::Error;

/// Infrastructure faults of the audit log. Chain violations are not errors;
/// they are reported through [`crate::ChainReport`].
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Canon(#[from] CanonError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit log is sealed; no further entries may be appended")]
    Sealed,
}

pub type Result<T> = std::result::Result<T, AuditError>;
