use causa_audit::AuditError;
use causa_crypto::{CanonError, CommitError};
use causa_kernel::KernelError;
use thiserror::Error;

/// Faults that prevent a replay from running at all. A replay that runs and
/// disagrees with the log is not an error; see [`crate::ReplayDivergence`].
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("encoding error: {0}")]
    Canon(#[from] CanonError),

    #[error("commitment error: {0}")]
    Commit(#[from] CommitError),

    #[error("logged config is unreadable: {0}")]
    Config(#[source] serde_json::Error),

    #[error("log does not open with a session start")]
    MissingSessionStart,

    #[error("run seed does not match the logged secret commitment (logged {logged}, derived {derived})")]
    SeedMismatch { logged: String, derived: String },
}

pub type Result<T> = std::result::Result<T, ReplayError>;
