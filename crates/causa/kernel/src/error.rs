use causa_audit::AuditError;
use causa_crypto::{CanonError, CommitError};
use thiserror::Error;

/// Infrastructure faults. Denials are not errors; they are
/// [`crate::Decision::Denied`] and are always written to the audit log.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("encoding error: {0}")]
    Canon(#[from] CanonError),

    #[error("commitment error: {0}")]
    Commit(#[from] CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("admission evaluation aborted: {0}")]
    Evaluation(String),

    #[error("no admitted proposal with hash {0}")]
    UnknownProposal(String),

    #[error("episode already closed")]
    EpisodeClosed,
}

pub type Result<T> = std::result::Result<T, KernelError>;
