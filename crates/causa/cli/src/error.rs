//! CLI error types

use causa_audit::AuditError;
use causa_harness::HarnessError;
use causa_replay::ReplayError;
use thiserror::Error;

/// CLI error types. Every one of them exits with status 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session error from the harness
    #[error("{0}")]
    Harness(#[from] HarnessError),

    /// Replay could not start
    #[error("{0}")]
    Replay(#[from] ReplayError),

    /// Audit log could not be read
    #[error("{0}")]
    Audit(#[from] AuditError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML rendering error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
