use thiserror::Error;

/// Errors from canonical encoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CanonError {
    #[error("non-finite number cannot be canonically encoded: {0}")]
    NonFinite(f64),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CanonError {
    fn from(value: serde_json::Error) -> Self {
        CanonError::Serialization(value.to_string())
    }
}

/// Errors from commit-reveal and salt handling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    #[error("canonical encoding failed: {0}")]
    Canon(#[from] CanonError),

    #[error("nonce is not valid hex: {0}")]
    MalformedNonce(String),

    #[error("HMAC key rejected")]
    InvalidKey,

    #[error("salt for step {0} is unknown to this schedule")]
    UnknownStep(u64),

    #[error("derivation function not registered: {0}")]
    UnknownDerivation(String),
}
