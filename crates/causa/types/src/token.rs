use causa_crypto::{hash_serialize, CanonError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hash of a capability scope. Order and duplicates are irrelevant.
pub fn scope_hash(scope: &[String]) -> Result<String, CanonError> {
    let mut normalized: Vec<&str> = scope.iter().map(String::as_str).collect();
    normalized.sort_unstable();
    normalized.dedup();
    hash_serialize(&normalized)
}

/// Signed, single-use grant bound to exactly one (proposal, trace, scope) triple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilityToken {
    pub token_id: String,
    pub proposal_hash: String,
    pub trace_hash: String,
    pub scope_hash: String,
    /// Logical tick of issuance.
    pub issued_at: u64,
    /// Last logical tick at which the token is valid.
    pub expires_at: u64,
    /// Number of tokens the service had issued before this one, plus one.
    pub issuance_count: u64,
    pub signature: String,
}

impl CapabilityToken {
    /// The token as signed: every field except `signature`.
    pub fn unsigned_value(&self) -> Result<Value, CanonError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("signature");
        }
        Ok(value)
    }

    pub fn hash(&self) -> Result<String, CanonError> {
        hash_serialize(self)
    }
}

/// What the execution boundary is asked to run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub proposal_hash: String,
    pub trace_hash: String,
    pub scope: Vec<String>,
    /// Logical tick of the request, supplied by the harness.
    pub tick: u64,
}

impl ExecutionRequest {
    pub fn scope_hash(&self) -> Result<String, CanonError> {
        scope_hash(&self.scope)
    }
}
