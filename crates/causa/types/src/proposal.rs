use causa_crypto::{hash_serialize, CanonError};
use serde::{Deserialize, Serialize};

use crate::interface::InterfaceSpec;
use crate::trace::Trace;

/// Intent and plan an agent asks to execute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalPayload {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<String>,
    /// The action the agent chose.
    pub chosen_action: String,
}

/// An agent's request to act. Immutable once submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Proposal {
    pub proposal_id: String,
    pub proposal_type: String,
    /// Digest of the deterministic environment snapshot the agent acted on.
    pub env_snapshot_ref: String,
    pub payload: ProposalPayload,
    pub trace: Trace,
    pub requested_scope: Vec<String>,
    pub interface: InterfaceSpec,
}

impl Proposal {
    /// Anchor hash of the whole proposal.
    pub fn hash(&self) -> Result<String, CanonError> {
        hash_serialize(self)
    }

    /// Hash of the embedded trace (including its declared commit).
    pub fn trace_hash(&self) -> Result<String, CanonError> {
        hash_serialize(&self.trace)
    }
}
