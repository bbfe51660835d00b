use serde::{Deserialize, Serialize};

/// Machine-readable classification of every rejection the kernel can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    /// Malformed input rejected before any invariant ran.
    Schema,
    I0TraceCommit,
    I1Counterfactuals,
    I3SnapshotPresence,
    I4TokenBinding,
    I5WatchdogTimeout,
    I6InterfaceCompleteness,
    I7SaltedConsistency,
    /// A reveal or digest did not reproduce an earlier commitment.
    CommitmentMismatch,
    TokenSignature,
    TokenExpired,
    TokenReused,
    /// Execution attempted without presenting any token.
    TokenMissing,
}

impl ViolationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCode::Schema => "SCHEMA",
            ViolationCode::I0TraceCommit => "I0_TRACE_COMMIT",
            ViolationCode::I1Counterfactuals => "I1_COUNTERFACTUALS",
            ViolationCode::I3SnapshotPresence => "I3_SNAPSHOT_PRESENCE",
            ViolationCode::I4TokenBinding => "I4_TOKEN_BINDING",
            ViolationCode::I5WatchdogTimeout => "I5_WATCHDOG_TIMEOUT",
            ViolationCode::I6InterfaceCompleteness => "I6_INTERFACE_COMPLETENESS",
            ViolationCode::I7SaltedConsistency => "I7_SALTED_CONSISTENCY",
            ViolationCode::CommitmentMismatch => "COMMITMENT_MISMATCH",
            ViolationCode::TokenSignature => "TOKEN_SIGNATURE",
            ViolationCode::TokenExpired => "TOKEN_EXPIRED",
            ViolationCode::TokenReused => "TOKEN_REUSED",
            ViolationCode::TokenMissing => "TOKEN_MISSING",
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, attributable reason for a denial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialReason {
    pub code: ViolationCode,
    pub message: String,
    /// Field path for schema violations (`trace.causal_claims[0].var`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl DenialReason {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn at_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} at {}: {}", self.code, field, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Granted,
    Denied,
}

/// Serializable outcome of one admission decision, as written to the audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
}

impl DecisionRecord {
    pub fn granted(proposal_hash: String, trace_hash: String, token_hash: String) -> Self {
        Self {
            kind: DecisionKind::Granted,
            reason: None,
            proposal_hash: Some(proposal_hash),
            trace_hash: Some(trace_hash),
            token_hash: Some(token_hash),
        }
    }

    pub fn denied(reason: DenialReason, proposal_hash: Option<String>) -> Self {
        Self {
            kind: DecisionKind::Denied,
            reason: Some(reason),
            proposal_hash,
            trace_hash: None,
            token_hash: None,
        }
    }

    pub fn reason_code(&self) -> Option<ViolationCode> {
        self.reason.as_ref().map(|r| r.code)
    }
}
