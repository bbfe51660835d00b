//! Audit entries and the events they record.

use causa_crypto::{hash_value, Opening, RevealedSalt};
use causa_types::{CapabilityToken, DecisionRecord, DenialReason, ExecutionRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Which committed snapshot an opening targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotRef {
    Factor,
    Fork { fork_id: String },
}

/// Everything the kernel records. Denials are as complete as grants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// First entry of every session.
    SessionStarted {
        episode_id: String,
        /// `sha256` of the kernel secret; lets replay confirm the run seed.
        secret_commitment: String,
        salted: bool,
        config: Value,
    },

    StepStarted {
        step: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        salt_commitment: Option<String>,
    },

    /// One admission decision over the raw inbound document.
    Admission {
        input: Value,
        decision: DecisionRecord,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<CapabilityToken>,
    },

    /// Fatal hang of an admission evaluation. Always followed by its denial.
    WatchdogTimeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proposal_id: Option<String>,
        budget_ms: u64,
    },

    /// A token presented (or not) at the execution boundary.
    Execution {
        request: ExecutionRequest,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<CapabilityToken>,
        allowed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DenialReason>,
    },

    /// Use of the direct-execution path. Never allowed.
    BypassAttempt {
        request: ExecutionRequest,
        reason: DenialReason,
    },

    SnapshotRevealed {
        proposal_hash: String,
        target: SnapshotRef,
        opening: Opening,
        verified: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DenialReason>,
    },

    /// Every salt of the episode, in step order.
    SaltsRevealed { salts: Vec<RevealedSalt> },

    /// End-of-episode salted-consistency result.
    EpisodeVerdict {
        checked: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DenialReason>,
    },

    /// Calibration of the adversarial checks, logged before their first
    /// outcome so replay can re-derive each one.
    ProbesArmed { config: Value },

    ProbeOutcome {
        probe: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proposal_id: Option<String>,
        outcome: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        detail: Value,
    },

    /// Last entry of a complete session.
    SessionSealed {
        /// Number of entries preceding the seal.
        entry_count: u64,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::SessionStarted { .. } => "session_started",
            AuditEvent::StepStarted { .. } => "step_started",
            AuditEvent::Admission { .. } => "admission",
            AuditEvent::WatchdogTimeout { .. } => "watchdog_timeout",
            AuditEvent::Execution { .. } => "execution",
            AuditEvent::BypassAttempt { .. } => "bypass_attempt",
            AuditEvent::SnapshotRevealed { .. } => "snapshot_revealed",
            AuditEvent::SaltsRevealed { .. } => "salts_revealed",
            AuditEvent::EpisodeVerdict { .. } => "episode_verdict",
            AuditEvent::ProbesArmed { .. } => "probes_armed",
            AuditEvent::ProbeOutcome { .. } => "probe_outcome",
            AuditEvent::SessionSealed { .. } => "session_sealed",
        }
    }
}

/// One record of the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditEntry {
    pub seq: u64,
    /// Logical tick supplied by the caller. Never wall-clock time.
    pub tick: u64,
    pub event: AuditEvent,
    pub prev_entry_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Build an entry linked to `prev_entry_hash` and compute its hash.
    pub fn link(seq: u64, tick: u64, event: AuditEvent, prev_entry_hash: String) -> Result<Self> {
        let mut entry = Self {
            seq,
            tick,
            event,
            prev_entry_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// `hash(entry without entry_hash)`.
    pub fn compute_hash(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(hash_of_unhashed(value)?)
    }

    pub fn verify_hash(&self) -> Result<bool> {
        Ok(self.compute_hash()? == self.entry_hash)
    }
}

/// Hash of a raw entry value with its `entry_hash` key removed.
pub(crate) fn hash_of_unhashed(mut value: Value) -> std::result::Result<String, causa_crypto::CanonError> {
    if let Value::Object(map) = &mut value {
        map.remove("entry_hash");
    }
    hash_value(&value)
}
