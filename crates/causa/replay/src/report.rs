use causa_audit::ChainReport;
use serde::Serialize;

/// Counts of what the replay re-derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayTally {
    pub decisions: u64,
    pub granted: u64,
    pub denied: u64,
    pub timeouts: u64,
    pub executions: u64,
    pub bypass_attempts: u64,
    pub reveals: u64,
    pub probes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_checked: Option<u64>,
}

/// The first entry whose recomputation disagrees with the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayDivergence {
    pub seq: u64,
    pub event: String,
    pub detail: String,
}

impl std::fmt::Display for ReplayDivergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry {} ({}): {}", self.seq, self.event, self.detail)
    }
}

/// Result of replaying one session.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Chain intact and every decision reproduced.
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    pub chain: ChainReport,
    pub tally: ReplayTally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence: Option<ReplayDivergence>,
}

impl ReplayReport {
    pub(crate) fn broken_chain(chain: ChainReport) -> Self {
        Self {
            valid: false,
            episode_id: None,
            chain,
            tally: ReplayTally::default(),
            divergence: None,
        }
    }
}
