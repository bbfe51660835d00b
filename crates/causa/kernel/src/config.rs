use serde::{Deserialize, Serialize};

/// Kernel configuration. Written verbatim into the session's first audit
/// entry so replay evaluates with identical thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Admission evaluation budget in milliseconds.
    pub watchdog_budget_ms: u64,
    /// Token lifetime in logical ticks, counted from issuance.
    pub token_ttl_ticks: u64,
    /// Delayed-reveal mode: per-step salts and end-of-episode consistency.
    pub salted: bool,
    pub episode_id: String,
    pub min_counterfactuals: usize,
    pub min_counterfactual_mass: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            watchdog_budget_ms: 200,
            token_ttl_ticks: 8,
            salted: false,
            episode_id: "episode-0".to_string(),
            min_counterfactuals: 3,
            min_counterfactual_mass: 0.9,
        }
    }
}

impl KernelConfig {
    pub fn salted(mut self, salted: bool) -> Self {
        self.salted = salted;
        self
    }

    pub fn with_episode(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = episode_id.into();
        self
    }

    pub fn with_watchdog_budget_ms(mut self, budget_ms: u64) -> Self {
        self.watchdog_budget_ms = budget_ms;
        self
    }
}
