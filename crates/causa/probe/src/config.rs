use serde::{Deserialize, Serialize};

/// Calibration of the causal-mutation challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Upper bound on claims challenged per proposal.
    pub max_claims: usize,
    /// `Δ = max(delta_floor, |f| * delta_scale)`.
    pub delta_floor: f64,
    pub delta_scale: f64,
    /// A mutation moving the factor by no more than this is a no-op.
    pub noop_tolerance: f64,
    /// Replacement claims drawn for a no-op before it is inconclusive.
    pub mirror_resamples: usize,
    /// Seed of the claim ordering, mixed with the kernel's challenge key.
    pub seed: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_claims: 3,
            delta_floor: 0.05,
            delta_scale: 0.25,
            noop_tolerance: 1e-12,
            mirror_resamples: 1,
            seed: 0,
        }
    }
}

impl ProbeConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Mutation step for a factor currently at `f`.
    pub fn delta(&self, f: f64) -> f64 {
        self.delta_floor.max(f.abs() * self.delta_scale)
    }
}
