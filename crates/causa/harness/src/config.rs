use causa_kernel::KernelConfig;
use causa_probe::ProbeConfig;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Episode and suite parameters. Kernel and probe settings are carried
/// through unchanged to every session the harness starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Proposals per episode.
    pub steps: u64,
    pub grid_size: usize,
    pub obstacles: usize,
    /// Base run seed. Episode `i` of a suite runs with `seed + i`.
    pub seed: u64,
    pub kernel: KernelConfig,
    pub probes: ProbeConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            steps: 12,
            grid_size: 8,
            obstacles: 6,
            seed: 7,
            kernel: KernelConfig::default(),
            probes: ProbeConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(HarnessError::Config("steps must be at least 1".into()));
        }
        if self.grid_size < 2 {
            return Err(HarnessError::Config(format!(
                "grid_size {} is below 2",
                self.grid_size
            )));
        }
        let free = self.grid_size * self.grid_size - 2;
        if self.obstacles > free {
            return Err(HarnessError::Config(format!(
                "{} obstacles do not fit a {}x{} grid",
                self.obstacles, self.grid_size, self.grid_size
            )));
        }
        Ok(())
    }
}
