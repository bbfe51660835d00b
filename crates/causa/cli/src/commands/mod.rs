//! CLI command implementations

pub mod replay;
pub mod run;
pub mod suite;
pub mod verify;

use std::process::ExitCode;

use causa_harness::HarnessConfig;
use clap::Args;

/// How a command that ran to completion ends the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The input was checked and rejected: broken chain, replay divergence
    /// or a kernel fault found by a probe.
    Rejected,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Rejected => ExitCode::from(2),
        }
    }
}

/// Flags that override the `[harness]` section of the config file
#[derive(Args, Debug, Default, Clone)]
pub struct HarnessArgs {
    /// Run seed (base seed for suites)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Proposals per episode
    #[arg(long)]
    pub steps: Option<u64>,

    /// Grid side length
    #[arg(long)]
    pub grid_size: Option<usize>,

    /// Admission watchdog budget in milliseconds
    #[arg(long)]
    pub watchdog_ms: Option<u64>,
}

impl HarnessArgs {
    pub fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(steps) = self.steps {
            config.steps = steps;
        }
        if let Some(size) = self.grid_size {
            config.grid_size = size;
        }
        if let Some(budget) = self.watchdog_ms {
            config.kernel = config.kernel.with_watchdog_budget_ms(budget);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let file = HarnessConfig::default().with_seed(5).with_steps(30);
        let args = HarnessArgs {
            steps: Some(4),
            watchdog_ms: Some(50),
            ..HarnessArgs::default()
        };
        let config = args.apply(file);
        assert_eq!(config.seed, 5);
        assert_eq!(config.steps, 4);
        assert_eq!(config.kernel.watchdog_budget_ms, 50);
    }
}
