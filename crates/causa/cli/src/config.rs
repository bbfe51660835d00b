//! CLI configuration

use std::path::PathBuf;

use causa_harness::HarnessConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// File configuration. Every key is optional; command-line flags override
/// whatever the file sets.
///
/// ```toml
/// out_dir = "runs"
///
/// [harness]
/// steps = 20
/// seed = 3
///
/// [harness.kernel]
/// watchdog_budget_ms = 500
///
/// [harness.probes]
/// mirror_resamples = 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where `run` and `suite` write audit logs and reports.
    pub out_dir: Option<PathBuf>,

    pub harness: HarnessConfig,
}

impl CliConfig {
    /// Load configuration from file. No path means defaults.
    pub fn load(path: Option<&str>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(CliConfig::default());
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("cannot read {path}: {e}")))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> CliResult<Self> {
        toml::from_str(contents).map_err(|e| CliError::Config(e.to_string()))
    }
}
