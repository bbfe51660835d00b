use std::path::{Path, PathBuf};

use causa_audit::AuditLog;
use tracing::info;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::report::SuiteReport;
use crate::runner::{Episode, EpisodeRunner};
use crate::scenario::Scenario;

/// Runs scenarios back to back, one session each. Episode `i` uses run
/// seed `config.seed + i`. With an output directory, every session's audit
/// log is written to `<dir>/<scenario>.jsonl`.
#[derive(Debug, Clone)]
pub struct SuiteRunner {
    runner: EpisodeRunner,
    out_dir: Option<PathBuf>,
}

impl SuiteRunner {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runner: EpisodeRunner::new(config),
            out_dir: None,
        })
    }

    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    pub fn audit_path(&self, scenario: &Scenario) -> Option<PathBuf> {
        self.out_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.jsonl", scenario.name)))
    }

    /// One episode, logged to the output directory if there is one.
    pub async fn run_one(&self, scenario: &Scenario, run_seed: u64) -> Result<Episode> {
        let audit = match self.audit_path(scenario) {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                AuditLog::create(path)?
            }
            None => AuditLog::in_memory(),
        };
        self.runner.run(scenario, run_seed, audit).await
    }

    pub async fn run(&self, scenarios: &[Scenario]) -> Result<SuiteReport> {
        let base = self.runner.config().seed;
        let mut episodes = Vec::with_capacity(scenarios.len());
        for (i, scenario) in scenarios.iter().enumerate() {
            let episode = self.run_one(scenario, base.wrapping_add(i as u64)).await?;
            episodes.push(episode.report);
        }

        let report = SuiteReport::new(base, episodes);
        info!(
            episodes = report.summary.episodes,
            honest_flagged = report.summary.honest_flagged,
            pseudo_flagged = report.summary.pseudo_flagged,
            kernel_faults = report.summary.kernel_faults,
            "suite finished"
        );
        if let Some(dir) = &self.out_dir {
            report.write_to(dir)?;
        }
        Ok(report)
    }

    pub fn out_dir(&self) -> Option<&Path> {
        self.out_dir.as_deref()
    }
}
