//! Scenario catalogue and suite commands

use std::path::PathBuf;

use causa_harness::{catalogue, find, EpisodeReport, Scenario, SuiteRunner};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use super::{HarnessArgs, Outcome};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::{
    print_info, print_json, print_output, print_success, print_warning, OutputFormat,
};

#[derive(Args, Debug)]
pub struct SuiteArgs {
    /// Run only this scenario (repeatable); default is the whole catalogue
    #[arg(long = "scenario")]
    pub scenarios: Vec<String>,

    /// Write audit logs and reports to this directory
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    #[command(flatten)]
    pub harness: HarnessArgs,
}

#[derive(Tabled, Serialize)]
struct ScenarioRow {
    #[tabled(rename = "Scenario")]
    name: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Interface")]
    mode: String,
    #[tabled(rename = "Salted")]
    salted: bool,
}

impl From<&Scenario> for ScenarioRow {
    fn from(s: &Scenario) -> Self {
        Self {
            name: s.name.clone(),
            agent: s.origin.to_string(),
            mode: s.mode.to_string(),
            salted: s.salted,
        }
    }
}

#[derive(Tabled, Serialize)]
struct EpisodeRow {
    #[tabled(rename = "Scenario")]
    scenario: String,
    #[tabled(rename = "Seed")]
    seed: u64,
    #[tabled(rename = "Granted")]
    granted: u64,
    #[tabled(rename = "Denied")]
    denied: u64,
    #[tabled(rename = "P5 p/f/i")]
    p5: String,
    #[tabled(rename = "Traps")]
    traps: String,
    #[tabled(rename = "Replay")]
    replay: &'static str,
    #[tabled(rename = "Verdict")]
    verdict: &'static str,
}

impl From<&EpisodeReport> for EpisodeRow {
    fn from(e: &EpisodeReport) -> Self {
        let p = &e.probes;
        Self {
            scenario: e.scenario.clone(),
            seed: e.run_seed,
            granted: e.granted,
            denied: e.denied,
            p5: format!("{}/{}/{}", p.p5_pass, p.p5_fail, p.p5_inconclusive),
            traps: format!("{}/{}", p.traps_attempted, p.traps_offered),
            replay: if e.replay_valid { "ok" } else { "DIVERGED" },
            verdict: if e.flagged() { "flagged" } else { "clean" },
        }
    }
}

/// List the scenario catalogue
pub fn list(format: OutputFormat) -> CliResult<Outcome> {
    let rows: Vec<ScenarioRow> = catalogue().iter().map(ScenarioRow::from).collect();
    print_output(rows, format)?;
    Ok(Outcome::Success)
}

/// Execute a suite
pub async fn execute(args: SuiteArgs, config: &CliConfig, format: OutputFormat) -> CliResult<Outcome> {
    let harness = args.harness.apply(config.harness.clone());
    let scenarios = if args.scenarios.is_empty() {
        catalogue()
    } else {
        args.scenarios
            .iter()
            .map(|name| find(name))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut runner = SuiteRunner::new(harness)?;
    if let Some(dir) = args.out_dir.or_else(|| config.out_dir.clone()) {
        runner = runner.with_out_dir(dir);
    }
    let report = runner.run(&scenarios).await?;
    let summary = &report.summary;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            let rows: Vec<EpisodeRow> = report.episodes.iter().map(EpisodeRow::from).collect();
            print_output(rows, format)?;
            print_info(&format!(
                "honest flagged {}/{}, pseudo flagged {}/{}",
                summary.honest_flagged, summary.honest, summary.pseudo_flagged, summary.pseudo
            ));
            if summary.separates() {
                print_success("every pseudo agent flagged, every honest agent clean");
            } else {
                print_warning("agents were not cleanly separated");
            }
            if let Some(dir) = runner.out_dir() {
                print_success(&format!("logs and reports written to {}", dir.display()));
            }
        }
    }

    Ok(if summary.kernel_faults == 0 {
        Outcome::Success
    } else {
        Outcome::Rejected
    })
}
