//! Single-episode command

use std::path::PathBuf;

use causa_audit::AuditLog;
use causa_harness::{find, EpisodeReport, EpisodeRunner};
use clap::Args;

use super::{HarnessArgs, Outcome};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::{print_json, print_output, print_success, print_warning, Field, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario name (see `causa scenarios`)
    #[arg(default_value = "honest-mci_minimal")]
    pub scenario: String,

    /// Write the audit log to this file
    #[arg(long)]
    pub audit: Option<PathBuf>,

    #[command(flatten)]
    pub harness: HarnessArgs,
}

/// Execute a single episode
pub async fn execute(args: RunArgs, config: &CliConfig, format: OutputFormat) -> CliResult<Outcome> {
    let harness = args.harness.apply(config.harness.clone());
    harness.validate()?;
    let scenario = find(&args.scenario)?;

    let audit_path = args.audit.or_else(|| {
        config
            .out_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.jsonl", scenario.name)))
    });
    let audit = match &audit_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            AuditLog::create(path)?
        }
        None => AuditLog::in_memory(),
    };

    let episode = EpisodeRunner::new(harness.clone())
        .run(&scenario, harness.seed, audit)
        .await?;
    let report = &episode.report;

    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Table => {
            print_output(fields(report), format)?;
            if let Some(path) = &audit_path {
                print_success(&format!("audit log written to {}", path.display()));
            }
            if report.flagged() {
                print_warning(&format!("agent flagged: {}", report.flags.join("; ")));
            }
        }
    }

    Ok(if report.kernel_faults.is_empty() {
        Outcome::Success
    } else {
        Outcome::Rejected
    })
}

fn fields(report: &EpisodeReport) -> Vec<Field> {
    let denials = report
        .denials
        .iter()
        .map(|(code, n)| format!("{code} x{n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let p = &report.probes;

    let mut fields = vec![
        Field::new("scenario", &report.scenario),
        Field::new("run seed", report.run_seed),
        Field::new("steps", report.steps),
        Field::new("granted", report.granted),
        Field::new("denied", format!("{} {denials}", report.denied).trim_end()),
        Field::new("executed", report.executed),
        Field::new("goal reached", report.goal_reached),
        Field::new(
            "P5 pass/fail/inconclusive/skipped",
            format!("{}/{}/{}/{}", p.p5_pass, p.p5_fail, p.p5_inconclusive, p.p5_skipped),
        ),
        Field::new("traps taken", format!("{}/{}", p.traps_attempted, p.traps_offered)),
        Field::new("probe breaches", p.breaches),
        Field::new(
            "reveals verified/failed",
            format!("{}/{}", report.reveals_verified, report.reveals_failed),
        ),
    ];
    if let Some(outcome) = &report.salted_consistency {
        let verdict = if outcome.passed { "pass" } else { "FAIL" };
        fields.push(Field::new(
            "salted consistency",
            format!("{verdict} ({} checked)", outcome.checked),
        ));
    }
    fields.extend([
        Field::new("audit entries", report.audit_entries),
        Field::new("head hash", &report.head_hash),
        Field::new("replay", if report.replay_valid { "ok" } else { "DIVERGED" }),
    ]);
    fields
}
