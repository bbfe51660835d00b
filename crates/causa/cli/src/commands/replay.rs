//! Session replay command

use std::path::PathBuf;

use causa_replay::{ReplayEngine, ReplayReport};
use clap::Args;

use super::Outcome;
use crate::error::CliResult;
use crate::output::{print_error, print_json, print_output, print_success, Field, OutputFormat};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Audit log (JSONL)
    pub file: PathBuf,

    /// Run seed the session was started with
    #[arg(long)]
    pub seed: u64,

    /// Replay a log whose session was never sealed
    #[arg(long)]
    pub allow_unsealed: bool,
}

/// Re-derive every logged outcome from the log and the seed alone.
pub fn execute(args: ReplayArgs, format: OutputFormat) -> CliResult<Outcome> {
    let mut engine = ReplayEngine::new(args.seed);
    if args.allow_unsealed {
        engine = engine.allow_unsealed();
    }
    let report = engine.replay_file(&args.file)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_output(fields(&report), format)?;
            if let Some(violation) = &report.chain.violation {
                print_error(&format!("chain broken at {violation}; nothing replayed"));
            } else if let Some(divergence) = &report.divergence {
                print_error(&format!("replay diverged: {divergence}"));
            } else {
                print_success("every logged outcome reproduced");
            }
        }
    }

    Ok(if report.valid {
        Outcome::Success
    } else {
        Outcome::Rejected
    })
}

fn fields(report: &ReplayReport) -> Vec<Field> {
    let t = &report.tally;
    let mut fields = vec![
        Field::new("valid", report.valid),
        Field::new("episode", report.episode_id.as_deref().unwrap_or("-")),
        Field::new("decisions", t.decisions),
        Field::new("granted/denied", format!("{}/{}", t.granted, t.denied)),
        Field::new("watchdog timeouts", t.timeouts),
        Field::new("executions", t.executions),
        Field::new("bypass attempts", t.bypass_attempts),
        Field::new("reveals", t.reveals),
        Field::new("probe outcomes", t.probes),
    ];
    if let Some(checked) = t.episode_checked {
        fields.push(Field::new("salted records checked", checked));
    }
    fields
}
