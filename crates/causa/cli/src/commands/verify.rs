//! Audit-chain verification command

use std::path::PathBuf;

use causa_audit::{ChainReport, IntegrityVerifier, VerifyOptions};
use clap::Args;

use super::Outcome;
use crate::error::CliResult;
use crate::output::{print_error, print_json, print_output, print_success, Field, OutputFormat};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Audit log (JSONL)
    pub file: PathBuf,

    /// Accept a log whose session was never sealed
    #[arg(long)]
    pub allow_unsealed: bool,
}

/// Re-walk the hash chain of an audit log. A broken chain is `Rejected`;
/// an unreadable file is an error.
pub fn execute(args: VerifyArgs, format: OutputFormat) -> CliResult<Outcome> {
    let options = if args.allow_unsealed {
        VerifyOptions::default()
    } else {
        VerifyOptions::sealed()
    };
    let report = IntegrityVerifier::verify_file(&args.file, options)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_output(fields(&report), format)?;
            match &report.violation {
                None => print_success(&format!("{} is intact", args.file.display())),
                Some(violation) => print_error(&format!("{}: {violation}", args.file.display())),
            }
        }
    }

    Ok(if report.valid {
        Outcome::Success
    } else {
        Outcome::Rejected
    })
}

fn fields(report: &ChainReport) -> Vec<Field> {
    vec![
        Field::new("valid", report.valid),
        Field::new(
            "entries verified",
            format!("{}/{}", report.verified_entries, report.total_entries),
        ),
        Field::new("sealed", report.sealed),
        Field::new("head hash", &report.head_hash),
    ]
}
