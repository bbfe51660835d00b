//! Causa CLI - drive the provenance kernel from a terminal
//!
//! Commands:
//! - Run one harness episode or the whole scenario suite
//! - Verify the hash chain of an audit log
//! - Replay a sealed session from its log and seed
//!
//! Exit status is 0 on success, 2 when a checked artifact is rejected
//! (broken chain, replay divergence, kernel fault) and 1 on any error.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod output;

use commands::{replay, run, suite, verify, Outcome};
use config::CliConfig;
use error::CliResult;

/// Causa CLI application
#[derive(Parser)]
#[command(name = "causa")]
#[command(about = "Causa - causal provenance kernel and reference harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CAUSA_CONFIG")]
    config: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run one episode of a scenario
    Run(run::RunArgs),

    /// Run scenarios and write a suite report
    Suite(suite::SuiteArgs),

    /// List the scenario catalogue
    Scenarios,

    /// Verify the hash chain of an audit log
    #[command(alias = "verify")]
    VerifyAudit(verify::VerifyArgs),

    /// Replay a session from its audit log
    Replay(replay::ReplayArgs),

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match dispatch(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> CliResult<Outcome> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let format = cli.output;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Run(args) => run::execute(args, &config, format).await,
        Commands::Suite(args) => suite::execute(args, &config, format).await,
        Commands::Scenarios => suite::list(format),
        Commands::VerifyAudit(args) => verify::execute(args, format),
        Commands::Replay(args) => replay::execute(args, format),
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(Outcome::Success)
        }
    }
}
