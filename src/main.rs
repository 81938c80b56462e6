//! treelock: admin CLI for the shared lock store.
//!
//! This is the main entry point for the `treelock` CLI. It installs logging,
//! parses arguments, dispatches to the appropriate command handler, and
//! handles errors with proper exit codes.

use anyhow::Context;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use treelock::cli::Cli;
use treelock::{commands, exit_codes};

/// Environment variable holding the log filter, e.g. `TREELOCK_LOG=debug`.
const LOG_ENV: &str = "TREELOCK_LOG";

fn init_logging() -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to set up LogTracer")?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}

fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        // Keep going; only diagnostics are lost.
        eprintln!("Warning: {:#}", err);
    }

    let cli = Cli::parse_args();

    match commands::dispatch(cli.global, cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            ExitCode::from(err.exit_code() as u8)
        }
    }
}
