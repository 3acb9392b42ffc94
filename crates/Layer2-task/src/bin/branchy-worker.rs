//! branchy-worker - runs one offloaded task and exits
//!
//! Reads a single dispatch line from stdin, writes a single completion line
//! to stdout. Logs go to stderr, which the parent forwards to its own
//! `tracing` output.

use anyhow::Context;
use branchy_foundation::BranchyConfig;
use branchy_task::WorkerRuntime;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter; wins over everything else
const LOG_ENV: &str = "BRANCHY_LOG";

#[derive(Parser, Debug)]
#[command(name = "branchy-worker")]
#[command(author, version, about = "Runs one offloaded branchy task", long_about = None)]
struct Args {
    /// Log filter used when BRANCHY_LOG is not set (e.g. "debug")
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let fallback = args
        .log_level
        .or_else(|| BranchyConfig::load().ok().and_then(|config| config.log.filter))
        .unwrap_or_else(|| "warn".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&fallback)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    let completion = WorkerRuntime::new()
        .serve(stdin.lock(), stdout.lock())
        .context("failed to report the task completion")?;

    debug!(failed = completion.is_error(), "Worker done");
    Ok(())
}
