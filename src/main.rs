//! Ledger engine CLI
//!
//! Replays an action script against an in-memory ledger and writes a report.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- actions.csv > ledger.csv
//! cargo run -- --report stats actions.csv > stats.csv
//! cargo run -- --completion-delay-secs 0 --withdrawal-delay-secs 0 actions.csv
//! RUST_LOG=debug cargo run -- actions.csv
//! ```
//!
//! Policy limits come from `LEDGER_*` environment variables (or a `.env`
//! file); the delay flags override the configured delays. Logs go to stderr
//! so stdout carries only the CSV report.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (invalid configuration, script not readable, output failure)

use rust_ledger_engine::cli;
use rust_ledger_engine::config::PolicyConfig;
use rust_ledger_engine::runner::ScriptRunner;
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();

    let config = match PolicyConfig::from_env() {
        Ok(config) => args.apply_overrides(config),
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };

    let runner = ScriptRunner::new(config, args.report);
    let mut output = std::io::stdout();
    if let Err(e) = runner.process(&args.script, &mut output).await {
        error!(error = %e, "run failed");
        process::exit(1);
    }
}
