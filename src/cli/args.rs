use crate::config::PolicyConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Replay deposit and withdrawal actions against an in-memory ledger
#[derive(Parser, Debug)]
#[command(name = "rust-ledger-engine")]
#[command(about = "Replay deposit and withdrawal actions against an in-memory ledger", long_about = None)]
pub struct CliArgs {
    /// Action script with columns user, action, amount, destination
    #[arg(value_name = "SCRIPT", help = "Path to the action script CSV file")]
    pub script: PathBuf,

    /// Seconds before a pending deposit is confirmed
    #[arg(
        long = "completion-delay-secs",
        value_name = "SECS",
        help = "Deposit confirmation delay in seconds (default: LEDGER_DEPOSIT_DELAY_SECS or 30)"
    )]
    pub completion_delay_secs: Option<u64>,

    /// Seconds before a processing withdrawal is completed
    #[arg(
        long = "withdrawal-delay-secs",
        value_name = "SECS",
        help = "Withdrawal completion delay in seconds (default: LEDGER_WITHDRAWAL_DELAY_SECS or 30)"
    )]
    pub withdrawal_delay_secs: Option<u64>,

    /// What to write to stdout once every action has settled
    #[arg(
        long = "report",
        value_name = "REPORT",
        default_value = "ledger",
        help = "Output: 'ledger' for the transaction export or 'stats' for per-user totals"
    )]
    pub report: ReportKind,
}

/// Output produced after the script has run
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    Ledger,
    Stats,
}

impl CliArgs {
    /// Apply the delay flags on top of `config`
    pub fn apply_overrides(&self, mut config: PolicyConfig) -> PolicyConfig {
        if let Some(secs) = self.completion_delay_secs {
            config.deposit_completion_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.withdrawal_delay_secs {
            config.withdrawal_completion_delay = Duration::from_secs(secs);
        }
        config
    }
}
