//! Action-script runner
//!
//! Replays a script of user actions against a fresh in-memory ledger,
//! coordinating between the [`ScriptReader`] (input), the deposit and
//! withdrawal state machines, and the CSV writers (output).
//!
//! Each row is driven through its flow in order. A rejected action is logged
//! and the run continues with the next row. Once the script is exhausted the
//! runner waits for every scheduled confirmation, then writes the report.

use crate::cli::ReportKind;
use crate::config::PolicyConfig;
use crate::core::{
    LedgerContext, LedgerQuery, LedgerQueryEngine, LedgerService, StaticSession, SystemClock,
};
use crate::io::{write_ledger_csv, write_stats_csv, ScriptAction, ScriptReader};
use crate::types::{Account, LedgerError, UserId};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome counts of one script run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub applied: usize,
    pub rejected: usize,
}

/// Replays action scripts and writes a report
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    config: PolicyConfig,
    report: ReportKind,
}

impl ScriptRunner {
    pub fn new(config: PolicyConfig, report: ReportKind) -> Self {
        Self { config, report }
    }

    /// Run the script at `input_path` and write the report to `output`
    ///
    /// Fails only when the script cannot be opened or the report cannot be
    /// written; individual rows never abort the run.
    pub async fn process(
        &self,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<RunSummary, LedgerError> {
        let ctx = LedgerContext::in_memory(self.config.clone(), Arc::new(SystemClock));
        let reader = ScriptReader::new(input_path)?;

        let mut users = BTreeSet::new();
        let mut summary = RunSummary::default();

        for result in reader {
            let action = match result {
                Ok(action) => action,
                Err(e) => {
                    warn!(error = %e, "skipping script row");
                    summary.rejected += 1;
                    continue;
                }
            };

            users.insert(action.user().to_string());
            match apply(&ctx, &action).await {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    warn!(user_id = action.user(), error = %e, "action rejected");
                    summary.rejected += 1;
                }
            }
        }

        info!(in_flight = ctx.scheduler.in_flight(), "waiting for confirmations");
        ctx.scheduler.drain().await;

        match self.report {
            ReportKind::Ledger => write_ledger_report(&ctx, &users, output).await?,
            ReportKind::Stats => write_stats_report(&ctx, &users, output).await?,
        }

        info!(applied = summary.applied, rejected = summary.rejected, "script finished");
        Ok(summary)
    }
}

fn service_for(ctx: &LedgerContext, user: &str) -> LedgerService {
    LedgerService::new(ctx.clone(), Arc::new(StaticSession::user(user)))
}

async fn apply(ctx: &LedgerContext, action: &ScriptAction) -> Result<(), LedgerError> {
    let service = service_for(ctx, action.user());
    match action {
        ScriptAction::SetBalance { amount, .. } => service.set_balance(*amount),
        ScriptAction::Deposit { amount, .. } => {
            let mut deposit = service.start_deposit()?;
            deposit.enter_amount(*amount)?;
            deposit.confirm_payment_sent().await?;
            Ok(())
        }
        ScriptAction::Withdrawal {
            amount,
            destination,
            ..
        } => {
            let mut withdrawal = service.start_withdrawal()?;
            withdrawal.submit_details(*amount, destination).await?;
            withdrawal.confirm().await?;
            Ok(())
        }
    }
}

async fn write_ledger_report(
    ctx: &LedgerContext,
    users: &BTreeSet<UserId>,
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let queries = LedgerQueryEngine::new(ctx);
    let everything = LedgerQuery::new();
    let mut records = Vec::new();
    for user in users {
        records.extend(queries.matching(user, &everything).await?);
    }
    write_ledger_csv(&records, output)
}

async fn write_stats_report(
    ctx: &LedgerContext,
    users: &BTreeSet<UserId>,
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut summaries = Vec::with_capacity(users.len());
    for user in users {
        let service = service_for(ctx, user);
        let account = Account {
            user_id: user.clone(),
            balance: service.balance()?,
        };
        summaries.push((account, service.stats().await?));
    }
    write_stats_csv(&summaries, output)
}
