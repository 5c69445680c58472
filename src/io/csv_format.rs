//! CSV format handling for action scripts and ledger output
//!
//! This module centralizes all CSV format concerns, providing:
//! - ActionRecord structure for deserializing script rows
//! - Conversion from script rows to [`ScriptAction`]s
//! - Ledger export and per-user stats serialization
//!
//! All functions are pure (no file handling) for easy testing.

use crate::core::LedgerStats;
use crate::types::{Account, LedgerError, Transaction, UserId};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// Export columns, in order
pub const LEDGER_HEADER: [&str; 8] = [
    "Date",
    "Transaction ID",
    "Type",
    "Description",
    "Amount",
    "Status",
    "Recipient/Sender",
    "Crypto Amount",
];

pub const STATS_HEADER: [&str; 9] = [
    "user",
    "balance",
    "total_deposits",
    "total_withdrawals",
    "total_investments",
    "pending",
    "completed",
    "failed",
    "total_volume",
];

/// One row of an action script
///
/// Columns: user, action, amount, destination. `destination` is only read
/// for withdrawals.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ActionRecord {
    pub user: UserId,
    pub action: String,
    pub amount: Option<String>,
    pub destination: Option<String>,
}

/// A user action to replay against the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptAction {
    /// Seed the user's balance
    SetBalance { user: UserId, amount: Decimal },
    /// Enter an amount and confirm the payment was sent
    Deposit { user: UserId, amount: Decimal },
    /// Submit amount and destination, then confirm
    Withdrawal {
        user: UserId,
        amount: Decimal,
        destination: String,
    },
}

impl ScriptAction {
    pub fn user(&self) -> &str {
        match self {
            ScriptAction::SetBalance { user, .. }
            | ScriptAction::Deposit { user, .. }
            | ScriptAction::Withdrawal { user, .. } => user,
        }
    }
}

/// Convert an ActionRecord to a ScriptAction
///
/// Action names are case-insensitive. Every action needs an amount;
/// withdrawals also need a destination.
pub fn convert_action_record(record: ActionRecord) -> Result<ScriptAction, String> {
    let user = record.user.trim().to_string();
    if user.is_empty() {
        return Err("Missing user".to_string());
    }

    let amount = match record.amount.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Decimal::from_str(raw)
            .map_err(|_| format!("Invalid amount '{}' for user {}", raw, user))?,
        _ => {
            return Err(format!(
                "{} action for user {} requires an amount",
                record.action, user
            ))
        }
    };

    match record.action.trim().to_lowercase().as_str() {
        "balance" => Ok(ScriptAction::SetBalance { user, amount }),
        "deposit" => Ok(ScriptAction::Deposit { user, amount }),
        "withdrawal" => {
            let destination = record
                .destination
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .ok_or_else(|| format!("withdrawal for user {} requires a destination", user))?;
            Ok(ScriptAction::Withdrawal {
                user,
                amount,
                destination,
            })
        }
        other => Err(format!("Invalid action: '{}' for user {}", other, user)),
    }
}

/// Write transactions as the ledger export CSV
///
/// Rows are written in the order given. Records with no secondary-unit
/// amount show "-" in the last column.
pub fn write_ledger_csv(
    transactions: &[Transaction],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(LEDGER_HEADER)?;

    for tx in transactions {
        writer.write_record([
            tx.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            tx.id.to_string(),
            tx.tx_type.to_string(),
            tx.description.clone(),
            format!("{:.2}", tx.amount),
            tx.status.to_string(),
            tx.counterparty().unwrap_or("-").to_string(),
            tx.crypto_amount().unwrap_or_else(|| "-".to_string()),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write one row of balance and stats per user, sorted by user id
pub fn write_stats_csv(
    summaries: &[(Account, LedgerStats)],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(STATS_HEADER)?;

    let mut sorted: Vec<_> = summaries.iter().collect();
    sorted.sort_by(|a, b| a.0.user_id.cmp(&b.0.user_id));

    for (account, stats) in sorted {
        writer.write_record([
            account.user_id.clone(),
            format!("{:.2}", account.balance),
            format!("{:.2}", stats.total_deposits),
            format!("{:.2}", stats.total_withdrawals),
            format!("{:.2}", stats.total_investments),
            stats.pending_count.to_string(),
            stats.completed_count.to_string(),
            stats.failed_count.to_string(),
            format!("{:.2}", stats.total_volume),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{meta, Metadata, TransactionStatus, TransactionType};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use uuid::Uuid;

    fn record(user: &str, action: &str, amount: Option<&str>, destination: Option<&str>) -> ActionRecord {
        ActionRecord {
            user: user.to_string(),
            action: action.to_string(),
            amount: amount.map(str::to_string),
            destination: destination.map(str::to_string),
        }
    }

    #[rstest]
    #[case::balance("balance", ScriptAction::SetBalance { user: "u1".into(), amount: Decimal::new(1000, 0) })]
    #[case::deposit("deposit", ScriptAction::Deposit { user: "u1".into(), amount: Decimal::new(1000, 0) })]
    #[case::case_insensitive("DEPOSIT", ScriptAction::Deposit { user: "u1".into(), amount: Decimal::new(1000, 0) })]
    fn test_convert_action_record_valid(#[case] action: &str, #[case] expected: ScriptAction) {
        let result = convert_action_record(record("u1", action, Some("1000"), None));
        assert_eq!(result, Ok(expected));
    }

    #[test]
    fn test_convert_withdrawal_keeps_destination() {
        let result = convert_action_record(record("u1", "withdrawal", Some(" 250.50 "), Some(" 0xabc ")));

        assert_eq!(
            result,
            Ok(ScriptAction::Withdrawal {
                user: "u1".to_string(),
                amount: Decimal::new(25050, 2),
                destination: "0xabc".to_string(),
            })
        );
    }

    #[rstest]
    #[case::invalid_action("u1", "transfer", Some("100"), None, "Invalid action")]
    #[case::missing_amount("u1", "deposit", None, None, "requires an amount")]
    #[case::blank_amount("u1", "deposit", Some("  "), None, "requires an amount")]
    #[case::invalid_amount("u1", "deposit", Some("lots"), None, "Invalid amount")]
    #[case::missing_destination("u1", "withdrawal", Some("100"), None, "requires a destination")]
    #[case::missing_user(" ", "deposit", Some("100"), None, "Missing user")]
    fn test_convert_action_record_errors(
        #[case] user: &str,
        #[case] action: &str,
        #[case] amount: Option<&str>,
        #[case] destination: Option<&str>,
        #[case] expected_error: &str,
    ) {
        let result = convert_action_record(record(user, action, amount, destination));
        assert!(result.unwrap_err().contains(expected_error));
    }

    fn transaction(with_crypto: bool) -> Transaction {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        let mut metadata = Metadata::new();
        if with_crypto {
            metadata.insert(meta::CRYPTO_AMOUNT.to_string(), "0.01250000".into());
        }
        Transaction {
            id: Uuid::nil(),
            user_id: "u1".to_string(),
            tx_type: TransactionType::Deposit,
            amount: Decimal::new(500, 0),
            description: "Bitcoin deposit confirmed".to_string(),
            status: TransactionStatus::Completed,
            sender: Some("Bitcoin".to_string()),
            recipient: None,
            metadata,
            created_at: at,
            updated_at: at,
        }
    }

    #[rstest]
    #[case::with_crypto_amount(true, "0.01250000")]
    #[case::without_crypto_amount(false, "-")]
    fn test_write_ledger_csv(#[case] with_crypto: bool, #[case] last_column: &str) {
        let mut output = Vec::new();
        write_ledger_csv(&[transaction(with_crypto)], &mut output).unwrap();

        let expected = format!(
            "Date,Transaction ID,Type,Description,Amount,Status,Recipient/Sender,Crypto Amount\n\
             2024-06-01 10:30:00,{},deposit,Bitcoin deposit confirmed,500.00,completed,Bitcoin,{}\n",
            Uuid::nil(),
            last_column
        );
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }

    #[test]
    fn test_write_ledger_csv_empty() {
        let mut output = Vec::new();
        write_ledger_csv(&[], &mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Date,Transaction ID,Type,Description,Amount,Status,Recipient/Sender,Crypto Amount\n"
        );
    }

    #[test]
    fn test_write_stats_csv_sorted_by_user() {
        let stats = LedgerStats {
            total_deposits: Decimal::new(500, 0),
            completed_count: 1,
            total_volume: Decimal::new(500, 0),
            ..LedgerStats::default()
        };
        let mut bob = Account::new("bob");
        bob.balance = Decimal::new(600, 0);
        let alice = Account::new("alice");

        let mut output = Vec::new();
        write_stats_csv(&[(bob, stats), (alice, LedgerStats::default())], &mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "user,balance,total_deposits,total_withdrawals,total_investments,pending,completed,failed,total_volume\n\
             alice,0.00,0.00,0.00,0.00,0,0,0,0.00\n\
             bob,600.00,500.00,0.00,0.00,0,1,0,500.00\n"
        );
    }
}
