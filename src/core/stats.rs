//! Per-type and per-status totals over a set of transactions
//!
//! Category totals only count completed records, while `total_volume` counts
//! every record whatever its status. Both are absolute values, and saturate
//! at `Decimal::MAX` instead of overflowing.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{Transaction, TransactionStatus, TransactionType};

/// Aggregates shown next to a ledger listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Completed deposits
    pub total_deposits: Decimal,
    /// Completed withdrawals
    pub total_withdrawals: Decimal,
    /// Completed investments, purchases and returns alike
    pub total_investments: Decimal,
    /// Pending and processing records
    pub pending_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Every record, any status
    pub total_volume: Decimal,
}

impl LedgerStats {
    pub fn from_transactions<'a, I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut stats = Self::default();
        for tx in transactions {
            stats.add(tx);
        }
        stats
    }

    fn add(&mut self, tx: &Transaction) {
        let magnitude = tx.amount.abs();
        self.total_volume = self.total_volume.saturating_add(magnitude);

        match tx.status {
            TransactionStatus::Pending | TransactionStatus::Processing => self.pending_count += 1,
            TransactionStatus::Failed => self.failed_count += 1,
            TransactionStatus::Completed => {
                self.completed_count += 1;
                let total = match tx.tx_type {
                    TransactionType::Deposit => &mut self.total_deposits,
                    TransactionType::Withdrawal => &mut self.total_withdrawals,
                    TransactionType::Investment => &mut self.total_investments,
                    TransactionType::Transfer => return,
                };
                *total = total.saturating_add(magnitude);
            }
        }
    }
}
