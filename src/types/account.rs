//! Account-related types for the ledger engine
//!
//! This module defines the per-user balance record owned by the
//! [`BalanceBook`](crate::core::BalanceBook).

use super::transaction::UserId;
use rust_decimal::Decimal;

/// Spendable balance of a single user
///
/// The balance is a non-negative decimal. It is credited when a deposit is
/// confirmed and debited as soon as a withdrawal submission succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The owning user
    pub user_id: UserId,

    /// Funds available for withdrawal or investment
    ///
    /// Never driven below zero by an operation the engine itself authorizes.
    pub balance: Decimal,
}

impl Account {
    /// Create a new account with a zero balance
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Account {
            user_id: user_id.into(),
            balance: Decimal::ZERO,
        }
    }
}
