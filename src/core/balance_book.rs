//! Thread-safe per-user balance management
//!
//! This module provides the [`BalanceBook`], the single owner of every user's
//! spendable balance.
//!
//! # Design
//!
//! Balances live in a `DashMap` keyed by user. Each mutation runs inside the
//! map entry's lock, so a check-then-act sequence such as "is there enough
//! money? then subtract it" is atomic for that user. Two concurrent withdrawal
//! submissions can never both pass the balance check against a stale read.
//! Operations on different users do not block each other.
//!
//! The same entry also carries the user's withdrawn total for the current
//! UTC day, so [`BalanceBook::try_reserve`] checks the balance and the daily
//! cap under one lock.

use crate::types::{Account, LedgerError, UserId, ValidationError, ValidationErrors};
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

/// Daily withdrawal limit applied by [`BalanceBook::try_reserve`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyCap {
    pub limit: Decimal,
    /// UTC day the withdrawal counts towards
    pub day: NaiveDate,
    /// Non-failed withdrawals of `day` already in the ledger
    pub recorded: Decimal,
}

#[derive(Debug, Clone, Copy, Default)]
struct DailyWithdrawals {
    day: Option<NaiveDate>,
    total: Decimal,
}

impl DailyWithdrawals {
    fn on(&self, day: NaiveDate) -> Decimal {
        if self.day == Some(day) {
            self.total
        } else {
            Decimal::ZERO
        }
    }
}

#[derive(Debug)]
struct AccountSlot {
    account: Account,
    withdrawals: DailyWithdrawals,
}

/// Concurrent store of user balances
#[derive(Debug, Default)]
pub struct BalanceBook {
    accounts: DashMap<UserId, AccountSlot>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    fn with_slot<T>(&self, user_id: &str, f: impl FnOnce(&mut AccountSlot) -> T) -> T {
        let mut entry = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| AccountSlot {
                account: Account::new(user_id),
                withdrawals: DailyWithdrawals::default(),
            });
        f(entry.value_mut())
    }

    /// Current balance of `user_id`; unknown users hold zero
    pub fn balance(&self, user_id: &str) -> Decimal {
        self.accounts
            .get(user_id)
            .map(|slot| slot.account.balance)
            .unwrap_or(Decimal::ZERO)
    }

    /// Amount reserved for withdrawals by `user_id` on `day`
    pub fn withdrawn_on(&self, user_id: &str, day: NaiveDate) -> Decimal {
        self.accounts
            .get(user_id)
            .map(|slot| slot.withdrawals.on(day))
            .unwrap_or(Decimal::ZERO)
    }

    /// Overwrite the balance of `user_id`
    ///
    /// Used by the account collaborator to seed or reconcile balances.
    /// Negative values are rejected.
    pub fn set_balance(&self, user_id: &str, balance: Decimal) -> Result<(), LedgerError> {
        if balance < Decimal::ZERO {
            return Err(ValidationError::InsufficientBalance {
                available: Decimal::ZERO,
                requested: -balance,
            }
            .into());
        }
        self.update(user_id, |account| {
            account.balance = balance;
            Ok(())
        })
    }

    /// Update an account using a closure while holding its entry lock
    ///
    /// The account is created with a zero balance if it does not exist. If
    /// the closure returns an error the account is left as the closure left
    /// it, so closures must validate before mutating.
    pub fn update<F, T>(&self, user_id: &str, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Account) -> Result<T, LedgerError>,
    {
        self.with_slot(user_id, |slot| f(&mut slot.account))
    }

    /// Add `amount` to the balance and return the new balance
    pub fn credit(&self, user_id: &str, amount: Decimal) -> Result<Decimal, LedgerError> {
        let new_balance = self.update(user_id, |account| {
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::arithmetic_overflow("credit", user_id))?;
            Ok(account.balance)
        })?;
        debug!(user_id, %amount, %new_balance, "balance credited");
        Ok(new_balance)
    }

    /// Atomically check that `amount` is covered and subtract it
    ///
    /// Returns the new balance, or an insufficient-balance validation error
    /// with the balance untouched.
    pub fn try_debit(&self, user_id: &str, amount: Decimal) -> Result<Decimal, LedgerError> {
        let new_balance = self.update(user_id, |account| {
            if account.balance < amount {
                return Err(ValidationError::InsufficientBalance {
                    available: account.balance,
                    requested: amount,
                }
                .into());
            }
            account.balance -= amount;
            Ok(account.balance)
        })?;
        debug!(user_id, %amount, %new_balance, "balance debited");
        Ok(new_balance)
    }

    /// Reserve funds for a withdrawal
    ///
    /// Checks the balance and the daily cap, then debits `amount` and adds it
    /// to the withdrawn total of `cap.day`, all under the account's lock.
    /// The day's total is the larger of what this book reserved and what the
    /// ledger already records. On failure nothing changes and every broken
    /// rule is reported.
    pub fn try_reserve(
        &self,
        user_id: &str,
        amount: Decimal,
        cap: DailyCap,
    ) -> Result<Decimal, LedgerError> {
        let new_balance = self.with_slot(user_id, |slot| {
            let withdrawn_today = slot.withdrawals.on(cap.day).max(cap.recorded);
            let total = withdrawn_today
                .checked_add(amount)
                .ok_or_else(|| LedgerError::arithmetic_overflow("reserve", user_id))?;

            let mut errors = ValidationErrors::new();
            if slot.account.balance < amount {
                errors.push(ValidationError::InsufficientBalance {
                    available: slot.account.balance,
                    requested: amount,
                });
            }
            if total > cap.limit {
                errors.push(ValidationError::DailyLimitExceeded {
                    limit: cap.limit,
                    withdrawn_today,
                    requested: amount,
                });
            }
            errors.into_result()?;

            slot.account.balance -= amount;
            slot.withdrawals = DailyWithdrawals {
                day: Some(cap.day),
                total,
            };
            Ok::<_, LedgerError>(slot.account.balance)
        })?;
        debug!(user_id, %amount, %new_balance, day = %cap.day, "withdrawal reserved");
        Ok(new_balance)
    }

    /// Undo a [`try_reserve`](Self::try_reserve)
    ///
    /// Credits `amount` back and takes it off the withdrawn total of `day`.
    pub fn release(
        &self,
        user_id: &str,
        amount: Decimal,
        day: NaiveDate,
    ) -> Result<Decimal, LedgerError> {
        let new_balance = self.with_slot(user_id, |slot| {
            slot.account.balance = slot
                .account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::arithmetic_overflow("release", user_id))?;
            if slot.withdrawals.day == Some(day) {
                slot.withdrawals.total = (slot.withdrawals.total - amount).max(Decimal::ZERO);
            }
            Ok::<_, LedgerError>(slot.account.balance)
        })?;
        debug!(user_id, %amount, %new_balance, "withdrawal reservation released");
        Ok(new_balance)
    }

    /// Snapshot of every known account
    pub fn all_accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|entry| entry.value().account.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_unknown_user_has_zero_balance() {
        let book = BalanceBook::new();
        assert_eq!(book.balance("nobody"), Decimal::ZERO);
    }

    #[test]
    fn test_set_and_read_balance() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(500000, 2)).unwrap();
        assert_eq!(book.balance("u1"), Decimal::new(5000, 0));
    }

    #[test]
    fn test_set_negative_balance_rejected() {
        let book = BalanceBook::new();
        assert!(book.set_balance("u1", Decimal::new(-1, 0)).is_err());
        assert_eq!(book.balance("u1"), Decimal::ZERO);
    }

    #[test]
    fn test_credit_adds_amount() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(100, 0)).unwrap();

        let new_balance = book.credit("u1", Decimal::new(50000, 2)).unwrap();

        assert_eq!(new_balance, Decimal::new(600, 0));
        assert_eq!(book.balance("u1"), Decimal::new(600, 0));
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::MAX).unwrap();

        let result = book.credit("u1", Decimal::ONE);

        assert!(matches!(result, Err(LedgerError::ArithmeticOverflow { .. })));
        assert_eq!(book.balance("u1"), Decimal::MAX);
    }

    #[test]
    fn test_try_debit_insufficient_leaves_balance() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(50_000, 0)).unwrap();

        let err = book.try_debit("u1", Decimal::new(100_000, 0)).unwrap_err();

        assert!(err
            .validation_errors()
            .unwrap()
            .contains(|e| matches!(e, ValidationError::InsufficientBalance { .. })));
        assert_eq!(book.balance("u1"), Decimal::new(50_000, 0));
    }

    #[test]
    fn test_try_debit_exact_balance() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(1000, 0)).unwrap();

        assert_eq!(
            book.try_debit("u1", Decimal::new(1000, 0)).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let book = Arc::new(BalanceBook::new());
        book.set_balance("u1", Decimal::new(1000, 0)).unwrap();

        // 20 threads each try to take 100 from a balance of 1000
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let book = Arc::clone(&book);
                thread::spawn(move || book.try_debit("u1", Decimal::new(100, 0)).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 10);
        assert_eq!(book.balance("u1"), Decimal::ZERO);
    }

    #[test]
    fn test_concurrent_credits_different_users() {
        let book = Arc::new(BalanceBook::new());

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let book = Arc::clone(&book);
                thread::spawn(move || {
                    book.credit(&format!("u{}", i), Decimal::new(i + 1, 0))
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..10 {
            assert_eq!(book.balance(&format!("u{}", i)), Decimal::new(i + 1, 0));
        }
        assert_eq!(book.all_accounts().len(), 10);
    }

    fn cap(limit: i64, recorded: i64) -> DailyCap {
        DailyCap {
            limit: Decimal::new(limit, 0),
            day: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            recorded: Decimal::new(recorded, 0),
        }
    }

    #[test]
    fn test_try_reserve_counts_towards_the_day() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(5_000, 0)).unwrap();
        let cap = cap(1_000, 0);

        assert_eq!(
            book.try_reserve("u1", Decimal::new(800, 0), cap).unwrap(),
            Decimal::new(4_200, 0)
        );
        let err = book.try_reserve("u1", Decimal::new(800, 0), cap).unwrap_err();

        assert!(err.validation_errors().unwrap().contains(|e| matches!(
            e,
            ValidationError::DailyLimitExceeded { withdrawn_today, .. }
                if *withdrawn_today == Decimal::new(800, 0)
        )));
        assert_eq!(book.balance("u1"), Decimal::new(4_200, 0));
        assert_eq!(book.withdrawn_on("u1", cap.day), Decimal::new(800, 0));
    }

    #[rstest]
    #[case::recorded_above_reserved(900, 200, false)]
    #[case::recorded_below_cap(300, 200, true)]
    fn test_try_reserve_uses_recorded_withdrawals(
        #[case] recorded: i64,
        #[case] amount: i64,
        #[case] allowed: bool,
    ) {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(5_000, 0)).unwrap();

        let result = book.try_reserve("u1", Decimal::new(amount, 0), cap(1_000, recorded));

        assert_eq!(result.is_ok(), allowed);
    }

    #[test]
    fn test_try_reserve_reports_balance_and_cap_together() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(100, 0)).unwrap();

        let err = book
            .try_reserve("u1", Decimal::new(2_000, 0), cap(1_000, 0))
            .unwrap_err();

        assert_eq!(err.validation_errors().unwrap().errors().len(), 2);
        assert_eq!(book.balance("u1"), Decimal::new(100, 0));
    }

    #[test]
    fn test_new_day_resets_reserved_total() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(5_000, 0)).unwrap();
        let today = cap(1_000, 0);
        book.try_reserve("u1", Decimal::new(1_000, 0), today).unwrap();

        let tomorrow = DailyCap {
            day: today.day.succ_opt().unwrap(),
            ..today
        };

        assert!(book.try_reserve("u1", Decimal::new(1_000, 0), tomorrow).is_ok());
        assert_eq!(book.withdrawn_on("u1", today.day), Decimal::ZERO);
    }

    #[test]
    fn test_release_restores_balance_and_daily_total() {
        let book = BalanceBook::new();
        book.set_balance("u1", Decimal::new(1_000, 0)).unwrap();
        let cap = cap(1_000, 0);
        book.try_reserve("u1", Decimal::new(600, 0), cap).unwrap();

        let balance = book.release("u1", Decimal::new(600, 0), cap.day).unwrap();

        assert_eq!(balance, Decimal::new(1_000, 0));
        assert_eq!(book.withdrawn_on("u1", cap.day), Decimal::ZERO);
    }

    #[test]
    fn test_concurrent_reserves_respect_daily_cap() {
        let book = Arc::new(BalanceBook::new());
        book.set_balance("u1", Decimal::new(100_000, 0)).unwrap();
        let cap = cap(1_000, 0);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let book = Arc::clone(&book);
                thread::spawn(move || book.try_reserve("u1", Decimal::new(300, 0), cap).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(book.withdrawn_on("u1", cap.day), Decimal::new(900, 0));
        assert_eq!(book.balance("u1"), Decimal::new(99_100, 0));
    }
}
