//! Core business logic module
//!
//! This module contains the ledger components:
//! - `traits` - Store and session abstractions
//! - `ledger_store` - In-memory transaction store with change notifications
//! - `balance_book` - Per-user balances with atomic check-and-debit
//! - `validation` - Address, amount and fee rules
//! - `settlement` / `scheduler` - Delayed confirmation and completion jobs
//! - `deposit` / `withdrawal` - The two user-facing flow state machines
//! - `query` / `stats` / `live_view` - Filtered, paginated and live reads
//! - `service` - Session-scoped entry point tying it all together

pub mod balance_book;
pub mod clock;
pub mod context;
pub mod deposit;
pub mod ledger_store;
pub mod live_view;
pub mod notifier;
pub mod query;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod settlement;
pub mod stats;
pub mod traits;
pub mod validation;
pub mod withdrawal;

pub use balance_book::{BalanceBook, DailyCap};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::LedgerContext;
pub use deposit::{DepositMachine, DepositQuote, DepositState};
pub use ledger_store::InMemoryLedgerStore;
pub use live_view::LiveLedgerView;
pub use notifier::{ChangeNotifier, LedgerChanged};
pub use query::{DateRange, LedgerPage, LedgerQuery, LedgerQueryEngine, DEFAULT_PAGE_SIZE};
pub use retry::RetryPolicy;
pub use scheduler::{ConfirmationHandle, ConfirmationScheduler, JobState};
pub use service::LedgerService;
pub use settlement::{Settled, Settlement, SettlementJob};
pub use stats::LedgerStats;
pub use traits::{LedgerStore, Session, StaticSession};
pub use validation::{detect_network, FeeBreakdown, Network};
pub use withdrawal::{WithdrawalMachine, WithdrawalRequest, WithdrawalState};
