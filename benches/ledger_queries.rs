//! Benchmark suite for ledger reads
//!
//! Measures filtered pagination and stats aggregation over in-memory ledgers
//! of increasing size using the divan benchmarking framework.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Each ledger is seeded with a repeating mix of deposits, withdrawals and
//! investments across every status, spread over the last year.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_ledger_engine::config::PolicyConfig;
use rust_ledger_engine::core::{
    DateRange, LedgerContext, LedgerQuery, LedgerQueryEngine, LedgerStats, SystemClock,
};
use rust_ledger_engine::types::{TransactionDraft, TransactionStatus, TransactionType};
use std::sync::Arc;
use tokio::runtime::Runtime;

const SIZES: &[usize] = &[100, 1_000, 10_000];

fn main() {
    divan::main();
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

fn seeded(rt: &Runtime, records: usize) -> LedgerContext {
    let ctx = LedgerContext::in_memory(PolicyConfig::default(), Arc::new(SystemClock));
    let now = chrono::Utc::now();
    rt.block_on(async {
        for i in 0..records {
            let (tx_type, amount) = match i % 3 {
                0 => (TransactionType::Deposit, Decimal::new(500, 0)),
                1 => (TransactionType::Withdrawal, Decimal::new(-200, 0)),
                _ => (TransactionType::Investment, Decimal::new(-1_000, 0)),
            };
            let status = match i % 4 {
                0 => TransactionStatus::Pending,
                1 => TransactionStatus::Failed,
                _ => TransactionStatus::Completed,
            };
            let draft = TransactionDraft::pending("bench", tx_type, amount, format!("record {}", i))
                .with_status(status)
                .created_at(now - Duration::hours((i % 8_760) as i64));
            ctx.store.insert(draft).await.expect("Seeding failed");
        }
    });
    ctx
}

/// Unfiltered first page
#[divan::bench(args = SIZES)]
fn first_page(bencher: divan::Bencher, records: usize) {
    let rt = runtime();
    let ctx = seeded(&rt, records);
    let engine = LedgerQueryEngine::new(&ctx);
    let query = LedgerQuery::new();

    bencher.bench_local(|| {
        rt.block_on(engine.run("bench", &query))
            .expect("Query failed")
    });
}

/// Type, status, date and free-text filters combined, deep page
#[divan::bench(args = SIZES)]
fn filtered_page(bencher: divan::Bencher, records: usize) {
    let rt = runtime();
    let ctx = seeded(&rt, records);
    let engine = LedgerQueryEngine::new(&ctx);
    let query = LedgerQuery::new()
        .with_type(TransactionType::Deposit)
        .with_status(TransactionStatus::Completed)
        .with_date_range(DateRange::Last30Days)
        .with_search("record 1")
        .with_page(3, 10);

    bencher.bench_local(|| {
        rt.block_on(engine.run("bench", &query))
            .expect("Query failed")
    });
}

/// Stats aggregation alone, without the store round-trip
#[divan::bench(args = SIZES)]
fn stats_only(bencher: divan::Bencher, records: usize) {
    let rt = runtime();
    let ctx = seeded(&rt, records);
    let all = rt
        .block_on(LedgerQueryEngine::new(&ctx).matching("bench", &LedgerQuery::new()))
        .expect("Query failed");

    bencher.bench_local(|| LedgerStats::from_transactions(&all));
}
