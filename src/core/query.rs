//! Filtering, pagination and stats over a user's ledger
//!
//! This module provides [`LedgerQueryEngine`], the read side of the ledger.
//!
//! # Design
//!
//! Filters run over the user's complete ledger before pagination, so
//! `total_count`, `total_pages` and the stats always describe every matching
//! record, not just the ones on the fetched page. Filters apply in a fixed
//! order and compose with logical AND:
//!
//! 1. type (exact match, `None` for all)
//! 2. status (exact match, `None` for all)
//! 3. date range, against the clock's "now" at query time, inclusive lower bound
//! 4. free text, case-insensitive substring of id, description, sender or
//!    recipient (any field may match)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::Clock;
use super::context::LedgerContext;
use super::retry::with_timeout;
use super::stats::LedgerStats;
use super::traits::LedgerStore;
use crate::types::{LedgerError, Transaction, TransactionStatus, TransactionType};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Creation-time window relative to "now"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    #[default]
    All,
    /// Since midnight UTC
    Today,
    Last7Days,
    Last30Days,
    LastYear,
}

impl DateRange {
    /// Earliest `created_at` admitted, `None` for no bound
    pub fn lower_bound(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            DateRange::All => None,
            DateRange::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc()),
            DateRange::Last7Days => Some(now - ChronoDuration::days(7)),
            DateRange::Last30Days => Some(now - ChronoDuration::days(30)),
            DateRange::LastYear => Some(now - ChronoDuration::days(365)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::All => "all",
            DateRange::Today => "today",
            DateRange::Last7Days => "7d",
            DateRange::Last30Days => "30d",
            DateRange::LastYear => "1y",
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(DateRange::All),
            "today" => Ok(DateRange::Today),
            "7d" | "week" => Ok(DateRange::Last7Days),
            "30d" | "month" => Ok(DateRange::Last30Days),
            "1y" | "year" => Ok(DateRange::LastYear),
            other => Err(format!("Invalid date range: '{}'", other)),
        }
    }
}

/// Filters plus the requested page
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerQuery {
    pub tx_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub date_range: DateRange,
    pub search: Option<String>,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
}

impl Default for LedgerQuery {
    fn default() -> Self {
        Self {
            tx_type: None,
            status: None,
            date_range: DateRange::All,
            search: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, tx_type: TransactionType) -> Self {
        self.tx_type = Some(tx_type);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Whether `tx` passes every filter
    pub fn matches(&self, tx: &Transaction, now: DateTime<Utc>) -> bool {
        self.matches_with(tx, self.date_range.lower_bound(now), self.needle().as_deref())
    }

    fn matches_with(
        &self,
        tx: &Transaction,
        since: Option<DateTime<Utc>>,
        needle: Option<&str>,
    ) -> bool {
        if self.tx_type.is_some_and(|t| t != tx.tx_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != tx.status) {
            return false;
        }
        if since.is_some_and(|since| tx.created_at < since) {
            return false;
        }
        match needle {
            None => true,
            Some(needle) => {
                let hit = |field: &str| field.to_lowercase().contains(needle);
                hit(&tx.id.to_string())
                    || hit(&tx.description)
                    || tx.sender.as_deref().is_some_and(hit)
                    || tx.recipient.as_deref().is_some_and(hit)
            }
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerPage {
    pub items: Vec<Transaction>,
    /// Records matching the filters across all pages
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Stats over every matching record
    pub stats: LedgerStats,
}

impl LedgerPage {
    fn paginate(matching: Vec<Transaction>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_count = matching.len();
        let stats = LedgerStats::from_transactions(&matching);
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            items,
            total_count,
            page,
            page_size,
            total_pages: total_count.div_ceil(page_size),
            stats,
        }
    }
}

/// Read side of the ledger
#[derive(Debug, Clone)]
pub struct LedgerQueryEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl LedgerQueryEngine {
    pub fn new(ctx: &LedgerContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            clock: Arc::clone(&ctx.clock),
            timeout: ctx.config.store_timeout,
        }
    }

    /// Every record of `user_id` matching `query`, newest first, unpaged
    pub async fn matching(
        &self,
        user_id: &str,
        query: &LedgerQuery,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let records = with_timeout(
            "list_all_by_user",
            self.timeout,
            self.store.list_all_by_user(user_id),
        )
        .await?;
        let since = query.date_range.lower_bound(self.clock.now());
        let needle = query.needle();
        Ok(records
            .into_iter()
            .filter(|tx| query.matches_with(tx, since, needle.as_deref()))
            .collect())
    }

    /// Filter, then paginate
    pub async fn run(&self, user_id: &str, query: &LedgerQuery) -> Result<LedgerPage, LedgerError> {
        let matching = self.matching(user_id, query).await?;
        let page = LedgerPage::paginate(matching, query.page, query.page_size);
        debug!(
            user_id,
            page = page.page,
            total_count = page.total_count,
            total_pages = page.total_pages,
            "ledger query"
        );
        Ok(page)
    }

    /// Stats over the user's whole ledger, ignoring any filter
    pub async fn overall_stats(&self, user_id: &str) -> Result<LedgerStats, LedgerError> {
        let all = self.matching(user_id, &LedgerQuery::default()).await?;
        Ok(LedgerStats::from_transactions(&all))
    }

    /// Unfiltered page straight from the store, newest first
    pub async fn recent(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Transaction>, usize), LedgerError> {
        with_timeout(
            "list_by_user",
            self.timeout,
            self.store.list_by_user(user_id, page.max(1), page_size.max(1)),
        )
        .await
    }
}
