//! A ledger page that keeps itself current
//!
//! [`LiveLedgerView`] listens to the [`ChangeNotifier`] for its user and
//! re-runs its current query on every signal, including signals it lagged
//! behind on. The refreshed page is published on a `watch` channel only when
//! it differs from the one already shown, so a write that falls outside the
//! current filters leaves observers untouched.

use futures::stream::{self, Stream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::notifier::{ChangeNotifier, LedgerChanged};
use super::query::{LedgerPage, LedgerQuery, LedgerQueryEngine};
use crate::types::{LedgerError, UserId};

/// Self-refreshing query result for one user
#[derive(Debug)]
pub struct LiveLedgerView {
    user_id: UserId,
    query: watch::Sender<LedgerQuery>,
    page: watch::Receiver<LedgerPage>,
    refreshes: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl LiveLedgerView {
    /// Run `query` once and keep the result current
    pub async fn open(
        engine: LedgerQueryEngine,
        notifier: &ChangeNotifier,
        user_id: impl Into<UserId>,
        query: LedgerQuery,
    ) -> Result<Self, LedgerError> {
        let user_id = user_id.into();
        // subscribe before the first fetch so no write slips between them
        let events = notifier.subscribe(&user_id);
        let initial = engine.run(&user_id, &query).await?;

        let (query_tx, query_rx) = watch::channel(query);
        let (page_tx, page_rx) = watch::channel(initial);
        let refreshes = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(refresh_loop(
            engine,
            user_id.clone(),
            events,
            query_rx,
            page_tx,
            Arc::clone(&refreshes),
        ));

        Ok(Self {
            user_id,
            query: query_tx,
            page: page_rx,
            refreshes,
            task,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The page currently shown
    pub fn current(&self) -> LedgerPage {
        self.page.borrow().clone()
    }

    pub fn query(&self) -> LedgerQuery {
        self.query.borrow().clone()
    }

    /// Replace the filters or page; the view refreshes in the background
    pub fn set_query(&self, query: LedgerQuery) {
        self.query.send_replace(query);
    }

    /// A receiver that wakes whenever the shown page changes
    pub fn subscribe(&self) -> watch::Receiver<LedgerPage> {
        self.page.clone()
    }

    /// Every page shown from now on, starting with the current one
    ///
    /// The stream ends when the view is dropped.
    pub fn pages(&self) -> impl Stream<Item = LedgerPage> + Send + 'static {
        let mut receiver = self.page.clone();
        receiver.mark_changed();
        stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let page = receiver.borrow_and_update().clone();
            Some((page, receiver))
        })
    }

    /// Wait for the next page change
    pub async fn changed(&mut self) -> Result<LedgerPage, LedgerError> {
        self.page
            .changed()
            .await
            .map_err(|_| LedgerError::store_unavailable("live view", "refresh task stopped"))?;
        Ok(self.page.borrow_and_update().clone())
    }

    /// Number of refreshes run since the view opened
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Drop for LiveLedgerView {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn refresh_loop(
    engine: LedgerQueryEngine,
    user_id: UserId,
    mut events: broadcast::Receiver<LedgerChanged>,
    mut query: watch::Receiver<LedgerQuery>,
    page: watch::Sender<LedgerPage>,
    refreshes: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(user_id = %user_id, skipped, "live view lagged, refreshing once");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = query.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current = query.borrow_and_update().clone();
        match engine.run(&user_id, &current).await {
            Ok(fresh) => {
                let replaced = page.send_if_modified(|shown| {
                    if *shown == fresh {
                        false
                    } else {
                        *shown = fresh;
                        true
                    }
                });
                debug!(user_id = %user_id, replaced, "live view refreshed");
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "live view refresh failed, keeping last page");
            }
        }
        refreshes.fetch_add(1, Ordering::SeqCst);
    }
}
