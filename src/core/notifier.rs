//! Per-user "ledger changed" push channel
//!
//! The notifier carries no payload beyond the user id: listeners decide for
//! themselves what to refetch. Each user gets a lazily created tokio
//! `broadcast` channel, so any number of views can listen and a slow listener
//! only ever misses signals it would have collapsed into one refresh anyway.

use crate::types::UserId;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Signal that some ledger record owned by `user_id` was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerChanged {
    pub user_id: UserId,
}

const DEFAULT_CAPACITY: usize = 64;

/// Fan-out of ledger change signals, keyed by user
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    channels: Arc<DashMap<UserId, broadcast::Sender<LedgerChanged>>>,
    capacity: usize,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, user_id: &str) -> broadcast::Sender<LedgerChanged> {
        self.channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Start listening for changes to `user_id`'s ledger
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<LedgerChanged> {
        self.sender(user_id).subscribe()
    }

    /// Invoke `callback` for every change signal until the returned task is
    /// aborted or the notifier is dropped
    pub fn subscribe_with<F, Fut>(&self, user_id: &str, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(LedgerChanged) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut receiver = self.subscribe(user_id);
        let user = user_id.to_string();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => callback(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(user_id = %user, skipped, "listener lagged, collapsing signals");
                        callback(LedgerChanged {
                            user_id: user.clone(),
                        })
                        .await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Emit a change signal for `user_id`
    ///
    /// Writers outside this process call this too. Returns the number of
    /// listeners reached.
    pub fn notify(&self, user_id: &str) -> usize {
        let Some(sender) = self.channels.get(user_id).map(|s| s.clone()) else {
            trace!(user_id, "no listeners for ledger change");
            return 0;
        };
        let reached = sender
            .send(LedgerChanged {
                user_id: user_id.to_string(),
            })
            .unwrap_or(0);
        debug!(user_id, reached, "ledger change published");
        reached
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
