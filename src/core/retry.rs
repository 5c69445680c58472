//! Bounded retry and per-call timeouts for ledger store calls
//!
//! Every store call is a suspension point that may fail or hang. Calls made
//! on behalf of a user action are wrapped in [`with_timeout`] and surfaced
//! immediately; scheduled completions, which are idempotent, go through
//! [`RetryPolicy::retry_async`] as well.

use crate::types::LedgerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Exponential backoff policy for async operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
        }
    }

    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self::new(1, 1, 1)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Run `op` until it succeeds, a non-recoverable error occurs, or the
    /// attempts are exhausted
    ///
    /// Only persistence failures are retried; validation and inconsistent
    /// state errors are returned on the first occurrence.
    pub async fn retry_async<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts
                        || err.kind() != crate::types::ErrorKind::Persistence
                    {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(operation, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying ledger call");
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 250, 5_000)
    }
}

/// Bound a store call by `limit`, mapping expiry to [`LedgerError::StoreTimeout`]
pub async fn with_timeout<T, Fut>(operation: &str, limit: Duration, fut: Fut) -> Result<T, LedgerError>
where
    Fut: Future<Output = Result<T, LedgerError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::store_timeout(operation, limit.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
    }

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 500);
        let delays: Vec<_> = (0..5).map(|attempt| policy.next_delay(attempt)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500));
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_retries_until_success() {
        let policy = RetryPolicy::new(3, 10, 10);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let result = policy
            .retry_async("update", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(LedgerError::store_unavailable("update", "busy"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2, 10, 10);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = policy
            .retry_async("update", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(LedgerError::store_unavailable("update", "down")) }
            })
            .await;

        assert!(matches!(result, Err(LedgerError::StoreUnavailable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_does_not_retry_inconsistent_state() {
        let policy = RetryPolicy::new(5, 10, 10);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = policy
            .retry_async("complete", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(LedgerError::transaction_not_found(uuid::Uuid::nil(), "complete")) }
            })
            .await;

        assert!(matches!(result, Err(LedgerError::TransactionNotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_expiry() {
        let result: Result<(), _> = with_timeout("list", Duration::from_millis(50), async {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(LedgerError::store_timeout("list", 50)));
    }
}
