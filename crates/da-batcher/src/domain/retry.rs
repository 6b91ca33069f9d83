//! Bounded retry policy shared by every stage.
//!
//! Two flavours of retry use the same policy:
//! - per-blob retries across cycles, tracked by the blob's stored counter
//!   (`is_exhausted`)
//! - in-call retries of idempotent chain reads (`retry`), spaced by an
//!   exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Retry ceiling plus backoff schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
            backoff_max,
        }
    }

    /// A blob that already used `retries` attempts may not be retried again.
    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }

    /// Delay before attempt `attempt + 1`: `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis().min(u64::MAX as u128) as u64;
        let backoff_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(16)));
        Duration::from_millis(backoff_ms).min(self.backoff_max)
    }

    /// Run `op` until it succeeds, fails permanently, or the ceiling is hit.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && !self.is_exhausted(attempt) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "{} failed, retrying",
                        what
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatcherError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1));
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(60), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let calls = AtomicU32::new(0);

        let value = policy
            .retry("block number", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BatcherError::Chain("connection refused".into()))
                } else {
                    Ok(42u64)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_at_ceiling() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .retry("block number", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BatcherError::Chain("down".into()))
            })
            .await;

        assert!(result.is_err());
        // First attempt plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .retry("sign", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BatcherError::Signing("bad key".into()))
            })
            .await;

        assert!(matches!(result, Err(BatcherError::Signing(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
