//! Retry Logic with Exponential Backoff
//!
//! Object-store writes and meta commits go through `retry_write`, which
//! retries transient failures with exponential backoff.
//!
//! ## Retryable vs Non-Retryable Errors
//!
//! **Retryable** (transient failures):
//! - `Unavailable`: object store 5xx, network failure, allocator hiccup
//!
//! **Non-Retryable** (permanent failures):
//! - `InvalidArgument`, `NotFound`, `Aborted`: won't succeed on retry
//! - `Internal`: already escalated past the point where a retry helps
//! - `Cancelled`: the caller gave up
//!
//! Cancellation is observed at retry boundaries: a cancelled token stops
//! the loop before the next attempt and during any backoff sleep.

use crate::config::SyncRetryConfig;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Retry policy: attempt count and backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncRetryConfig::default())
    }
}

impl From<&SyncRetryConfig> for RetryPolicy {
    fn from(config: &SyncRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.backoff_initial_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based), doubling each time
    /// and capped at `max_backoff`
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor.min(u32::MAX as u64) as u32)
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails permanently, exhausts the policy, or
/// the token is cancelled.
pub async fn retry_write<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op_name: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 0..policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            Err(err) => {
                if err.is_retriable() {
                    tracing::error!(
                        op = op_name,
                        attempts = policy.max_attempts,
                        error = %err,
                        "Retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }

    unreachable!("retry loop always returns within max_attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result = retry_write(&fast_policy(5), &CancellationToken::new(), "put", move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Unavailable("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<()> =
            retry_write(&fast_policy(3), &CancellationToken::new(), "put", move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Unavailable("503".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<()> =
            retry_write(&fast_policy(5), &CancellationToken::new(), "put", move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::InvalidArgument("bad".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = retry_write(&fast_policy(3), &cancel, "put", || async {
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        // Capped
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }
}
