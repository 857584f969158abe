//! Backoff for provider reads.
//!
//! Only errors that [`RaffleError::is_transient`] accepts are retried; everything else
//! surfaces on the first failure. Writes to the provider are never retried here: intent
//! creation relies on the provider idempotency key instead.

use crate::error::Result;
#[cfg(doc)]
use crate::error::RaffleError;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff schedule.
///
/// Defaults to 3 retries starting at 100ms, doubling, capped at 2s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `max_retries` retries starting at `initial_delay`, default growth and cap.
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let scaled = self.initial_delay.as_secs_f64() * factor;
        if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        }
    }
}

/// Run `operation`, retrying transient failures per `policy`.
///
/// # Errors
///
/// The first permanent error, or the last transient one once the retries are spent.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() || retry >= policy.max_retries => {
                if retry > 0 {
                    tracing::warn!(retries = retry, error = %err, "Giving up on provider call");
                }
                return Err(err);
            }
            Err(err) => {
                let delay = policy.backoff(retry);
                tracing::debug!(
                    retry,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transient provider failure, backing off"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::RaffleError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_then_caps() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(500),
            ..RetryPolicy::default()
        };

        let delays: Vec<u128> = (0..5).map(|r| policy.backoff(r).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn provider_hiccups_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_transient(RetryPolicy::new(3, Duration::from_millis(1)), || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RaffleError::ProviderError("503".to_string()))
                } else {
                    Ok("pi_1")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "pi_1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry_transient(RetryPolicy::new(2, Duration::from_millis(1)), || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RaffleError::StoreUnavailable("down".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(RaffleError::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry_transient(RetryPolicy::default(), || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RaffleError::IdempotencyConflict)
            }
        })
        .await;

        assert!(matches!(result, Err(RaffleError::IdempotencyConflict)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
