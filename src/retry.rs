//! Retry wrapper for delivery attempts
//!
//! Wraps a single delivery operation in bounded retries with jittered
//! exponential backoff. Every attempt runs under the operation timeout so a
//! stalled send cannot block the flush schedule. This wrapper never
//! propagates an error: exhaustion yields `None` and a logged diagnostic.

use crate::config::RetryConfig;
use crate::error::TelemetryError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes delivery operations with retry, backoff, and timeout
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Attempt `operation` up to the configured number of times. Returns
    /// `Some` on the first success, `None` once attempts are exhausted.
    pub async fn execute<F, Fut, T>(&self, operation: F, context: &str) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TelemetryError>>,
    {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(self.config.operation_timeout, operation())
                .await
            {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(err)) => err,
                Err(_) => TelemetryError::Timeout {
                    elapsed: self.config.operation_timeout,
                },
            };

            if attempt == attempts || !outcome.is_retryable() {
                warn!(
                    "{} failed after {} attempt(s), giving up: {}",
                    context, attempt, outcome
                );
                return None;
            }

            let delay = self.delay_for_attempt(attempt);
            debug!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                context, attempt, attempts, outcome, delay
            );
            if !self.config.skip_delays {
                tokio::time::sleep(delay).await;
            }
        }
        None
    }

    /// Backoff delay before the retry following `attempt` (1-based):
    /// `initial * 2^(attempt-1)` capped at `max_delay`, plus up to
    /// `jitter_factor` additional random delay
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .config
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay);
        if self.config.jitter_factor <= 0.0 {
            return base;
        }
        let mut rng = rand::rng();
        let jitter = rng.random_range(0.0..=self.config.jitter_factor);
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            skip_delays: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_config(3));
        let result = executor
            .execute(|| async { Ok::<_, TelemetryError>(7) }, "send")
            .await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt_with_three_calls() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = executor
            .execute(
                || {
                    let calls = calls_clone.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n < 3 {
                            Err(TelemetryError::network("connection reset"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                "send",
            )
            .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Option<()> = executor
            .execute(
                || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TelemetryError::network("unreachable"))
                    }
                },
                "send",
            )
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Option<()> = executor
            .execute(
                || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TelemetryError::Validation {
                            reason: "bad record".into(),
                        })
                    }
                },
                "send",
            )
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_failure() {
        let config = RetryConfig {
            max_retries: 2,
            operation_timeout: Duration::from_millis(20),
            skip_delays: true,
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Option<()> = executor
            .execute(
                || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    }
                },
                "send",
            )
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);
        assert_eq!(executor.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(executor.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(executor.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(executor.delay_for_attempt(4), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_only_extends_the_delay() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(10),
            jitter_factor: 0.3,
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);
        for _ in 0..20 {
            let delay = executor.delay_for_attempt(1).as_secs_f64();
            assert!((10.0..=13.0).contains(&delay));
        }
    }
}
