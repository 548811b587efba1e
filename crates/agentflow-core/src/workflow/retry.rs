//! Retry policy with exponential backoff.
//!
//! Stateless: all logic lives in associated functions that take the
//! `RetryConfig` as a parameter. The delay before retry *n* (1-indexed) is
//! `min(initial_delay * multiplier^(n-1), max_delay)`. Exhausting the budget
//! returns the last error unchanged so callers can still match on its kind.

use std::future::Future;
use std::time::Duration;

use agentflow_types::config::RetryConfig;

// ---------------------------------------------------------------------------
// RetryOutcome
// ---------------------------------------------------------------------------

/// Final result of a retried operation together with the attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Total attempts made, including the first (always >= 1).
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Stateless retry policy.
pub struct RetryPolicy;

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(config: &RetryConfig, attempt: u32) -> bool {
        attempt <= config.max_retries
    }

    /// Backoff before retry number `retry` (1 = the first retry).
    pub fn delay_for_retry(config: &RetryConfig, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
        let capped = ms.min(config.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Retry `operation` on every error, up to `config.max_retries` times.
    pub async fn retry<T, E, F, Fut>(operation: F, config: &RetryConfig, label: &str) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        Self::retry_if(operation, config, label, |_| true).await.result
    }

    /// Retry `operation` while `is_retryable` accepts the error.
    ///
    /// A non-retryable error ends the loop immediately and is returned as-is.
    pub async fn retry_if<T, E, F, Fut, P>(
        mut operation: F,
        config: &RetryConfig,
        label: &str,
        is_retryable: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(label, attempt, "operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    if !is_retryable(&err) || !Self::should_retry(config, attempt) {
                        if attempt > 1 {
                            tracing::warn!(label, attempts = attempt, error = %err, "retries exhausted");
                        }
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    let delay = Self::delay_for_retry(config, attempt);
                    tracing::warn!(
                        label,
                        attempt,
                        max_retries = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
