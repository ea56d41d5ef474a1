//! Async utilities and patterns
//!
//! Provides the timeout and bounded-retry primitives every backend read goes through

use crate::error::{ErrorContext, PortalError, PortalResult, NON_RETRYABLE_CODES};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

/// Ceiling applied to a single backend call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 8_000;

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
    /// Backend codes never retried, on top of the malformed-request codes
    #[serde(default)]
    pub non_retryable_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 300,
            max_delay_ms: 10_000,
            jitter: false,
            non_retryable_codes: NON_RETRYABLE_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl RetryConfig {
    /// Same policy with a different retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether `err` may be attempted again under this policy
    pub fn should_retry(&self, err: &PortalError) -> bool {
        if !err.is_retryable() {
            return false;
        }
        match err.error_code() {
            Some(code) => !self.non_retryable_codes.iter().any(|c| c == code),
            None => true,
        }
    }

    /// Delay slept after the given failed attempt (1-based): `base * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        let delay = if self.jitter {
            let jitter_factor = 0.1;
            let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
            ((delay as f64) * (1.0 + jitter)) as u64
        } else {
            delay
        };

        Duration::from_millis(delay)
    }
}

/// Retry an async operation with exponential backoff.
///
/// The operation runs at most `max_retries + 1` times. Errors for which
/// [`RetryConfig::should_retry`] is false are returned immediately without
/// sleeping. Once the budget is spent the last observed error is returned.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> PortalResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PortalResult<T>>,
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut last_error: Option<PortalError> = None;
    let mut attempt = 0;

    while attempt < max_attempts {
        attempt += 1;

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !config.should_retry(&err) => {
                debug!(
                    operation = operation_name,
                    attempt = attempt,
                    code = ?err.error_code(),
                    error = %err,
                    "Non-retryable failure, giving up"
                );
                return Err(err);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %err,
                        "Operation failed after all retry attempts"
                    );
                    last_error = Some(err);
                    break;
                }

                let delay = config.backoff_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                last_error = Some(err);

                sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PortalError::RetriesExhausted {
        operation: operation_name.to_string(),
        attempts: attempt,
        context: ErrorContext::new("async_utils").with_operation("with_retry"),
    }))
}

/// Timeout wrapper for async operations.
///
/// The underlying future is dropped when the ceiling is reached; the caller
/// sees a [`PortalError::Timeout`] whether or not the transport ever answers.
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> PortalResult<T>
where
    F: Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(PortalError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Check network connectivity")
                .with_suggestion("Verify backend availability"),
        }),
    }
}

/// [`with_timeout`] for calls that already return a [`PortalResult`]
pub async fn with_call_timeout<F, T>(
    future: F,
    timeout_ms: u64,
    operation_name: &str,
) -> PortalResult<T>
where
    F: Future<Output = PortalResult<T>>,
{
    with_timeout(future, timeout_ms, operation_name).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(300));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(600));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(1200));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_delay_ms: 1000,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff_delay(10), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let config = RetryConfig {
            jitter: true,
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let delay = config.backoff_delay(1).as_millis() as u64;
            assert!((270..=330).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn configured_codes_extend_builtin_classification() {
        let config = RetryConfig {
            non_retryable_codes: vec!["57014".to_string()],
            ..RetryConfig::default()
        };

        assert!(!config.should_retry(&crate::backend_error!("canceled", "57014", "test")));
        // Malformed-request codes stay final whatever the list says
        assert!(!config.should_retry(&crate::backend_error!("bad uuid", "22P02", "test")));
        assert!(config.should_retry(&crate::backend_error!("reset", "08006", "test")));
        assert!(config.should_retry(&crate::backend_error!("reset", "test")));
        let canceled = crate::backend_error!("canceled", "57014", "test");
        assert!(RetryConfig::default().should_retry(&canceled));
    }

    #[tokio::test]
    async fn zero_retry_budget_runs_once() {
        let mut calls = 0;
        let result: PortalResult<()> = with_retry(
            || {
                calls += 1;
                async { Err(crate::backend_error!("down", "test")) }
            },
            &RetryConfig::default().with_max_retries(0),
            "once",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
