//! Retry with configurable backoff for upstream listing and token calls.

use std::future::Future;
use std::time::Duration;

use gateway_types::Result;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.min(u32::MAX as usize) as u32);
                base.saturating_mul(factor).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// How many times an upstream call is retried, and how long to wait between tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Run `f` up to `max_retries + 1` times.
///
/// Only errors satisfying [`gateway_types::GatewayError::is_retryable`] are
/// retried; anything else is returned straight away. The last error is
/// returned once attempts run out.
pub async fn execute_with_retry<T, F, Fut>(f: F, retry: &RetryConfig, operation: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                let delay = retry.backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::GatewayError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn no_wait(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff: BackoffPolicy::None,
        }
    }

    fn unavailable() -> GatewayError {
        GatewayError::Provider {
            provider: "openai".into(),
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let result = execute_with_retry(|| async { Ok(7) }, &no_wait(3), "list").await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retryable_error_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let result = execute_with_retry(
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(unavailable())
                    } else {
                        Ok("recovered")
                    }
                }
            },
            &no_wait(3),
            "list",
        )
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let result: Result<()> = execute_with_retry(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            },
            &no_wait(2),
            "list",
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Provider { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn authentication_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();

        let result: Result<()> = execute_with_retry(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Authentication {
                        provider: "azure".into(),
                        message: "invalid_client".into(),
                    })
                }
            },
            &no_wait(5),
            "token",
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Authentication { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(500));
    }

    #[test]
    fn fixed_and_none_backoff() {
        let fixed = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(fixed.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(fixed.delay_for_attempt(9), Duration::from_millis(200));
        assert_eq!(BackoffPolicy::None.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn default_retry_config() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.backoff.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(retry.backoff.delay_for_attempt(20), Duration::from_secs(30));
        assert_eq!(RetryConfig::disabled().max_retries, 0);
    }
}
