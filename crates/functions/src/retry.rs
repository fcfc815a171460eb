//! Bounded retry for optimistic-concurrency writes.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Retry configuration for conflicting writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config that retries immediately; used by tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `f` until it succeeds, retrying only while it fails with a conflict.
///
/// `f` receives the 1-based attempt number and must re-read any state it
/// writes, so a retry never reuses a stale etag. Non-conflict errors are
/// returned immediately.
///
/// # Errors
/// Returns the first non-conflict error, or
/// [`Error::ConflictRetriesExhausted`] once `max_attempts` writes conflicted.
pub async fn retry_on_conflict<T, F, Fut>(
    config: &RetryConfig,
    resource: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() => {
                if attempt >= max_attempts {
                    return Err(Error::ConflictRetriesExhausted {
                        resource: resource.to_string(),
                        attempts: attempt,
                    });
                }

                let delay = config.delay_for(attempt);
                warn!(
                    resource = %resource,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Conflicting write, re-reading and retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn conflict() -> Error {
        Error::Api {
            status: 429,
            provider_status: None,
            message: "too many requests".to_string(),
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(4), Duration::from_millis(800));
        assert_eq!(config.delay_for(5), Duration::from_millis(1000));
        assert_eq!(config.delay_for(60), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_on_conflict(&RetryConfig::immediate(5), "queue", |_| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(conflict())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry_on_conflict(&RetryConfig::immediate(4), "policy", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::ConflictRetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry_on_conflict(&RetryConfig::immediate(5), "policy", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Api {
                    status: 403,
                    provider_status: Some("PERMISSION_DENIED".into()),
                    message: "nope".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Api { status: 403, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_passes_attempt_number() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();

        let _ = retry_on_conflict(&RetryConfig::immediate(3), "policy", |attempt| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(attempt);
                if attempt < 2 {
                    Err(conflict())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
