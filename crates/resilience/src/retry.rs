/// Retry policy for operations whose schedule is grown iteratively rather than
/// computed per attempt (used by ambient I/O call sites, not the outbox consumer,
/// which owns its own persisted retry_count and uses [`crate::backoff`] directly).
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::backoff::{compute, BackoffConfig};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("max retries ({0}) exceeded")]
    MaxRetriesExceeded(u32),
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Execute a future with retry logic, using the same jittered exponential
/// schedule as the outbox consumer.
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(_e) => {
                if attempt >= config.max_retries {
                    warn!("max retries ({}) reached", config.max_retries);
                    return Err(RetryError::MaxRetriesExceeded(config.max_retries));
                }

                let delay = compute(&config.backoff, attempt);
                attempt += 1;

                warn!(
                    "retry attempt {}/{}, waiting {:?}",
                    attempt, config.max_retries, delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(RetryConfig::default(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = RetryConfig {
            max_retries: 3,
            backoff: BackoffConfig {
                base: Duration::from_millis(5),
                jitter_frac: 0.0,
                ..Default::default()
            },
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_and_reports_attempt_count() {
        let config = RetryConfig {
            max_retries: 2,
            backoff: BackoffConfig {
                base: Duration::from_millis(5),
                jitter_frac: 0.0,
                ..Default::default()
            },
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("persistent error") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::MaxRetriesExceeded(2))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
