//! Retry with exponential backoff for run bookkeeping
//!
//! Only run state writes and the per-batch repository index regeneration
//! go through here. Phase failures are never retried.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use debforge_config::RetrySettings;
use futures::Future;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BuildError, Result};

/// Backoff bounds for bookkeeping retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Give up once this much time has passed, whatever the attempt count
    pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(300)),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            ..Self::default()
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(self.max_elapsed_time)
            .build()
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// Errors for which [`BuildError::is_retryable`] is false are returned at
/// once. A raised `shutdown` flag stops further attempts and returns the
/// last error.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    operation: F,
    config: &RetryConfig,
    shutdown: Option<Arc<AtomicBool>>,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = config.max_attempts.max(1);
    let interrupted = || shutdown.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire));

    let attempt = || {
        let attempts = &attempts;
        let operation = &operation;
        let interrupted = &interrupted;
        async move {
            let number = attempts.fetch_add(1, Ordering::AcqRel) + 1;
            match operation().await {
                Ok(value) => {
                    if number > 1 {
                        info!("'{}' succeeded after {} attempts", operation_name, number);
                    }
                    Ok(value)
                }
                Err(error) if !error.is_retryable() || interrupted() => {
                    Err(backoff::Error::permanent(error))
                }
                Err(error) if number >= max_attempts => {
                    warn!("'{}' failed {} times: {}", operation_name, number, error);
                    Err(backoff::Error::permanent(BuildError::max_retries_exceeded(
                        operation_name,
                        max_attempts,
                    )))
                }
                Err(error) => Err(backoff::Error::transient(error)),
            }
        }
    };

    backoff::future::retry_notify(config.backoff(), attempt, |error: BuildError, delay| {
        warn!("'{}' failed: {}. Retrying in {:?}", operation_name, error, delay);
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_elapsed_time: None,
        }
    }

    async fn failing_until(calls: &AtomicU32, succeed_on: u32, config: &RetryConfig) -> Result<u32> {
        retry_with_backoff(
            "save run state",
            || async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call >= succeed_on {
                    Ok(call)
                } else {
                    Err(BuildError::transient("disk busy"))
                }
            },
            config,
            None,
        )
        .await
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        assert_eq!(failing_until(&calls, 3, &fast_config(3)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let err = failing_until(&calls, 10, &fast_config(2)).await.unwrap_err();
        assert!(matches!(err, BuildError::MaxRetriesExceeded { max_attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(
            "regenerate repository index",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BuildError::permanent("index is corrupt"))
            },
            &fast_config(5),
            None,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interrupt_stops_retrying() {
        let calls = AtomicU32::new(0);
        let shutdown = Arc::new(AtomicBool::new(true));
        let result: Result<()> = retry_with_backoff(
            "save run state",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BuildError::transient("disk busy"))
            },
            &fast_config(5),
            Some(shutdown),
        )
        .await;

        assert!(matches!(result, Err(BuildError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_settings() {
        let settings = RetrySettings { max_attempts: 0, initial_delay_ms: 10, max_delay_ms: 100 };
        let config = RetryConfig::from(&settings);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.initial_delay, Duration::from_millis(10));
        assert_eq!(config.max_delay, Duration::from_millis(100));
    }
}
