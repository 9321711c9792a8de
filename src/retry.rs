// Exponential backoff for calls against the remote store

use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    // No waiting between attempts, used by tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            ..Self::default()
        }
    }
}

/// Backoff before retry number `retry_attempt` (0-indexed), capped at
/// `max_backoff_ms` and spread by `jitter_factor`.
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retries are used up. The last error is returned in the latter cases.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt = attempt + 1, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let backoff = calculate_backoff(attempt, config);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retryable store error"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_case::test_case;

    #[test_case(0, 200; "#1 first retry")]
    #[test_case(1, 400; "#2 doubled")]
    #[test_case(3, 1600; "#3 third doubling")]
    #[test_case(10, 3000; "#4 capped")]
    fn test_backoff_without_jitter(attempt: u32, expected_ms: u64) {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(calculate_backoff(attempt, &config), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let backoff = calculate_backoff(1, &config).as_millis() as u64;
            // 400ms base, +/- 5%
            assert!((380..=420).contains(&backoff), "backoff {}", backoff);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryConfig::immediate(5), "count_hotels", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(StorageError::Unavailable("node down".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&RetryConfig::immediate(2), "count_hotels", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Timeout(50))
        })
        .await;

        assert_eq!(result, Err(StorageError::Timeout(50)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_query_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&RetryConfig::immediate(5), "count_hotels", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Query("syntax".to_string()))
        })
        .await;

        assert!(matches!(result, Err(StorageError::Query(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
