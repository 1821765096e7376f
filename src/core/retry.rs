//! Bounded retry with a fixed pause, used at the ingestion-write boundary.

use crate::core::{LanternError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy {
    /// Check if the error should trigger another attempt
    fn should_retry(&self, error: &LanternError, attempt: u32) -> bool;
}

/// Retries recoverable errors until the attempt budget is spent
pub struct DefaultRetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, error: &LanternError, attempt: u32) -> bool {
        error.is_recoverable() && attempt < self.max_attempts
    }
}

/// Execute an operation, retrying recoverable failures with a fixed backoff.
///
/// Returns the last error once the attempts are exhausted or a
/// non-recoverable error is seen.
pub async fn retry_with_config<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = DefaultRetryPolicy {
        max_attempts: config.max_attempts.max(1),
    };
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    tracing::debug!("Giving up after {} attempt(s): {}", attempt, error);
                    return Err(error);
                }

                tracing::warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    error,
                    config.backoff
                );

                sleep(config.backoff).await;
            },
        }
    }
}
