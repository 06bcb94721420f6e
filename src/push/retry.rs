//! Bounded retry with a fixed pause between attempts.
//!
//! Used for best-effort calls whose failure must never escape to the caller:
//! once attempts are exhausted the helper reports `None` and logs a warning.

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Default total attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum AttemptResult<T> {
    /// Attempt succeeded.
    Done(T),
    /// Transient failure worth another attempt.
    Retriable(String),
}

/// Run `operation` until it succeeds or `max_attempts` is reached.
///
/// Sleeps `backoff` between attempts, never after the last one.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AttemptResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            AttemptResult::Done(value) => return Some(value),
            AttemptResult::Retriable(reason) if attempt < config.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = config.backoff.as_millis() as u64,
                    reason = %reason,
                    "Retrying"
                );
                sleep(config.backoff).await;
            }
            AttemptResult::Retriable(reason) => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    reason = %reason,
                    "Giving up after max attempts"
                );
                return None;
            }
        }
    }
}
