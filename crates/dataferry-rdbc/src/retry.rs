//! Fixed-interval retry for database operations.
//!
//! Every error is retried until the attempt budget is spent; the last
//! error is returned unchanged.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Total attempts made by default (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay between attempts by default
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the initial one (minimum 1)
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between a given number of total attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Single attempt, no retry
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Set max attempts (builder pattern)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set delay (builder pattern)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// The closure receives the 1-based attempt number.
///
/// ```rust,ignore
/// let policy = RetryPolicy::default();
/// let rows = retry(&policy, |attempt| async move {
///     conn.query("SELECT 1", &[]).await
/// }).await?;
/// ```
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
