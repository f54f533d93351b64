//! Bounded retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use crate::error::AllocatorError;

/// Retries an operation on transient store errors with exponential
/// backoff. Non-transient errors and logical outcomes pass through
/// untouched on the first occurrence.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt after.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Runs `op`, retrying while it fails with a transient error.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, AllocatorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = store::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "transient store error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(AllocatorError::RetriesExhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => return Err(AllocatorError::Store(e)),
            }
        }
    }
}
