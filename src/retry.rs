//! Retry with exponential backoff for rolled-back batches.

use crate::error::Result;
use std::time::Duration;

/// How often, and how patiently, a worker re-sends a failed batch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is exhausted. The closure receives the 1-based attempt.
///
/// Only [`LoadError::BatchInsert`](crate::error::LoadError::BatchInsert) is
/// retried; connection loss and I/O errors are returned immediately.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub fn retry_with_backoff<F, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(v) => return Ok(v),
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    return Err(err);
                }
                tracing::warn!(attempt, error = %err, "retrying batch after {delay:?}");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2).min(policy.max_delay);
            }
        }
    }
}
