//! Fixed-delay retry helper
//!
//! Runs an async operation up to `max_attempts` times, sleeping `delay`
//! between attempts. There is no overall deadline and no backoff growth.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry bounds for a single logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Every attempt failed. Carries the error from the final attempt.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the attempt budget is spent.
pub async fn retry<T, E, F, Fut>(mut op: F, config: &RetryConfig) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = config.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(RetryExhausted {
                    attempts,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Attempt {}/{} failed: {} (retrying in {:?})",
                    attempt,
                    attempts,
                    e,
                    config.delay
                );
                tokio::time::sleep(config.delay).await;
                attempt += 1;
            }
        }
    }
}
