//! Bounded retry with exponential backoff.
//!
//! One policy type serves both the fetch path and notification delivery.
//! Every attempt runs under its own timeout; a timeout counts as a
//! retryable failure.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_retry::RetryIf;

use crate::error::{AppError, Result};
use crate::models::RetryConfig;

/// Retry policy: attempt count and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delays slept between consecutive attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delay = self.initial_backoff;
        (1..self.max_attempts)
            .map(|_| {
                let current = delay.min(self.max_backoff);
                delay = delay.saturating_mul(2);
                current
            })
            .collect()
    }

    /// Run `action` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. Returns the final result and the attempts made.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        mut action: F,
    ) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = AtomicU32::new(0);
        let max_attempts = self.max_attempts;

        let attempt = || {
            let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let fut = action();
            async move {
                let result = match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::timeout(operation, timeout)),
                };
                if let Err(e) = &result {
                    log::warn!(
                        "{} attempt {}/{} failed: {}",
                        operation,
                        n,
                        max_attempts,
                        e
                    );
                }
                result
            }
        };

        let result = RetryIf::start(self.schedule(), attempt, |e: &AppError| e.is_retryable()).await;
        (result, attempts.load(Ordering::Relaxed))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }
}
