//! Bounded exponential backoff for transient failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;

/// An error that knows whether another attempt could succeed.
pub trait Retryable: fmt::Display + Sized {
    /// Timeouts, connection failures, 5xx and rate limiting.
    fn is_transient(&self) -> bool;

    /// Wrap the final error once the retry budget is spent.
    fn exhausted(self, _attempts: u32) -> Self {
        self
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_retries,
            settings.base_delay(),
            settings.max_delay(),
        )
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn should_retry<E: Retryable>(&self, attempt: u32, error: &E) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    /// `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Execute an async operation with retry.
    ///
    /// `f` is called until it succeeds, returns a non-transient error, or the
    /// retry budget is spent. In the last case the error is passed through
    /// [`Retryable::exhausted`].
    pub async fn execute<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            operation,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(attempt, &error) {
                        if error.is_transient() && self.max_retries > 0 {
                            tracing::warn!(
                                operation,
                                attempts = attempt + 1,
                                error = %error,
                                "Retries exhausted"
                            );
                            return Err(error.exhausted(attempt + 1));
                        }
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
