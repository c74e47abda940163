//! Retry logic for transient failures
//!
//! Provides bounded, cancelable retry with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryOptions {
    /// Create the default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay between attempts
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Error type for retry operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The cancellation signal fired during an inter-attempt wait
    #[error("operation cancelled while retrying")]
    Cancelled,

    /// Every attempt failed
    #[error("operation failed after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
    },
}

/// Invoke `operation` until it succeeds, up to the configured attempt bound.
///
/// Between attempts the call waits for the delay to elapse or for `token`
/// to fire, whichever comes first; cancellation during the wait returns
/// [`RetryError::Cancelled`] rather than [`RetryError::Exhausted`].
///
/// # Errors
///
/// [`RetryError::Exhausted`] when every attempt failed,
/// [`RetryError::Cancelled`] when cancelled between attempts.
pub async fn retry<F, Fut, T, E>(
    token: &CancellationToken,
    mut operation: F,
    options: RetryOptions,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    for attempt in 1..=options.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt == options.max_attempts {
                    debug!(attempt = attempt, error = %e, "operation failed, no more attempts");
                    return Err(RetryError::Exhausted { attempts: attempt });
                }

                warn!(
                    attempt = attempt,
                    max_attempts = options.max_attempts,
                    delay_ms = options.delay.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(options.delay) => {}
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }
    }

    unreachable!("retry loop always returns from the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_options_defaults() {
        let options = RetryOptions::default();
        assert_eq!(options.max_attempts, 20);
        assert_eq!(options.delay, Duration::from_secs(2));
    }

    #[test]
    fn test_options_builder() {
        let options = RetryOptions::new()
            .with_max_attempts(5)
            .with_delay(Duration::from_millis(10));
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result = retry(
            &token,
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
            RetryOptions::new()
                .with_max_attempts(5)
                .with_delay(Duration::from_millis(1)),
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result: Result<(), RetryError> = retry(
            &token,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), &str>("persistent")
                }
            },
            RetryOptions::new()
                .with_max_attempts(3)
                .with_delay(Duration::from_millis(1)),
        )
        .await;

        assert_eq!(result, Err(RetryError::Exhausted { attempts: 3 }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_during_wait_returns_promptly() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), RetryError> = retry(
            &token,
            || async { Err::<(), &str>("always failing") },
            RetryOptions::new()
                .with_max_attempts(10)
                .with_delay(Duration::from_secs(30)),
        )
        .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_first_success_makes_single_call() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();

        let result = retry(
            &token,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>("done")
                }
            },
            RetryOptions::default(),
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
