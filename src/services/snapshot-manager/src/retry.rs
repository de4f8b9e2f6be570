//! Bounded retry for provider calls
//!
//! Whether an error is worth another attempt is decided in exactly one place,
//! [`classify`]. [`with_retry`] is the only loop that acts on that decision.

use crate::config::RetryConfig;
use crate::error::{Result, SnapshotError};

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Error classification consumed by [`with_retry`]
pub fn classify(error: &SnapshotError) -> RetryDecision {
    if error.is_retryable() {
        RetryDecision::Retry
    } else {
        RetryDecision::GiveUp
    }
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let mut delay_ms = base.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            // +/- 25%
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            delay_ms *= factor;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

/// Result of a retried call plus the number of calls it took
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` calls have been made.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(error) => {
                let exhausted = attempts >= policy.max_attempts;
                if classify(&error) == RetryDecision::GiveUp || exhausted {
                    debug!(
                        "{} gave up after {} attempt(s): {}",
                        operation_name, attempts, error
                    );
                    return Retried {
                        result: Err(error),
                        attempts,
                    };
                }

                let delay = policy.delay_for(attempts - 1);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient error: {}",
                    error
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&SnapshotError::transient("delete", "429")), RetryDecision::Retry);
        assert_eq!(classify(&SnapshotError::authorization("denied")), RetryDecision::GiveUp);
        assert_eq!(classify(&SnapshotError::not_found("snap")), RetryDecision::GiveUp);
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let retried = with_retry(&fast_policy(3), "delete", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SnapshotError::transient("delete", "throttled"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(retried.result.unwrap(), "done");
        assert_eq!(retried.attempts, 3);
    }

    #[tokio::test]
    async fn test_authorization_error_is_not_retried() {
        let retried: Retried<()> = with_retry(&fast_policy(3), "delete", || async {
            Err(SnapshotError::authorization("denied"))
        })
        .await;

        assert!(matches!(retried.result, Err(SnapshotError::Authorization { .. })));
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let retried: Retried<()> = with_retry(&fast_policy(3), "delete", || async {
            Err(SnapshotError::transient("delete", "timeout"))
        })
        .await;

        assert!(retried.result.is_err());
        assert_eq!(retried.attempts, 3);
    }
}
