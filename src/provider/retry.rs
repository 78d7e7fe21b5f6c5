//! Retry policy for provider calls.
//!
//! Transient failures are retried with exponential backoff. A delay the
//! provider asked for wins when it is longer than the computed backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{ApplyError, DeckhandError, Result};

/// How many times, and how patiently, a provider call is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on computed delays.
    pub max_delay: Duration,
}

/// Outcome of a retried call.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result.
    pub result: Result<T>,
    /// Number of calls made.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests and dry runs.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Overrides the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &DeckhandError) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let backoff = self
            .base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        error.retry_after().map_or(backoff, |asked| asked.max(backoff))
    }

    /// Runs `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Exhausting the budget on transient errors yields
    /// `ApplyError::MaxRetriesExceeded` naming `label`.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{label} succeeded on attempt {attempts}");
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Attempted {
                    result: Err(error),
                    attempts,
                };
            }

            if attempts >= self.max_attempts {
                return Attempted {
                    result: Err(ApplyError::MaxRetriesExceeded {
                        attempts,
                        resource: label.to_string(),
                        last_error: error.to_string(),
                    }
                    .into()),
                    attempts,
                };
            }

            let delay = self.delay_for(attempts, &error);
            warn!(
                "{label}: attempt {attempts}/{} failed ({error}), retrying in {delay:?}",
                self.max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> DeckhandError {
        ProviderError::transient(503, "unavailable").into()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for(1, &transient()), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &transient()), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, &transient()), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4, &transient()), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40, &transient()), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_after_wins_when_longer() {
        let policy = RetryPolicy::default();
        let limited: DeckhandError = ProviderError::RateLimited { retry_after_secs: 7 }.into();
        assert_eq!(policy.delay_for(1, &limited), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = RetryPolicy::immediate(4)
            .run("iam_role.runtime", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("role-1")
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "role-1");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let outcome: Attempted<()> = RetryPolicy::immediate(4)
            .run("x", || async { Err(ProviderError::rejected(400, "bad").into()) })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.result,
            Err(DeckhandError::Provider(ProviderError::Rejected { .. }))
        ));
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let outcome: Attempted<()> = RetryPolicy::immediate(3)
            .run("object_bucket.assets", || async { Err(transient()) })
            .await;

        assert_eq!(outcome.attempts, 3);
        match outcome.result {
            Err(DeckhandError::Apply(ApplyError::MaxRetriesExceeded { attempts, resource, .. })) => {
                assert_eq!(attempts, 3);
                assert_eq!(resource, "object_bucket.assets");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
