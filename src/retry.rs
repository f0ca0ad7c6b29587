//! Retry with exponential backoff
//!
//! Only errors where [`DeployError::is_retryable`] is true are retried.
//! The delay for attempt `n` is `min(initial * 2^n, max)` plus 0-50% jitter.

use crate::config::schema::SubmitConfig;
use crate::error::DeployError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = base.min(self.max_backoff);

        let jitter_range = capped.as_millis() as u64 / 2;
        if jitter_range > 0 {
            capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
        } else {
            capped
        }
    }
}

impl From<&SubmitConfig> for RetryPolicy {
    fn from(config: &SubmitConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// The operation gave up; carries the last error
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: DeployError,
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeployError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(Exhausted {
                    attempts: attempt + 1,
                    last: err,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy(5);
        let first = p.backoff(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let third = p.backoff(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
        let late = p.backoff(20);
        assert!(late >= Duration::from_millis(1_000) && late <= Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DeployError::rpc("flaky"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&policy(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DeployError::rpc("down"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&policy(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DeployError::TransactionRejected("invalid".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert!(matches!(err.last, DeployError::TransactionRejected(_)));
    }
}
