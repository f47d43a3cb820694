//! 🔄 Retry — "have you tried turning it off and on again", but with exponential backoff.
//!
//! Every store call the finder and the mover make goes through [`RetryPolicy::run`]:
//! one attempt under a request timeout, then up to `retry_count` more if the failure
//! was transient. Timeouts count as transient. Everything else goes straight back to
//! the caller, because asking a 400 the same question twice only annoys it. 🦆

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::app_config::ArchiverConfig;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 🔢 Extra attempts after the first. 0 means "one shot, no regrets".
    pub retry_count: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// ⏱️ Ceiling per attempt, not per step.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ArchiverConfig::default())
    }
}

impl From<&ArchiverConfig> for RetryPolicy {
    fn from(config: &ArchiverConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            request_timeout: config.request_timeout(),
        }
    }
}

impl RetryPolicy {
    /// 📈 `base * 2^attempt`, capped at `backoff_max`. Attempt 0 is the first retry.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max = self.backoff_max.as_millis().min(u128::from(u64::MAX)) as u64;
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(base.saturating_mul(factor).min(max.max(base)))
    }

    /// 🚀 Runs `op` until it succeeds, fails for good, or runs out of retries.
    /// `step` only feeds the log lines, so make it say something useful.
    pub async fn run<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.request_timeout, op()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(StoreError::Transient(format!(
                    "{step} timed out after {:?}",
                    self.request_timeout
                ))),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry_count => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        step,
                        attempt,
                        max_attempts = self.retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "🔄 Store step stumbled, backing off and trying again"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(retry_count: u32) -> RetryPolicy {
        RetryPolicy {
            retry_count,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            request_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn the_one_where_backoff_doubles_until_it_hits_the_ceiling() {
        let policy = RetryPolicy {
            retry_count: 10,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(3000),
            request_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn the_one_where_two_blips_and_a_success_is_still_a_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = quick(3)
            .run("flaky", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StoreError::Transient("503".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.expect("third time lucky"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn the_one_where_retries_run_out_and_the_last_error_comes_home() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = quick(2)
            .run("doomed", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Transient("still 503".into()))
                }
            })
            .await;
        assert!(result.expect_err("exhausted").is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn the_one_where_a_rejection_is_not_asked_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = quick(5)
            .run("rejected", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Rejected { status: 400, body: "bad query".into() })
                }
            })
            .await;
        assert!(matches!(result, Err(StoreError::Rejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_a_hung_call_times_out_into_a_transient_error() {
        let policy = RetryPolicy {
            request_timeout: Duration::from_millis(10),
            ..quick(0)
        };
        let result: Result<(), _> = policy
            .run("hung", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let err = result.expect_err("timed out");
        assert!(err.is_transient());
        assert!(err.to_string().contains("hung timed out"));
    }
}
