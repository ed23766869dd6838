//! Retry executor for single remote calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clients::{ApiError, ErrorClass};
use crate::error::{ReconcileError, Result};

/// Maps a remote error to its retry class.
pub type Classifier = fn(&ApiError) -> ErrorClass;

/// Bounds for retrying transient errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Hard ceiling on time spent across all attempts.
    pub max_elapsed_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            max_elapsed_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// Runs one remote call, re-issuing it while its error classifies as transient.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classify: Classifier,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classify: ApiError::classify,
        }
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Permanent errors return immediately as [`ReconcileError::Remote`];
    /// a transient error on the last allowed attempt becomes
    /// [`ReconcileError::Exhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        resource: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, resource, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if (self.classify)(&error) == ErrorClass::Permanent {
                return Err(ReconcileError::Remote {
                    operation,
                    resource: resource.to_string(),
                    source: error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            if attempt >= max_attempts || start.elapsed() + delay > self.policy.max_elapsed() {
                warn!(
                    operation,
                    resource,
                    attempts = attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(ReconcileError::Exhausted {
                    operation,
                    resource: resource.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            warn!(
                operation,
                resource,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient error, retrying"
            );
            tokio::time::sleep(delay).await;
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
            initial_delay_ms: 1,
            max_delay_ms: 4,
            max_elapsed_ms: 10_000,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            max_elapsed_ms: 60_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);
        let value = executor
            .execute("describe", "i-1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);
        let value = executor
            .execute("modify", "i-1", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ApiError::ServerBusy("busy".into()))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_transient_stops_at_max_attempts() {
        let executor = RetryExecutor::new(fast_policy(4));
        let calls = AtomicU32::new(0);
        let err = executor
            .execute("terminate", "i-1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::RateLimited("slow down".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            ReconcileError::Exhausted {
                operation,
                resource,
                attempts,
                source,
            } => {
                assert_eq!(operation, "terminate");
                assert_eq!(resource, "i-1");
                assert_eq!(attempts, 4);
                assert_eq!(source, ApiError::RateLimited("slow down".into()));
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);
        let err = executor
            .execute("modify", "i-1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::InvalidParameter("cpu".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ReconcileError::Remote { .. }));
        assert!(err.to_string().contains("modify i-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_ceiling_stops_retries() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 1_000,
            initial_delay_ms: 1_000,
            max_delay_ms: 1_000,
            max_elapsed_ms: 3_500,
        });
        let calls = AtomicU32::new(0);
        let err = executor
            .execute("describe", "i-1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::ServerBusy("busy".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Exhausted { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        fn everything_transient(_: &ApiError) -> ErrorClass {
            ErrorClass::Transient
        }
        let executor = RetryExecutor::new(fast_policy(2)).with_classifier(everything_transient);
        let err = executor
            .execute("describe", "i-1", || async {
                Err::<(), _>(ApiError::NotFound("i-1".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Exhausted { attempts: 2, .. }));
    }
}
