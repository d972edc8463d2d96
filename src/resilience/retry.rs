//! # Retry Executor
//!
//! Stateless exponential-backoff retry loop with optional jitter. The delay
//! schedule lives on [`RetryPolicy`]; this module owns the attempt loop and
//! the retryability decision.

use crate::config::RetryPolicy;
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Executes operations under a retry policy.
///
/// Holds only the process-wide default policy; each call may override it.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    default_policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self { default_policy }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Run `operation`, retrying on retriable failures.
    ///
    /// The operation is invoked at most `max_retries + 1` times. A failure
    /// stops the loop early when `is_retriable` rejects it; the last
    /// attempt's error is returned on exhaustion.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        is_retriable: impl Fn(&E) -> bool,
        policy: Option<&RetryPolicy>,
        context: &str,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let policy = policy.unwrap_or(&self.default_policy);
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            context = context,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if attempt >= policy.max_retries {
                        warn!(
                            context = context,
                            attempt = attempt,
                            error = %error,
                            "Operation failed, retries exhausted"
                        );
                        return Err(error);
                    }

                    if !is_retriable(&error) {
                        warn!(
                            context = context,
                            attempt = attempt,
                            error = %error,
                            "Operation failed with non-retriable error"
                        );
                        return Err(error);
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    debug!(
                        context = context,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Operation failed, retrying after backoff"
                    );

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
