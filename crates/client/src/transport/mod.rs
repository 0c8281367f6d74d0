//! Rate-limited, bounded-retry execution of upstream calls.
//!
//! ### Policy
//!
//! - One rate-limiter wait before the whole retry sequence, not per attempt.
//! - `max_retries + 1` attempts at most; backoff `base_delay * 2^attempt` between them.
//! - 4xx other than 429 fails immediately.
//! - Exhausting the budget yields `MaxRetriesExceeded` wrapping the last error.
//! - Cancellation is observed during the limiter wait, each attempt, and each backoff.

mod error;
mod rate_limit;
mod retry;

use std::future::Future;
use std::sync::Arc;

use harvester_core::{AppConfig, CancelToken};

pub use error::{TransportError, classify_status, parse_retry_after};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

/// Executes upstream operations under a shared rate limiter and a retry policy.
#[derive(Debug, Clone)]
pub struct Transport {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(Arc::new(RateLimiter::new(config.min_delay())), RetryPolicy::from_config(config))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the retry budget.
    ///
    /// `op` is invoked once per attempt and must perform a single call.
    pub async fn execute<T, F, Fut>(&self, mut op: F, cancel: &CancelToken) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.limiter.wait_or_cancel(cancel).await?;

        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                outcome = op() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "Upstream call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.policy.is_retryable(&err) {
                tracing::debug!(error = %err, attempt = attempt + 1, "Upstream call failed permanently");
                return Err(err);
            }

            if attempt >= self.policy.max_retries {
                tracing::warn!(error = %err, attempts = attempt + 1, "Upstream retries exhausted");
                return Err(TransportError::MaxRetriesExceeded { last_error: Box::new(err), attempts: attempt + 1 });
            }

            let delay = self.policy.delay_for(attempt, &err);
            tracing::warn!(
                error = %err,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Transient upstream failure, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
