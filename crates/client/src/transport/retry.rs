use std::collections::BTreeSet;
use std::time::Duration;

use harvester_core::AppConfig;

use super::TransportError;

/// Bounded exponential backoff policy. Immutable once a transport is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound on how far a `Retry-After` hint may stretch one delay.
    pub max_retry_after: Duration,
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_retry_after: Duration::from_secs(60),
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_retry_after: config.max_retry_after(),
            retryable_status_codes: config.retryable_status_codes.iter().copied().collect(),
        }
    }

    /// Whether `err` warrants another attempt.
    ///
    /// Network errors and timeouts always do; server errors and 429s only when
    /// their status is listed.
    pub fn is_retryable(&self, err: &TransportError) -> bool {
        err.is_transient() && err.status().is_none_or(|status| self.retryable_status_codes.contains(&status))
    }

    /// `base_delay * 2^attempt`, saturating.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Backoff for `attempt`, raised to the server's `Retry-After` hint when that is longer.
    ///
    /// The hint is clamped to `max_retry_after`; it never lowers the exponential backoff.
    pub fn delay_for(&self, attempt: u32, err: &TransportError) -> Duration {
        let backoff = self.backoff(attempt);
        err.retry_after().map_or(backoff, |hint| backoff.max(hint.min(self.max_retry_after)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy { base_delay: Duration::from_secs(u64::MAX / 2), ..Default::default() };
        assert_eq!(policy.backoff(64), Duration::MAX);
    }

    #[test]
    fn test_retryable_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&TransportError::ServerError { status: 503 }));
        assert!(policy.is_retryable(&TransportError::RateLimited { status: 429, retry_after: None }));
        assert!(!policy.is_retryable(&TransportError::ServerError { status: 501 }));
        assert!(!policy.is_retryable(&TransportError::ClientError { status: 404 }));
        assert!(policy.is_retryable(&TransportError::Timeout));
        assert!(!policy.is_retryable(&TransportError::Cancelled));
    }

    #[test]
    fn test_unlisted_429_is_not_retried() {
        let policy = RetryPolicy { retryable_status_codes: [503].into_iter().collect(), ..Default::default() };
        assert!(!policy.is_retryable(&TransportError::RateLimited { status: 429, retry_after: None }));
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let policy = RetryPolicy::default();
        let hinted = TransportError::RateLimited { status: 429, retry_after: Some(Duration::from_secs(5)) };
        assert_eq!(policy.delay_for(0, &hinted), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3, &hinted), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_after_is_clamped() {
        let policy = RetryPolicy::default();
        let year = TransportError::RateLimited { status: 429, retry_after: Some(Duration::from_secs(31_536_000)) };
        assert_eq!(policy.delay_for(0, &year), Duration::from_secs(60));

        let tight = RetryPolicy { max_retry_after: Duration::from_millis(500), ..Default::default() };
        assert_eq!(tight.delay_for(0, &year), Duration::from_millis(1000));
        assert_eq!(tight.delay_for(2, &year), Duration::from_millis(4000));
    }

    #[test]
    fn test_from_config() {
        let config = AppConfig {
            max_retries: 1,
            base_delay_ms: 250,
            max_retry_after_ms: 5_000,
            retryable_status_codes: vec![503],
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_retry_after, Duration::from_secs(5));
        assert!(policy.retryable_status_codes.contains(&503));
        assert!(!policy.retryable_status_codes.contains(&500));
    }
}
