//! Classified transport errors.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Outcome of a failed upstream call, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The per-request timeout elapsed.
    #[error("request timeout")]
    Timeout,

    /// 4xx other than 429. Never retried.
    #[error("client error: HTTP {status}")]
    ClientError { status: u16 },

    /// 5xx response.
    #[error("server error: HTTP {status}")]
    ServerError { status: u16 },

    /// 429 response, with the server's `Retry-After` hint when present.
    #[error("rate limited: HTTP {status}")]
    RateLimited { status: u16, retry_after: Option<Duration> },

    /// Every attempt failed with a retryable error.
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { last_error: Box<TransportError>, attempts: u32 },

    /// The response body exceeded the configured limit. Never retried.
    #[error("response too large: {size} bytes exceeds {limit}")]
    TooLarge { size: u64, limit: u64 },

    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::ClientError { status }
            | TransportError::ServerError { status }
            | TransportError::RateLimited { status, .. } => Some(*status),
            TransportError::MaxRetriesExceeded { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Whether the error class is transient at all.
    ///
    /// Status-carrying errors are additionally filtered by the retry policy's status set.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::Timeout
                | TransportError::ServerError { .. }
                | TransportError::RateLimited { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { TransportError::Timeout } else { TransportError::Network(err.to_string()) }
    }
}

impl From<TransportError> for harvester_core::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => harvester_core::Error::Cancelled,
            TransportError::ClientError { status: 404 } => harvester_core::Error::NotFound(err.to_string()),
            other => harvester_core::Error::Upstream(other.to_string()),
        }
    }
}

/// Classify an HTTP status. Returns `None` for non-error statuses.
pub fn classify_status(status: u16, headers: &HeaderMap) -> Option<TransportError> {
    match status {
        429 => Some(TransportError::RateLimited { status, retry_after: parse_retry_after(headers) }),
        500..=599 => Some(TransportError::ServerError { status }),
        400..=499 => Some(TransportError::ClientError { status }),
        _ => None,
    }
}

/// Parse the delay-seconds form of `Retry-After`. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
