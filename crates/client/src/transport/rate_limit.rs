//! Minimum spacing between outbound calls.

use std::time::Duration;

use harvester_core::CancelToken;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::TransportError;

/// Rate limiter to enforce request intervals.
///
/// The lock is held across the sleep, so concurrent callers sharing one
/// limiter are released one `min_delay` apart.
#[derive(Debug)]
pub struct RateLimiter {
    last_call: Mutex<Option<Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self { last_call: Mutex::new(None), min_delay }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until `min_delay` has passed since the previous call start, then record now.
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(remaining) = self.remaining(*last) {
            tokio::time::sleep(remaining).await;
        }
        *last = Some(Instant::now());
    }

    /// Like [`wait`](Self::wait), but gives up when `cancel` fires.
    ///
    /// A cancelled wait does not record a call.
    pub async fn wait_or_cancel(&self, cancel: &CancelToken) -> Result<(), TransportError> {
        let mut last = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.last_call.lock() => guard,
        };

        if let Some(remaining) = self.remaining(*last) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(remaining) => {}
            }
        }

        *last = Some(Instant::now());
        Ok(())
    }

    /// Forget the previous call so the next one proceeds immediately.
    pub async fn reset(&self) {
        *self.last_call.lock().await = None;
    }

    fn remaining(&self, last: Option<Instant>) -> Option<Duration> {
        let elapsed = last?.elapsed();
        (elapsed < self.min_delay).then(|| self.min_delay - elapsed)
    }
}
