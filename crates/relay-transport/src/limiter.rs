//! Minimum-spacing rate limiter.
//!
//! One limiter is shared by every outbound call of a client, whatever the
//! method. Callers queue on the limiter's lock, so dispatches are spaced by at
//! least the configured interval in the order they acquired it.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default spacing between outbound calls.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(300);

/// Global spacing limiter.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given minimum spacing.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until a call may be dispatched and record its dispatch time.
    ///
    /// Returns the dispatch instant.
    pub async fn acquire(&self) -> Instant {
        let mut last = self.last.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                trace!(wait_ms = wait.as_millis() as u64, "Rate limiting outbound call");
                tokio::time::sleep(wait).await;
            }
        }

        let now = Instant::now();
        *last = Some(now);
        now
    }

    /// When the last call was dispatched, if any.
    pub async fn last_dispatch(&self) -> Option<Instant> {
        *self.last.lock().await
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
