//! Outbound call spacing for the market-data provider.
//!
//! One limiter is shared by everything that talks to the provider. The
//! "last call" instant is stamped right before the guarded call goes out,
//! so a slow response never pushes the next call further back.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default spacing between provider calls.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(5000);

/// Time source used by [`RateLimiter`].
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Minimum-spacing limiter: no two guarded calls start less than
/// `min_interval` apart.
pub struct RateLimiter {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    // Held across the wait, which also serializes concurrent callers.
    last_call: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, Arc::new(SystemClock))
    }

    pub fn with_clock(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            last_call: tokio::sync::Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call is allowed, then record it as started.
    pub async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;

        if let Some(prev) = *last_call {
            let elapsed = self.clock.now().saturating_duration_since(prev);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate limiting provider call");
                self.clock.sleep(wait).await;
            }
        }

        *last_call = Some(self.clock.now());
    }
}


#[cfg(test)]
mod tests {
    use super::test_clock::ManualClock;
    use super::*;

    fn limiter(clock: &Arc<ManualClock>) -> RateLimiter {
        RateLimiter::with_clock(DEFAULT_MIN_INTERVAL, clock.clone())
    }

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(&clock);

        limiter.throttle().await;

        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_calls_are_spaced() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(&clock);

        let mut starts = Vec::new();
        for _ in 0..4 {
            limiter.throttle().await;
            starts.push(clock.now());
        }

        for pair in starts.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= DEFAULT_MIN_INTERVAL);
        }
        assert_eq!(clock.sleeps(), vec![DEFAULT_MIN_INTERVAL; 3]);
    }

    #[tokio::test]
    async fn test_waits_only_for_remaining_interval() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(&clock);

        limiter.throttle().await;
        clock.advance(Duration::from_millis(3200));
        limiter.throttle().await;

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1800)]);
    }

    #[tokio::test]
    async fn test_no_wait_after_interval_elapsed() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(&clock);

        limiter.throttle().await;
        clock.advance(Duration::from_secs(6));
        limiter.throttle().await;

        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_system_clock_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(50));

        let first = Instant::now();
        limiter.throttle().await;
        limiter.throttle().await;

        assert!(first.elapsed() >= Duration::from_millis(50));
    }
}
