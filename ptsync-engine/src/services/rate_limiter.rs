//! Request spacing for outbound source calls
//!
//! Each caller reserves the next free start slot under the lock, then sleeps
//! outside it. Consecutive starts are therefore at least `min_interval` apart
//! no matter how many callers queue up, and the lock is never held across a
//! sleep.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    min_interval: Duration,
    /// Earliest instant the next caller may start
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until this caller's slot arrives; returns how long it waited
    pub async fn wait(&self) -> Duration {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |reserved| reserved.max(now));
            *next = Some(slot + self.min_interval);
            slot
        };

        let waited = slot.saturating_duration_since(Instant::now());
        if !waited.is_zero() {
            tracing::trace!(wait_ms = waited.as_millis() as u64, "Spacing source request");
            tokio::time::sleep_until(slot).await;
        }
        waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(300));
        assert_eq!(limiter.wait().await, Duration::ZERO);
        assert_eq!(limiter.min_interval(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();

        limiter.wait().await;
        let second_wait = limiter.wait().await;
        limiter.wait().await;

        assert!(second_wait > Duration::from_millis(50), "waited {:?}", second_wait);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_no_wait_after_interval_already_passed() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        limiter.wait().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(limiter.wait().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(limiter.wait().await, Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_distinct_slots() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(30)));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let stamps = Arc::clone(&stamps);
            handles.push(tokio::spawn(async move {
                let waited = limiter.wait().await;
                stamps.lock().await.push((Instant::now(), waited));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut stamps = stamps.lock().await.clone();
        stamps.sort();
        let total = stamps[3].0 - stamps[0].0;
        assert!(total >= Duration::from_millis(80), "total spacing {:?}", total);
        // Slots are handed out in order, so the waits grow with queue position
        assert_eq!(stamps[0].1, Duration::ZERO);
        assert!(stamps[3].1 >= Duration::from_millis(60));
    }
}
