//! Per-plugin rate limiting.
//!
//! Every outbound call a handler makes (DNS query, HTTP fetch, API call)
//! is preceded by a token acquisition from its plugin's limiter, keeping
//! the engine's aggregate query rate against any one data source at a
//! configured queries-per-second ceiling.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A token bucket refilled continuously at a fixed QPS.
///
/// The bucket starts full and holds at most `qps` tokens (minimum one), so
/// a cold limiter allows a burst of one second's worth of calls before the
/// steady-state rate applies.
#[derive(Debug)]
pub struct RateLimiter {
    qps: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter issuing `qps` tokens per second.
    ///
    /// # Panics
    ///
    /// Panics if `qps` is not a positive, finite number.
    pub fn new(qps: f64) -> Self {
        assert!(qps.is_finite() && qps > 0.0, "qps must be positive");
        let capacity = qps.max(1.0);
        Self {
            qps,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        loop {
            match self.take_or_wait() {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Takes a token without waiting; returns `false` when none is ready.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Returns `true` when a token could be taken without waiting.
    ///
    /// Only peeks; a caller that goes on to `acquire` pays exactly once.
    pub fn is_ready(&self) -> bool {
        let mut state = self.state.lock().expect("bucket poisoned");
        self.refill(&mut state);
        state.tokens >= 1.0
    }

    /// The configured queries-per-second rate.
    pub fn qps(&self) -> f64 {
        self.qps
    }

    fn take_or_wait(&self) -> Option<Duration> {
        let mut state = self.state.lock().expect("bucket poisoned");
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - state.tokens) / self.qps))
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.qps).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "qps must be positive")]
    fn test_zero_qps_panics() {
        RateLimiter::new(0.0);
    }

    #[tokio::test]
    async fn test_burst_up_to_capacity() {
        let limiter = RateLimiter::new(5.0);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_is_ready_does_not_consume() {
        let limiter = RateLimiter::new(1.0);

        // Peeking any number of times leaves the burst token in place.
        assert!(limiter.is_ready());
        assert!(limiter.is_ready());

        assert!(limiter.try_acquire());
        assert!(!limiter.is_ready());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(1.0);
        let start = Instant::now();

        limiter.acquire().await; // burst token
        limiter.acquire().await; // +1s
        limiter.acquire().await; // +1s

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1900), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let limiter = RateLimiter::new(2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        // A long idle period must not accumulate more than one second's
        // worth of burst.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
