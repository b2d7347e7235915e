//! Token bucket rate limiter.
//!
//! Tokens accrue continuously at `rate` per second up to `capacity`. Refill is
//! computed from the wall-clock delta since the previous refill rather than a
//! fixed tick, so the available count is exact between calls regardless of how
//! they are spaced.
//!
//! ```rust,ignore
//! use chorus_resilience::TokenBucket;
//!
//! let bucket = TokenBucket::new(2.0, 2.0);
//! bucket.wait_for_token().await; // immediate
//! bucket.wait_for_token().await; // immediate
//! bucket.wait_for_token().await; // waits ~500ms
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Mutable half of the bucket. Always updated together.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A smoothing rate limiter that accrues capacity over time and spends one
/// token per request.
///
/// `0 <= tokens <= capacity` holds at every observation point.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// # Arguments
    /// * `rate` - Tokens added per second. Non-positive rates never refill.
    /// * `capacity` - Burst size. Negative values are treated as zero. A
    ///   bucket with a positive rate holds at least one token.
    pub fn new(rate: f64, capacity: f64) -> Self {
        let capacity = if rate > 0.0 {
            capacity.max(1.0)
        } else {
            capacity.max(0.0)
        };
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Returns the refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Returns the burst capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Returns the number of tokens currently available.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available, then consumes it.
    ///
    /// Returns immediately when the bucket holds at least one token. Otherwise
    /// sleeps for `(1 - tokens) / rate` seconds and checks again; the re-check
    /// keeps concurrent waiters from driving the count negative.
    pub async fn wait_for_token(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                self.wait_time(state.tokens)
            };

            trace!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit token");
            sleep(wait).await;
        }
    }

    /// Time until the bucket reaches one token.
    fn wait_time(&self, tokens: f64) -> Duration {
        if self.rate <= 0.0 {
            // Never refills; park for a long time rather than spin.
            return Duration::from_secs(3600);
        }
        Duration::from_secs_f64((1.0 - tokens) / self.rate)
    }

    /// Adds tokens for the elapsed interval and clamps to capacity.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        if self.rate > 0.0 {
            state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        }
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate_then_waits() {
        let bucket = TokenBucket::new(2.0, 2.0);
        let start = Instant::now();

        bucket.wait_for_token().await;
        bucket.wait_for_token().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        bucket.wait_for_token().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_clamped_to_capacity() {
        let bucket = TokenBucket::new(10.0, 3.0);
        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(bucket.available(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_refill_between_calls() {
        let bucket = TokenBucket::new(4.0, 1.0);
        assert!(bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(125)).await;
        let available = bucket.available();
        assert!((available - 0.5).abs() < 1e-9, "available = {available}");
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(125)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_is_pending_until_refill() {
        let bucket = TokenBucket::new(1.0, 1.0);
        assert!(bucket.try_acquire());

        let mut waiter = tokio_test::task::spawn(bucket.wait_for_token());
        tokio_test::assert_pending!(waiter.poll());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_never_overdraw() {
        let bucket = std::sync::Arc::new(TokenBucket::new(10.0, 1.0));
        let start = Instant::now();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let bucket = bucket.clone();
                tokio::spawn(async move { bucket.wait_for_token().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // One token up front, four more at 100ms each.
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(bucket.available() >= 0.0);
    }

    #[test]
    fn test_zero_capacity_blocks_try_acquire() {
        let bucket = TokenBucket::new(0.0, 0.0);
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_rate_still_yields_tokens() {
        let bucket = TokenBucket::new(0.5, 0.5);
        assert_eq!(bucket.capacity(), 1.0);
        let start = Instant::now();

        bucket.wait_for_token().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        bucket.wait_for_token().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(bucket.available() >= 0.0);
    }
}
