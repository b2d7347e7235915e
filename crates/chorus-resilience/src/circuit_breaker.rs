//! Three-state circuit breaker.
//!
//! ```text
//!   Closed ──(failures >= threshold)──▶ Open
//!     ▲                                  │
//!     │                       (reset_timeout elapsed)
//!     │                                  ▼
//!     └──(2 successes)──────────── HalfOpen ──(any failure)──▶ Open
//! ```
//!
//! The breaker only tracks outcomes. It never swallows errors; callers ask
//! [`CircuitBreaker::can_execute`] before a call and report the result
//! afterwards.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive half-open successes needed to close the circuit.
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the reset timeout elapses.
    Open,
    /// Probing whether the backend recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Failures in the closed state that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub reset_timeout: Duration,
    /// Half-open successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a named config with default thresholds.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time since the last recorded failure, if any.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// A circuit breaker guarding one backend or operation category.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state without advancing it.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Whether a call may proceed now.
    ///
    /// An open circuit whose reset timeout has strictly elapsed moves to
    /// half-open and admits the call.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.last_failure_time = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                inner.success_count = 0;
                inner.last_failure_time = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
            }
        }
    }

    /// Forces the circuit closed and clears all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock();
        CircuitMetrics {
            name: self.config.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            since_last_failure: inner.last_failure_time.map(|at| at.elapsed()),
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => warn!(
                breaker = %self.config.name,
                %from,
                failures = inner.failure_count,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => debug!(breaker = %self.config.name, %from, "Circuit half-open"),
            CircuitState::Closed => info!(breaker = %self.config.name, %from, "Circuit closed"),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::named("test")
                .with_failure_threshold(threshold)
                .with_reset_timeout(reset),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle() {
        let cb = breaker(3, Duration::from_millis(1000));

        for _ in 0..3 {
            assert!(cb.can_execute());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_at_exact_timeout() {
        let cb = breaker(1, Duration::from_millis(500));
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(100));
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(cb.can_execute());

        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().success_count, 0);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_failures_when_closed() {
        let cb = breaker(3, Duration::from_secs(1));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_reset_forces_closed() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.metrics().since_last_failure, None);
    }
}
