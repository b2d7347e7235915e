//! Retry with exponential backoff and jitter for rate-limited calls.
//!
//! Only errors a classifier marks as rate-limited are retried. Everything else
//! is returned on first occurrence. A server-declared wait always beats the
//! computed backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// What a classifier decided about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not retryable. Propagates immediately.
    Fatal,
    /// Rate limited, optionally with the wait the server asked for.
    RateLimited {
        /// Server-declared wait.
        retry_after: Option<Duration>,
    },
}

impl Classification {
    /// Shorthand for a rate limit without a declared wait.
    pub const RATE_LIMITED: Self = Self::RateLimited { retry_after: None };

    /// Returns true for [`Classification::RateLimited`].
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Decides whether an error is a rate limit.
///
/// Implemented for any `Fn(&E) -> Classification`, so a closure is enough for
/// one-off predicates.
pub trait ErrorClassifier<E>: Send + Sync {
    /// Classifies `error`.
    fn classify(&self, error: &E) -> Classification;
}

impl<E, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> Classification + Send + Sync,
{
    fn classify(&self, error: &E) -> Classification {
        self(error)
    }
}

/// Retry tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound for the computed backoff.
    pub max_delay: Duration,
    /// Double the delay on each attempt when set, otherwise stay flat.
    pub exponential_backoff: bool,
    /// Upper bound of the random jitter added to every wait.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_backoff: true,
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base and maximum delays.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Sets the jitter bound.
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Delay before retry number `attempt` (zero-based), without jitter.
    ///
    /// A server hint wins outright. Otherwise
    /// `min(base_delay * 2^attempt, max_delay)` with exponential backoff, or
    /// the flat `base_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        if !self.exponential_backoff {
            return self.base_delay;
        }
        let multiplier = 1_u32 << attempt.min(20);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Runs `op`, retrying rate-limited failures according to `policy`.
///
/// Returns the first success, the first non-rate-limit error, or the last
/// error once retries are exhausted.
pub async fn with_retry<T, E, F, Fut, C>(mut op: F, policy: &RetryPolicy, classifier: &C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: ErrorClassifier<E> + ?Sized,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Classification::RateLimited { retry_after } = classifier.classify(&err) else {
            return Err(err);
        };

        if attempt >= policy.max_retries {
            warn!(
                attempts = attempt + 1,
                error = %err,
                "Rate limit retries exhausted"
            );
            return Err(err);
        }

        let delay = policy.delay_for(attempt, retry_after) + policy.jitter();
        debug!(
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            server_hint = retry_after.is_some(),
            "Rate limited, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Limited(Option<Duration>),
        Broken,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(err: &TestError) -> Classification {
        match err {
            TestError::Limited(retry_after) => Classification::RateLimited {
                retry_after: *retry_after,
            },
            TestError::Broken => Classification::Fatal,
        }
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(500));
    }

    #[test]
    fn test_flat_delay_without_exponential_backoff() {
        let policy = RetryPolicy {
            exponential_backoff: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(5, None), policy.base_delay);
    }

    #[test]
    fn test_server_hint_wins() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Broken)
            },
            &RetryPolicy::default(),
            &classify,
        )
        .await;

        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_server_declared_wait() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Limited(Some(Duration::from_secs(2))))
                } else {
                    Ok("sent")
                }
            },
            &RetryPolicy::default(),
            &classify,
        )
        .await;

        let waited = start.elapsed();
        assert_eq!(result, Ok("sent"));
        assert!(waited >= Duration::from_secs(2), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(3) + Duration::from_millis(5), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default()
            .with_max_retries(2)
            .with_delays(Duration::from_millis(10), Duration::from_millis(40))
            .with_max_jitter(Duration::ZERO);

        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Limited(None))
            },
            &policy,
            &classify,
        )
        .await;

        assert_eq!(result, Err(TestError::Limited(None)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_waits_accumulate() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_secs(10))
            .with_max_jitter(Duration::ZERO);

        let result = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(TestError::Limited(None))
                } else {
                    Ok(())
                }
            },
            &policy,
            &classify,
        )
        .await;

        assert!(result.is_ok());
        // 100 + 200 + 400
        assert!(start.elapsed() >= Duration::from_millis(700));
    }
}
