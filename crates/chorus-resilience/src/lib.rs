//! # Chorus Resilience
//!
//! Failure-absorbing primitives shared by every Chorus adapter.
//!
//! - [`TokenBucket`]: continuous-refill rate limiter
//! - [`RequestQueue`]: FIFO queue with a concurrency cap and its own bucket
//! - [`with_retry`]: backoff for rate-limited calls, honoring server waits
//! - [`CircuitBreaker`]: closed / open / half-open fail-fast guard
//! - [`ResilientExecutor`]: breaker + retry + timeout + fallback in one call
//! - [`TtlCache`]: expiring key/value store with a background sweep
//!
//! None of these know about chat platforms. Operation errors are generic; the
//! only errors produced here are [`ResilienceError`]s, which callers fold into
//! their own error type through `From`.
//!
//! Instances are meant to live per adapter or per operation category, never
//! process-wide.
//!
//! ```rust,ignore
//! use chorus_resilience::{Classification, ResilientExecutor, RetryPolicy, TimeoutPolicy};
//!
//! let executor = ResilientExecutor::new()
//!     .with_retry_policy(RetryPolicy::default())
//!     .with_timeout(TimeoutPolicy::new(Duration::from_secs(30)));
//!
//! let sent = executor
//!     .execute(|| api.send_message(chat, text.clone()), &|err: &ApiError| {
//!         if err.status == 429 { Classification::RATE_LIMITED } else { Classification::Fatal }
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod token_bucket;

pub use cache::TtlCache;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use error::{ResilienceError, ResilienceResult};
pub use executor::{ResilientExecutor, TimeoutPolicy};
pub use queue::{QueueConfig, RequestQueue};
pub use retry::{Classification, ErrorClassifier, RetryPolicy, with_retry};
pub use token_bucket::TokenBucket;
