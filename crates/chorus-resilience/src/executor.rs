//! Breaker, retry, timeout and fallback composed into one call path.
//!
//! For every [`ResilientExecutor::execute`]:
//!
//! 1. The breaker is asked first. A refusal short-circuits to the fallback,
//!    or to [`ResilienceError::CircuitOpen`] when none was given.
//! 2. The operation runs under [`with_retry`], each attempt raced against the
//!    timeout.
//! 3. The final outcome is reported to the breaker. Failures go to the
//!    fallback if one was given, otherwise they propagate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::ResilienceError;
use crate::retry::{ErrorClassifier, RetryPolicy, with_retry};

/// Per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub duration: Duration,
    /// Abort the attempt when it times out. When unset the attempt keeps
    /// running detached and its side effects still happen.
    pub cancel_on_timeout: bool,
}

impl TimeoutPolicy {
    /// A detaching timeout.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            cancel_on_timeout: false,
        }
    }

    /// A timeout that aborts the timed-out attempt.
    pub fn cancelling(duration: Duration) -> Self {
        Self {
            duration,
            cancel_on_timeout: true,
        }
    }
}

/// Composes the resilience primitives around fallible async calls.
#[derive(Debug, Clone, Default)]
pub struct ResilientExecutor {
    breaker: Option<Arc<CircuitBreaker>>,
    retry: RetryPolicy,
    timeout: Option<TimeoutPolicy>,
}

impl ResilientExecutor {
    /// An executor that only retries, with the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(Arc::new(CircuitBreaker::new(config)));
        self
    }

    /// Shares an existing breaker, e.g. one per operation category.
    pub fn with_shared_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs `op` through breaker, retry and timeout.
    pub async fn execute<T, E, F, Fut, C>(&self, op: F, classifier: &C) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ResilienceError> + std::fmt::Display + Send + 'static,
        C: ErrorClassifier<E> + ?Sized,
    {
        self.run(op, classifier, None::<fn(Option<E>) -> std::future::Ready<Result<T, E>>>)
            .await
    }

    /// Like [`execute`](Self::execute), but any failure, including a refused
    /// call, is handed to `fallback`. The fallback receives the error, or
    /// `None` when the breaker refused the call.
    pub async fn execute_with_fallback<T, E, F, Fut, C, FB, FBFut>(
        &self,
        op: F,
        classifier: &C,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ResilienceError> + std::fmt::Display + Send + 'static,
        C: ErrorClassifier<E> + ?Sized,
        FB: FnOnce(Option<E>) -> FBFut,
        FBFut: Future<Output = Result<T, E>>,
    {
        self.run(op, classifier, Some(fallback)).await
    }

    async fn run<T, E, F, Fut, C, FB, FBFut>(
        &self,
        op: F,
        classifier: &C,
        fallback: Option<FB>,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ResilienceError> + std::fmt::Display + Send + 'static,
        C: ErrorClassifier<E> + ?Sized,
        FB: FnOnce(Option<E>) -> FBFut,
        FBFut: Future<Output = Result<T, E>>,
    {
        if let Some(breaker) = &self.breaker
            && !breaker.can_execute()
        {
            debug!(breaker = breaker.name(), "Call refused by open circuit");
            return match fallback {
                Some(fallback) => fallback(None).await,
                None => Err(ResilienceError::circuit_open(breaker.name()).into()),
            };
        }

        let result = with_retry(|| self.attempt(op()), &self.retry, classifier).await;

        match result {
            Ok(value) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure();
                }
                match fallback {
                    Some(fallback) => {
                        debug!(error = %err, "Using fallback after failure");
                        fallback(Some(err)).await
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// One attempt, raced against the timeout when one is configured.
    async fn attempt<T, E, Fut>(&self, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ResilienceError> + Send + 'static,
    {
        let Some(policy) = self.timeout else {
            return fut.await;
        };

        let mut handle = tokio::spawn(fut);
        match tokio::time::timeout(policy.duration, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                Err(ResilienceError::task_dropped(join_err.to_string()).into())
            }
            Err(_) => {
                if policy.cancel_on_timeout {
                    handle.abort();
                }
                warn!(
                    timeout_ms = policy.duration.as_millis() as u64,
                    cancelled = policy.cancel_on_timeout,
                    "Operation timed out"
                );
                Err(ResilienceError::TimedOut {
                    after: policy.duration,
                }
                .into())
            }
        }
    }
}
