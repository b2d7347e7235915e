//! Error types raised by the resilience primitives themselves.
//!
//! Operation errors are generic and always flow through untouched; these are
//! the few conditions the primitives produce on their own. Callers convert
//! them into their domain error via `From<ResilienceError>`.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the resilience layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    /// A circuit breaker refused admission.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen {
        /// Name of the refusing breaker.
        name: String,
    },

    /// The operation lost the race against its timeout.
    #[error("operation timed out after {after:?}")]
    TimedOut {
        /// The configured timeout.
        after: Duration,
    },

    /// A queued or spawned task went away without producing a result.
    #[error("task was dropped before completing: {reason}")]
    TaskDropped {
        /// Why the result never arrived.
        reason: String,
    },
}

impl ResilienceError {
    /// Creates a circuit-open error.
    pub fn circuit_open(name: impl Into<String>) -> Self {
        Self::CircuitOpen { name: name.into() }
    }

    /// Creates a task-dropped error.
    pub fn task_dropped(reason: impl Into<String>) -> Self {
        Self::TaskDropped {
            reason: reason.into(),
        }
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
