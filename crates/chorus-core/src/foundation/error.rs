//! Unified error taxonomy.
//!
//! Every failure surfaced by the dispatcher or an adapter is a [`ChorusError`]
//! carrying a stable machine-readable [`code`](ChorusError::code). The
//! dispatcher itself only ever raises [`ChorusError::AdapterNotFound`] and
//! [`ChorusError::CapabilityNotSupported`]; all other variants come from
//! adapters and pass through untouched.

use std::time::Duration;

use chorus_resilience::{Classification, ErrorClassifier, ResilienceError};
use serde_json::Value;
use thiserror::Error;

use super::capability::Capability;

// =============================================================================
// ChorusError
// =============================================================================

/// Errors produced across the Chorus surface.
#[derive(Debug, Clone, Error)]
pub enum ChorusError {
    /// No adapter is registered for the platform.
    #[error("no adapter registered for platform '{platform}'")]
    AdapterNotFound { platform: String },

    /// The adapter does not declare the capability.
    #[error("platform '{platform}' does not support '{capability}'")]
    CapabilityNotSupported {
        platform: String,
        capability: Capability,
    },

    /// Missing or invalid configuration, or an adapter used outside its
    /// initialized lifetime.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The backend answered with an error.
    #[error("[{platform}] API call failed: {message}")]
    ApiCall {
        platform: String,
        message: String,
        /// HTTP-like status, when the backend has one.
        status: Option<u16>,
        /// Raw error body from the backend.
        payload: Option<Value>,
    },

    /// The backend could not be reached.
    #[error("[{platform}] network error: {message}")]
    Network { platform: String, message: String },

    /// The backend throttled the call.
    #[error("[{platform}] rate limited{}", retry_hint(.retry_after))]
    RateLimit {
        platform: String,
        /// Server-declared wait.
        retry_after: Option<Duration>,
    },

    #[error("[{platform}] authentication failed: {message}")]
    Authentication { platform: String, message: String },

    #[error("[{platform}] permission denied: {message}")]
    Permission { platform: String, message: String },

    /// Input rejected before reaching the backend.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A circuit breaker refused the call.
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    /// The call did not complete within its timeout.
    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },
}

impl ChorusError {
    /// Stable code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound { .. } => "ADAPTER_NOT_FOUND",
            Self::CapabilityNotSupported { .. } => "CAPABILITY_NOT_SUPPORTED",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::ApiCall { .. } => "API_CALL_ERROR",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::RateLimit { .. } => "RATE_LIMIT_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Permission { .. } => "PERMISSION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Timeout { .. } => "TIMEOUT",
        }
    }

    /// The platform the error originated from, when known.
    pub fn platform(&self) -> Option<&str> {
        match self {
            Self::AdapterNotFound { platform }
            | Self::CapabilityNotSupported { platform, .. }
            | Self::ApiCall { platform, .. }
            | Self::Network { platform, .. }
            | Self::RateLimit { platform, .. }
            | Self::Authentication { platform, .. }
            | Self::Permission { platform, .. } => Some(platform),
            _ => None,
        }
    }

    pub fn adapter_not_found(platform: impl Into<String>) -> Self {
        Self::AdapterNotFound {
            platform: platform.into(),
        }
    }

    pub fn capability_not_supported(platform: impl Into<String>, capability: Capability) -> Self {
        Self::CapabilityNotSupported {
            platform: platform.into(),
            capability,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The error raised when an adapter is used before `init` or after
    /// `destroy`.
    pub fn not_initialized(platform: &str) -> Self {
        Self::configuration(format!("adapter '{platform}' is not initialized"))
    }

    pub fn api_call(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiCall {
            platform: platform.into(),
            message: message.into(),
            status: None,
            payload: None,
        }
    }

    /// Creates an API error with a status code and optional raw body.
    pub fn api_status(
        platform: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self::ApiCall {
            platform: platform.into(),
            message: message.into(),
            status: Some(status),
            payload,
        }
    }

    pub fn network(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            platform: platform.into(),
            message: message.into(),
        }
    }

    pub fn rate_limit(platform: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            platform: platform.into(),
            retry_after,
        }
    }

    pub fn authentication(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            platform: platform.into(),
            message: message.into(),
        }
    }

    pub fn permission(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permission {
            platform: platform.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the default classifier treats this error as a rate limit.
    pub fn is_rate_limit(&self) -> bool {
        RateLimitClassifier.classify(self).is_rate_limited()
    }
}

impl From<ResilienceError> for ChorusError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::CircuitOpen { name } => Self::CircuitOpen { name },
            ResilienceError::TimedOut { after } => Self::Timeout { after },
            ResilienceError::TaskDropped { reason } => {
                Self::configuration(format!("internal task failed: {reason}"))
            }
        }
    }
}

impl From<serde_json::Error> for ChorusError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

// =============================================================================
// Rate-limit classification
// =============================================================================

/// The shared default rate-limit predicate.
///
/// Rate limited when the error is [`ChorusError::RateLimit`], or an
/// [`ChorusError::ApiCall`] with status 429. The server wait comes from
/// `retry_after`, or from a `retry_after` / `parameters.retry_after` field (in
/// seconds) of the raw payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitClassifier;

impl ErrorClassifier<ChorusError> for RateLimitClassifier {
    fn classify(&self, error: &ChorusError) -> Classification {
        match error {
            ChorusError::RateLimit { retry_after, .. } => Classification::RateLimited {
                retry_after: *retry_after,
            },
            ChorusError::ApiCall {
                status: Some(429),
                payload,
                ..
            } => Classification::RateLimited {
                retry_after: payload.as_ref().and_then(retry_after_from_payload),
            },
            _ => Classification::Fatal,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|wait| format!(", retry after {wait:?}"))
        .unwrap_or_default()
}

fn retry_after_from_payload(payload: &Value) -> Option<Duration> {
    let seconds = payload
        .get("retry_after")
        .or_else(|| payload.pointer("/parameters/retry_after"))?
        .as_f64()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for Chorus operations.
pub type ChorusResult<T> = Result<T, ChorusError>;
