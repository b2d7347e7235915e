//! Adapter contract and lifecycle.
//!
//! An adapter bridges one chat platform to the dispatcher. The required
//! surface is small: initialize, send, deliver inbound messages, report
//! capabilities, shut down. Everything optional lives in the extension traits
//! of [`super::extension`], reached through accessor methods that default to
//! `None`.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──destroy──▶ Destroyed
//!                            ▲    │                    │
//!                            └init┘ (implicit destroy) │
//!                            ▲─────────────init────────┘
//! ```
//!
//! `send` (or any other call) outside `Initialized` fails with
//! [`ChorusError::Configuration`] rather than a platform error. [`Lifecycle`]
//! encodes these rules for adapter implementations.
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Adapter for MyAdapter {
//!     fn platform(&self) -> &str { "my" }
//!
//!     async fn init(&self, config: &AdapterConfig) -> ChorusResult<()> {
//!         if self.lifecycle.is_initialized() {
//!             self.destroy().await?;
//!         }
//!         let settings: MySettings = config.settings()?;
//!         // connect...
//!         self.lifecycle.mark_initialized();
//!         Ok(())
//!     }
//!
//!     async fn send(&self, target: &str, content: Content, options: SendOptions) -> ChorusResult<SendResult> {
//!         self.lifecycle.ensure_initialized(self.platform())?;
//!         // ...
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use chorus_resilience::{
    CircuitBreakerConfig, QueueConfig, RequestQueue, ResilientExecutor, RetryPolicy,
    TimeoutPolicy,
};

use crate::foundation::capability::Capabilities;
use crate::foundation::error::{ChorusError, ChorusResult};
use crate::foundation::message::{Content, Message, MessageId};
use crate::integration::extension::{
    AdvancedOps, ConversationOps, DiscoveryOps, InteractionOps, ManagementOps,
};

// =============================================================================
// Callback and I/O types
// =============================================================================

/// Callback an adapter invokes for every normalized inbound message.
pub type MessageCallback = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Optional knobs for outbound sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Message to reply to. Adapters without reply support may ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Deliver without a notification.
    #[serde(default)]
    pub silent: bool,
    /// Platform formatting mode, e.g. `"markdown"` or `"html"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    /// Adapter-specific extras passed through verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl SendOptions {
    pub fn reply_to(message_id: impl Into<String>) -> Self {
        Self {
            reply_to: Some(message_id.into()),
            ..Self::default()
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub message_id: MessageId,
    pub timestamp: SystemTime,
    /// Backend response as received.
    pub raw: Value,
}

impl SendResult {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            timestamp: SystemTime::now(),
            raw: Value::Null,
        }
    }
}

// =============================================================================
// Adapter configuration
// =============================================================================

/// Resilience settings resolved for one adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterResilience {
    pub retry: Option<RetryPolicy>,
    pub queue: Option<QueueConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub timeout: Option<Duration>,
}

impl AdapterResilience {
    /// Builds an executor from these settings. The breaker, when configured,
    /// is renamed to `name` so each operation category gets its own.
    pub fn executor(&self, name: &str) -> ResilientExecutor {
        let mut executor =
            ResilientExecutor::new().with_retry_policy(self.retry.unwrap_or_else(RetryPolicy::none));
        if let Some(breaker) = &self.circuit_breaker {
            executor = executor.with_circuit_breaker(CircuitBreakerConfig {
                name: name.to_string(),
                ..breaker.clone()
            });
        }
        if let Some(timeout) = self.timeout {
            executor = executor.with_timeout(TimeoutPolicy::new(timeout));
        }
        executor
    }

    /// Builds a request queue if one is configured.
    pub fn request_queue(&self) -> Option<RequestQueue> {
        self.queue.map(RequestQueue::from_config)
    }
}

/// Everything an adapter receives at `init`.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub platform: String,
    /// Adapter-specific settings, opaque to the core.
    pub settings: Value,
    pub resilience: AdapterResilience,
}

impl AdapterConfig {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            settings: Value::Null,
            resilience: AdapterResilience::default(),
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_resilience(mut self, resilience: AdapterResilience) -> Self {
        self.resilience = resilience;
        self
    }

    /// Deserializes the settings into the adapter's own type. Missing
    /// settings deserialize from an empty object.
    pub fn settings<T: DeserializeOwned>(&self) -> ChorusResult<T> {
        let value = match &self.settings {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            ChorusError::configuration(format!("invalid settings for '{}': {e}", self.platform))
        })
    }
}

// =============================================================================
// Adapter trait
// =============================================================================

/// The core adapter trait.
///
/// Implementations must be cheap to share: the dispatcher holds them as
/// `Arc<dyn Adapter>`.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Platform id, unique within a dispatcher.
    fn platform(&self) -> &str;

    /// Connects and prepares the adapter. Calling it again re-initializes.
    async fn init(&self, config: &AdapterConfig) -> ChorusResult<()>;

    /// Sends `content` to the chat `target`.
    async fn send(
        &self,
        target: &str,
        content: Content,
        options: SendOptions,
    ) -> ChorusResult<SendResult>;

    /// Installs the inbound callback, replacing any previous one.
    fn on_message(&self, callback: MessageCallback);

    /// Declared capabilities. Fixed for the adapter's lifetime.
    fn capabilities(&self) -> &Capabilities;

    /// Releases resources. Idempotent.
    async fn destroy(&self) -> ChorusResult<()>;

    fn conversation(&self) -> Option<&dyn ConversationOps> {
        None
    }

    fn interaction(&self) -> Option<&dyn InteractionOps> {
        None
    }

    fn discovery(&self) -> Option<&dyn DiscoveryOps> {
        None
    }

    fn management(&self) -> Option<&dyn ManagementOps> {
        None
    }

    fn advanced(&self) -> Option<&dyn AdvancedOps> {
        None
    }
}

/// A shared adapter trait object.
pub type BoxedAdapter = Arc<dyn Adapter>;

/// Adapters the runtime can construct by platform name.
///
/// The runtime looks up `platforms.<name()>` in configuration and, if that
/// platform is enabled, calls [`from_config`](Self::from_config) followed by
/// [`Adapter::init`].
pub trait ConfigurableAdapter: Adapter + Sized + 'static {
    /// Configuration key and platform id.
    fn name() -> &'static str;

    /// Creates an uninitialized adapter.
    fn from_config(config: &AdapterConfig) -> ChorusResult<Arc<Self>>;
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Destroyed,
}

/// Thread-safe lifecycle tracker for adapter implementations.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Uninitialized),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Initialized
    }

    /// Fails with a "not initialized" configuration error unless initialized.
    pub fn ensure_initialized(&self, platform: &str) -> ChorusResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ChorusError::not_initialized(platform))
        }
    }

    pub fn mark_initialized(&self) {
        *self.state.lock() = LifecycleState::Initialized;
    }

    /// Moves to `Destroyed`. Returns false when there was nothing to destroy,
    /// so callers can skip cleanup.
    pub fn mark_destroyed(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Initialized => {
                *state = LifecycleState::Destroyed;
                true
            }
            LifecycleState::Uninitialized | LifecycleState::Destroyed => {
                debug!(state = ?*state, "Destroy skipped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_rules() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.ensure_initialized("x").is_err());
        assert!(!lifecycle.mark_destroyed());

        lifecycle.mark_initialized();
        assert!(lifecycle.ensure_initialized("x").is_ok());

        assert!(lifecycle.mark_destroyed());
        assert!(!lifecycle.mark_destroyed());
        let err = lifecycle.ensure_initialized("x").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        lifecycle.mark_initialized();
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Settings {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        greeting: String,
    }

    #[test]
    fn test_typed_settings() {
        let config = AdapterConfig::new("x").with_settings(json!({ "token": "t", "greeting": "hi" }));
        let settings: Settings = config.settings().unwrap();
        assert_eq!(settings.token.as_deref(), Some("t"));

        let empty: Settings = AdapterConfig::new("x").settings().unwrap();
        assert_eq!(empty, Settings::default());

        let bad = AdapterConfig::new("x").with_settings(json!({ "greeting": 5 }));
        assert!(bad.settings::<Settings>().is_err());
    }

    #[test]
    fn test_executor_from_resilience_settings() {
        let resilience = AdapterResilience {
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            ..AdapterResilience::default()
        };
        let executor = resilience.executor("x.send");
        assert_eq!(executor.breaker().unwrap().name(), "x.send");
        assert_eq!(executor.retry_policy().max_retries, 0);
        assert!(resilience.request_queue().is_none());
    }
}
