//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! filters = { chorus_core = "trace" }
//!
//! [resilience]
//! retry = { max_retries = 3, base_delay_ms = 1000, max_delay_ms = 30000 }
//! rate_limit = { concurrency = 5, rate = 30.0 }
//! timeout_ms = 30000
//!
//! [platforms.loopback]
//! enabled = true
//! settings = { self_id = "echo-bot" }
//! circuit_breaker = { failure_threshold = 3, reset_timeout_ms = 10000 }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chorus_core::AdapterConfig;
use chorus_core::AdapterResilience;
use chorus_resilience::{QueueConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChorusConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Resilience defaults applied to every platform.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Per-platform tables keyed by platform id.
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformConfig>,
}

impl ChorusConfig {
    /// Builds the [`AdapterConfig`] for `platform`. Unknown platforms get
    /// empty settings and the global resilience defaults.
    pub fn adapter_config(&self, platform: &str) -> AdapterConfig {
        match self.platforms.get(platform) {
            Some(entry) => AdapterConfig::new(platform)
                .with_settings(entry.settings.clone())
                .with_resilience(self.resilience.resolve(entry)),
            None => AdapterConfig::new(platform)
                .with_resilience(self.resilience.resolve(&PlatformConfig::default())),
        }
    }

    /// Whether `platform` should be started. Platforms without a table are
    /// enabled.
    pub fn is_enabled(&self, platform: &str) -> bool {
        self.platforms.get(platform).is_none_or(|p| p.enabled)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// When file output rolls over to a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Target file when `output = "file"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Rotated files kept on disk. Zero keeps all of them.
    pub max_files: usize,
    /// Per-module levels, e.g. `chorus_core = "trace"`.
    pub filters: BTreeMap<String, LogLevel>,
    pub thread_ids: bool,
    /// Include file and line of the call site.
    pub file_location: bool,
    pub span_events: SpanEventConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: 5,
            filters: BTreeMap::new(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
        }
    }
}

// =============================================================================
// Resilience
// =============================================================================

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_backoff: bool,
    /// Upper bound of the random delay added to each backoff.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            exponential_backoff: policy.exponential_backoff,
            max_jitter_ms: policy.max_jitter.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_backoff: self.exponential_backoff,
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

/// Outbound throttling settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls in flight at once.
    pub concurrency: usize,
    /// Calls started per second.
    pub rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            concurrency: queue.concurrency,
            rate: queue.rate,
        }
    }
}

impl RateLimitConfig {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.concurrency,
            rate: self.rate,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        let breaker = chorus_resilience::CircuitBreakerConfig::default();
        Self {
            failure_threshold: breaker.failure_threshold,
            reset_timeout_ms: breaker.reset_timeout.as_millis() as u64,
            success_threshold: breaker.success_threshold,
        }
    }
}

impl CircuitBreakerConfig {
    /// Converts to the resilience crate's config. The name is assigned per
    /// operation by the adapter.
    pub fn to_breaker_config(&self, name: &str) -> chorus_resilience::CircuitBreakerConfig {
        chorus_resilience::CircuitBreakerConfig {
            name: name.to_string(),
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            success_threshold: self.success_threshold,
        }
    }
}

/// Resilience defaults shared by all platforms. Absent sections are off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: Some(RetryConfig::default()),
            rate_limit: None,
            circuit_breaker: None,
            timeout_ms: None,
        }
    }
}

impl ResilienceConfig {
    /// Overlays the platform's overrides on these defaults, section by
    /// section.
    pub fn resolve(&self, platform: &PlatformConfig) -> AdapterResilience {
        let retry = platform.retry.or(self.retry);
        let rate_limit = platform.rate_limit.or(self.rate_limit);
        let breaker = platform.circuit_breaker.or(self.circuit_breaker);
        let timeout_ms = platform.timeout_ms.or(self.timeout_ms);

        AdapterResilience {
            retry: retry.map(|r| r.to_policy()),
            queue: rate_limit.map(|r| r.to_queue_config()),
            circuit_breaker: breaker.map(|b| b.to_breaker_config("default")),
            timeout: timeout_ms.map(Duration::from_millis),
        }
    }
}

// =============================================================================
// Platforms
// =============================================================================

/// One `[platforms.<id>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Adapter-specific settings, passed through untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub settings: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            settings: Value::Null,
            retry: None,
            rate_limit: None,
            circuit_breaker: None,
            timeout_ms: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_overrides_win_per_section() {
        let config = ChorusConfig {
            resilience: ResilienceConfig {
                retry: Some(RetryConfig::default()),
                rate_limit: Some(RateLimitConfig::default()),
                circuit_breaker: None,
                timeout_ms: Some(5000),
            },
            platforms: BTreeMap::from([(
                "loopback".to_string(),
                PlatformConfig {
                    settings: json!({ "self_id": "bot" }),
                    retry: Some(RetryConfig {
                        max_retries: 1,
                        ..RetryConfig::default()
                    }),
                    circuit_breaker: Some(CircuitBreakerConfig::default()),
                    ..PlatformConfig::default()
                },
            )]),
            ..ChorusConfig::default()
        };

        let adapter = config.adapter_config("loopback");
        assert_eq!(adapter.settings["self_id"], "bot");
        let resilience = adapter.resilience;
        assert_eq!(resilience.retry.unwrap().max_retries, 1);
        assert_eq!(resilience.queue.unwrap().concurrency, 5);
        assert_eq!(resilience.circuit_breaker.unwrap().failure_threshold, 5);
        assert_eq!(resilience.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_unknown_platform_gets_defaults() {
        let config = ChorusConfig::default();
        assert!(config.is_enabled("anything"));

        let adapter = config.adapter_config("anything");
        assert!(adapter.settings.is_null());
        assert_eq!(adapter.resilience.retry, Some(RetryPolicy::default()));
        assert!(adapter.resilience.queue.is_none());
    }

    #[test]
    fn test_disabled_platform() {
        let mut config = ChorusConfig::default();
        config.platforms.insert(
            "off".into(),
            PlatformConfig {
                enabled: false,
                ..PlatformConfig::default()
            },
        );
        assert!(!config.is_enabled("off"));
    }
}
