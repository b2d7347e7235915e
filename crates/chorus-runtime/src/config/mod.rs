//! Configuration module for the Chorus runtime.
//!
//! Layered loading (files, environment, programmatic merges), the schema the
//! sources are extracted into, and validation of the result.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ChorusConfig, CircuitBreakerConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, PlatformConfig, RateLimitConfig, ResilienceConfig, RetryConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
