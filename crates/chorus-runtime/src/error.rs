//! Runtime error types.

use chorus_core::ChorusError;
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The adapter could not be constructed from its configuration.
    #[error("Adapter error: {0}")]
    Adapter(#[from] ChorusError),

    /// The adapter was constructed but `init` failed.
    #[error("Failed to initialize adapter '{platform}': {source}")]
    AdapterInit {
        platform: String,
        #[source]
        source: ChorusError,
    },

    /// Installing the shutdown signal handler failed.
    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn adapter_init(platform: impl Into<String>, source: ChorusError) -> Self {
        Self::AdapterInit {
            platform: platform.into(),
            source,
        }
    }
}

/// Errors from logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    /// A global subscriber is already installed.
    #[error("Failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),

    /// The rolling file appender could not be created.
    #[error("Failed to open log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
