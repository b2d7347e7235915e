//! Chorus Runtime - Orchestration layer for Chorus.
//!
//! This crate provides:
//! - Layered configuration (`ConfigLoader`, `ChorusConfig`)
//! - Logging setup (`LoggingBuilder`)
//! - Adapter construction and lifecycle (`ChorusRuntime`)
//!
//! ```ignore
//! use chorus_runtime::ChorusRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ChorusRuntime::new();
//!     runtime.register_adapter::<LoopbackAdapter>().await?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{
    ChorusConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, PlatformConfig,
    ResilienceConfig,
};
pub use error::{LoggingError, RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{ChorusRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
