//! # Chorus
//!
//! One programming surface over many chat platforms.
//!
//! ## Overview
//!
//! Bots talk to a single [`Dispatcher`](chorus_core::Dispatcher). Each chat
//! platform is plugged in as an adapter that declares what it can do; optional
//! operations are refused up front when the target platform lacks the
//! capability, and every outbound call can run through retry, rate limiting,
//! a circuit breaker and a timeout.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌────────────┐     ┌──────────────┐
//! │   Runtime   │────▶│ Dispatcher │────▶│ Middleware │────▶│ Subscribers  │
//! │  (config)   │     │            │◀────│   chain    │     │ (your code)  │
//! └─────────────┘     └────────────┘     └────────────┘     └──────────────┘
//!                        ▲      │ gated outbound calls
//!                inbound │      ▼
//!                     ┌────────────┐     ┌───────────────────────────────────┐
//!                     │  Adapters  │────▶│ queue ▶ breaker ▶ retry ▶ timeout │
//!                     └────────────┘     └───────────────────────────────────┘
//! ```
//!
//! - **Runtime**: loads layered configuration, sets up logging, builds adapters
//! - **Dispatcher**: adapter registry, capability gating, inbound fan-out
//! - **Middleware**: ordered inbound pipeline that may stop delivery
//! - **Resilience**: reusable retry, rate limiting, breaker, timeout and cache
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chorus::prelude::*;
//! use chorus_adapter_loopback::LoopbackAdapter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ChorusRuntime::new();
//!     runtime.register_adapter::<LoopbackAdapter>().await?;
//!
//!     runtime.dispatcher().on(|msg: Message| async move {
//!         if msg.text() == Some("ping")
//!             && let Some(d) = msg.dispatcher()
//!         {
//!             d.reply(msg.platform(), &msg.id, Content::text("pong"), SendOptions::default())
//!                 .await?;
//!         }
//!         Ok(())
//!     });
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `adapter-loopback`: the in-memory reference adapter

pub use chorus_core as core;
pub use chorus_resilience as resilience;
pub use chorus_runtime as runtime;

#[cfg(feature = "adapter-loopback")]
pub use chorus_adapter_loopback as loopback;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use chorus::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use chorus_runtime::{ChorusRuntime, RuntimeError};

    // Dispatch surface
    pub use chorus_core::{
        Dispatcher, HandlerResult, Middleware, Next, SendOptions, SendResult, middleware_fn,
    };

    // Messages and errors
    pub use chorus_core::{
        Capabilities, Capability, Chat, ChatKind, ChorusError, ChorusResult, Content, Message,
        MessageId, Participant,
    };

    // For custom adapters
    pub use chorus_core::{Adapter, AdapterConfig, ConfigurableAdapter, Lifecycle};
}
