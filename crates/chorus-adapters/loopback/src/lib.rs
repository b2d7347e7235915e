//! # Chorus Loopback Adapter
//!
//! A complete adapter whose platform is an in-memory chat backend. It
//! implements the required contract and every extension trait, and runs all
//! outbound calls through the configured resilience stack, which makes it the
//! reference for writing networked adapters and a harness for testing bots.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chorus_adapter_loopback::LoopbackAdapter;
//! use chorus_core::{Chat, ChatKind, Participant};
//!
//! let adapter = runtime.register_adapter::<LoopbackAdapter>().await?.unwrap();
//!
//! adapter
//!     .receive(Chat::new("room", ChatKind::Group), Participant::new("alice"), "ping")
//!     .await?;
//! assert_eq!(adapter.outbox().len(), 1);
//! ```

mod adapter;
mod backend;
mod config;

pub use adapter::{LoopbackAdapter, PLATFORM};
pub use backend::SentMessage;
pub use config::{LoopbackSettings, default_capabilities};
