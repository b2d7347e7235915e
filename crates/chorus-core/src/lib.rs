//! # Chorus Core
//!
//! The dispatch core of Chorus: one programming surface over many chat
//! platforms.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Capabilities**: the fixed feature taxonomy adapters declare ([`Capabilities`])
//! - **Errors**: one error type with stable codes ([`ChorusError`])
//! - **Messages**: the normalized inbound event ([`Message`])
//!
//! ### Framework Layer
//!
//! - **Dispatcher**: adapter registry, capability gating, inbound fan-out ([`Dispatcher`])
//! - **Middleware**: ordered inbound pipeline with a consumable continuation ([`Middleware`], [`Next`])
//!
//! ### Integration Layer
//!
//! - **Adapter contract**: required operations plus lifecycle rules ([`Adapter`], [`Lifecycle`])
//! - **Extension traits**: capability-gated optional operations ([`ConversationOps`] and friends)
//! - **Storage**: inbound media persistence collaborator ([`MediaStorage`])
//!
//! ## Hub-and-Spoke Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌────────────┐     ┌────────────┐
//! │   Adapter    │────▶│ Dispatcher │────▶│ Middleware │────▶│ Subscriber │
//! │  (platform)  │◀────│   (Core)   │     │   chain    │────▶│ Subscriber │
//! └──────────────┘     └────────────┘     └────────────┘     └────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use chorus_core::{Content, Dispatcher, SendOptions};
//!
//! let dispatcher = Dispatcher::new();
//! dispatcher.register_adapter("loopback", adapter);
//!
//! dispatcher.use_fn(|msg, next| async move {
//!     tracing::info!(from = %msg.sender.id, "inbound");
//!     next.run(msg).await
//! });
//!
//! dispatcher.on(|msg| async move {
//!     if msg.text() == Some("ping") {
//!         if let Some(d) = msg.dispatcher() {
//!             d.send(msg.platform(), &msg.chat.id, "pong".into(), SendOptions::default()).await?;
//!         }
//!     }
//!     Ok(())
//! });
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    Annotations, Capabilities, Capability, Category, Chat, ChatKind, ChorusError, ChorusResult,
    Content, Media, MediaKind, Message, MessageId, MessageKind, Participant, Poll,
    RateLimitClassifier,
};

// Re-export framework types
pub use framework::{
    BoxedMiddleware, Dispatcher, FnMiddleware, HandlerResult, Middleware, Next, Subscriber,
    SubscriptionId, WeakDispatcher, middleware_fn,
};

// Re-export integration types
pub use integration::{
    Adapter, AdapterConfig, AdapterResilience, AdvancedOps, BoxedAdapter, BoxedMediaStorage,
    Button, ButtonAction, ButtonRows, ChannelInfo, ConfigurableAdapter, ConversationOps,
    DiscoveryOps, HistoryQuery, InteractionOps, Invite, InviteOptions, Lifecycle,
    LifecycleState, ManagementOps, MediaMetadata, MediaStorage, MemberInfo, MemberRole,
    MessageCallback, SearchQuery, SendOptions, SendResult,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::framework::{Dispatcher, HandlerResult, Middleware, Next, middleware_fn};
    pub use super::integration::{
        Adapter, AdapterConfig, ConfigurableAdapter, SendOptions, SendResult,
    };
}
