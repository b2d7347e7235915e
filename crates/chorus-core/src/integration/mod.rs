//! Integration layer - Contracts for platform adapters and collaborators.
//!
//! - Adapter trait, configuration and lifecycle
//! - Capability-gated extension traits
//! - Media storage collaborator

pub mod adapter;
pub mod extension;
pub mod storage;

pub use adapter::{
    Adapter, AdapterConfig, AdapterResilience, BoxedAdapter, ConfigurableAdapter, Lifecycle,
    LifecycleState, MessageCallback, SendOptions, SendResult,
};
pub use extension::{
    AdvancedOps, Button, ButtonAction, ButtonRows, ChannelInfo, ConversationOps, DiscoveryOps,
    HistoryQuery, InteractionOps, Invite, InviteOptions, ManagementOps, MemberInfo, MemberRole,
    SearchQuery,
};
pub use storage::{BoxedMediaStorage, MediaMetadata, MediaStorage};
