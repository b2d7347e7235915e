//! Optional adapter operations.
//!
//! Each trait groups the operations of one capability category. An adapter
//! exposes a trait through the matching accessor on [`Adapter`] and declares
//! the individual capability flags it actually backs. The dispatcher checks
//! the flag before every call, so an implementation only needs to be correct
//! for the flags it sets.
//!
//! | Operation | Capability |
//! |---|---|
//! | `reply` / `edit` / `delete` | `conversation.reply` / `.edit` / `.delete` |
//! | `add_reaction` / `remove_reaction` | `interaction.reactions` |
//! | `send_buttons` / `send_poll` / `send_sticker` | `interaction.buttons` / `.polls` / `.stickers` |
//! | `get_history` / `search` | `discovery.history` / `.search` |
//! | `get_pins` / `pin_message` / `unpin_message` | `discovery.pins` |
//! | `get_member_info` / `get_channel_info` | `discovery.memberInfo` / `.channelInfo` |
//! | `kick` / `ban` / `unban` / `mute` / `unmute` | `management.kick` / `.ban` / `.ban` / `.timeout` / `.timeout` |
//! | `create_invite` | `advanced.createInvite` |
//!
//! [`Adapter`]: super::adapter::Adapter

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::foundation::error::ChorusResult;
use crate::foundation::message::{Chat, Content, Message, MessageId, Participant, Poll};
use crate::integration::adapter::{SendOptions, SendResult};

// =============================================================================
// Supporting types
// =============================================================================

/// What pressing a button does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ButtonAction {
    /// Sends the payload back to the bot.
    Callback(String),
    /// Opens a link.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Buttons laid out in rows.
pub type ButtonRows = Vec<Vec<Button>>;

/// History page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: usize,
    /// Only messages older than this message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            before: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    /// Restrict to one chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            chat_id: None,
            limit: 20,
        }
    }

    pub fn in_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    #[default]
    Member,
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user: Participant,
    pub role: MemberRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<SystemTime>,
}

// =============================================================================
// Extension traits
// =============================================================================

/// Threaded conversation operations.
#[async_trait]
pub trait ConversationOps: Send + Sync {
    async fn reply(
        &self,
        to: &MessageId,
        content: Content,
        options: SendOptions,
    ) -> ChorusResult<SendResult>;

    async fn edit(&self, message: &MessageId, content: Content) -> ChorusResult<()>;

    async fn delete(&self, message: &MessageId) -> ChorusResult<()>;
}

/// Rich interaction operations.
#[async_trait]
pub trait InteractionOps: Send + Sync {
    async fn add_reaction(&self, message: &MessageId, emoji: &str) -> ChorusResult<()>;

    async fn remove_reaction(&self, message: &MessageId, emoji: &str) -> ChorusResult<()>;

    async fn send_buttons(
        &self,
        chat_id: &str,
        content: Content,
        buttons: ButtonRows,
    ) -> ChorusResult<SendResult>;

    async fn send_poll(&self, chat_id: &str, poll: Poll) -> ChorusResult<SendResult>;

    async fn send_sticker(&self, chat_id: &str, sticker_id: &str) -> ChorusResult<SendResult>;
}

/// Read-side lookups.
#[async_trait]
pub trait DiscoveryOps: Send + Sync {
    async fn get_history(&self, chat_id: &str, query: HistoryQuery) -> ChorusResult<Vec<Message>>;

    async fn search(&self, query: SearchQuery) -> ChorusResult<Vec<Message>>;

    async fn get_pins(&self, chat_id: &str) -> ChorusResult<Vec<Message>>;

    async fn pin_message(&self, message: &MessageId) -> ChorusResult<()>;

    async fn unpin_message(&self, message: &MessageId) -> ChorusResult<()>;

    async fn get_member_info(&self, chat_id: &str, user_id: &str) -> ChorusResult<MemberInfo>;

    async fn get_channel_info(&self, chat_id: &str) -> ChorusResult<ChannelInfo>;
}

/// Moderation.
#[async_trait]
pub trait ManagementOps: Send + Sync {
    async fn kick(&self, chat_id: &str, user_id: &str, reason: Option<&str>) -> ChorusResult<()>;

    async fn ban(&self, chat_id: &str, user_id: &str, reason: Option<&str>) -> ChorusResult<()>;

    async fn unban(&self, chat_id: &str, user_id: &str) -> ChorusResult<()>;

    /// Mutes a member, for `duration` or indefinitely.
    async fn mute(&self, chat_id: &str, user_id: &str, duration: Option<Duration>)
    -> ChorusResult<()>;

    async fn unmute(&self, chat_id: &str, user_id: &str) -> ChorusResult<()>;
}

#[async_trait]
pub trait AdvancedOps: Send + Sync {
    async fn create_invite(&self, chat_id: &str, options: InviteOptions) -> ChorusResult<Invite>;
}
