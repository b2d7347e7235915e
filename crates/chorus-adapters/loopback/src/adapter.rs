//! [`LoopbackAdapter`]: the full adapter contract over the in-memory backend.
//!
//! Every outbound operation goes through the same call path a networked
//! adapter would use:
//!
//! ```text
//! operation ──▶ RequestQueue (optional) ──▶ ResilientExecutor ──▶ Backend
//!                concurrency + rate          breaker, retry,       latency,
//!                                            timeout               injected failures
//! ```
//!
//! Each operation group (send, conversation, interaction, discovery,
//! management, advanced) has its own circuit breaker, named
//! `<platform>.<group>`, so a failing group does not block the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chorus_core::{
    Adapter, AdapterConfig, AdapterResilience, AdvancedOps, ButtonRows, Capabilities,
    Capability, ChannelInfo, Chat, ChorusError, ChorusResult, ConfigurableAdapter, Content,
    ConversationOps, DiscoveryOps, HistoryQuery, InteractionOps, Invite, InviteOptions,
    Lifecycle, ManagementOps, MemberInfo, MemberRole, Message, MessageCallback, MessageId,
    Participant, Poll, RateLimitClassifier, SearchQuery, SendOptions, SendResult,
};
use chorus_resilience::{RequestQueue, ResilientExecutor};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{Backend, ChatState, Record, SentMessage};
use crate::config::LoopbackSettings;

/// Platform id used by the runtime.
pub const PLATFORM: &str = "loopback";

/// Groups of operations that share a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OpGroup {
    Send,
    Conversation,
    Interaction,
    Discovery,
    Management,
    Advanced,
}

impl OpGroup {
    const ALL: [OpGroup; 6] = [
        Self::Send,
        Self::Conversation,
        Self::Interaction,
        Self::Discovery,
        Self::Management,
        Self::Advanced,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Conversation => "conversation",
            Self::Interaction => "interaction",
            Self::Discovery => "discovery",
            Self::Management => "management",
            Self::Advanced => "advanced",
        }
    }
}

/// Resilience wiring built at `init`.
struct CallPath {
    executors: HashMap<OpGroup, ResilientExecutor>,
    queue: Option<RequestQueue>,
}

impl CallPath {
    fn new(platform: &str, resilience: &AdapterResilience) -> Self {
        let executors = OpGroup::ALL
            .into_iter()
            .map(|group| {
                let name = format!("{platform}.{}", group.as_str());
                (group, resilience.executor(&name))
            })
            .collect();
        Self {
            executors,
            queue: resilience.request_queue(),
        }
    }

    fn executor(&self, group: OpGroup) -> ResilientExecutor {
        self.executors.get(&group).cloned().unwrap_or_default()
    }
}

// =============================================================================
// LoopbackAdapter
// =============================================================================

/// An adapter whose "platform" lives in process memory.
///
/// Useful as a reference implementation and for testing bots end to end:
/// inbound traffic is simulated with [`receive`](Self::receive) and
/// [`inject`](Self::inject), outbound traffic is inspected with
/// [`outbox`](Self::outbox), and backend failures are scripted with
/// [`fail_next`](Self::fail_next).
pub struct LoopbackAdapter {
    platform: String,
    capabilities: Capabilities,
    lifecycle: Lifecycle,
    backend: Arc<Backend>,
    callback: RwLock<Option<MessageCallback>>,
    path: RwLock<Option<Arc<CallPath>>>,
}

impl LoopbackAdapter {
    /// Creates an adapter with the default capabilities.
    pub fn new(platform: impl Into<String>) -> Self {
        Self::with_capabilities(platform, LoopbackSettings::default().resolved_capabilities())
    }

    pub fn with_capabilities(platform: impl Into<String>, capabilities: Capabilities) -> Self {
        let platform = platform.into();
        Self {
            backend: Arc::new(Backend::new(&platform)),
            platform,
            capabilities,
            lifecycle: Lifecycle::new(),
            callback: RwLock::new(None),
            path: RwLock::new(None),
        }
    }

    /// Runs `op` as one backend call through the queue and executor.
    async fn call<T, F>(&self, group: OpGroup, action: &'static str, op: F) -> ChorusResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut ChatState) -> ChorusResult<T> + Send + Sync + 'static,
    {
        self.lifecycle.ensure_initialized(&self.platform)?;
        let Some(path) = self.path.read().clone() else {
            return Err(ChorusError::not_initialized(&self.platform));
        };

        let executor = path.executor(group);
        let backend = self.backend.clone();
        let op = Arc::new(op);
        let attempt = move || {
            let backend = backend.clone();
            let op = op.clone();
            async move { backend.perform(action, |state| op(state)).await }
        };
        let task = async move {
            let classifier = RateLimitClassifier;
            executor.execute(attempt, &classifier).await
        };

        match &path.queue {
            Some(queue) => queue.add(move || task).await,
            None => task.await,
        }
    }

    fn sent(&self, message: Message) -> SendResult {
        let raw = json!({
            "chat_id": message.id.chat_id,
            "message_id": message.id.message_id,
        });
        SendResult {
            message_id: message.id,
            timestamp: message.timestamp,
            raw,
        }
    }

    // =========================================================================
    // Inbound simulation
    // =========================================================================

    /// Stores `message` as if the platform had received it and delivers it to
    /// the installed callback. Messages from banned users are dropped.
    pub async fn inject(&self, message: Message) -> ChorusResult<()> {
        self.lifecycle.ensure_initialized(&self.platform)?;

        let accepted = self.backend.with_state(|state| {
            if !state.rooms.contains_key(&message.chat.id) {
                state.upsert_chat(message.chat.clone());
            }
            let room = state.room_or_create(&message.chat.id);
            if room.banned.contains(&message.sender.id) {
                return false;
            }
            state.join(&message.chat.id, message.sender.clone(), MemberRole::Member);
            state.append(Record {
                message: message.clone(),
                buttons: Vec::new(),
                reactions: Default::default(),
            });
            true
        });
        if !accepted {
            debug!(sender = %message.sender.id, "Dropping message from banned user");
            return Ok(());
        }

        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => callback(message).await,
            None => debug!(platform = %self.platform, "No inbound callback installed"),
        }
        Ok(())
    }

    /// Builds a message from `sender` in `chat` and injects it.
    pub async fn receive(
        &self,
        chat: Chat,
        sender: Participant,
        content: impl Into<Content>,
    ) -> ChorusResult<MessageId> {
        let id = MessageId::new(&self.platform, &chat.id, Uuid::new_v4().to_string());
        let message = Message::new(id.clone(), sender, chat, content.into());
        self.inject(message).await?;
        Ok(id)
    }

    /// Declares a chat with an optional description.
    pub fn add_chat(&self, chat: Chat, description: Option<&str>) {
        self.backend.with_state(|state| {
            let id = chat.id.clone();
            state.upsert_chat(chat);
            state.room_or_create(&id).description = description.map(str::to_string);
        });
    }

    pub fn add_member(&self, chat_id: &str, user: Participant, role: MemberRole) {
        self.backend
            .with_state(|state| state.join(chat_id, user, role));
    }

    // =========================================================================
    // Inspection and failure injection
    // =========================================================================

    /// Messages sent by the adapter, oldest first.
    pub fn outbox(&self) -> Vec<SentMessage> {
        self.backend.with_state(|state| state.outbox.clone())
    }

    pub fn clear_outbox(&self) {
        self.backend.with_state(|state| state.outbox.clear());
    }

    /// Backend calls made so far, including failed attempts.
    pub fn backend_calls(&self) -> usize {
        self.backend.calls()
    }

    /// Fails the next backend call of any kind with `error`.
    pub fn fail_next(&self, error: ChorusError) {
        self.backend.inject_failure(None, error);
    }

    /// Fails the next call of `action` (e.g. `"send"`, `"edit"`) with `error`.
    pub fn fail_action(&self, action: &str, error: ChorusError) {
        self.backend.inject_failure(Some(action), error);
    }

    pub fn clear_failures(&self) {
        self.backend.clear_failures();
    }
}

impl std::fmt::Debug for LoopbackAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackAdapter")
            .field("platform", &self.platform)
            .field("state", &self.lifecycle.state())
            .field("backend_calls", &self.backend.calls())
            .finish()
    }
}

// =============================================================================
// Adapter
// =============================================================================

#[async_trait]
impl Adapter for LoopbackAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn init(&self, config: &AdapterConfig) -> ChorusResult<()> {
        if self.lifecycle.is_initialized() {
            self.destroy().await?;
        }

        let settings: LoopbackSettings = config.settings()?;
        self.backend.configure(
            &settings.self_id,
            settings.history_limit,
            Duration::from_millis(settings.latency_ms),
        );
        *self.path.write() = Some(Arc::new(CallPath::new(&self.platform, &config.resilience)));
        self.lifecycle.mark_initialized();

        info!(
            platform = %self.platform,
            self_id = %settings.self_id,
            "Loopback adapter initialized"
        );
        Ok(())
    }

    async fn send(
        &self,
        target: &str,
        content: Content,
        options: SendOptions,
    ) -> ChorusResult<SendResult> {
        self.lifecycle.ensure_initialized(&self.platform)?;
        if matches!(content, Content::Media { .. }) && !self.capabilities.has(Capability::SendMedia)
        {
            return Err(ChorusError::capability_not_supported(
                &self.platform,
                Capability::SendMedia,
            ));
        }
        if content.as_text().is_some_and(str::is_empty) {
            return Err(ChorusError::validation("message text is empty"));
        }

        let target = target.to_string();
        let message = self
            .call(OpGroup::Send, "send", move |state| {
                state.post(
                    &target,
                    content.clone(),
                    options.reply_to.clone(),
                    options.thread_id.clone(),
                    Vec::new(),
                )
            })
            .await?;
        Ok(self.sent(message))
    }

    fn on_message(&self, callback: MessageCallback) {
        *self.callback.write() = Some(callback);
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn destroy(&self) -> ChorusResult<()> {
        if !self.lifecycle.mark_destroyed() {
            return Ok(());
        }
        let path = self.path.write().take();
        if let Some(queue) = path.as_ref().and_then(|p| p.queue.as_ref()) {
            queue.drain().await;
        }
        info!(platform = %self.platform, "Loopback adapter destroyed");
        Ok(())
    }

    fn conversation(&self) -> Option<&dyn ConversationOps> {
        Some(self)
    }

    fn interaction(&self) -> Option<&dyn InteractionOps> {
        Some(self)
    }

    fn discovery(&self) -> Option<&dyn DiscoveryOps> {
        Some(self)
    }

    fn management(&self) -> Option<&dyn ManagementOps> {
        Some(self)
    }

    fn advanced(&self) -> Option<&dyn AdvancedOps> {
        Some(self)
    }
}

impl ConfigurableAdapter for LoopbackAdapter {
    fn name() -> &'static str {
        PLATFORM
    }

    fn from_config(config: &AdapterConfig) -> ChorusResult<Arc<Self>> {
        let settings: LoopbackSettings = config.settings()?;
        Ok(Arc::new(Self::with_capabilities(
            &config.platform,
            settings.resolved_capabilities(),
        )))
    }
}

// =============================================================================
// Extension traits
// =============================================================================

#[async_trait]
impl ConversationOps for LoopbackAdapter {
    async fn reply(
        &self,
        to: &MessageId,
        content: Content,
        options: SendOptions,
    ) -> ChorusResult<SendResult> {
        let to = to.clone();
        let message = self
            .call(OpGroup::Conversation, "reply", move |state| {
                state.post(
                    &to.chat_id,
                    content.clone(),
                    Some(to.message_id.clone()),
                    options.thread_id.clone(),
                    Vec::new(),
                )
            })
            .await?;
        Ok(self.sent(message))
    }

    async fn edit(&self, message: &MessageId, content: Content) -> ChorusResult<()> {
        let id = message.clone();
        self.call(OpGroup::Conversation, "edit", move |state| {
            let record = state.own_message_mut(&id)?;
            record.message.kind = content.kind();
            record.message.content = content.clone();
            Ok(())
        })
        .await
    }

    async fn delete(&self, message: &MessageId) -> ChorusResult<()> {
        let id = message.clone();
        self.call(OpGroup::Conversation, "delete", move |state| {
            state.own_message_mut(&id)?;
            let room = state.room_mut(&id.chat_id)?;
            room.log.retain(|r| r.message.id.message_id != id.message_id);
            room.pins.retain(|pinned| *pinned != id.message_id);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl InteractionOps for LoopbackAdapter {
    async fn add_reaction(&self, message: &MessageId, emoji: &str) -> ChorusResult<()> {
        let (id, emoji) = (message.clone(), emoji.to_string());
        self.call(OpGroup::Interaction, "add_reaction", move |state| {
            let user = state.self_id.clone();
            let not_found = state.not_found("message", &id.message_id);
            let record = state
                .room_mut(&id.chat_id)?
                .find_mut(&id.message_id)
                .ok_or(not_found)?;
            record.reactions.entry(emoji.clone()).or_default().insert(user);
            Ok(())
        })
        .await
    }

    async fn remove_reaction(&self, message: &MessageId, emoji: &str) -> ChorusResult<()> {
        let (id, emoji) = (message.clone(), emoji.to_string());
        self.call(OpGroup::Interaction, "remove_reaction", move |state| {
            let user = state.self_id.clone();
            let not_found = state.not_found("message", &id.message_id);
            let record = state
                .room_mut(&id.chat_id)?
                .find_mut(&id.message_id)
                .ok_or(not_found)?;
            if let Some(users) = record.reactions.get_mut(&emoji) {
                users.remove(&user);
                if users.is_empty() {
                    record.reactions.remove(&emoji);
                }
            }
            Ok(())
        })
        .await
    }

    async fn send_buttons(
        &self,
        chat_id: &str,
        content: Content,
        buttons: ButtonRows,
    ) -> ChorusResult<SendResult> {
        self.lifecycle.ensure_initialized(&self.platform)?;
        if buttons.iter().all(Vec::is_empty) {
            return Err(ChorusError::validation("at least one button is required"));
        }
        let chat_id = chat_id.to_string();
        let message = self
            .call(OpGroup::Interaction, "send_buttons", move |state| {
                state.post(&chat_id, content.clone(), None, None, buttons.clone())
            })
            .await?;
        Ok(self.sent(message))
    }

    async fn send_poll(&self, chat_id: &str, poll: Poll) -> ChorusResult<SendResult> {
        self.lifecycle.ensure_initialized(&self.platform)?;
        if poll.options.len() < 2 {
            return Err(ChorusError::validation("a poll needs at least two options"));
        }
        let chat_id = chat_id.to_string();
        let message = self
            .call(OpGroup::Interaction, "send_poll", move |state| {
                state.post(&chat_id, Content::Poll(poll.clone()), None, None, Vec::new())
            })
            .await?;
        Ok(self.sent(message))
    }

    async fn send_sticker(&self, chat_id: &str, sticker_id: &str) -> ChorusResult<SendResult> {
        let chat_id = chat_id.to_string();
        let content = Content::Sticker {
            sticker_id: sticker_id.to_string(),
        };
        let message = self
            .call(OpGroup::Interaction, "send_sticker", move |state| {
                state.post(&chat_id, content.clone(), None, None, Vec::new())
            })
            .await?;
        Ok(self.sent(message))
    }
}

#[async_trait]
impl DiscoveryOps for LoopbackAdapter {
    async fn get_history(&self, chat_id: &str, query: HistoryQuery) -> ChorusResult<Vec<Message>> {
        let chat_id = chat_id.to_string();
        self.call(OpGroup::Discovery, "get_history", move |state| {
            let room = state.room(&chat_id)?;
            let end = match &query.before {
                Some(before) => room
                    .log
                    .iter()
                    .position(|r| r.message.id.message_id == *before)
                    .ok_or_else(|| state.not_found("message", before))?,
                None => room.log.len(),
            };
            let start = end.saturating_sub(query.limit);
            Ok(room
                .log
                .range(start..end)
                .map(|r| r.message.clone())
                .collect())
        })
        .await
    }

    async fn search(&self, query: SearchQuery) -> ChorusResult<Vec<Message>> {
        self.call(OpGroup::Discovery, "search", move |state| {
            let needle = query.text.to_lowercase();
            let rooms: Vec<_> = match &query.chat_id {
                Some(chat_id) => vec![state.room(chat_id)?],
                None => state.rooms.values().collect(),
            };

            let mut hits: Vec<Message> = rooms
                .into_iter()
                .flat_map(|room| room.log.iter())
                .filter(|r| {
                    r.message
                        .text()
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
                })
                .map(|r| r.message.clone())
                .collect();
            // newest first
            hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            hits.truncate(query.limit);
            Ok(hits)
        })
        .await
    }

    async fn get_pins(&self, chat_id: &str) -> ChorusResult<Vec<Message>> {
        let chat_id = chat_id.to_string();
        self.call(OpGroup::Discovery, "get_pins", move |state| {
            let room = state.room(&chat_id)?;
            Ok(room
                .pins
                .iter()
                .filter_map(|id| room.find(id))
                .map(|r| r.message.clone())
                .collect())
        })
        .await
    }

    async fn pin_message(&self, message: &MessageId) -> ChorusResult<()> {
        let id = message.clone();
        self.call(OpGroup::Discovery, "pin_message", move |state| {
            let not_found = state.not_found("message", &id.message_id);
            let room = state.room_mut(&id.chat_id)?;
            if room.find(&id.message_id).is_none() {
                return Err(not_found);
            }
            if !room.pins.contains(&id.message_id) {
                room.pins.push(id.message_id.clone());
            }
            Ok(())
        })
        .await
    }

    async fn unpin_message(&self, message: &MessageId) -> ChorusResult<()> {
        let id = message.clone();
        self.call(OpGroup::Discovery, "unpin_message", move |state| {
            state
                .room_mut(&id.chat_id)?
                .pins
                .retain(|pinned| *pinned != id.message_id);
            Ok(())
        })
        .await
    }

    async fn get_member_info(&self, chat_id: &str, user_id: &str) -> ChorusResult<MemberInfo> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        self.call(OpGroup::Discovery, "get_member_info", move |state| {
            let member = state.member_mut(&chat_id, &user_id)?;
            Ok(MemberInfo {
                user: member.user.clone(),
                role: member.effective_role(),
                joined_at: Some(member.joined_at),
            })
        })
        .await
    }

    async fn get_channel_info(&self, chat_id: &str) -> ChorusResult<ChannelInfo> {
        let chat_id = chat_id.to_string();
        self.call(OpGroup::Discovery, "get_channel_info", move |state| {
            let room = state.room(&chat_id)?;
            Ok(ChannelInfo {
                chat: room.chat.clone(),
                description: room.description.clone(),
                member_count: Some(room.members.len() as u64),
            })
        })
        .await
    }
}

/// Owners cannot be moderated.
fn ensure_moderatable(state: &mut ChatState, chat_id: &str, user_id: &str) -> ChorusResult<()> {
    let platform = state.platform.clone();
    let room = state.room_mut(chat_id)?;
    if room
        .members
        .get(user_id)
        .is_some_and(|m| m.role == MemberRole::Owner)
    {
        return Err(ChorusError::permission(
            platform,
            format!("'{user_id}' owns the chat"),
        ));
    }
    Ok(())
}

#[async_trait]
impl ManagementOps for LoopbackAdapter {
    async fn kick(&self, chat_id: &str, user_id: &str, reason: Option<&str>) -> ChorusResult<()> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        debug!(chat = %chat_id, user = %user_id, reason = ?reason, "Kicking member");
        self.call(OpGroup::Management, "kick", move |state| {
            ensure_moderatable(state, &chat_id, &user_id)?;
            let not_found = state.not_found("member", &user_id);
            state
                .room_mut(&chat_id)?
                .members
                .remove(&user_id)
                .map(|_| ())
                .ok_or(not_found)
        })
        .await
    }

    async fn ban(&self, chat_id: &str, user_id: &str, reason: Option<&str>) -> ChorusResult<()> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        debug!(chat = %chat_id, user = %user_id, reason = ?reason, "Banning user");
        self.call(OpGroup::Management, "ban", move |state| {
            ensure_moderatable(state, &chat_id, &user_id)?;
            let room = state.room_mut(&chat_id)?;
            room.members.remove(&user_id);
            room.banned.insert(user_id.clone());
            Ok(())
        })
        .await
    }

    async fn unban(&self, chat_id: &str, user_id: &str) -> ChorusResult<()> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        self.call(OpGroup::Management, "unban", move |state| {
            state.room_mut(&chat_id)?.banned.remove(&user_id);
            Ok(())
        })
        .await
    }

    async fn mute(
        &self,
        chat_id: &str,
        user_id: &str,
        duration: Option<Duration>,
    ) -> ChorusResult<()> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        self.call(OpGroup::Management, "mute", move |state| {
            ensure_moderatable(state, &chat_id, &user_id)?;
            let member = state.member_mut(&chat_id, &user_id)?;
            member.muted = Some(duration.map(|d| SystemTime::now() + d));
            Ok(())
        })
        .await
    }

    async fn unmute(&self, chat_id: &str, user_id: &str) -> ChorusResult<()> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        self.call(OpGroup::Management, "unmute", move |state| {
            state.member_mut(&chat_id, &user_id)?.muted = None;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AdvancedOps for LoopbackAdapter {
    async fn create_invite(&self, chat_id: &str, options: InviteOptions) -> ChorusResult<Invite> {
        let chat_id = chat_id.to_string();
        self.call(OpGroup::Advanced, "create_invite", move |state| {
            state.room(&chat_id)?;
            Ok(Invite {
                url: format!("loopback://{}/invite/{}", state.platform, Uuid::new_v4().simple()),
                max_uses: options.max_uses,
                expires_at: options.expires_in.map(|d| SystemTime::now() + d),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{ChatKind, Dispatcher, HandlerResult, Next};
    use chorus_resilience::{CircuitBreakerConfig, QueueConfig, RetryPolicy};
    use serde_json::{Value, json};

    async fn started(settings: Value, resilience: AdapterResilience) -> (Dispatcher, Arc<LoopbackAdapter>) {
        let config = AdapterConfig::new(PLATFORM)
            .with_settings(settings)
            .with_resilience(resilience);
        let adapter = LoopbackAdapter::from_config(&config).unwrap();
        adapter.init(&config).await.unwrap();

        let dispatcher = Dispatcher::new();
        dispatcher.register_adapter(PLATFORM, adapter.clone());
        (dispatcher, adapter)
    }

    fn group(id: &str) -> Chat {
        Chat::new(id, ChatKind::Group)
    }

    #[tokio::test]
    async fn test_lifecycle_guards_every_call() {
        let adapter = LoopbackAdapter::new(PLATFORM);
        let err = adapter
            .send("c", Content::text("early"), SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert_eq!(adapter.backend_calls(), 0);

        let err = adapter
            .send("c", Content::text(""), SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        let err = adapter
            .send_poll("c", Poll::new("Lunch?", ["pizza"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        let err = adapter
            .send_buttons("c", Content::text("Pick"), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let config = AdapterConfig::new(PLATFORM);
        adapter.init(&config).await.unwrap();
        adapter.init(&config).await.unwrap();
        adapter
            .send("c", Content::text("hi"), SendOptions::default())
            .await
            .unwrap();

        adapter.destroy().await.unwrap();
        adapter.destroy().await.unwrap();
        let err = adapter
            .get_pins("c")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_inbound_flows_through_middleware_and_reply_goes_out() {
        let (dispatcher, adapter) = started(Value::Null, AdapterResilience::default()).await;

        dispatcher.use_fn(|mut msg: Message, next: Next| {
            msg.annotate("seen_by", json!("audit"));
            next.run(msg)
        });
        dispatcher.on(|msg: Message| async move {
            assert_eq!(msg.annotations().get("seen_by"), Some(&json!("audit")));
            if msg.text() == Some("ping")
                && let Some(d) = msg.dispatcher()
            {
                d.reply(PLATFORM, &msg.id, Content::text("pong"), SendOptions::default())
                    .await?;
            }
            HandlerResult::Ok(())
        });

        let inbound = adapter
            .receive(group("room"), Participant::new("alice"), "ping")
            .await
            .unwrap();

        let outbox = adapter.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].content, Content::text("pong"));
        assert_eq!(outbox[0].reply_to.as_deref(), Some(inbound.message_id.as_str()));
        assert_eq!(outbox[0].sender_id, "loopback-bot");
    }

    #[tokio::test]
    async fn test_disabled_capability_never_reaches_backend() {
        let settings = json!({ "capabilities": { "conversation": { "edit": false } } });
        let (dispatcher, adapter) = started(settings, AdapterResilience::default()).await;

        let id = MessageId::new(PLATFORM, "room", "m1");
        let err = dispatcher
            .edit(PLATFORM, &id, Content::text("changed"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CAPABILITY_NOT_SUPPORTED");
        assert_eq!(adapter.backend_calls(), 0);
        assert!(dispatcher.has_capability(PLATFORM, "conversation", "reply"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_after_server_wait() {
        let resilience = AdapterResilience {
            retry: Some(RetryPolicy::default().with_max_jitter(Duration::ZERO)),
            ..AdapterResilience::default()
        };
        let (dispatcher, adapter) = started(Value::Null, resilience).await;
        adapter.fail_next(ChorusError::rate_limit(PLATFORM, Some(Duration::from_secs(2))));

        let start = tokio::time::Instant::now();
        dispatcher
            .send(PLATFORM, "room", Content::text("hi"), SendOptions::default())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(adapter.backend_calls(), 2);
        assert_eq!(adapter.outbox().len(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let resilience = AdapterResilience {
            retry: Some(RetryPolicy::default()),
            ..AdapterResilience::default()
        };
        let (dispatcher, adapter) = started(Value::Null, resilience).await;
        adapter.fail_next(ChorusError::network(PLATFORM, "connection reset"));

        let err = dispatcher
            .send(PLATFORM, "room", Content::text("hi"), SendOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NETWORK_ERROR");
        assert_eq!(adapter.backend_calls(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_per_operation_group() {
        let resilience = AdapterResilience {
            circuit_breaker: Some(CircuitBreakerConfig::default().with_failure_threshold(2)),
            ..AdapterResilience::default()
        };
        let (dispatcher, adapter) = started(Value::Null, resilience).await;
        adapter.add_chat(group("room"), Some("general chat"));

        for _ in 0..2 {
            adapter.fail_action("send", ChorusError::network(PLATFORM, "down"));
            let _ = dispatcher
                .send(PLATFORM, "room", Content::text("x"), SendOptions::default())
                .await;
        }
        let err = dispatcher
            .send(PLATFORM, "room", Content::text("x"), SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert!(err.to_string().contains("loopback.send"));
        assert_eq!(adapter.backend_calls(), 2);

        let info = dispatcher.get_channel_info(PLATFORM, "room").await.unwrap();
        assert_eq!(info.description.as_deref(), Some("general chat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        let resilience = AdapterResilience {
            timeout: Some(Duration::from_millis(100)),
            ..AdapterResilience::default()
        };
        let (dispatcher, _adapter) = started(json!({ "latency_ms": 5000 }), resilience).await;

        let err = dispatcher
            .send(PLATFORM, "room", Content::text("hi"), SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_queued_sends_all_complete() {
        let resilience = AdapterResilience {
            queue: Some(QueueConfig {
                concurrency: 1,
                rate: 100.0,
            }),
            ..AdapterResilience::default()
        };
        let (dispatcher, adapter) = started(Value::Null, resilience).await;

        let (a, b, c) = tokio::join!(
            dispatcher.send(PLATFORM, "room", Content::text("a"), SendOptions::default()),
            dispatcher.send(PLATFORM, "room", Content::text("b"), SendOptions::default()),
            dispatcher.send(PLATFORM, "room", Content::text("c"), SendOptions::default()),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(adapter.outbox().len(), 3);

        adapter.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_edit_and_delete_own_messages_only() {
        let (dispatcher, adapter) = started(Value::Null, AdapterResilience::default()).await;
        let theirs = adapter
            .receive(group("room"), Participant::new("alice"), "hello")
            .await
            .unwrap();
        let mine = dispatcher
            .send(PLATFORM, "room", Content::text("draft"), SendOptions::default())
            .await
            .unwrap()
            .message_id;

        dispatcher
            .edit(PLATFORM, &mine, Content::text("final"))
            .await
            .unwrap();
        let err = dispatcher
            .edit(PLATFORM, &theirs, Content::text("hijack"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_ERROR");

        let history = dispatcher
            .get_history(PLATFORM, "room", HistoryQuery::default())
            .await
            .unwrap();
        let texts: Vec<_> = history.iter().filter_map(Message::text).collect();
        assert_eq!(texts, vec!["hello", "final"]);

        dispatcher.delete(PLATFORM, &mine).await.unwrap();
        let history = dispatcher
            .get_history(PLATFORM, "room", HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_operations() {
        let (dispatcher, adapter) = started(Value::Null, AdapterResilience::default()).await;
        let alice = Participant::new("alice").with_name("Alice");
        let mut ids = Vec::new();
        for text in ["hello world", "second", "Hello again"] {
            ids.push(adapter.receive(group("room"), alice.clone(), text).await.unwrap());
        }

        let query = HistoryQuery {
            limit: 2,
            before: None,
        };
        let latest = dispatcher.get_history(PLATFORM, "room", query).await.unwrap();
        assert_eq!(latest[0].id, ids[1]);
        assert_eq!(latest[1].id, ids[2]);

        let query = HistoryQuery {
            limit: 10,
            before: Some(ids[2].message_id.clone()),
        };
        let earlier = dispatcher.get_history(PLATFORM, "room", query).await.unwrap();
        assert_eq!(earlier.len(), 2);

        let hits = dispatcher
            .search(PLATFORM, SearchQuery::new("hello").in_chat("room"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        dispatcher.pin_message(PLATFORM, &ids[1]).await.unwrap();
        dispatcher.pin_message(PLATFORM, &ids[1]).await.unwrap();
        let pins = dispatcher.get_pins(PLATFORM, "room").await.unwrap();
        assert_eq!(pins.len(), 1);
        dispatcher.unpin_message(PLATFORM, &ids[1]).await.unwrap();
        assert!(dispatcher.get_pins(PLATFORM, "room").await.unwrap().is_empty());

        let member = dispatcher
            .get_member_info(PLATFORM, "room", "alice")
            .await
            .unwrap();
        assert_eq!(member.user.name.as_deref(), Some("Alice"));
        assert_eq!(member.role, MemberRole::Member);

        let info = dispatcher.get_channel_info(PLATFORM, "room").await.unwrap();
        assert_eq!(info.member_count, Some(1));

        let err = dispatcher.get_pins(PLATFORM, "nowhere").await.unwrap_err();
        assert!(matches!(err, ChorusError::ApiCall { status: Some(404), .. }));
    }

    #[tokio::test]
    async fn test_moderation() {
        let (dispatcher, adapter) = started(Value::Null, AdapterResilience::default()).await;
        adapter.add_member("room", Participant::new("owner"), MemberRole::Owner);
        adapter.add_member("room", Participant::new("bob"), MemberRole::Member);

        dispatcher
            .mute(PLATFORM, "room", "bob", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let bob = dispatcher.get_member_info(PLATFORM, "room", "bob").await.unwrap();
        assert_eq!(bob.role, MemberRole::Restricted);
        dispatcher.unmute(PLATFORM, "room", "bob").await.unwrap();
        let bob = dispatcher.get_member_info(PLATFORM, "room", "bob").await.unwrap();
        assert_eq!(bob.role, MemberRole::Member);

        dispatcher.kick(PLATFORM, "room", "bob", Some("spam")).await.unwrap();
        assert!(dispatcher.get_member_info(PLATFORM, "room", "bob").await.is_err());

        let err = dispatcher.kick(PLATFORM, "room", "owner", None).await.unwrap_err();
        assert_eq!(err.code(), "PERMISSION_ERROR");

        dispatcher.ban(PLATFORM, "room", "carol", None).await.unwrap();
        adapter
            .receive(group("room"), Participant::new("carol"), "let me in")
            .await
            .unwrap();
        let history = dispatcher
            .get_history(PLATFORM, "room", HistoryQuery::default())
            .await
            .unwrap();
        assert!(history.is_empty());

        dispatcher.unban(PLATFORM, "room", "carol").await.unwrap();
        adapter
            .receive(group("room"), Participant::new("carol"), "thanks")
            .await
            .unwrap();
        let info = dispatcher.get_channel_info(PLATFORM, "room").await.unwrap();
        assert_eq!(info.member_count, Some(2));
    }

    #[tokio::test]
    async fn test_interaction_and_invites() {
        let (dispatcher, adapter) = started(Value::Null, AdapterResilience::default()).await;

        let err = dispatcher
            .send_poll(PLATFORM, "room", Poll::new("Lunch?", ["pizza"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let poll = dispatcher
            .send_poll(PLATFORM, "room", Poll::new("Lunch?", ["pizza", "sushi"]))
            .await
            .unwrap();
        dispatcher.add_reaction(PLATFORM, &poll.message_id, "👍").await.unwrap();
        dispatcher
            .remove_reaction(PLATFORM, &poll.message_id, "👍")
            .await
            .unwrap();

        dispatcher
            .send_buttons(
                PLATFORM,
                "room",
                Content::text("Pick one"),
                vec![vec![chorus_core::Button::callback("Yes", "yes")]],
            )
            .await
            .unwrap();
        dispatcher.send_sticker(PLATFORM, "room", "cat-42").await.unwrap();

        let outbox = adapter.outbox();
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox[1].buttons[0][0].label, "Yes");

        let invite = dispatcher
            .create_invite(
                PLATFORM,
                "room",
                InviteOptions {
                    max_uses: Some(5),
                    expires_in: Some(Duration::from_secs(3600)),
                },
            )
            .await
            .unwrap();
        assert!(invite.url.starts_with("loopback://loopback/invite/"));
        assert_eq!(invite.max_uses, Some(5));
        assert!(invite.expires_at.is_some());
    }
}
