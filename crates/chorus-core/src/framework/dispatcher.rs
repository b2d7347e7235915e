//! Central dispatcher.
//!
//! The [`Dispatcher`] owns the live adapters, keyed by platform id, and is the
//! single entry point for both directions of traffic:
//!
//! ```text
//!            outbound: capability check, then delegate
//! caller ──────────────────────────────▶ Dispatcher ──▶ Adapter ──▶ platform
//!
//!            inbound: annotate, store media, middleware, fan-out
//! platform ──▶ Adapter ──on_message──▶ Dispatcher ──▶ Middleware ──▶ subscribers
//! ```
//!
//! Outbound calls for optional operations are gated twice: the adapter must
//! declare the capability flag and must expose the matching extension trait.
//! Failing either check yields [`ChorusError::CapabilityNotSupported`]
//! without touching the adapter. Adapter errors pass through verbatim.
//!
//! `Dispatcher` is a cheap handle: clones share the same registries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use crate::foundation::capability::{Capabilities, Capability};
use crate::foundation::error::{ChorusError, ChorusResult};
use crate::foundation::message::{Content, Message, MessageId, Poll};
use crate::framework::middleware::{
    BoxedMiddleware, HandlerResult, Middleware, Next, Terminal, middleware_fn,
};
use crate::integration::adapter::{BoxedAdapter, SendOptions, SendResult};
use crate::integration::extension::{
    ButtonRows, ChannelInfo, HistoryQuery, Invite, InviteOptions, MemberInfo, SearchQuery,
};
use crate::integration::storage::{BoxedMediaStorage, media_to_store};

/// A subscriber callback.
pub type Subscriber = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handle returned by [`Dispatcher::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct DispatcherInner {
    adapters: RwLock<HashMap<String, BoxedAdapter>>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    middlewares: RwLock<Vec<BoxedMiddleware>>,
    storage: RwLock<Option<BoxedMediaStorage>>,
    next_subscription: AtomicU64,
}

/// Routes calls to adapters and inbound messages to subscribers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

/// A non-owning dispatcher reference, held by messages and adapter callbacks.
#[derive(Clone)]
pub struct WeakDispatcher(Weak<DispatcherInner>);

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.0.upgrade().map(|inner| Dispatcher { inner })
    }
}

/// Runs an optional adapter operation after both capability checks.
macro_rules! gated {
    ($self:ident, $platform:expr, $capability:expr, $accessor:ident, |$ops:ident| $call:expr) => {{
        let platform: &str = $platform;
        let capability: Capability = $capability;
        let adapter = $self.require(platform)?;
        if !adapter.capabilities().has(capability) {
            debug!(platform, %capability, "Capability not declared");
            return Err(ChorusError::capability_not_supported(platform, capability));
        }
        let Some($ops) = adapter.$accessor() else {
            warn!(platform, %capability, "Capability declared without an implementation");
            return Err(ChorusError::capability_not_supported(platform, capability));
        };
        $call.await
    }};
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher(Arc::downgrade(&self.inner))
    }

    // =========================================================================
    // Adapter registry
    // =========================================================================

    /// Registers `adapter` under `platform`, replacing any previous one.
    ///
    /// The adapter's inbound callback is wired to [`dispatch_inbound`]. The
    /// replaced adapter is returned so the caller can destroy it.
    ///
    /// [`dispatch_inbound`]: Self::dispatch_inbound
    pub fn register_adapter(
        &self,
        platform: impl Into<String>,
        adapter: BoxedAdapter,
    ) -> Option<BoxedAdapter> {
        let platform = platform.into();
        let weak = self.downgrade();
        let callback_platform = platform.clone();
        adapter.on_message(Arc::new(move |message: Message| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            let platform = callback_platform.clone();
            Box::pin(async move {
                let Some(dispatcher) = weak.upgrade() else {
                    debug!(platform = %platform, "Dispatcher gone, dropping inbound message");
                    return;
                };
                if let Err(err) = dispatcher.dispatch_inbound(message).await {
                    error!(platform = %platform, error = %err, "Inbound dispatch failed");
                }
            })
        }));

        let replaced = self.inner.adapters.write().insert(platform.clone(), adapter);
        if replaced.is_some() {
            warn!(platform = %platform, "Replaced existing adapter");
        } else {
            info!(platform = %platform, "Registered adapter");
        }
        replaced
    }

    /// Removes the adapter for `platform` without destroying it.
    pub fn unregister_adapter(&self, platform: &str) -> Option<BoxedAdapter> {
        self.inner.adapters.write().remove(platform)
    }

    pub fn adapter(&self, platform: &str) -> Option<BoxedAdapter> {
        self.inner.adapters.read().get(platform).cloned()
    }

    /// Registered platform ids, sorted.
    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<_> = self.inner.adapters.read().keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn capabilities(&self, platform: &str) -> ChorusResult<Capabilities> {
        Ok(self.require(platform)?.capabilities().clone())
    }

    /// String capability lookup. Unknown platforms, categories and keys are
    /// all `false`.
    pub fn has_capability(&self, platform: &str, category: &str, key: &str) -> bool {
        self.adapter(platform)
            .is_some_and(|adapter| adapter.capabilities().has_key(category, key))
    }

    fn require(&self, platform: &str) -> ChorusResult<BoxedAdapter> {
        self.adapter(platform)
            .ok_or_else(|| ChorusError::adapter_not_found(platform))
    }

    /// Attaches the media storage collaborator.
    pub fn set_storage(&self, storage: BoxedMediaStorage) {
        *self.inner.storage.write() = Some(storage);
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    pub async fn send(
        &self,
        platform: &str,
        target: &str,
        content: Content,
        options: SendOptions,
    ) -> ChorusResult<SendResult> {
        self.require(platform)?.send(target, content, options).await
    }

    pub async fn reply(
        &self,
        platform: &str,
        to: &MessageId,
        content: Content,
        options: SendOptions,
    ) -> ChorusResult<SendResult> {
        gated!(self, platform, Capability::Reply, conversation, |ops| ops.reply(to, content, options))
    }

    pub async fn edit(&self, platform: &str, message: &MessageId, content: Content) -> ChorusResult<()> {
        gated!(self, platform, Capability::Edit, conversation, |ops| ops.edit(message, content))
    }

    pub async fn delete(&self, platform: &str, message: &MessageId) -> ChorusResult<()> {
        gated!(self, platform, Capability::Delete, conversation, |ops| ops.delete(message))
    }

    pub async fn add_reaction(&self, platform: &str, message: &MessageId, emoji: &str) -> ChorusResult<()> {
        gated!(self, platform, Capability::Reactions, interaction, |ops| ops.add_reaction(message, emoji))
    }

    pub async fn remove_reaction(
        &self,
        platform: &str,
        message: &MessageId,
        emoji: &str,
    ) -> ChorusResult<()> {
        gated!(self, platform, Capability::Reactions, interaction, |ops| ops.remove_reaction(message, emoji))
    }

    pub async fn send_buttons(
        &self,
        platform: &str,
        chat_id: &str,
        content: Content,
        buttons: ButtonRows,
    ) -> ChorusResult<SendResult> {
        gated!(self, platform, Capability::Buttons, interaction, |ops| ops.send_buttons(chat_id, content, buttons))
    }

    pub async fn send_poll(&self, platform: &str, chat_id: &str, poll: Poll) -> ChorusResult<SendResult> {
        gated!(self, platform, Capability::Polls, interaction, |ops| ops.send_poll(chat_id, poll))
    }

    pub async fn send_sticker(
        &self,
        platform: &str,
        chat_id: &str,
        sticker_id: &str,
    ) -> ChorusResult<SendResult> {
        gated!(self, platform, Capability::Stickers, interaction, |ops| ops.send_sticker(chat_id, sticker_id))
    }

    pub async fn get_history(
        &self,
        platform: &str,
        chat_id: &str,
        query: HistoryQuery,
    ) -> ChorusResult<Vec<Message>> {
        gated!(self, platform, Capability::History, discovery, |ops| ops.get_history(chat_id, query))
    }

    pub async fn search(&self, platform: &str, query: SearchQuery) -> ChorusResult<Vec<Message>> {
        gated!(self, platform, Capability::Search, discovery, |ops| ops.search(query))
    }

    pub async fn get_pins(&self, platform: &str, chat_id: &str) -> ChorusResult<Vec<Message>> {
        gated!(self, platform, Capability::Pins, discovery, |ops| ops.get_pins(chat_id))
    }

    pub async fn pin_message(&self, platform: &str, message: &MessageId) -> ChorusResult<()> {
        gated!(self, platform, Capability::Pins, discovery, |ops| ops.pin_message(message))
    }

    pub async fn unpin_message(&self, platform: &str, message: &MessageId) -> ChorusResult<()> {
        gated!(self, platform, Capability::Pins, discovery, |ops| ops.unpin_message(message))
    }

    pub async fn get_member_info(
        &self,
        platform: &str,
        chat_id: &str,
        user_id: &str,
    ) -> ChorusResult<MemberInfo> {
        gated!(self, platform, Capability::MemberInfo, discovery, |ops| ops.get_member_info(chat_id, user_id))
    }

    pub async fn get_channel_info(&self, platform: &str, chat_id: &str) -> ChorusResult<ChannelInfo> {
        gated!(self, platform, Capability::ChannelInfo, discovery, |ops| ops.get_channel_info(chat_id))
    }

    pub async fn kick(
        &self,
        platform: &str,
        chat_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> ChorusResult<()> {
        gated!(self, platform, Capability::Kick, management, |ops| ops.kick(chat_id, user_id, reason))
    }

    pub async fn ban(
        &self,
        platform: &str,
        chat_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> ChorusResult<()> {
        gated!(self, platform, Capability::Ban, management, |ops| ops.ban(chat_id, user_id, reason))
    }

    pub async fn unban(&self, platform: &str, chat_id: &str, user_id: &str) -> ChorusResult<()> {
        gated!(self, platform, Capability::Ban, management, |ops| ops.unban(chat_id, user_id))
    }

    pub async fn mute(
        &self,
        platform: &str,
        chat_id: &str,
        user_id: &str,
        duration: Option<Duration>,
    ) -> ChorusResult<()> {
        gated!(self, platform, Capability::Timeout, management, |ops| ops.mute(chat_id, user_id, duration))
    }

    pub async fn unmute(&self, platform: &str, chat_id: &str, user_id: &str) -> ChorusResult<()> {
        gated!(self, platform, Capability::Timeout, management, |ops| ops.unmute(chat_id, user_id))
    }

    pub async fn create_invite(
        &self,
        platform: &str,
        chat_id: &str,
        options: InviteOptions,
    ) -> ChorusResult<Invite> {
        gated!(self, platform, Capability::CreateInvite, advanced, |ops| ops.create_invite(chat_id, options))
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Subscribes to inbound messages. Subscribers run sequentially in
    /// subscription order, each with its own copy of the message.
    pub fn on<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscriber: Subscriber =
            Arc::new(move |message: Message| -> BoxFuture<'static, HandlerResult> {
                Box::pin(callback(message))
            });
        self.inner.subscribers.write().push((id, subscriber));
        id
    }

    /// Removes a subscriber. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Appends a middleware to the pipeline.
    pub fn use_middleware(&self, middleware: impl Middleware + 'static) {
        self.inner.middlewares.write().push(Arc::new(middleware));
    }

    /// Appends a closure middleware.
    pub fn use_fn<F, Fut>(&self, func: F)
    where
        F: Fn(Message, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.use_middleware(middleware_fn(func));
    }

    /// Delivers an inbound message.
    ///
    /// The message is annotated with this dispatcher, its inline media is
    /// stored when storage is configured, then it runs through the middleware
    /// pipeline and finally reaches every subscriber. Middleware errors abort
    /// delivery and are returned. Subscriber errors are logged and do not stop
    /// later subscribers.
    pub async fn dispatch_inbound(&self, mut message: Message) -> HandlerResult {
        let span = span!(
            Level::DEBUG,
            "dispatch_inbound",
            platform = %message.platform(),
            message_id = %message.id.message_id,
        );

        async move {
            message.attach_dispatcher(self.downgrade());
            self.store_media(&mut message).await;

            let chain: Arc<[BoxedMiddleware]> = self.inner.middlewares.read().clone().into();
            let subscribers: Vec<Subscriber> = self
                .inner
                .subscribers
                .read()
                .iter()
                .map(|(_, subscriber)| subscriber.clone())
                .collect();

            let terminal: Terminal = Box::new(move |message| -> BoxFuture<'static, HandlerResult> {
                Box::pin(fan_out(subscribers, message))
            });
            Next::new(chain, terminal).run(message).await
        }
        .instrument(span)
        .await
    }

    async fn store_media(&self, message: &mut Message) {
        let Some(storage) = self.inner.storage.read().clone() else {
            return;
        };
        if !storage.is_configured() {
            return;
        }
        let Some((key, data, metadata)) = media_to_store(message) else {
            return;
        };

        match storage.save(&key, data, &metadata).await {
            Ok(location) => {
                debug!(key = %key, location = %location, "Stored inbound media");
                message.record_stored_media(location);
            }
            Err(err) => warn!(key = %key, error = %err, "Failed to store inbound media"),
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Destroys every adapter concurrently, then clears adapters, subscribers
    /// and middleware. Returns the platforms whose `destroy` failed.
    pub async fn destroy_all(&self) -> Vec<(String, ChorusError)> {
        let adapters: Vec<(String, BoxedAdapter)> = self
            .inner
            .adapters
            .read()
            .iter()
            .map(|(platform, adapter)| (platform.clone(), adapter.clone()))
            .collect();

        let outcomes = join_all(adapters.iter().map(|(platform, adapter)| async move {
            (platform.clone(), adapter.destroy().await)
        }))
        .await;

        let failures: Vec<_> = outcomes
            .into_iter()
            .filter_map(|(platform, result)| match result {
                Ok(()) => None,
                Err(err) => {
                    error!(platform = %platform, error = %err, "Adapter destroy failed");
                    Some((platform, err))
                }
            })
            .collect();

        self.inner.adapters.write().clear();
        self.inner.subscribers.write().clear();
        self.inner.middlewares.write().clear();
        info!(
            adapters = adapters.len(),
            failed = failures.len(),
            "Dispatcher shut down"
        );
        failures
    }
}

async fn fan_out(subscribers: Vec<Subscriber>, message: Message) -> HandlerResult {
    for (index, subscriber) in subscribers.iter().enumerate() {
        if let Err(err) = subscriber(message.clone()).await {
            error!(subscriber = index, error = %err, "Subscriber failed");
        }
    }
    Ok(())
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("platforms", &self.platforms())
            .field("subscribers", &self.inner.subscribers.read().len())
            .field("middlewares", &self.inner.middlewares.read().len())
            .finish()
    }
}
