//! The in-memory chat backend behind [`LoopbackAdapter`](crate::LoopbackAdapter).
//!
//! Plays the role a remote platform API plays for a real adapter: every
//! outbound operation is one [`Backend::perform`] call that may be slowed
//! down or failed on purpose, then mutates the shared [`ChatState`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use chorus_core::{
    ButtonRows, Chat, ChatKind, ChorusError, ChorusResult, Content, MemberRole, Message,
    MessageId, Participant,
};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

// =============================================================================
// Records
// =============================================================================

/// A message as the backend keeps it.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub message: Message,
    pub buttons: ButtonRows,
    /// Emoji to the users who reacted with it.
    pub reactions: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub user: Participant,
    pub role: MemberRole,
    pub joined_at: SystemTime,
    /// `Some(None)` mutes until lifted.
    pub muted: Option<Option<SystemTime>>,
}

impl Member {
    fn is_muted(&self, now: SystemTime) -> bool {
        match self.muted {
            Some(Some(until)) => until > now,
            Some(None) => true,
            None => false,
        }
    }

    /// Role as reported to callers. Muted members read as restricted.
    pub fn effective_role(&self) -> MemberRole {
        if self.is_muted(SystemTime::now()) {
            MemberRole::Restricted
        } else {
            self.role
        }
    }
}

#[derive(Debug)]
pub(crate) struct ChatRoom {
    pub chat: Chat,
    pub description: Option<String>,
    pub log: VecDeque<Record>,
    pub pins: Vec<String>,
    pub members: BTreeMap<String, Member>,
    pub banned: BTreeSet<String>,
}

impl ChatRoom {
    fn new(chat: Chat) -> Self {
        Self {
            chat,
            description: None,
            log: VecDeque::new(),
            pins: Vec::new(),
            members: BTreeMap::new(),
            banned: BTreeSet::new(),
        }
    }

    pub fn find(&self, message_id: &str) -> Option<&Record> {
        self.log.iter().find(|r| r.message.id.message_id == message_id)
    }

    pub fn find_mut(&mut self, message_id: &str) -> Option<&mut Record> {
        self.log
            .iter_mut()
            .find(|r| r.message.id.message_id == message_id)
    }
}

/// A message the adapter sent, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub id: MessageId,
    pub sender_id: String,
    pub content: Content,
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub buttons: ButtonRows,
}

// =============================================================================
// ChatState
// =============================================================================

/// Everything the backend knows about its chats.
#[derive(Debug)]
pub(crate) struct ChatState {
    pub platform: String,
    pub self_id: String,
    pub history_limit: usize,
    pub rooms: HashMap<String, ChatRoom>,
    pub outbox: Vec<SentMessage>,
}

impl ChatState {
    fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            self_id: String::new(),
            history_limit: usize::MAX,
            rooms: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn not_found(&self, what: &str, id: &str) -> ChorusError {
        ChorusError::api_status(&self.platform, 404, format!("{what} '{id}' not found"), None)
    }

    pub fn room(&self, chat_id: &str) -> ChorusResult<&ChatRoom> {
        self.rooms
            .get(chat_id)
            .ok_or_else(|| self.not_found("chat", chat_id))
    }

    pub fn room_mut(&mut self, chat_id: &str) -> ChorusResult<&mut ChatRoom> {
        let not_found = self.not_found("chat", chat_id);
        self.rooms.get_mut(chat_id).ok_or(not_found)
    }

    /// The chat, created as a group if it does not exist yet.
    pub fn room_or_create(&mut self, chat_id: &str) -> &mut ChatRoom {
        self.rooms
            .entry(chat_id.to_string())
            .or_insert_with(|| ChatRoom::new(Chat::new(chat_id, ChatKind::Group)))
    }

    /// Declares a chat, keeping its history if it already exists.
    pub fn upsert_chat(&mut self, chat: Chat) {
        self.rooms
            .entry(chat.id.clone())
            .and_modify(|room| room.chat = chat.clone())
            .or_insert_with(|| ChatRoom::new(chat));
    }

    pub fn join(&mut self, chat_id: &str, user: Participant, role: MemberRole) {
        let room = self.room_or_create(chat_id);
        room.members
            .entry(user.id.clone())
            .or_insert_with(|| Member {
                user,
                role,
                joined_at: SystemTime::now(),
                muted: None,
            });
    }

    /// Appends a message to its chat and trims the log to the limit.
    pub fn append(&mut self, record: Record) {
        let limit = self.history_limit;
        let room = self.room_or_create(&record.message.id.chat_id);
        room.log.push_back(record);
        while room.log.len() > limit {
            if let Some(dropped) = room.log.pop_front() {
                room.pins.retain(|id| *id != dropped.message.id.message_id);
            }
        }
    }

    /// Stores an outbound message from the adapter's own account.
    pub fn post(
        &mut self,
        chat_id: &str,
        content: Content,
        reply_to: Option<String>,
        thread_id: Option<String>,
        buttons: ButtonRows,
    ) -> ChorusResult<Message> {
        if let Some(target) = &reply_to
            && self.room(chat_id).ok().and_then(|r| r.find(target)).is_none()
        {
            return Err(self.not_found("message", target));
        }
        if self.rooms.get(chat_id).is_some_and(|r| r.banned.contains(&self.self_id)) {
            return Err(ChorusError::permission(&self.platform, "bot is banned from this chat"));
        }

        let id = MessageId::new(&self.platform, chat_id, Uuid::new_v4().to_string());
        let chat = self.room_or_create(chat_id).chat.clone();
        let sender = Participant::new(self.self_id.clone()).bot();

        let mut message = Message::new(id.clone(), sender, chat, content.clone());
        if let Some(target) = &reply_to {
            message = message.with_reply_to(MessageId::new(&self.platform, chat_id, target));
        }
        if let Some(thread) = &thread_id {
            message = message.with_thread(thread);
        }

        self.outbox.push(SentMessage {
            id,
            sender_id: self.self_id.clone(),
            content,
            reply_to,
            thread_id,
            buttons: buttons.clone(),
        });
        self.append(Record {
            message: message.clone(),
            buttons,
            reactions: BTreeMap::new(),
        });
        Ok(message)
    }

    /// The message, if it exists and was sent by the adapter itself.
    pub fn own_message_mut(&mut self, id: &MessageId) -> ChorusResult<&mut Record> {
        let platform = self.platform.clone();
        let self_id = self.self_id.clone();
        let not_found = self.not_found("message", &id.message_id);
        let record = self
            .rooms
            .get_mut(&id.chat_id)
            .and_then(|room| room.find_mut(&id.message_id))
            .ok_or(not_found)?;
        if record.message.sender.id != self_id {
            return Err(ChorusError::permission(
                platform,
                "only messages sent by the bot can be changed",
            ));
        }
        Ok(record)
    }

    pub fn member_mut(&mut self, chat_id: &str, user_id: &str) -> ChorusResult<&mut Member> {
        let not_found = self.not_found("member", user_id);
        self.room_mut(chat_id)?
            .members
            .get_mut(user_id)
            .ok_or(not_found)
    }
}

// =============================================================================
// Backend
// =============================================================================

struct InjectedFailure {
    /// Only calls to this action consume the failure. `None` matches any.
    action: Option<String>,
    error: ChorusError,
}

/// Simulated remote platform.
pub(crate) struct Backend {
    state: Mutex<ChatState>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl Backend {
    pub fn new(platform: &str) -> Self {
        Self {
            state: Mutex::new(ChatState::new(platform)),
            failures: Mutex::new(VecDeque::new()),
            latency_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn configure(&self, self_id: &str, history_limit: usize, latency: Duration) {
        let mut state = self.state.lock();
        state.self_id = self_id.to_string();
        state.history_limit = history_limit.max(1);
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Runs `op` against the chat state as one backend call.
    pub async fn perform<T>(
        &self,
        action: &str,
        op: impl FnOnce(&mut ChatState) -> ChorusResult<T>,
    ) -> ChorusResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some(error) = self.take_failure(action) {
            debug!(action, error = %error, "Injected failure");
            return Err(error);
        }

        trace!(action, "Backend call");
        op(&mut self.state.lock())
    }

    fn take_failure(&self, action: &str) -> Option<ChorusError> {
        let mut failures = self.failures.lock();
        let index = failures
            .iter()
            .position(|f| f.action.as_deref().is_none_or(|a| a == action))?;
        failures.remove(index).map(|f| f.error)
    }

    pub fn inject_failure(&self, action: Option<&str>, error: ChorusError) {
        self.failures.lock().push_back(InjectedFailure {
            action: action.map(str::to_string),
            error,
        });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Direct access for inbound simulation and inspection.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut ChatState) -> T) -> T {
        f(&mut self.state.lock())
    }
}
