//! The normalized message model.
//!
//! Adapters turn every inbound platform event into a [`Message`]: who sent
//! it, where, what it contains and how to address it later. The original
//! backend payload rides along untouched in [`Message::raw`].
//!
//! Before middleware sees a message the dispatcher attaches runtime-only
//! [`Annotations`]. Annotations only ever grow; nothing removes them.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::framework::dispatcher::{Dispatcher, WeakDispatcher};

// ============================================================================
// Identifiers and participants
// ============================================================================

/// Globally unique address of one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub platform: String,
    pub chat_id: String,
    pub message_id: String,
}

impl MessageId {
    pub fn new(
        platform: impl Into<String>,
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.platform, self.chat_id, self.message_id)
    }
}

/// A user or bot taking part in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }
}

/// Kind of conversation a message arrived in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    #[default]
    Direct,
    Group,
    Channel,
}

/// The conversation a message belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Chat {
    pub fn new(id: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: None,
        }
    }
}

// ============================================================================
// Content
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Voice,
    File,
}

/// A media attachment, referenced by URL or carried inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline bytes. Present when the adapter downloaded the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Media {
    pub fn from_url(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: Some(url.into()),
            data: None,
            file_name: None,
            mime_type: None,
        }
    }

    pub fn from_bytes(kind: MediaKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            url: None,
            data: Some(data),
            file_name: None,
            mime_type: None,
        }
    }
}

/// A poll, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub multiple_choice: bool,
}

impl Poll {
    pub fn new(question: impl Into<String>, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            question: question.into(),
            options: options.into_iter().map(Into::into).collect(),
            multiple_choice: false,
        }
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Media {
        media: Media,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Poll(Poll),
    Sticker {
        sticker_id: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    /// Anything the adapter could not normalize.
    Unknown,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn media(media: Media) -> Self {
        Self::Media {
            media,
            caption: None,
        }
    }

    /// The textual part: the text itself or a media caption.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Media { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Media { .. } => MessageKind::Media,
            Self::Poll(_) => MessageKind::Poll,
            Self::Sticker { .. } => MessageKind::Sticker,
            Self::Location { .. } => MessageKind::Location,
            Self::Unknown => MessageKind::Unknown,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text { text }
    }
}

/// Message type, usually derived from the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Media,
    Poll,
    Sticker,
    Location,
    /// Service notices such as joins or title changes.
    System,
    Unknown,
}

// ============================================================================
// Annotations
// ============================================================================

/// Runtime-only data attached by the dispatcher. Append-only.
#[derive(Clone, Default)]
pub struct Annotations {
    dispatcher: Option<WeakDispatcher>,
    stored_media: Option<String>,
    extra: BTreeMap<String, Value>,
}

impl Annotations {
    /// Where the message's media was persisted, if storage is configured.
    pub fn stored_media(&self) -> Option<&str> {
        self.stored_media.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.extra.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Debug for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotations")
            .field("dispatcher", &self.dispatcher.is_some())
            .field("stored_media", &self.stored_media)
            .field("extra", &self.extra)
            .finish()
    }
}

// ============================================================================
// Message
// ============================================================================

/// One normalized inbound event.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub sender: Participant,
    pub chat: Chat,
    pub content: Content,
    /// The message this one replies to.
    pub reply_to: Option<MessageId>,
    pub thread_id: Option<String>,
    pub timestamp: SystemTime,
    /// Backend payload as received.
    pub raw: Value,
    annotations: Annotations,
}

impl Message {
    /// Creates a message stamped with the current time. The kind follows the
    /// content.
    pub fn new(id: MessageId, sender: Participant, chat: Chat, content: Content) -> Self {
        Self {
            kind: content.kind(),
            id,
            sender,
            chat,
            content,
            reply_to: None,
            thread_id: None,
            timestamp: SystemTime::now(),
            raw: Value::Null,
            annotations: Annotations::default(),
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_reply_to(mut self, reply_to: MessageId) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn platform(&self) -> &str {
        &self.id.platform
    }

    /// Shorthand for the textual content.
    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// The dispatcher that delivered this message, while it is alive.
    ///
    /// ```rust,ignore
    /// if let Some(dispatcher) = msg.dispatcher() {
    ///     dispatcher.reply(msg.platform(), &msg.id, "pong".into(), SendOptions::default()).await?;
    /// }
    /// ```
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.annotations.dispatcher.as_ref()?.upgrade()
    }

    /// Adds a free-form annotation. An existing key keeps its first value.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.annotations.extra.entry(key.into()).or_insert(value);
    }

    pub(crate) fn attach_dispatcher(&mut self, dispatcher: WeakDispatcher) {
        if self.annotations.dispatcher.is_none() {
            self.annotations.dispatcher = Some(dispatcher);
        }
    }

    pub(crate) fn record_stored_media(&mut self, location: String) {
        if self.annotations.stored_media.is_none() {
            self.annotations.stored_media = Some(location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(content: Content) -> Message {
        Message::new(
            MessageId::new("loopback", "c1", "m1"),
            Participant::new("u1").with_name("Ada"),
            Chat::new("c1", ChatKind::Group),
            content,
        )
    }

    #[test]
    fn test_kind_follows_content() {
        assert_eq!(message(Content::text("hi")).kind, MessageKind::Text);
        let poll = Content::Poll(Poll::new("Lunch?", ["pizza", "sushi"]));
        assert_eq!(message(poll).kind, MessageKind::Poll);
        assert_eq!(
            message(Content::Unknown).with_kind(MessageKind::System).kind,
            MessageKind::System
        );
    }

    #[test]
    fn test_annotations_are_additive() {
        let mut msg = message(Content::text("hi"));
        msg.annotate("lang", json!("en"));
        msg.annotate("lang", json!("fr"));
        assert_eq!(msg.annotations().get("lang"), Some(&json!("en")));

        msg.record_stored_media("/tmp/a".into());
        msg.record_stored_media("/tmp/b".into());
        assert_eq!(msg.annotations().stored_media(), Some("/tmp/a"));
    }

    #[test]
    fn test_dispatcher_absent_until_delivered() {
        assert!(message(Content::text("hi")).dispatcher().is_none());
    }

    #[test]
    fn test_content_wire_format() {
        let content = Content::Media {
            media: Media::from_url(MediaKind::Image, "https://x/y.png"),
            caption: Some("look".into()),
        };
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({
                "type": "media",
                "media": { "kind": "image", "url": "https://x/y.png" },
                "caption": "look",
            })
        );
        assert_eq!(content.as_text(), Some("look"));
        assert_eq!(MessageId::new("tg", "1", "2").to_string(), "tg:1:2");
    }
}
