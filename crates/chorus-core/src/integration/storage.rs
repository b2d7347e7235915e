//! Media storage collaborator.
//!
//! When a [`MediaStorage`] is attached to the dispatcher and reports itself
//! configured, inline media bytes of inbound messages are handed to it before
//! middleware runs. The returned location is recorded in the message
//! annotations. Storage backends themselves live outside the core.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::foundation::error::ChorusResult;
use crate::foundation::message::{MediaKind, Message};

/// Descriptive data saved alongside media bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub platform: String,
    pub chat_id: String,
    pub message_id: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Persists media for inbound messages.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Whether the backend is ready to accept writes.
    fn is_configured(&self) -> bool;

    /// Saves `data` under `key` and returns where it ended up.
    async fn save(&self, key: &str, data: &[u8], metadata: &MediaMetadata) -> ChorusResult<String>;
}

/// A shared storage trait object.
pub type BoxedMediaStorage = Arc<dyn MediaStorage>;

/// Storage key and metadata for a message carrying inline media.
pub(crate) fn media_to_store(message: &Message) -> Option<(String, &[u8], MediaMetadata)> {
    let crate::foundation::message::Content::Media { media, .. } = &message.content else {
        return None;
    };
    let data = media.data.as_deref()?;
    let key = format!(
        "{}/{}/{}",
        message.id.platform, message.id.chat_id, message.id.message_id
    );
    let metadata = MediaMetadata {
        platform: message.id.platform.clone(),
        chat_id: message.id.chat_id.clone(),
        message_id: message.id.message_id.clone(),
        kind: media.kind,
        mime_type: media.mime_type.clone(),
        file_name: media.file_name.clone(),
    };
    Some((key, data, metadata))
}
