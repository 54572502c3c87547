//! Domain models decoded from remote snapshots.
//!
//! Field names follow the documents the other participant's client writes,
//! so every struct carries explicit serde renames.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{ClientMessageId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Conversation document shared by both participants.
///
/// `typing_user_ids` and the preview fields are written by either side with
/// last-write-wins semantics; the set is only ever touched through atomic
/// add/remove operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMeta {
    #[serde(rename = "users", default)]
    pub participant_ids: BTreeSet<UserId>,
    #[serde(rename = "typing", default)]
    pub typing_user_ids: BTreeSet<UserId>,
    #[serde(rename = "lastMessage", default)]
    pub last_message_preview: Option<String>,
    #[serde(rename = "lastUpdated", default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl ConversationMeta {
    /// The participant that is not `me`. `None` for a corrupt or self chat.
    pub fn other_participant(&self, me: &UserId) -> Option<&UserId> {
        self.participant_ids.iter().find(|id| *id != me)
    }

    pub fn is_typing(&self, user: &UserId) -> bool {
        self.typing_user_ids.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Image { url: String },
}

impl MessageContent {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
        }
    }
}

/// A single message. Immutable once the store has acknowledged it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Stable sender id. Absent on records written before senders were
    /// tagged with their id.
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub content: MessageContent,
    /// `None` until the store resolves the server timestamp.
    pub created_at: Option<DateTime<Utc>>,
    pub client_id: Option<ClientMessageId>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.created_at.is_none()
    }

    /// Decode a message document as stored in the messages collection.
    pub fn from_document(id: &str, fields: serde_json::Value) -> Result<Self, StoreError> {
        let record: MessageRecord = serde_json::from_value(fields)
            .map_err(|e| StoreError::Decode(format!("message {id}: {e}")))?;

        let content = match record.kind.unwrap_or(MessageKind::Text) {
            MessageKind::Text => MessageContent::Text(record.message.unwrap_or_default()),
            MessageKind::Image => {
                let url = record.media_url.ok_or_else(|| {
                    StoreError::Decode(format!("image message {id} has no mediaUrl"))
                })?;
                MessageContent::Image { url }
            }
        };

        Ok(Self {
            id: MessageId(id.to_string()),
            sender_id: record.sender_id,
            sender_name: record.name,
            content,
            created_at: record.timestamp,
            client_id: record.client_id,
        })
    }
}

// Wire shape of a message document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    #[serde(default)]
    sender_id: Option<UserId>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<MessageKind>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    client_id: Option<ClientMessageId>,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Profile document of a user. `last_seen` is the persisted fallback used
/// when no live presence record is available.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "displayName_lowercase", default)]
    pub display_name_lowercase: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    #[serde(other)]
    Offline,
}

/// Live presence record from the ephemeral store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub state: PresenceState,
    #[serde(
        rename = "last_changed",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_changed_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    pub fn online(at: DateTime<Utc>) -> Self {
        Self {
            state: PresenceState::Online,
            last_changed_at: Some(at),
        }
    }

    pub fn offline(at: Option<DateTime<Utc>>) -> Self {
        Self {
            state: PresenceState::Offline,
            last_changed_at: at,
        }
    }
}
