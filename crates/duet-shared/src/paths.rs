//! Document, presence and blob locations.
//!
//! Paths are slash-separated like the remote stores expect:
//! `chats/{id}` is a document, `chats/{id}/messages` a collection.

use crate::constants::{
    CHATS_COLLECTION, CHAT_MEDIA_PREFIX, MESSAGES_COLLECTION, PROFILE_IMAGES_PREFIX,
    STATUS_PREFIX, USERS_COLLECTION,
};
use crate::types::{ConversationId, UserId};

/// Location of a single document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection containing this document, if the path has one.
    pub fn parent(&self) -> Option<CollectionPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| CollectionPath::new(parent))
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: &str) -> DocPath {
        DocPath(format!("{}/{}", self.0, id))
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn conversation(id: &ConversationId) -> DocPath {
    DocPath(format!("{}/{}", CHATS_COLLECTION, id))
}

pub fn messages(id: &ConversationId) -> CollectionPath {
    CollectionPath(format!("{}/{}/{}", CHATS_COLLECTION, id, MESSAGES_COLLECTION))
}

pub fn user(id: &UserId) -> DocPath {
    DocPath(format!("{}/{}", USERS_COLLECTION, id))
}

/// Ephemeral store key holding a user's live presence record.
pub fn presence_key(id: &UserId) -> String {
    format!("/{}/{}", STATUS_PREFIX, id)
}

/// Blob path for a chat attachment: `chat_media/{conversation}/{millis}_{filename}`.
pub fn chat_media(conversation: &ConversationId, unix_millis: i64, file_name: &str) -> String {
    format!(
        "{}/{}/{}_{}",
        CHAT_MEDIA_PREFIX,
        conversation,
        unix_millis,
        sanitize_file_name(file_name)
    )
}

pub fn profile_image(id: &UserId) -> String {
    format!("{}/{}", PROFILE_IMAGES_PREFIX, id)
}

// Separators in a user-supplied name would otherwise create extra segments.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
