#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use duet_shared::{paths, ConversationId, CurrentUser, UserId};
use duet_store::{MemoryBlobStore, MemoryDocumentStore, MemoryPresenceStore};
use duet_sync::{Backends, ConversationSession, InMemoryPreviews, SessionConfig, SessionEvent};

/// Shared in-memory backends seeded with two users and one conversation.
pub struct World {
    pub documents: MemoryDocumentStore,
    pub presence: MemoryPresenceStore,
    pub blobs: MemoryBlobStore,
    pub previews: InMemoryPreviews,
}

pub fn alice() -> CurrentUser {
    CurrentUser::new("alice", "Alice")
}

pub fn bob() -> CurrentUser {
    CurrentUser::new("bob", "Bob")
}

pub fn chat() -> ConversationId {
    ConversationId::new("c1")
}

impl World {
    pub fn new() -> Self {
        let documents = MemoryDocumentStore::new();
        documents
            .insert(
                &paths::conversation(&chat()),
                json!({ "users": ["alice", "bob"], "typing": [] }),
            )
            .unwrap();
        documents
            .insert(
                &paths::user(&UserId::new("alice")),
                json!({ "displayName": "Alice", "lastSeen": "2024-03-01T07:00:00Z" }),
            )
            .unwrap();
        documents
            .insert(
                &paths::user(&UserId::new("bob")),
                json!({
                    "displayName": "Bob",
                    "photoURL": "memory://profile_images/bob",
                    "lastSeen": "2024-03-01T08:00:00Z"
                }),
            )
            .unwrap();

        Self {
            documents,
            presence: MemoryPresenceStore::new(),
            blobs: MemoryBlobStore::new(),
            previews: InMemoryPreviews::new(),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends::new(
            self.documents.clone(),
            self.presence.clone(),
            self.blobs.clone(),
        )
    }

    pub fn session(&self) -> Harness {
        self.session_with(SessionConfig::default())
    }

    pub fn session_with(&self, config: SessionConfig) -> Harness {
        let (session, events) =
            ConversationSession::new(config, self.backends(), Arc::new(self.previews.clone()));
        Harness { session, events }
    }
}

/// A session plus its event channel, pumped by hand.
pub struct Harness {
    pub session: ConversationSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    /// Let spawned listener and write tasks run, applying whatever they
    /// deliver, until nothing more arrives.
    pub async fn settle(&mut self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
            while let Ok(event) = self.events.try_recv() {
                self.session.apply(event);
            }
        }
    }

    pub async fn open_as(&mut self, user: CurrentUser, conversation: ConversationId) {
        self.session.set_user(Some(user)).await;
        self.session.open(conversation).await;
        self.settle().await;
    }
}
