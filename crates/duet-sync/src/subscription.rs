//! Listener lifecycle for the open conversation.
//!
//! Four slices are watched: the conversation document, its message
//! collection, the other participant's profile and their live presence.
//! The first two depend only on (conversation, user); the peer slices depend
//! on the participant list inside the conversation document and are
//! re-derived from every conversation snapshot.
//!
//! Each listener's snapshots are forwarded by a small task onto the session
//! channel, tagged with a token. Events whose token no longer belongs to an
//! active listener are dropped by [`SubscriptionManager::accepts`], which
//! covers snapshots already queued when a listener was cancelled.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duet_shared::constants::MESSAGE_ORDER_FIELD;
use duet_shared::{
    paths, ConversationId, ConversationMeta, Message, PresenceRecord, Slice, StoreError, UserId,
    UserProfile,
};
use duet_store::{Document, DocumentStore, Listener, PresenceStore, Unsubscribe, Update};

use crate::events::{ListenerToken, SessionEvent, SliceUpdate, SyncEvent};

struct ActiveListener {
    token: ListenerToken,
    slice: Slice,
    target: String,
    unsubscribe: Unsubscribe,
    forwarder: JoinHandle<()>,
}

impl ActiveListener {
    fn cancel(&mut self) {
        if self.unsubscribe.cancel() {
            debug!(slice = %self.slice, target = %self.target, "Listener cancelled");
        }
        self.forwarder.abort();
    }
}

impl Drop for ActiveListener {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct PeerListeners {
    user: UserId,
    profile: Option<ActiveListener>,
    presence: Option<ActiveListener>,
}

pub struct SubscriptionManager {
    documents: Arc<dyn DocumentStore>,
    presence: Arc<dyn PresenceStore>,
    sink: mpsc::UnboundedSender<SessionEvent>,
    next_token: u64,
    target: Option<(ConversationId, UserId)>,
    conversation: Option<ActiveListener>,
    messages: Option<ActiveListener>,
    peer: Option<PeerListeners>,
}

/// Slices that failed to attach, with the reason.
pub type AttachErrors = Vec<(Slice, StoreError)>;

impl SubscriptionManager {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        presence: Arc<dyn PresenceStore>,
        sink: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            documents,
            presence,
            sink,
            next_token: 0,
            target: None,
            conversation: None,
            messages: None,
            peer: None,
        }
    }

    /// Replace the whole listener set. Every listener of the previous target
    /// is cancelled before anything new attaches. With either half of the
    /// target missing nothing is attached.
    pub fn switch(
        &mut self,
        conversation: Option<&ConversationId>,
        user: Option<&UserId>,
    ) -> AttachErrors {
        self.teardown();

        let (Some(conversation), Some(user)) = (conversation, user) else {
            return Vec::new();
        };
        info!(
            conversation = %conversation,
            user = %user.short(),
            "Attaching conversation listeners"
        );
        self.target = Some((conversation.clone(), user.clone()));

        let mut errors = Vec::new();

        let path = paths::conversation(conversation);
        match self.documents.subscribe_document(&path) {
            Ok(listener) => {
                self.conversation = Some(self.attach(
                    Slice::Conversation,
                    path.to_string(),
                    listener,
                    decode_conversation,
                ));
            }
            Err(e) => errors.push((Slice::Conversation, e)),
        }

        let path = paths::messages(conversation);
        match self.documents.subscribe_collection(&path, MESSAGE_ORDER_FIELD) {
            Ok(listener) => {
                self.messages = Some(self.attach(
                    Slice::Messages,
                    path.to_string(),
                    listener,
                    decode_messages,
                ));
            }
            Err(e) => errors.push((Slice::Messages, e)),
        }

        errors
    }

    /// Point the peer listeners at `other`. Unchanged peer is a no-op; a new
    /// peer replaces both peer listeners. Ignored while no target is set.
    pub fn attach_peer(&mut self, other: Option<&UserId>) -> AttachErrors {
        if self.target.is_none() || self.peer.as_ref().map(|p| &p.user) == other {
            return Vec::new();
        }

        if let Some(previous) = self.peer.take() {
            debug!(peer = %previous.user.short(), "Detaching peer listeners");
        }
        let Some(other) = other else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        let mut peer = PeerListeners {
            user: other.clone(),
            profile: None,
            presence: None,
        };

        let path = paths::user(other);
        match self.documents.subscribe_document(&path) {
            Ok(listener) => {
                peer.profile = Some(self.attach(
                    Slice::PeerProfile,
                    path.to_string(),
                    listener,
                    decode_profile,
                ));
            }
            Err(e) => errors.push((Slice::PeerProfile, e)),
        }

        let key = paths::presence_key(other);
        match self.presence.subscribe(&key) {
            Ok(listener) => {
                peer.presence = Some(self.attach(
                    Slice::PeerPresence,
                    key,
                    listener,
                    decode_presence,
                ));
            }
            Err(e) => errors.push((Slice::PeerPresence, e)),
        }

        debug!(peer = %other.short(), "Peer listeners attached");
        self.peer = Some(peer);
        errors
    }

    /// Cancel every listener. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some((conversation, _)) = self.target.take() {
            info!(conversation = %conversation, "Detaching conversation listeners");
        }
        self.conversation = None;
        self.messages = None;
        self.peer = None;
    }

    /// Whether `event` came from a listener that is still active.
    pub fn accepts(&self, event: &SyncEvent) -> bool {
        self.listeners()
            .any(|l| l.token == event.token && l.slice == event.update.slice())
    }

    pub fn active_slices(&self) -> Vec<Slice> {
        self.listeners().map(|l| l.slice).collect()
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&(ConversationId, UserId)> {
        self.target.as_ref()
    }

    pub fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref().map(|p| &p.user)
    }

    fn listeners(&self) -> impl Iterator<Item = &ActiveListener> {
        let peer = self
            .peer
            .iter()
            .flat_map(|p| p.profile.iter().chain(p.presence.iter()));
        self.conversation
            .iter()
            .chain(self.messages.iter())
            .chain(peer)
    }

    fn attach<T: Send + 'static>(
        &mut self,
        slice: Slice,
        target: String,
        listener: Listener<T>,
        decode: fn(Update<T>) -> SliceUpdate,
    ) -> ActiveListener {
        self.next_token += 1;
        let token = ListenerToken(self.next_token);
        let (mut updates, unsubscribe) = listener.into_parts();
        let sink = self.sink.clone();

        let forwarder = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let event = SessionEvent::Sync(SyncEvent {
                    token,
                    update: decode(update),
                });
                if sink.send(event).is_err() {
                    break;
                }
            }
        });

        ActiveListener {
            token,
            slice,
            target,
            unsubscribe,
            forwarder,
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn decode_conversation(update: Update<Option<Document>>) -> SliceUpdate {
    SliceUpdate::Conversation(update.and_then(|doc| {
        doc.map(|doc| {
            serde_json::from_value::<ConversationMeta>(doc.into_value())
                .map_err(|e| StoreError::Decode(format!("conversation: {e}")))
        })
        .transpose()
    }))
}

fn decode_messages(update: Update<Vec<Document>>) -> SliceUpdate {
    SliceUpdate::Messages(update.map(|docs| {
        docs.into_iter()
            .filter_map(|doc| {
                let id = doc.id.clone();
                match Message::from_document(&id, doc.into_value()) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!(message = %id, "Skipping undecodable message: {}", e);
                        None
                    }
                }
            })
            .collect()
    }))
}

fn decode_profile(update: Update<Option<Document>>) -> SliceUpdate {
    SliceUpdate::PeerProfile(update.and_then(|doc| {
        doc.map(|doc| {
            serde_json::from_value::<UserProfile>(doc.into_value())
                .map_err(|e| StoreError::Decode(format!("profile: {e}")))
        })
        .transpose()
    }))
}

fn decode_presence(update: Update<Option<Value>>) -> SliceUpdate {
    SliceUpdate::PeerPresence(update.and_then(|value| {
        value
            .map(|value| {
                serde_json::from_value::<PresenceRecord>(value)
                    .map_err(|e| StoreError::Decode(format!("presence: {e}")))
            })
            .transpose()
    }))
}
