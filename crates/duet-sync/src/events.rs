//! Events flowing into a conversation session.
//!
//! Listener snapshots and completions of in-flight writes all arrive on one
//! channel so the session applies them one at a time, in arrival order.

use duet_shared::{
    ClientMessageId, ConversationMeta, Message, PresenceRecord, Result, Slice, UserProfile,
};
use duet_store::Update;

use crate::typing::TypingMark;

/// Identifies the listener an event came from. Tokens are never reused
/// within a subscription manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub(crate) u64);

/// Decoded snapshot of one slice.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceUpdate {
    Conversation(Update<Option<ConversationMeta>>),
    Messages(Update<Vec<Message>>),
    PeerProfile(Update<Option<UserProfile>>),
    PeerPresence(Update<Option<PresenceRecord>>),
}

impl SliceUpdate {
    pub fn slice(&self) -> Slice {
        match self {
            Self::Conversation(_) => Slice::Conversation,
            Self::Messages(_) => Slice::Messages,
            Self::PeerProfile(_) => Slice::PeerProfile,
            Self::PeerPresence(_) => Slice::PeerPresence,
        }
    }
}

/// One signed-in user looking at one conversation. A session moves to a new
/// epoch every time it leaves a conversation or changes user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEpoch(pub(crate) u64);

#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub token: ListenerToken,
    pub update: SliceUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Sync(SyncEvent),
    /// A text send finished. Completions from an earlier epoch are ignored.
    SendFinished {
        epoch: SessionEpoch,
        client_id: ClientMessageId,
        /// Input position when the message was sent.
        sent_at: Option<TypingMark>,
        /// Whether the sender's typing membership was removed remotely.
        typing_cleared: bool,
        result: Result<()>,
    },
    UploadFinished {
        epoch: SessionEpoch,
        result: Result<()>,
    },
}
