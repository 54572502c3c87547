use thiserror::Error;

/// Failures reported by the remote collaborators (document, presence and
/// blob stores).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// One independently subscribed part of the conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slice {
    Conversation,
    Messages,
    PeerProfile,
    PeerPresence,
}

impl std::fmt::Display for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Conversation => "conversation",
            Self::Messages => "messages",
            Self::PeerProfile => "peer profile",
            Self::PeerPresence => "peer presence",
        };
        f.write_str(name)
    }
}

/// Remote write a session performs on behalf of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    SendMessage,
    Upload,
    Profile,
}

impl std::fmt::Display for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SendMessage => "send message",
            Self::Upload => "attachment upload",
            Self::Profile => "profile update",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by a conversation session. None of them is fatal: each
/// one degrades a single slice of the view or blocks a single action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A listener failed to attach or emitted an error.
    #[error("Subscription error on {slice}: {source}")]
    Subscription { slice: Slice, source: StoreError },

    /// A send, upload or profile write failed.
    #[error("Failed to {op}: {source}")]
    Write { op: WriteOp, source: StoreError },

    /// A referenced user or conversation document does not exist.
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("No user is signed in")]
    NoCurrentUser,

    #[error("No conversation is open")]
    NoConversation,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No attachment is pending")]
    NoPendingAttachment,

    #[error("An upload is already in progress")]
    UploadInFlight,

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),
}

impl SessionError {
    pub fn write(op: WriteOp, source: StoreError) -> Self {
        Self::Write { op, source }
    }
}

/// Convenience alias used by the sync core.
pub type Result<T> = std::result::Result<T, SessionError>;
