//! # duet-sync
//!
//! Real-time synchronization core of a one-to-one conversation view.
//!
//! - [`subscription`] owns the remote listeners of the open conversation
//! - [`presence`] reconciles live presence with the persisted last-seen time
//! - [`typing`] publishes and retracts the local typing indicator
//! - [`attachment`] drives a pending image from selection to upload
//! - [`timeline`] derives display rows from the message list
//! - [`session`] ties them together behind one event-driven object
//! - [`runtime`] runs a session in its own task behind a command channel

pub mod attachment;
pub mod config;
pub mod events;
pub mod presence;
pub mod profile;
pub mod runtime;
pub mod session;
pub mod state;
pub mod subscription;
pub mod timeline;
pub mod typing;

pub use attachment::{
    AttachmentPipeline, AttachmentStatus, InMemoryPreviews, LocalFile, PreviewHandle,
    PreviewSurface,
};
pub use config::SessionConfig;
pub use events::{ListenerToken, SessionEpoch, SessionEvent, SliceUpdate, SyncEvent};
pub use presence::{reconcile, DisplayStatus};
pub use runtime::{spawn_session, SessionCommand, SessionHandle};
pub use session::{Backends, ConversationSession};
pub use state::{AttachmentView, HeaderInfo, RenderState};
pub use subscription::SubscriptionManager;
pub use timeline::{build_timeline, MessageRow, Timeline, TimelineEntry};
pub use typing::{TypingCoordinator, TypingMark, TypingState};
