//! # duet-store
//!
//! Narrow interfaces to the remote collaborators a conversation session
//! talks to: a document store with live queries, an ephemeral presence
//! store and a blob store. Every subscription hands back a [`Listener`]
//! whose [`Unsubscribe`] guard detaches it from the backend.
//!
//! The in-memory backends implement the same contracts for tests and the
//! demo binary; [`FsBlobStore`] keeps blobs on the local filesystem.

pub mod blob;
pub mod document;
pub mod fs_blob;
pub mod listener;
pub mod memory;
pub mod presence;

pub use blob::{BlobHandle, BlobStore};
pub use document::{Document, DocumentStore, FieldDelta, FieldOp};
pub use fs_blob::FsBlobStore;
pub use listener::{Listener, Unsubscribe, Update};
pub use memory::{MemoryBlobStore, MemoryDocumentStore, MemoryPresenceStore, WriteKind, WriteRecord};
pub use presence::PresenceStore;

pub use duet_shared::StoreError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
