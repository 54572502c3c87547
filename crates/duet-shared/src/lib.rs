//! # duet-shared
//!
//! Identifiers, document models, store paths and the error taxonomy shared
//! by the store backends and the synchronization core.

pub mod constants;
pub mod error;
pub mod models;
pub mod paths;
pub mod types;

pub use error::{Result, SessionError, Slice, StoreError, WriteOp};
pub use models::*;
pub use types::{ClientMessageId, ConversationId, CurrentUser, MessageId, UserId};
