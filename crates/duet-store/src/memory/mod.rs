//! In-process backends.
//!
//! They honour the same contracts as the remote stores and add hooks the
//! tests lean on: listener accounting, a write log, injectable failures and
//! manual acknowledgement of server timestamps.

mod blobs;
mod documents;
mod presence;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use blobs::MemoryBlobStore;
pub use documents::{MemoryDocumentStore, WriteKind, WriteRecord};
pub use presence::MemoryPresenceStore;

// The guarded state is never left half-updated, so a poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
