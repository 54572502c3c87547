//! Attachment pipeline: one pending image per session.
//!
//! ```text
//! Idle -> Previewing -> Uploading -> Committed | Failed
//!              \-> Cancelled
//! ```
//!
//! Committed, Failed and Cancelled behave like Idle for every transition.
//! A preview resource is created on selection and released exactly once,
//! whichever way the attachment leaves the pipeline.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::{debug, warn};

use duet_shared::{Result, SessionError};

/// A file picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub data: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Opaque reference to a locally rendered preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreviewHandle(pub String);

/// Creates and releases local preview resources.
pub trait PreviewSurface: Send + Sync {
    fn create(&self, file: &LocalFile) -> PreviewHandle;
    fn release(&self, handle: &PreviewHandle);
}

/// Preview surface that only tracks which handles are live.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPreviews {
    live: Arc<Mutex<BTreeSet<PreviewHandle>>>,
    next: Arc<AtomicU64>,
}

impl InMemoryPreviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl PreviewSurface for InMemoryPreviews {
    fn create(&self, file: &LocalFile) -> PreviewHandle {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = PreviewHandle(format!("preview://{n}/{}", file.name));
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone());
        handle
    }

    fn release(&self, handle: &PreviewHandle) {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle);
        if !removed {
            warn!(handle = %handle.0, "Released unknown preview");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentStatus {
    #[default]
    Idle,
    Previewing,
    Uploading,
    Committed,
    Failed,
    Cancelled,
}

impl AttachmentStatus {
    /// Whether a new file may be selected.
    fn accepts_selection(&self) -> bool {
        !matches!(self, Self::Uploading)
    }
}

#[derive(Debug)]
struct Pending {
    file: LocalFile,
    preview: PreviewHandle,
}

pub struct AttachmentPipeline {
    surface: Arc<dyn PreviewSurface>,
    max_size: usize,
    status: AttachmentStatus,
    pending: Option<Pending>,
}

impl AttachmentPipeline {
    pub fn new(surface: Arc<dyn PreviewSurface>, max_size: usize) -> Self {
        Self {
            surface,
            max_size,
            status: AttachmentStatus::Idle,
            pending: None,
        }
    }

    pub fn status(&self) -> AttachmentStatus {
        self.status
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.pending.as_ref().map(|p| &p.preview)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.file.name.as_str())
    }

    /// Commit is only offered while a preview is shown and nothing uploads.
    pub fn can_commit(&self) -> bool {
        self.status == AttachmentStatus::Previewing
    }

    /// Select `file`, replacing (and releasing) any earlier selection.
    pub fn select(&mut self, file: LocalFile) -> Result<&PreviewHandle> {
        if !self.status.accepts_selection() {
            return Err(SessionError::UploadInFlight);
        }
        if file.size() > self.max_size {
            return Err(SessionError::AttachmentTooLarge {
                size: file.size(),
                max: self.max_size,
            });
        }

        self.release_pending();
        let preview = self.surface.create(&file);
        debug!(file = %file.name, size = file.size(), "Attachment selected");
        self.status = AttachmentStatus::Previewing;
        Ok(&self.pending.insert(Pending { file, preview }).preview)
    }

    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            AttachmentStatus::Previewing => {
                self.release_pending();
                self.status = AttachmentStatus::Cancelled;
                Ok(())
            }
            AttachmentStatus::Uploading => Err(SessionError::UploadInFlight),
            _ => Err(SessionError::NoPendingAttachment),
        }
    }

    /// Move to Uploading and hand out the file to upload.
    pub fn begin_upload(&mut self) -> Result<LocalFile> {
        match (self.status, &self.pending) {
            (AttachmentStatus::Previewing, Some(pending)) => {
                self.status = AttachmentStatus::Uploading;
                Ok(pending.file.clone())
            }
            (AttachmentStatus::Uploading, _) => Err(SessionError::UploadInFlight),
            _ => Err(SessionError::NoPendingAttachment),
        }
    }

    /// Settle an upload. The preview is released either way; a failure is
    /// handed back to the caller.
    pub fn finish_upload(&mut self, outcome: Result<()>) -> Result<()> {
        if self.status != AttachmentStatus::Uploading {
            debug!(status = ?self.status, "Ignoring upload result outside Uploading");
            return Ok(());
        }
        self.release_pending();
        match outcome {
            Ok(()) => {
                self.status = AttachmentStatus::Committed;
                Ok(())
            }
            Err(e) => {
                self.status = AttachmentStatus::Failed;
                Err(e)
            }
        }
    }

    /// Drop everything, including an upload whose result will be ignored.
    pub fn reset(&mut self) {
        self.release_pending();
        self.status = AttachmentStatus::Idle;
    }

    fn release_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.surface.release(&pending.preview);
        }
    }
}

impl Drop for AttachmentPipeline {
    fn drop(&mut self) {
        self.release_pending();
    }
}
