//! Live query handles.

use tokio::sync::mpsc;

use crate::StoreError;

/// One delivery of a live query: a full snapshot or the error the backend
/// emitted for it.
pub type Update<T> = std::result::Result<T, StoreError>;

/// Detaches a listener from its backend.
///
/// Calling [`Unsubscribe::cancel`] more than once is harmless, and dropping
/// the guard cancels it.
pub struct Unsubscribe {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A guard with nothing to detach.
    pub fn noop() -> Self {
        Self { detach: None }
    }

    /// Run the detach hook if it has not run yet. Returns whether it ran.
    pub fn cancel(&mut self) -> bool {
        match self.detach.take() {
            Some(detach) => {
                detach();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.detach.is_none()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Stream of snapshots for one live query plus the guard that ends it.
///
/// Snapshots arrive in the order the backend emitted them. The stream ends
/// once the listener is cancelled.
#[derive(Debug)]
pub struct Listener<T> {
    updates: mpsc::UnboundedReceiver<Update<T>>,
    unsubscribe: Unsubscribe,
}

impl<T> Listener<T> {
    pub fn new(updates: mpsc::UnboundedReceiver<Update<T>>, unsubscribe: Unsubscribe) -> Self {
        Self {
            updates,
            unsubscribe,
        }
    }

    pub async fn next(&mut self) -> Option<Update<T>> {
        self.updates.recv().await
    }

    pub fn cancel(&mut self) {
        self.unsubscribe.cancel();
        self.updates.close();
    }

    /// Split into the raw update channel and the guard, so the guard can be
    /// held by a different owner than the reader.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Update<T>>, Unsubscribe) {
        (self.updates, self.unsubscribe)
    }
}
