//! Typing indicator coordination.
//!
//! The local user's membership in the conversation's typing set is published
//! once per burst of keystrokes and retracted after a quiet period, on empty
//! input, as part of a successful send, or when the session goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use duet_shared::paths::DocPath;
use duet_shared::UserId;
use duet_store::{DocumentStore, FieldDelta};

/// Field holding the typing set on the conversation document.
const TYPING_FIELD: &str = "typing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Announced,
}

/// Position in the input history, taken when a message is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingMark(u64);

pub struct TypingCoordinator {
    documents: Arc<dyn DocumentStore>,
    conversation: DocPath,
    user: UserId,
    debounce: Duration,
    announced: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
    inputs: u64,
}

impl TypingCoordinator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        conversation: DocPath,
        user: UserId,
        debounce: Duration,
    ) -> Self {
        Self {
            documents,
            conversation,
            user,
            debounce,
            announced: Arc::new(AtomicBool::new(false)),
            timer: None,
            inputs: 0,
        }
    }

    pub fn state(&self) -> TypingState {
        if self.announced.load(Ordering::SeqCst) {
            TypingState::Announced
        } else {
            TypingState::Idle
        }
    }

    pub fn mark(&self) -> TypingMark {
        TypingMark(self.inputs)
    }

    /// React to the current contents of the input field.
    pub async fn on_input(&mut self, text: &str) {
        self.inputs += 1;
        self.cancel_timer();

        if text.trim().is_empty() {
            if self.announced.swap(false, Ordering::SeqCst) {
                set_membership(&*self.documents, &self.conversation, &self.user, false).await;
            }
            return;
        }

        if !self.announced.swap(true, Ordering::SeqCst) {
            set_membership(&*self.documents, &self.conversation, &self.user, true).await;
        }
        self.arm_timer();
    }

    /// A message sent at `mark` went out and its conversation update removed
    /// the membership, so only the local state is reset. Input that arrived
    /// after the send belongs to a newer burst, which keeps its own timer.
    pub fn on_sent(&mut self, mark: TypingMark) {
        if mark != self.mark() {
            debug!(user = %self.user, "Input after send, keeping current burst");
            return;
        }
        self.cancel_timer();
        self.announced.store(false, Ordering::SeqCst);
    }

    /// Retract unconditionally; also clears membership left behind by an
    /// earlier session that never retracted.
    pub async fn dispose(&mut self) {
        self.cancel_timer();
        self.announced.store(false, Ordering::SeqCst);
        set_membership(&*self.documents, &self.conversation, &self.user, false).await;
    }

    fn arm_timer(&mut self) {
        let documents = self.documents.clone();
        let conversation = self.conversation.clone();
        let user = self.user.clone();
        let announced = self.announced.clone();
        let debounce = self.debounce;

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if announced.swap(false, Ordering::SeqCst) {
                debug!(user = %user, "Typing quiet period elapsed");
                set_membership(&*documents, &conversation, &user, false).await;
            }
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

// Typing writes are best effort: a failure only leaves a stale indicator.
async fn set_membership(
    documents: &dyn DocumentStore,
    path: &DocPath,
    user: &UserId,
    typing: bool,
) {
    let delta = if typing {
        FieldDelta::new().array_union(TYPING_FIELD, user.as_str())
    } else {
        FieldDelta::new().array_remove(TYPING_FIELD, user.as_str())
    };
    match documents.update(path, delta).await {
        Ok(()) => debug!(user = %user, typing, "Typing membership updated"),
        Err(e) => warn!(user = %user, typing, "Failed to update typing membership: {}", e),
    }
}
