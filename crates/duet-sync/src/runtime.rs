//! Session task with a tokio mpsc command / watch render pattern.
//!
//! The session runs in a dedicated tokio task that owns it exclusively.
//! Callers send [`SessionCommand`]s and observe the latest [`RenderState`]
//! through a watch channel, republished after every command and event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use duet_shared::{ConversationId, CurrentUser};

use crate::attachment::{LocalFile, PreviewSurface};
use crate::config::SessionConfig;
use crate::session::{Backends, ConversationSession};
use crate::state::RenderState;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Sign a user in (`Some`) or out (`None`).
    SetUser(Option<CurrentUser>),
    /// Open a conversation, replacing the current one.
    Open(ConversationId),
    /// Close the current conversation.
    Close,
    /// The input field now contains this text.
    Input(String),
    SendText(String),
    SelectFile(LocalFile),
    CommitAttachment,
    CancelAttachment,
    UpdateDisplayName(String),
    UpdateAvatar(LocalFile),
    DismissError,
    /// Request a fresh render state.
    Snapshot(oneshot::Sender<RenderState>),
    /// Tear everything down and stop the task.
    Shutdown,
}

/// Handle to a running session task.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    render: watch::Receiver<RenderState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Send a command. Returns `false` once the task has stopped.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    /// Latest published render state.
    pub fn render(&self) -> RenderState {
        self.render.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderState> {
        self.render.clone()
    }

    /// Wait until the published render state satisfies `predicate`.
    /// Returns the matching state, or `None` on timeout or task exit.
    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        predicate: impl FnMut(&RenderState) -> bool,
    ) -> Option<RenderState> {
        let wait = self.render.wait_for(predicate);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Request an immediate snapshot from the task.
    pub async fn snapshot(&self) -> Option<RenderState> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionCommand::Snapshot(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    /// Ask the task to shut down and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Spawn a session task. Dropping every command sender has the same effect
/// as [`SessionCommand::Shutdown`].
pub fn spawn_session(
    config: SessionConfig,
    backends: Backends,
    previews: Arc<dyn PreviewSurface>,
) -> SessionHandle {
    let (mut session, mut events) = ConversationSession::new(config, backends, previews);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(256);
    let (render_tx, render_rx) = watch::channel(session.render());

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown) => {
                            info!("Session shutdown requested");
                            break;
                        }
                        Some(command) => handle_command(&mut session, command).await,
                        None => {
                            info!("Command channel closed, shutting down session");
                            break;
                        }
                    }
                }

                // --- Listener snapshots and write completions ---
                Some(event) = events.recv() => {
                    session.apply(event);
                }
            }
            render_tx.send_replace(session.render());
        }

        session.close().await;
        session.set_user(None).await;
        render_tx.send_replace(session.render());
        info!("Session task terminated");
    });

    SessionHandle {
        commands: cmd_tx,
        render: render_rx,
        task,
    }
}

async fn handle_command(session: &mut ConversationSession, command: SessionCommand) {
    let result = match command {
        SessionCommand::SetUser(user) => {
            session.set_user(user).await;
            Ok(())
        }
        SessionCommand::Open(conversation) => {
            session.open(conversation).await;
            Ok(())
        }
        SessionCommand::Close => {
            session.close().await;
            Ok(())
        }
        SessionCommand::Input(text) => {
            session.on_input(&text).await;
            Ok(())
        }
        SessionCommand::SendText(text) => session.send_text(&text).map(|_| ()),
        SessionCommand::SelectFile(file) => session.select_file(file),
        SessionCommand::CommitAttachment => session.commit_attachment(),
        SessionCommand::CancelAttachment => session.cancel_attachment(),
        SessionCommand::UpdateDisplayName(name) => session.update_display_name(&name).await,
        SessionCommand::UpdateAvatar(file) => session.update_avatar(&file).await,
        SessionCommand::DismissError => {
            session.dismiss_error();
            Ok(())
        }
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(session.render());
            Ok(())
        }
        // Handled by the loop.
        SessionCommand::Shutdown => Ok(()),
    };

    if let Err(e) = result {
        debug!("Command rejected: {}", e);
        session.report_error(e);
    }
}
