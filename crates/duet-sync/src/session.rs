//! The conversation session: owns every listener, pending write and local
//! interaction state of one open conversation, and derives the render state
//! from them.
//!
//! A session is driven from a single task. Remote snapshots and write
//! completions arrive as [`SessionEvent`]s on the channel returned by
//! [`ConversationSession::new`] and are applied with
//! [`ConversationSession::apply`]; user actions are plain method calls.
//! Writes run on their own tasks so they never hold up event handling.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use duet_shared::{
    paths, ClientMessageId, ConversationId, ConversationMeta, CurrentUser, Message,
    MessageContent, MessageId, MessageKind, PresenceRecord, Result, SessionError, Slice,
    StoreError, UserId, UserProfile, WriteOp,
};
use duet_store::{BlobStore, DocumentStore, FieldDelta, PresenceStore};

use crate::attachment::{AttachmentPipeline, AttachmentStatus, LocalFile, PreviewSurface};
use crate::config::SessionConfig;
use crate::events::{SessionEpoch, SessionEvent, SliceUpdate};
use crate::presence::reconcile;
use crate::profile;
use crate::state::{AttachmentView, HeaderInfo, RenderState};
use crate::subscription::{AttachErrors, SubscriptionManager};
use crate::timeline::build_timeline;
use crate::typing::{TypingCoordinator, TypingState};

/// Remote collaborators of a session.
#[derive(Clone)]
pub struct Backends {
    pub documents: Arc<dyn DocumentStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backends {
    pub fn new(
        documents: impl DocumentStore + 'static,
        presence: impl PresenceStore + 'static,
        blobs: impl BlobStore + 'static,
    ) -> Self {
        Self {
            documents: Arc::new(documents),
            presence: Arc::new(presence),
            blobs: Arc::new(blobs),
        }
    }
}

// Latest snapshot of each slice.
#[derive(Default)]
struct RemoteSlices {
    meta: Option<ConversationMeta>,
    messages: Vec<Message>,
    peer_profile: Option<UserProfile>,
    peer_presence: Option<PresenceRecord>,
}

pub struct ConversationSession {
    config: SessionConfig,
    backends: Backends,
    events: mpsc::UnboundedSender<SessionEvent>,
    epoch: u64,
    subscriptions: SubscriptionManager,
    typing: Option<TypingCoordinator>,
    attachment: AttachmentPipeline,
    user: Option<CurrentUser>,
    conversation: Option<ConversationId>,
    remote: RemoteSlices,
    /// Sent messages not yet seen in a messages snapshot.
    provisional: Vec<Message>,
    draft: String,
    slice_errors: BTreeMap<Slice, SessionError>,
    last_error: Option<SessionError>,
}

impl ConversationSession {
    pub fn new(
        config: SessionConfig,
        backends: Backends,
        previews: Arc<dyn PreviewSurface>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new(
            backends.documents.clone(),
            backends.presence.clone(),
            events.clone(),
        );
        let attachment = AttachmentPipeline::new(previews, config.max_attachment_size);

        let session = Self {
            config,
            backends,
            events,
            epoch: 0,
            subscriptions,
            typing: None,
            attachment,
            user: None,
            conversation: None,
            remote: RemoteSlices::default(),
            provisional: Vec::new(),
            draft: String::new(),
            slice_errors: BTreeMap::new(),
            last_error: None,
        };
        (session, rx)
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub fn typing_state(&self) -> TypingState {
        self.typing
            .as_ref()
            .map_or(TypingState::Idle, TypingCoordinator::state)
    }

    pub fn attachment_status(&self) -> AttachmentStatus {
        self.attachment.status()
    }

    pub fn active_slices(&self) -> Vec<Slice> {
        self.subscriptions.active_slices()
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Sign a user in or out. Changing the user id rebuilds every listener;
    /// a changed name or avatar for the same id does not.
    pub async fn set_user(&mut self, user: Option<CurrentUser>) {
        let same_id = self.user.as_ref().map(|u| &u.id) == user.as_ref().map(|u| &u.id);
        if same_id {
            self.user = user;
            return;
        }
        self.leave().await;
        self.user = user;
        self.enter();
    }

    pub async fn open(&mut self, conversation: ConversationId) {
        if self.conversation.as_ref() == Some(&conversation) {
            return;
        }
        self.leave().await;
        self.conversation = Some(conversation);
        self.enter();
    }

    pub async fn close(&mut self) {
        self.leave().await;
        self.conversation = None;
    }

    async fn leave(&mut self) {
        self.epoch += 1;
        if let Some(mut typing) = self.typing.take() {
            typing.dispose().await;
        }
        self.subscriptions.teardown();
        self.attachment.reset();
        self.remote = RemoteSlices::default();
        self.provisional.clear();
        self.draft.clear();
        self.slice_errors.clear();
    }

    fn enter(&mut self) {
        let (Some(conversation), Some(user)) = (self.conversation.clone(), self.user.as_ref())
        else {
            return;
        };
        let user_id = user.id.clone();
        info!(conversation = %conversation, user = %user_id.short(), "Opening conversation");

        self.typing = Some(TypingCoordinator::new(
            self.backends.documents.clone(),
            paths::conversation(&conversation),
            user_id.clone(),
            self.config.typing_debounce,
        ));
        let errors = self.subscriptions.switch(Some(&conversation), Some(&user_id));
        self.record_attach_errors(errors);
    }

    fn record_attach_errors(&mut self, errors: AttachErrors) {
        for (slice, source) in errors {
            warn!(slice = %slice, "Failed to attach listener: {}", source);
            self.slice_errors
                .insert(slice, SessionError::Subscription { slice, source });
        }
    }

    // -----------------------------------------------------------------------
    // Remote events
    // -----------------------------------------------------------------------

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Sync(event) => {
                if !self.subscriptions.accepts(&event) {
                    let slice = event.update.slice();
                    debug!(slice = %slice, "Dropping snapshot from inactive listener");
                    return;
                }
                self.apply_update(event.update);
            }
            SessionEvent::SendFinished {
                epoch,
                client_id,
                sent_at,
                typing_cleared,
                result,
            } => {
                if epoch != self.epoch() {
                    debug!(client_id = %client_id, "Ignoring send from an earlier session");
                    return;
                }
                match result {
                    Ok(()) if typing_cleared => {
                        if let (Some(typing), Some(mark)) = (self.typing.as_mut(), sent_at) {
                            typing.on_sent(mark);
                        }
                    }
                    // The debounce timer still owns the retract.
                    Ok(()) => {}
                    Err(e) => {
                        warn!(client_id = %client_id, "Send failed: {}", e);
                        self.withdraw(client_id);
                        self.last_error = Some(e);
                    }
                }
            }
            SessionEvent::UploadFinished { epoch, result } => {
                if epoch != self.epoch() {
                    debug!("Ignoring upload from an earlier session");
                    return;
                }
                if let Err(e) = self.attachment.finish_upload(result) {
                    warn!("Attachment upload failed: {}", e);
                    self.last_error = Some(e);
                }
            }
        }
    }

    fn epoch(&self) -> SessionEpoch {
        SessionEpoch(self.epoch)
    }

    fn apply_update(&mut self, update: SliceUpdate) {
        let slice = update.slice();
        match update {
            SliceUpdate::Conversation(Ok(Some(meta))) => {
                self.slice_errors.remove(&slice);
                let other = self
                    .user
                    .as_ref()
                    .and_then(|u| meta.other_participant(&u.id).cloned());
                self.remote.meta = Some(meta);
                self.sync_peer(other);
            }
            SliceUpdate::Conversation(Ok(None)) => {
                let id = self
                    .conversation
                    .as_ref()
                    .map(ConversationId::to_string)
                    .unwrap_or_default();
                self.remote.meta = None;
                self.slice_errors
                    .insert(slice, SessionError::MissingData(format!("conversation {id}")));
                self.sync_peer(None);
            }
            SliceUpdate::Messages(Ok(messages)) => {
                self.slice_errors.remove(&slice);
                self.provisional.retain(|pending| {
                    !messages
                        .iter()
                        .any(|m| m.client_id.is_some() && m.client_id == pending.client_id)
                });
                self.remote.messages = messages;
            }
            SliceUpdate::PeerProfile(Ok(profile)) => {
                match (&profile, self.subscriptions.peer()) {
                    (None, Some(peer)) => {
                        let missing = SessionError::MissingData(format!("user {peer}"));
                        self.slice_errors.insert(slice, missing);
                    }
                    _ => {
                        self.slice_errors.remove(&slice);
                    }
                }
                self.remote.peer_profile = profile;
            }
            SliceUpdate::PeerPresence(Ok(record)) => {
                self.slice_errors.remove(&slice);
                self.remote.peer_presence = record;
            }
            SliceUpdate::Conversation(Err(source))
            | SliceUpdate::Messages(Err(source))
            | SliceUpdate::PeerProfile(Err(source))
            | SliceUpdate::PeerPresence(Err(source)) => {
                warn!(slice = %slice, "Listener error: {}", source);
                self.slice_errors
                    .insert(slice, SessionError::Subscription { slice, source });
            }
        }
    }

    fn sync_peer(&mut self, other: Option<UserId>) {
        if self.subscriptions.peer() == other.as_ref() {
            return;
        }
        self.remote.peer_profile = None;
        self.remote.peer_presence = None;
        self.slice_errors.remove(&Slice::PeerProfile);
        self.slice_errors.remove(&Slice::PeerPresence);
        let errors = self.subscriptions.attach_peer(other.as_ref());
        self.record_attach_errors(errors);
    }

    // Drop a provisional message whose send failed and hand its text back.
    fn withdraw(&mut self, client_id: ClientMessageId) {
        let Some(pos) = self
            .provisional
            .iter()
            .position(|m| m.client_id == Some(client_id))
        else {
            return;
        };
        let message = self.provisional.remove(pos);
        if let MessageContent::Text(text) = message.content {
            if self.draft.is_empty() {
                self.draft = text;
            }
        }
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// The input field changed.
    pub async fn on_input(&mut self, text: &str) {
        self.draft = text.to_string();
        if let Some(typing) = self.typing.as_mut() {
            typing.on_input(text).await;
        }
    }

    /// Send a text message. It shows up immediately as a provisional entry
    /// and is reconciled with the stored record by its client id.
    pub fn send_text(&mut self, text: &str) -> Result<ClientMessageId> {
        let body = text.trim();
        if body.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let user = self.user.clone().ok_or(SessionError::NoCurrentUser)?;
        let conversation = self
            .conversation
            .clone()
            .ok_or(SessionError::NoConversation)?;

        let client_id = ClientMessageId::new();
        let sent_at = self.typing.as_ref().map(TypingCoordinator::mark);
        self.provisional.push(Message {
            id: MessageId(format!("local-{client_id}")),
            sender_id: Some(user.id.clone()),
            sender_name: user.display_name.clone(),
            content: MessageContent::Text(body.to_string()),
            created_at: None,
            client_id: Some(client_id),
        });
        self.draft.clear();
        debug!(client_id = %client_id, conversation = %conversation, "Sending message");

        let documents = self.backends.documents.clone();
        let events = self.events.clone();
        let epoch = self.epoch();
        let body = body.to_string();
        tokio::spawn(async move {
            let written =
                write_text_message(&*documents, &conversation, &user, client_id, &body).await;
            let (result, typing_cleared) = match written {
                Ok(cleared) => (Ok(()), cleared),
                Err(e) => (Err(e), false),
            };
            let _ = events.send(SessionEvent::SendFinished {
                epoch,
                client_id,
                sent_at,
                typing_cleared,
                result,
            });
        });
        Ok(client_id)
    }

    pub fn select_file(&mut self, file: LocalFile) -> Result<()> {
        self.attachment.select(file).map(|_| ())
    }

    pub fn cancel_attachment(&mut self) -> Result<()> {
        self.attachment.cancel()
    }

    /// Upload the pending attachment and send it as an image message.
    pub fn commit_attachment(&mut self) -> Result<()> {
        let user = self.user.clone().ok_or(SessionError::NoCurrentUser)?;
        let conversation = self
            .conversation
            .clone()
            .ok_or(SessionError::NoConversation)?;
        let file = self.attachment.begin_upload()?;
        debug!(file = %file.name, conversation = %conversation, "Uploading attachment");

        let backends = self.backends.clone();
        let events = self.events.clone();
        let epoch = self.epoch();
        let preview_text = self.config.image_preview_text.clone();
        tokio::spawn(async move {
            let result =
                write_image_message(&backends, &conversation, &user, file, &preview_text).await;
            let _ = events.send(SessionEvent::UploadFinished { epoch, result });
        });
        Ok(())
    }

    pub async fn update_display_name(&mut self, name: &str) -> Result<()> {
        let user = self.user.as_ref().ok_or(SessionError::NoCurrentUser)?;
        let updated = profile::update_display_name(&*self.backends.documents, user, name).await?;
        self.user = Some(updated);
        Ok(())
    }

    pub async fn update_avatar(&mut self, file: &LocalFile) -> Result<()> {
        let user = self.user.as_ref().ok_or(SessionError::NoCurrentUser)?;
        let updated = profile::update_avatar(
            &*self.backends.documents,
            &*self.backends.blobs,
            user,
            file,
        )
        .await?;
        self.user = Some(updated);
        Ok(())
    }

    /// Record a failed action so it shows in the next render.
    pub fn report_error(&mut self, error: SessionError) {
        self.last_error = Some(error);
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    pub fn render(&self) -> RenderState {
        let offset = self.config.display_offset;
        let profile = self.remote.peer_profile.as_ref();
        let status = reconcile(
            self.remote.peer_presence.as_ref(),
            profile.and_then(|p| p.last_seen),
        );
        let header = HeaderInfo {
            display_name: profile.map(|p| p.display_name.clone()),
            photo_url: profile.and_then(|p| p.photo_url.clone()),
            status,
            status_label: status.label(&offset),
        };

        let timeline = match &self.user {
            Some(user) => {
                let messages: Vec<Message> = self
                    .remote
                    .messages
                    .iter()
                    .chain(self.provisional.iter())
                    .cloned()
                    .collect();
                build_timeline(&messages, user, offset).collect()
            }
            None => Vec::new(),
        };

        let other_typing = match (&self.remote.meta, &self.user) {
            (Some(meta), Some(user)) => meta
                .other_participant(&user.id)
                .map_or(false, |other| meta.is_typing(other)),
            _ => false,
        };

        RenderState {
            conversation: self.conversation.clone(),
            header,
            timeline,
            other_typing,
            last_message_preview: self
                .remote
                .meta
                .as_ref()
                .and_then(|m| m.last_message_preview.clone()),
            attachment: AttachmentView {
                status: self.attachment.status(),
                file_name: self.attachment.file_name().map(str::to_string),
                preview: self.attachment.preview().cloned(),
                can_commit: self.attachment.can_commit(),
            },
            draft: self.draft.clone(),
            slice_errors: self
                .slice_errors
                .iter()
                .map(|(slice, e)| (*slice, e.clone()))
                .collect(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Returns whether the sender's typing membership was removed.
async fn write_text_message(
    documents: &dyn DocumentStore,
    conversation: &ConversationId,
    user: &CurrentUser,
    client_id: ClientMessageId,
    body: &str,
) -> Result<bool> {
    let fields = FieldDelta::new()
        .set("senderId", user.id.as_str())
        .set("name", user.display_name.as_str())
        .set("type", MessageKind::Text.as_str())
        .set("message", body)
        .set("clientId", client_id.to_string())
        .server_timestamp("timestamp");
    documents
        .create(&paths::messages(conversation), fields)
        .await
        .map_err(|e| SessionError::write(WriteOp::SendMessage, e))?;

    // The message is stored at this point; a stale preview is not worth
    // reporting the send as failed.
    let path = paths::conversation(conversation);
    let meta = FieldDelta::new()
        .set("lastMessage", body)
        .server_timestamp("lastUpdated")
        .array_remove("typing", user.id.as_str());
    let Err(e) = documents.update(&path, meta).await else {
        return Ok(true);
    };
    warn!(conversation = %conversation, "Failed to update conversation preview: {}", e);

    let retract = FieldDelta::new().array_remove("typing", user.id.as_str());
    match documents.update(&path, retract).await {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!(conversation = %conversation, "Failed to clear typing after send: {}", e);
            Ok(false)
        }
    }
}

// Partial effects are left in place on failure: an uploaded blob without a
// message is harmless.
async fn write_image_message(
    backends: &Backends,
    conversation: &ConversationId,
    user: &CurrentUser,
    file: LocalFile,
    preview_text: &str,
) -> Result<()> {
    let upload = |e: StoreError| SessionError::write(WriteOp::Upload, e);

    let path = paths::chat_media(conversation, Utc::now().timestamp_millis(), &file.name);
    let handle = backends.blobs.put(&path, file.data).await.map_err(upload)?;
    let url = backends.blobs.resolve_url(&handle).await.map_err(upload)?;

    let fields = FieldDelta::new()
        .set("senderId", user.id.as_str())
        .set("name", user.display_name.as_str())
        .set("type", MessageKind::Image.as_str())
        .set("mediaUrl", url)
        .set("clientId", ClientMessageId::new().to_string())
        .server_timestamp("timestamp");
    backends
        .documents
        .create(&paths::messages(conversation), fields)
        .await
        .map_err(upload)?;

    let meta = FieldDelta::new()
        .set("lastMessage", preview_text)
        .server_timestamp("lastUpdated");
    backends
        .documents
        .update(&paths::conversation(conversation), meta)
        .await
        .map_err(upload)?;

    info!(conversation = %conversation, path = %handle.path, size = handle.size, "Image sent");
    Ok(())
}
