//! # duet
//!
//! Runs two conversation sessions against shared in-memory backends and
//! prints what each participant sees while they chat:
//! - presence and last-seen in the header
//! - typing indicators
//! - optimistic sends and their resolution
//! - an image attachment
//!
//! Set `DUET_BLOB_PATH` to keep uploaded blobs on disk instead of in memory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duet_shared::constants::APP_NAME;
use duet_shared::{paths, ConversationId, CurrentUser, MessageContent, PresenceRecord};
use duet_store::{
    BlobStore, FsBlobStore, MemoryBlobStore, MemoryDocumentStore, MemoryPresenceStore,
    PresenceStore,
};
use duet_sync::timeline::separator_label;
use duet_sync::{
    spawn_session, Backends, InMemoryPreviews, LocalFile, RenderState, SessionCommand,
    SessionConfig, SessionHandle, TimelineEntry,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,duet_sync=debug")),
        )
        .init();

    info!("Starting {} demo v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = SessionConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize backends
    // -----------------------------------------------------------------------
    let documents = MemoryDocumentStore::new();
    let presence = MemoryPresenceStore::new();
    let blobs: Arc<dyn BlobStore> = match std::env::var("DUET_BLOB_PATH") {
        Ok(path) => Arc::new(
            FsBlobStore::new(PathBuf::from(path), config.max_attachment_size)
                .await
                .context("failed to open blob directory")?,
        ),
        Err(_) => Arc::new(MemoryBlobStore::new()),
    };
    let backends = Backends {
        documents: Arc::new(documents.clone()),
        presence: Arc::new(presence.clone()),
        blobs,
    };

    let alice = CurrentUser::new("alice", "Alice");
    let bob = CurrentUser::new("bob", "Bob");
    let conversation = ConversationId::new("alice-bob");
    seed(&documents, &presence, &alice, &bob, &conversation).await?;

    // -----------------------------------------------------------------------
    // 4. Spawn one session per participant
    // -----------------------------------------------------------------------
    let previews = Arc::new(InMemoryPreviews::new());
    let mut alice_view = spawn_session(config.clone(), backends.clone(), previews.clone());
    let mut bob_view = spawn_session(config, backends, previews);

    for (view, user) in [(&alice_view, alice.clone()), (&bob_view, bob.clone())] {
        view.send(SessionCommand::SetUser(Some(user))).await;
        view.send(SessionCommand::Open(conversation.clone())).await;
    }

    // -----------------------------------------------------------------------
    // 5. Run the script (or stop early on Ctrl+C)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = script(&mut alice_view, &mut bob_view, &presence, &bob) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    futures::future::join(alice_view.shutdown(), bob_view.shutdown()).await;
    info!(listeners = documents.total_listeners(), "Sessions closed");
    Ok(())
}

async fn seed(
    documents: &MemoryDocumentStore,
    presence: &MemoryPresenceStore,
    alice: &CurrentUser,
    bob: &CurrentUser,
    conversation: &ConversationId,
) -> anyhow::Result<()> {
    documents.insert(
        &paths::conversation(conversation),
        json!({ "users": [alice.id, bob.id], "typing": [] }),
    )?;
    for user in [alice, bob] {
        documents.insert(
            &paths::user(&user.id),
            json!({
                "displayName": user.display_name,
                "displayName_lowercase": user.display_name.to_lowercase(),
                "lastSeen": Utc::now().to_rfc3339(),
            }),
        )?;
    }
    let online = serde_json::to_value(PresenceRecord::online(Utc::now()))?;
    presence.set(&paths::presence_key(&alice.id), Some(online)).await?;
    Ok(())
}

async fn script(
    alice_view: &mut SessionHandle,
    bob_view: &mut SessionHandle,
    presence: &MemoryPresenceStore,
    bob: &CurrentUser,
) -> anyhow::Result<()> {
    let state = step(alice_view, "alice opens the conversation", |s| {
        s.header.display_name.is_some()
    })
    .await?;
    print_view("alice", &state);

    // Bob comes online and starts typing.
    let online = serde_json::to_value(PresenceRecord::online(Utc::now()))?;
    presence.set(&paths::presence_key(&bob.id), Some(online)).await?;
    bob_view.send(SessionCommand::Input("hey al".into())).await;
    let state = step(alice_view, "bob is typing", |s| {
        s.other_typing && s.header.status.is_online()
    })
    .await?;
    print_view("alice", &state);

    bob_view.send(SessionCommand::SendText("hey alice!".into())).await;
    let state = step(alice_view, "bob's message arrives", |s| {
        !s.other_typing && s.messages().count() == 1
    })
    .await?;
    print_view("alice", &state);

    alice_view.send(SessionCommand::SendText("hi bob, here's the cat".into())).await;
    alice_view
        .send(SessionCommand::SelectFile(LocalFile::new(
            "cat.png",
            &b"\x89PNG demo bytes"[..],
        )))
        .await;
    alice_view.send(SessionCommand::CommitAttachment).await;

    let state = step(bob_view, "alice's text and image arrive", |s| {
        s.messages().filter(|r| !r.pending).count() == 3
    })
    .await?;
    print_view("bob", &state);

    // Bob leaves without a clean signal; alice falls back to last seen.
    presence.evict(&paths::presence_key(&bob.id));
    let state = step(alice_view, "bob goes away", |s| !s.header.status.is_online()).await?;
    print_view("alice", &state);
    Ok(())
}

async fn step(
    view: &mut SessionHandle,
    label: &str,
    predicate: impl FnMut(&RenderState) -> bool,
) -> anyhow::Result<RenderState> {
    info!(step = label, "Waiting");
    view.wait_for(STEP_TIMEOUT, predicate)
        .await
        .with_context(|| format!("timed out waiting for: {label}"))
}

fn print_view(who: &str, state: &RenderState) {
    println!("--- {who} ---");
    println!(
        "{} ({}){}",
        state.header.display_name.as_deref().unwrap_or("?"),
        state.header.status_label,
        if state.other_typing { " is typing..." } else { "" }
    );
    for entry in &state.timeline {
        match entry {
            TimelineEntry::DateSeparator(date) => println!("    -- {} --", separator_label(date)),
            TimelineEntry::Message(row) => {
                let body = match &row.content {
                    MessageContent::Text(text) => text.clone(),
                    MessageContent::Image { url } => format!("[image {url}]"),
                };
                let who = if row.is_self { "me" } else { row.sender_name.as_str() };
                println!("    [{}] {}: {}", row.time_label, who, body);
            }
        }
    }
    if let Some(preview) = &state.last_message_preview {
        println!("    preview: {preview}");
    }
    if let Some(err) = &state.last_error {
        println!("    error: {err}");
    }
}
