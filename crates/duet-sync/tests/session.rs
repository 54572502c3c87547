mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use common::{alice, bob, chat, World};
use duet_shared::constants::IMAGE_PREVIEW_TEXT;
use duet_shared::{
    paths, ConversationId, MessageContent, SessionError, Slice, StoreError, UserId, WriteOp,
};
use duet_store::{DocumentStore, FieldDelta, PresenceStore};
use duet_sync::{AttachmentStatus, DisplayStatus, LocalFile, TimelineEntry, TypingState};

#[tokio::test]
async fn header_uses_profile_and_persisted_last_seen() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    let state = alice_view.session.render();
    assert_eq!(state.conversation, Some(chat()));
    assert_eq!(state.header.display_name.as_deref(), Some("Bob"));
    assert_eq!(
        state.header.photo_url.as_deref(),
        Some("memory://profile_images/bob")
    );
    assert_eq!(
        state.header.status,
        DisplayStatus::LastSeen(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
    );
    assert_eq!(state.header.status_label, "Last seen Mar 1, 2024 8:00 AM");
    assert!(state.slice_errors.is_empty());
    assert_eq!(
        alice_view.session.active_slices(),
        vec![Slice::Conversation, Slice::Messages, Slice::PeerProfile, Slice::PeerPresence]
    );
}

#[tokio::test]
async fn live_presence_overrides_profile() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    world
        .presence
        .set(
            "/status/bob",
            Some(json!({ "state": "online", "last_changed": 1_709_280_000_000i64 })),
        )
        .await
        .unwrap();
    alice_view.settle().await;
    assert_eq!(alice_view.session.render().header.status, DisplayStatus::Online);

    world
        .presence
        .set(
            "/status/bob",
            Some(json!({ "state": "offline", "last_changed": 1_709_290_800_000i64 })),
        )
        .await
        .unwrap();
    alice_view.settle().await;
    assert_eq!(
        alice_view.session.render().header.status,
        DisplayStatus::LastSeen(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap())
    );

    // Evicted record: back to the persisted fallback.
    world.presence.evict("/status/bob");
    alice_view.settle().await;
    assert_eq!(
        alice_view.session.render().header.status,
        DisplayStatus::LastSeen(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn sent_message_is_provisional_then_resolved_in_place() {
    let world = World::new();
    world.documents.set_manual_ack(true);
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    alice_view.session.send_text("hello").unwrap();
    let state = alice_view.session.render();
    let rows: Vec<_> = state.messages().collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].pending);
    assert!(rows[0].is_self);
    assert_eq!(rows[0].time_label, "...");
    assert_eq!(state.draft, "");

    // Stored record with an unresolved timestamp replaces the provisional one.
    alice_view.settle().await;
    let state = alice_view.session.render();
    let rows: Vec<_> = state.messages().collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].pending);
    assert!(!rows[0].id.0.starts_with("local-"));
    assert_eq!(state.timeline.len(), 1);

    world.documents.acknowledge_writes();
    alice_view.settle().await;
    let state = alice_view.session.render();
    assert_eq!(state.timeline.len(), 2);
    assert!(matches!(state.timeline[0], TimelineEntry::DateSeparator(_)));
    let row = state.timeline[1].as_message().unwrap();
    assert_eq!(row.content, MessageContent::Text("hello".into()));
    assert!(!row.pending);
    assert_ne!(row.time_label, "...");
    assert_eq!(state.last_message_preview.as_deref(), Some("hello"));
}

#[tokio::test]
async fn send_updates_preview_and_clears_typing_in_one_write() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    alice_view.session.on_input("hello").await;
    assert_eq!(alice_view.session.typing_state(), TypingState::Announced);
    alice_view.session.send_text("hello").unwrap();
    alice_view.settle().await;

    assert_eq!(alice_view.session.typing_state(), TypingState::Idle);
    let me = Value::from("alice");
    let conversation_writes: Vec<_> = world
        .documents
        .writes()
        .into_iter()
        .filter(|w| w.path == "chats/c1")
        .collect();
    assert_eq!(conversation_writes.len(), 2);
    assert!(conversation_writes[0].adds("typing", &me));
    assert!(conversation_writes[1].removes("typing", &me));
    assert!(conversation_writes[1].delta.get("lastMessage").is_some());

    let stored = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(stored["typing"], json!([]));
    assert_eq!(stored["lastMessage"], json!("hello"));
}

#[tokio::test]
async fn stored_message_carries_sender_and_client_id() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    let client_id = alice_view.session.send_text("  hi there ").unwrap();
    alice_view.settle().await;

    let create = world
        .documents
        .writes()
        .into_iter()
        .find(|w| w.path.starts_with("chats/c1/messages/"))
        .unwrap();
    let stored = world
        .documents
        .document(&duet_shared::paths::DocPath::new(create.path))
        .unwrap();
    assert_eq!(stored["senderId"], json!("alice"));
    assert_eq!(stored["name"], json!("Alice"));
    assert_eq!(stored["type"], json!("text"));
    assert_eq!(stored["message"], json!("hi there"));
    assert_eq!(stored["clientId"], json!(client_id.to_string()));
    assert!(stored["timestamp"].is_string());
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    assert_eq!(alice_view.session.send_text("   "), Err(SessionError::EmptyMessage));
    assert!(world.documents.writes().is_empty());
}

#[tokio::test]
async fn failed_send_withdraws_message_and_restores_draft() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    world
        .documents
        .fail_writes(Some(StoreError::Unavailable("offline".into())));
    alice_view.session.send_text("hey").unwrap();
    alice_view.settle().await;

    let state = alice_view.session.render();
    assert_eq!(state.messages().count(), 0);
    assert_eq!(state.draft, "hey");
    assert_eq!(
        state.last_error,
        Some(SessionError::write(
            WriteOp::SendMessage,
            StoreError::Unavailable("offline".into())
        ))
    );

    alice_view.session.dismiss_error();
    assert!(alice_view.session.render().last_error.is_none());
}

#[tokio::test]
async fn messages_from_both_sides_are_attributed() {
    let world = World::new();
    let mut alice_view = world.session();
    let mut bob_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    bob_view.open_as(bob(), chat()).await;

    alice_view.session.send_text("hi bob").unwrap();
    alice_view.settle().await;
    bob_view.session.send_text("hi alice").unwrap();
    bob_view.settle().await;

    // Legacy record without a sender id, attributed by display name.
    world
        .documents
        .create(
            &paths::messages(&chat()),
            FieldDelta::new()
                .set("name", "Alice")
                .set("message", "from an old client")
                .server_timestamp("timestamp"),
        )
        .await
        .unwrap();
    alice_view.settle().await;
    bob_view.settle().await;

    let own: Vec<bool> = alice_view.session.render().messages().map(|r| r.is_self).collect();
    assert_eq!(own, vec![true, false, true]);
    let own: Vec<bool> = bob_view.session.render().messages().map(|r| r.is_self).collect();
    assert_eq!(own, vec![false, true, false]);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_reaches_the_other_side_and_expires() {
    let world = World::new();
    let mut alice_view = world.session();
    let mut bob_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    bob_view.open_as(bob(), chat()).await;

    bob_view.session.on_input("h").await;
    bob_view.session.on_input("he").await;
    alice_view.settle().await;
    assert!(alice_view.session.render().other_typing);
    assert!(!bob_view.session.render().other_typing);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    alice_view.settle().await;
    assert!(!alice_view.session.render().other_typing);

    let bob_id = Value::from("bob");
    let writes = world.documents.writes();
    assert_eq!(writes.iter().filter(|w| w.adds("typing", &bob_id)).count(), 1);
    assert_eq!(writes.iter().filter(|w| w.removes("typing", &bob_id)).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn typing_is_cleared_when_the_send_preview_update_fails() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    world
        .documents
        .fail_writes_touching("lastMessage", StoreError::Rejected("quota".into()));

    alice_view.session.on_input("hello").await;
    alice_view.session.send_text("hello").unwrap();
    alice_view.settle().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    alice_view.settle().await;

    let state = alice_view.session.render();
    assert!(state.last_error.is_none());
    assert_eq!(state.messages().filter(|r| !r.pending).count(), 1);
    assert_eq!(alice_view.session.typing_state(), TypingState::Idle);
    let c1 = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(c1["typing"], json!([]));

    let me = Value::from("alice");
    let retract = world
        .documents
        .writes()
        .into_iter()
        .find(|w| w.path == "chats/c1" && w.removes("typing", &me))
        .unwrap();
    assert!(retract.delta.get("lastMessage").is_none());
}

#[tokio::test(start_paused = true)]
async fn typing_started_before_send_completes_still_expires() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    alice_view.session.on_input("hello").await;
    tokio::time::sleep(Duration::from_millis(2100)).await;
    alice_view.session.send_text("hello").unwrap();
    // Let the send land remotely without applying its completion.
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(world.documents.writes().iter().filter(|w| w.path == "chats/c1").count(), 3);

    alice_view.session.on_input("n").await;
    alice_view.settle().await;
    assert_eq!(alice_view.session.typing_state(), TypingState::Announced);
    let c1 = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(c1["typing"], json!(["alice"]));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    alice_view.settle().await;
    assert_eq!(alice_view.session.typing_state(), TypingState::Idle);
    let c1 = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(c1["typing"], json!([]));
}

#[tokio::test(start_paused = true)]
async fn completions_from_a_previous_user_are_ignored() {
    let world = World::new();
    let mut view = world.session();
    view.open_as(alice(), chat()).await;

    world
        .documents
        .fail_writes_touching("message", StoreError::Unavailable("offline".into()));
    world
        .blobs
        .fail_puts(Some(StoreError::Unavailable("storage down".into())));
    view.session.on_input("bye").await;
    view.session.send_text("bye").unwrap();
    view.session
        .select_file(LocalFile::new("cat.png", &b"png"[..]))
        .unwrap();
    view.session.commit_attachment().unwrap();

    // Both writes fail, but only after the session has changed hands.
    view.session.set_user(Some(bob())).await;
    view.session.on_input("hi alice").await;
    view.settle().await;

    let state = view.session.render();
    assert!(state.last_error.is_none());
    assert_eq!(state.draft, "hi alice");
    assert_eq!(state.messages().count(), 0);
    assert_eq!(state.attachment.status, AttachmentStatus::Idle);
    assert_eq!(world.previews.live_count(), 0);
    assert_eq!(view.session.typing_state(), TypingState::Announced);
    let c1 = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(c1["typing"], json!(["bob"]));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    view.settle().await;
    let c1 = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(c1["typing"], json!([]));
}

#[tokio::test]
async fn image_commit_uploads_and_sets_preview_sentinel() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    alice_view
        .session
        .select_file(LocalFile::new("cat.png", &b"png-bytes"[..]))
        .unwrap();
    let state = alice_view.session.render();
    assert_eq!(state.attachment.status, AttachmentStatus::Previewing);
    assert_eq!(state.attachment.file_name.as_deref(), Some("cat.png"));
    assert!(state.attachment.can_commit);
    assert_eq!(world.previews.live_count(), 1);

    alice_view.session.commit_attachment().unwrap();
    assert!(!alice_view.session.render().attachment.can_commit);
    assert_eq!(
        alice_view.session.commit_attachment(),
        Err(SessionError::UploadInFlight)
    );
    alice_view.settle().await;

    let state = alice_view.session.render();
    assert_eq!(state.attachment.status, AttachmentStatus::Committed);
    assert_eq!(world.previews.live_count(), 0);
    assert_eq!(state.last_message_preview.as_deref(), Some(IMAGE_PREVIEW_TEXT));

    let paths = world.blobs.paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with("chat_media/c1/"));
    assert!(paths[0].ends_with("_cat.png"));

    let rows: Vec<_> = state.messages().collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].content,
        MessageContent::Image {
            url: format!("memory://{}", paths[0])
        }
    );
}

#[tokio::test]
async fn failed_upload_releases_preview_and_reports() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    world
        .blobs
        .fail_puts(Some(StoreError::Unavailable("storage down".into())));
    alice_view
        .session
        .select_file(LocalFile::new("cat.png", &b"png"[..]))
        .unwrap();
    alice_view.session.commit_attachment().unwrap();
    alice_view.settle().await;

    let state = alice_view.session.render();
    assert_eq!(state.attachment.status, AttachmentStatus::Failed);
    assert_eq!(world.previews.live_count(), 0);
    assert!(matches!(
        state.last_error,
        Some(SessionError::Write { op: WriteOp::Upload, .. })
    ));
    assert!(world.documents.writes().is_empty());
}

#[tokio::test]
async fn oversized_attachment_is_rejected_at_selection() {
    let world = World::new();
    let config = duet_sync::SessionConfig {
        max_attachment_size: 4,
        ..Default::default()
    };
    let mut alice_view = world.session_with(config);
    alice_view.open_as(alice(), chat()).await;

    let err = alice_view
        .session
        .select_file(LocalFile::new("big.png", &b"too big"[..]))
        .unwrap_err();
    assert_eq!(err, SessionError::AttachmentTooLarge { size: 7, max: 4 });
    assert_eq!(world.previews.live_count(), 0);
}

#[tokio::test]
async fn presence_failure_leaves_other_slices_working() {
    let world = World::new();
    world
        .presence
        .fail_subscriptions("/status/bob", StoreError::Rejected("denied".into()));
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    alice_view.session.send_text("still works").unwrap();
    alice_view.settle().await;

    let state = alice_view.session.render();
    assert!(matches!(
        state.slice_error(Slice::PeerPresence),
        Some(SessionError::Subscription { slice: Slice::PeerPresence, .. })
    ));
    assert_eq!(state.slice_errors.len(), 1);
    assert_eq!(state.header.display_name.as_deref(), Some("Bob"));
    assert_eq!(state.messages().count(), 1);
}

#[tokio::test]
async fn listener_error_degrades_only_its_slice() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    alice_view.session.send_text("before").unwrap();
    alice_view.settle().await;

    world
        .documents
        .emit_error("chats/c1/messages", StoreError::Unavailable("stream reset".into()));
    alice_view.settle().await;

    let state = alice_view.session.render();
    assert!(state.slice_error(Slice::Messages).is_some());
    assert!(state.slice_error(Slice::Conversation).is_none());
    // Last good snapshot stays on screen.
    assert_eq!(state.messages().count(), 1);
    assert_eq!(state.header.display_name.as_deref(), Some("Bob"));
}

#[tokio::test]
async fn missing_conversation_is_reported() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view
        .open_as(alice(), ConversationId::new("nowhere"))
        .await;

    let state = alice_view.session.render();
    assert!(matches!(
        state.slice_error(Slice::Conversation),
        Some(SessionError::MissingData(_))
    ));
    assert!(state.header.display_name.is_none());
    assert_eq!(state.header.status, DisplayStatus::Offline);
}

#[tokio::test]
async fn switching_conversations_releases_every_listener() {
    let world = World::new();
    world
        .documents
        .insert(
            &paths::conversation(&ConversationId::new("c2")),
            json!({ "users": ["alice", "carol"], "typing": [] }),
        )
        .unwrap();
    world
        .documents
        .insert(
            &paths::user(&UserId::new("carol")),
            json!({ "displayName": "Carol" }),
        )
        .unwrap();

    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    alice_view
        .session
        .select_file(LocalFile::new("cat.png", &b"png"[..]))
        .unwrap();
    alice_view.session.on_input("draft for bob").await;

    alice_view.session.open(ConversationId::new("c2")).await;
    assert_eq!(world.documents.live_listeners("chats/c1"), 0);
    assert_eq!(world.documents.live_listeners("chats/c1/messages"), 0);
    assert_eq!(world.documents.live_listeners("users/bob"), 0);
    assert_eq!(world.presence.live_listeners("/status/bob"), 0);
    assert_eq!(world.previews.live_count(), 0);

    alice_view.settle().await;
    let state = alice_view.session.render();
    assert_eq!(state.conversation, Some(ConversationId::new("c2")));
    assert_eq!(state.header.display_name.as_deref(), Some("Carol"));
    assert_eq!(state.draft, "");
    assert_eq!(state.attachment.status, AttachmentStatus::Idle);
    assert_eq!(world.documents.live_listeners("users/carol"), 1);

    // Leaving c1 retracted the typing indicator there.
    let c1 = world.documents.document(&paths::conversation(&chat())).unwrap();
    assert_eq!(c1["typing"], json!([]));
}

#[tokio::test]
async fn signing_out_detaches_everything() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    assert!(world.documents.total_listeners() > 0);

    alice_view.session.set_user(None).await;
    assert_eq!(world.documents.total_listeners(), 0);
    assert_eq!(world.presence.total_listeners(), 0);
    assert!(alice_view.session.active_slices().is_empty());
    assert_eq!(
        alice_view.session.send_text("anyone?"),
        Err(SessionError::NoCurrentUser)
    );
}

#[tokio::test]
async fn renaming_keeps_listeners_attached() {
    let world = World::new();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;
    let before = world.documents.total_listeners();

    alice_view.session.update_display_name("Ally").await.unwrap();
    assert_eq!(alice_view.session.user().unwrap().display_name, "Ally");
    assert_eq!(world.documents.total_listeners(), before);

    let stored = world
        .documents
        .document(&paths::user(&UserId::new("alice")))
        .unwrap();
    assert_eq!(stored["displayName_lowercase"], json!("ally"));
}

#[tokio::test]
async fn peer_follows_participant_list() {
    let world = World::new();
    world
        .documents
        .insert(&paths::user(&UserId::new("carol")), json!({ "displayName": "Carol" }))
        .unwrap();
    let mut alice_view = world.session();
    alice_view.open_as(alice(), chat()).await;

    world
        .documents
        .update(
            &paths::conversation(&chat()),
            FieldDelta::new().set("users", json!(["alice", "carol"])),
        )
        .await
        .unwrap();
    alice_view.settle().await;

    assert_eq!(world.documents.live_listeners("users/bob"), 0);
    assert_eq!(world.documents.live_listeners("users/carol"), 1);
    assert_eq!(
        alice_view.session.render().header.display_name.as_deref(),
        Some("Carol")
    );
}
