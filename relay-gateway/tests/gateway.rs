//! End-to-end gateway behavior over an in-process bus.
//!
//! Two `Gateway` instances sharing one `LocalBus` stand in for two
//! front-end processes sharing a broker: cross-process delivery, sender
//! echo suppression, rate limiting, disconnect cleanup, and the
//! publish-only nature of typing indicators.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_events::{ChatEvent, LocalBus, PresenceStatus};
use relay_gateway::{Gateway, GatewayError, AUTH_RATE_PREFIX, CHAT_RATE_PREFIX};
use relay_limit::{InMemoryCounterStore, RateGovernor};
use relay_persist::{MemoryRelayStore, PersistenceQueue, QueueConfig};
use relay_presence::{InMemoryPresenceStore, PresenceStore};

struct Proc {
    gateway: Arc<Gateway>,
    store: Arc<MemoryRelayStore>,
    presence: Arc<InMemoryPresenceStore>,
    _cancel: tokio_util::sync::DropGuard,
}

/// One simulated front-end process with its own queue, store, and
/// governor, attached to the shared bus.
fn spawn_proc(bus: &LocalBus, chat_limit: u64) -> Proc {
    let store = Arc::new(MemoryRelayStore::new());
    let presence = Arc::new(InMemoryPresenceStore::new());
    let (queue, _handle) = PersistenceQueue::start(
        store.clone(),
        QueueConfig {
            workers: 1,
            ..QueueConfig::default()
        },
    );
    let counters: Arc<InMemoryCounterStore> = Arc::new(InMemoryCounterStore::new());
    let chat_governor = RateGovernor::new(counters.clone(), CHAT_RATE_PREFIX, chat_limit, 60);
    let auth_governor = RateGovernor::new(counters, AUTH_RATE_PREFIX, 3, 60);
    let gateway = Arc::new(Gateway::new(
        Arc::new(bus.clone()),
        presence.clone(),
        queue,
        chat_governor,
        auth_governor,
    ));
    let cancel = CancellationToken::new();
    gateway.spawn_listeners(cancel.clone());
    Proc {
        gateway,
        store,
        presence,
        _cancel: cancel.drop_guard(),
    }
}

/// Let listener subscriptions attach before publishing anything.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn recv(rx: &mut mpsc::Receiver<ChatEvent>) -> Option<ChatEvent> {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .ok()
        .flatten()
}

fn drain(rx: &mut mpsc::Receiver<ChatEvent>) {
    while rx.try_recv().is_ok() {}
}

#[tokio::test]
async fn message_crosses_processes_without_echoing_to_sender() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, mut alice_rx) = a.gateway.open("alice");
    let (bob, mut bob_rx) = b.gateway.open("bob");
    a.gateway.join_room(alice, "lobby").await.unwrap();
    b.gateway.join_room(bob, "lobby").await.unwrap();
    settle().await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    a.gateway
        .send_message(alice, "lobby", "hi there", "c1")
        .await
        .unwrap();

    match recv(&mut bob_rx).await {
        Some(ChatEvent::MessageSent {
            room,
            sender,
            content,
            client_msg_id,
            ..
        }) => {
            assert_eq!(room, "lobby");
            assert_eq!(sender, "alice");
            assert_eq!(content, "hi there");
            assert_eq!(client_msg_id, "c1");
        }
        other => panic!("bob expected the message, got {other:?}"),
    }
    // The sender's own socket never hears the echo.
    assert_eq!(recv(&mut alice_rx).await, None);
}

#[tokio::test]
async fn senders_other_local_sockets_still_receive() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    settle().await;

    let (phone, mut phone_rx) = a.gateway.open("alice");
    let (laptop, mut laptop_rx) = a.gateway.open("alice");
    a.gateway.join_room(phone, "lobby").await.unwrap();
    a.gateway.join_room(laptop, "lobby").await.unwrap();
    settle().await;
    drain(&mut phone_rx);
    drain(&mut laptop_rx);

    a.gateway
        .send_message(phone, "lobby", "from the phone", "c1")
        .await
        .unwrap();

    assert!(matches!(
        recv(&mut laptop_rx).await,
        Some(ChatEvent::MessageSent { content, .. }) if content == "from the phone"
    ));
    assert_eq!(recv(&mut phone_rx).await, None);
}

#[tokio::test]
async fn sends_beyond_the_limit_are_rejected_with_retry_after() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 2);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    a.gateway.join_room(alice, "lobby").await.unwrap();

    a.gateway
        .send_message(alice, "lobby", "one", "c1")
        .await
        .unwrap();
    a.gateway
        .send_message(alice, "lobby", "two", "c2")
        .await
        .unwrap();
    match a.gateway.send_message(alice, "lobby", "three", "c3").await {
        Err(GatewayError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs >= 1);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn auth_attempts_burn_their_own_window() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);

    // spawn_proc allows 3 auth attempts per window.
    for _ in 0..3 {
        a.gateway.admit_auth("mallory").await.unwrap();
    }
    assert!(matches!(
        a.gateway.admit_auth("mallory").await,
        Err(GatewayError::RateLimited { .. })
    ));
    // Other identities are unaffected.
    a.gateway.admit_auth("alice").await.unwrap();
}

#[tokio::test]
async fn sending_to_a_room_not_joined_is_a_validation_error() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    let err = a
        .gateway
        .send_message(alice, "lobby", "hello?", "c1")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));

    // Blank content is rejected before any membership check.
    a.gateway.join_room(alice, "lobby").await.unwrap();
    let err = a
        .gateway
        .send_message(alice, "lobby", "   ", "c2")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));

    // Nothing was published or persisted for the rejected sends.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.store.messages().is_empty());
}

#[tokio::test]
async fn disconnect_leaves_every_room_and_notifies_members() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, mut alice_rx) = a.gateway.open("alice");
    let (bob, mut bob_rx) = b.gateway.open("bob");
    a.gateway.join_room(alice, "general").await.unwrap();
    a.gateway.join_room(alice, "random").await.unwrap();
    b.gateway.join_room(bob, "general").await.unwrap();
    settle().await;
    drain(&mut bob_rx);

    a.gateway.disconnect(alice).await;
    settle().await;

    assert!(matches!(
        recv(&mut bob_rx).await,
        Some(ChatEvent::UserLeft { room, user }) if room == "general" && user == "alice"
    ));

    // Membership removals reached the originating process's store.
    assert_eq!(a.store.member_count("general"), 0);
    assert_eq!(a.store.member_count("random"), 0);

    // Messages sent afterwards no longer reach the dead socket.
    b.gateway
        .send_message(bob, "general", "anyone?", "c1")
        .await
        .unwrap();
    assert_eq!(recv(&mut alice_rx).await, None);

    // A second disconnect is a no-op.
    a.gateway.disconnect(alice).await;
}

#[tokio::test]
async fn rooms_with_no_local_members_drop_events_silently() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    // Bob is connected on B but never joins the room.
    let (_bob, mut bob_rx) = b.gateway.open("bob");
    a.gateway.join_room(alice, "lobby").await.unwrap();
    settle().await;
    drain(&mut bob_rx);

    a.gateway
        .send_message(alice, "lobby", "into the void", "c1")
        .await
        .unwrap();
    assert_eq!(recv(&mut bob_rx).await, None);
}

#[tokio::test]
async fn typing_fans_out_but_is_never_persisted() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    let (bob, mut bob_rx) = b.gateway.open("bob");
    a.gateway.join_room(alice, "lobby").await.unwrap();
    b.gateway.join_room(bob, "lobby").await.unwrap();
    settle().await;
    drain(&mut bob_rx);

    a.gateway.typing(alice, "lobby", true).await.unwrap();

    assert!(matches!(
        recv(&mut bob_rx).await,
        Some(ChatEvent::TypingChanged { user, is_typing: true, .. }) if user == "alice"
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.store.messages().is_empty());
}

#[tokio::test]
async fn presence_reaches_every_connection_regardless_of_rooms() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, mut alice_rx) = a.gateway.open("alice");
    // Bob shares no rooms with Alice.
    let (_bob, mut bob_rx) = b.gateway.open("bob");
    settle().await;

    a.gateway
        .update_presence(alice, PresenceStatus::Online)
        .await
        .unwrap();

    // Presence is global: both sockets hear it, the originator included.
    assert!(matches!(
        recv(&mut bob_rx).await,
        Some(ChatEvent::PresenceChanged { user_id, status: PresenceStatus::Online })
            if user_id == "alice"
    ));
    assert!(matches!(
        recv(&mut alice_rx).await,
        Some(ChatEvent::PresenceChanged { user_id, .. }) if user_id == "alice"
    ));

    assert_eq!(
        a.presence.get("alice").await.unwrap(),
        Some(PresenceStatus::Online)
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.store.user_status("alice"), Some("online".to_string()));
}

#[tokio::test]
async fn joining_twice_keeps_a_single_membership() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    let (bob, mut bob_rx) = b.gateway.open("bob");
    a.gateway.join_room(alice, "lobby").await.unwrap();
    a.gateway.join_room(alice, "lobby").await.unwrap();
    b.gateway.join_room(bob, "lobby").await.unwrap();
    settle().await;
    drain(&mut bob_rx);

    b.gateway
        .send_message(bob, "lobby", "hello alice", "c1")
        .await
        .unwrap();

    // The queue on A saw two EnterRoom tasks; membership stays single.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a.store.member_count("lobby"), 1);
}

#[tokio::test]
async fn leaving_a_room_never_joined_is_a_noop() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    let (bob, mut bob_rx) = b.gateway.open("bob");
    b.gateway.join_room(bob, "lobby").await.unwrap();
    settle().await;
    drain(&mut bob_rx);

    a.gateway.leave_room(alice, "lobby").await.unwrap();
    // No UserLeft is published for a membership that never existed.
    assert_eq!(recv(&mut bob_rx).await, None);
}

#[tokio::test]
async fn edits_and_deletes_fan_out_and_persist() {
    let bus = LocalBus::default();
    let a = spawn_proc(&bus, 100);
    let b = spawn_proc(&bus, 100);
    settle().await;

    let (alice, _alice_rx) = a.gateway.open("alice");
    let (bob, mut bob_rx) = b.gateway.open("bob");
    a.gateway.join_room(alice, "lobby").await.unwrap();
    b.gateway.join_room(bob, "lobby").await.unwrap();
    settle().await;
    drain(&mut bob_rx);

    a.gateway
        .send_message(alice, "lobby", "first draft", "c1")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let id = a.store.messages()[0].id;

    a.gateway
        .edit_message(alice, "lobby", id, "final draft")
        .await
        .unwrap();
    a.gateway.delete_message(alice, "lobby", id).await.unwrap();

    // The three events travel on separate channels, so cross-channel
    // arrival order is not guaranteed.
    let mut saw_sent = false;
    let mut saw_edited = false;
    let mut saw_deleted = false;
    for _ in 0..3 {
        match recv(&mut bob_rx).await {
            Some(ChatEvent::MessageSent { .. }) => saw_sent = true,
            Some(ChatEvent::MessageEdited {
                message_id,
                new_content,
                ..
            }) => {
                assert_eq!(message_id, id);
                assert_eq!(new_content, "final draft");
                saw_edited = true;
            }
            Some(ChatEvent::MessageDeleted { message_id, .. }) => {
                assert_eq!(message_id, id);
                saw_deleted = true;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_sent && saw_edited && saw_deleted);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let row = &a.store.messages()[0];
    assert_eq!(row.content, "final draft");
    assert!(row.deleted);
}
