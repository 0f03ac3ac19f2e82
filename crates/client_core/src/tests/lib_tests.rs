use super::*;
use crate::test_support::{RecordingEngine, StaticTokens};
use std::time::Duration;
use tokio_stream::StreamExt;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const ROOM: ConversationId = ConversationId(5);

fn settings() -> ClientSettings {
    ClientSettings {
        ring_timeout_secs: 30,
        ..ClientSettings::default()
    }
}

async fn client(
    hub: &Arc<MemoryHub>,
    user_id: UserId,
    name: &str,
    store: Arc<InMemoryPresenceStore>,
) -> Arc<CallClient> {
    let client = CallClient::new(
        LocalIdentity::new(user_id, name),
        &settings(),
        CallClientDependencies {
            transport: hub.connect().await,
            tokens: Arc::new(StaticTokens::instant()),
            engine: RecordingEngine::new(),
            presence_store: store,
        },
    );
    client.start().await;
    client
}

#[tokio::test]
async fn start_hydrates_presence_from_the_store() {
    let hub = MemoryHub::new();
    let store = Arc::new(InMemoryPresenceStore::with_status(ALICE, PresenceStatus::Idle));
    let alice = client(&hub, ALICE, "alice", store).await;

    assert_eq!(alice.presence().current(), PresenceStatus::Idle);
    assert_eq!(alice.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn status_changes_reach_the_users_other_devices() {
    let hub = MemoryHub::new();
    let store = Arc::new(InMemoryPresenceStore::new());
    let laptop = client(&hub, ALICE, "alice", store.clone()).await;
    let phone = client(&hub, ALICE, "alice", store.clone()).await;
    let mut phone_presence = phone.presence().subscribe();

    laptop.set_status(PresenceStatus::Dnd).await.expect("dnd");
    phone_presence
        .wait_for(|record| record.current == PresenceStatus::Dnd)
        .await
        .expect("phone follows");
    assert_eq!(phone.presence().previous(), Some(PresenceStatus::Online));

    laptop.restore_status().await.expect("restore");
    phone_presence
        .wait_for(|record| record.current == PresenceStatus::Online)
        .await
        .expect("phone restores");
    assert_eq!(
        store.read_status(ALICE).await.expect("read"),
        Some(PresenceStatus::Online)
    );
}

#[tokio::test]
async fn other_users_presence_is_not_adopted() {
    let hub = MemoryHub::new();
    let alice = client(&hub, ALICE, "alice", Arc::new(InMemoryPresenceStore::new())).await;
    let bob = client(&hub, BOB, "bob", Arc::new(InMemoryPresenceStore::new())).await;
    let mut alice_presence = alice.presence().subscribe();

    bob.set_status(PresenceStatus::Dnd).await.expect("dnd");

    assert!(
        tokio::time::timeout(Duration::from_millis(100), alice_presence.changed())
            .await
            .is_err()
    );
    assert_eq!(alice.presence().current(), PresenceStatus::Online);
}

#[tokio::test]
async fn a_call_round_trip_through_the_client_api() {
    let hub = MemoryHub::new();
    let alice = client(&hub, ALICE, "alice", Arc::new(InMemoryPresenceStore::new())).await;
    let bob = client(&hub, BOB, "bob", Arc::new(InMemoryPresenceStore::new())).await;
    let mut bob_events = bob.subscribe_call_events();
    let mut bob_sessions = bob.session_updates();
    assert_eq!(
        bob_sessions.next().await.expect("initial").phase,
        SessionPhase::Idle
    );

    alice
        .start_call(ROOM, CallKind::Voice, vec![BOB])
        .await
        .expect("start call");
    let CallEvent::Ringing(invite) = bob_events.recv().await.expect("ring") else {
        panic!("expected ring");
    };
    assert_eq!(invite.conversation_id, ROOM);

    bob.accept_call(ROOM, true, false).await.expect("accept");
    let connected = loop {
        let state = bob_sessions.next().await.expect("session update");
        if state.phase == SessionPhase::Connected {
            break state;
        }
    };
    assert_eq!(connected.active_conversation(), Some(ROOM));

    bob.set_microphone(false).await.expect("mute");
    assert!(!bob.sessions().state().session.expect("session").mic_enabled);

    bob.hang_up(ROOM).await.expect("hang up");
    assert_eq!(bob.sessions().state(), SessionState::idle());
}

#[tokio::test]
async fn shutdown_leaves_the_active_session() {
    let hub = MemoryHub::new();
    let alice = client(&hub, ALICE, "alice", Arc::new(InMemoryPresenceStore::new())).await;
    alice
        .start_call(ROOM, CallKind::Video, vec![BOB])
        .await
        .expect("start call");

    alice.shutdown().await;

    assert_eq!(alice.sessions().state(), SessionState::idle());
}

#[tokio::test]
async fn watching_a_conversation_rings_members_not_named_in_the_invite() {
    let hub = MemoryHub::new();
    let alice = client(&hub, ALICE, "alice", Arc::new(InMemoryPresenceStore::new())).await;
    let carol = client(&hub, UserId(3), "carol", Arc::new(InMemoryPresenceStore::new())).await;
    carol.watch_conversation(ROOM).await.expect("watch");
    let mut carol_events = carol.subscribe_call_events();

    alice
        .start_call(ROOM, CallKind::Video, vec![BOB])
        .await
        .expect("start call");

    let CallEvent::Ringing(invite) = carol_events.recv().await.expect("ring") else {
        panic!("expected ring");
    };
    assert_eq!(invite.caller_id, ALICE);

    alice.hang_up(ROOM).await.expect("hang up");
    assert_eq!(
        carol_events.recv().await.expect("ended"),
        CallEvent::Ended {
            conversation_id: ROOM,
            reason: EndReason::RemoteEnded
        }
    );
    carol.unwatch_conversation(ROOM).await;
}
