use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use client_core::{
    CallClient, CallClientDependencies, CallEvent, ClientSettings, EndReason,
    InMemoryPresenceStore, LocalIdentity, MemoryHub, TokenProvider, TokenRequest,
};
use livekit_integration::{MediaConnectOptions, MediaEngine, MediaEvent, TrackSource};
use shared::domain::{CallKind, ConversationId, PresenceStatus, UserId};
use tokio::sync::broadcast;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const ROOM: ConversationId = ConversationId(77);

struct SilentEngine {
    events: broadcast::Sender<MediaEvent>,
}

#[async_trait]
impl MediaEngine for SilentEngine {
    async fn connect(&self, _options: MediaConnectOptions) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn set_track_enabled(&self, _source: TrackSource, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

struct EchoTokens;

#[async_trait]
impl TokenProvider for EchoTokens {
    async fn fetch_token(&self, request: &TokenRequest) -> Result<String> {
        Ok(format!("{}@{}", request.identity, request.room))
    }
}

async fn client(hub: &Arc<MemoryHub>, user_id: UserId, name: &str) -> Arc<CallClient> {
    let (events, _) = broadcast::channel(16);
    let client = CallClient::new(
        LocalIdentity::new(user_id, name),
        &ClientSettings::default(),
        CallClientDependencies {
            transport: hub.connect().await,
            tokens: Arc::new(EchoTokens),
            engine: Arc::new(SilentEngine { events }),
            presence_store: Arc::new(InMemoryPresenceStore::new()),
        },
    );
    client.start().await;
    client
}

async fn next(events: &mut broadcast::Receiver<CallEvent>) -> CallEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out")
        .expect("closed")
}

#[tokio::test(start_paused = true)]
async fn do_not_disturb_then_restore_then_answer() {
    let hub = MemoryHub::new();
    let alice = client(&hub, ALICE, "alice").await;
    let bob = client(&hub, BOB, "bob").await;
    let mut alice_events = alice.subscribe_call_events();
    let mut bob_events = bob.subscribe_call_events();

    bob.set_status(PresenceStatus::Dnd).await.expect("dnd");
    alice
        .start_call(ROOM, CallKind::Voice, vec![BOB])
        .await
        .expect("first call");
    next(&mut alice_events).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), bob_events.recv())
            .await
            .is_err(),
        "dnd must not ring"
    );
    alice.hang_up(ROOM).await.expect("give up");
    assert_eq!(
        next(&mut alice_events).await,
        CallEvent::Ended {
            conversation_id: ROOM,
            reason: EndReason::LocalHangUp
        }
    );

    assert_eq!(bob.restore_status().await.expect("restore"), PresenceStatus::Online);
    tokio::time::advance(Duration::from_secs(3)).await;

    alice
        .start_call(ROOM, CallKind::Voice, vec![BOB])
        .await
        .expect("second call");
    next(&mut alice_events).await;
    let CallEvent::Ringing(invite) = next(&mut bob_events).await else {
        panic!("bob should ring once available again");
    };
    assert_eq!(invite.caller_name, "alice");

    bob.accept_call(ROOM, true, false).await.expect("accept");
    assert_eq!(
        next(&mut alice_events).await,
        CallEvent::ParticipantAccepted {
            conversation_id: ROOM,
            user_id: BOB
        }
    );
    assert_eq!(alice.sessions().active_conversation(), Some(ROOM));
    assert_eq!(bob.sessions().active_conversation(), Some(ROOM));
}
