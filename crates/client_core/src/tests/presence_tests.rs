use super::*;
use crate::presence_store::InMemoryPresenceStore;
use anyhow::anyhow;
use async_trait::async_trait;

fn stack() -> (PresenceStack, Arc<InMemoryPresenceStore>) {
    let store = Arc::new(InMemoryPresenceStore::new());
    (PresenceStack::new(UserId(1), store.clone()), store)
}

struct FailingStore;

#[async_trait]
impl PresenceStore for FailingStore {
    async fn read_status(&self, _user_id: UserId) -> anyhow::Result<Option<PresenceStatus>> {
        Err(anyhow!("profile store offline"))
    }

    async fn write_status(&self, _user_id: UserId, _status: PresenceStatus) -> anyhow::Result<()> {
        Err(anyhow!("profile store offline"))
    }
}

#[test]
fn going_offline_remembers_the_status_left_from() {
    let mut record = PresenceRecord::new(PresenceStatus::Dnd);
    assert!(record.apply(PresenceStatus::Offline));
    assert_eq!(record.previous, Some(PresenceStatus::Dnd));
}

#[test]
fn offline_to_offline_keeps_previous() {
    let mut record = PresenceRecord::new(PresenceStatus::Idle);
    record.apply(PresenceStatus::Offline);
    assert!(!record.apply(PresenceStatus::Offline));
    assert_eq!(record.previous, Some(PresenceStatus::Idle));
}

#[test]
fn coming_back_from_offline_keeps_previous() {
    let mut record = PresenceRecord::new(PresenceStatus::Idle);
    record.apply(PresenceStatus::Offline);
    record.apply(PresenceStatus::Online);
    assert_eq!(record.current, PresenceStatus::Online);
    assert_eq!(record.previous, Some(PresenceStatus::Idle));
}

#[test]
fn ordinary_transition_rolls_previous() {
    let mut record = PresenceRecord::new(PresenceStatus::Online);
    record.apply(PresenceStatus::Dnd);
    assert_eq!(record.previous, Some(PresenceStatus::Online));
    record.apply(PresenceStatus::Invisible);
    assert_eq!(record.previous, Some(PresenceStatus::Dnd));
}

#[test]
fn same_status_is_a_no_op() {
    let mut record = PresenceRecord::new(PresenceStatus::Online);
    assert!(!record.apply(PresenceStatus::Online));
    assert_eq!(record.previous, None);
}

#[tokio::test]
async fn restore_law_online_idle_offline_restore() {
    let (stack, store) = stack();
    for status in [
        PresenceStatus::Online,
        PresenceStatus::Idle,
        PresenceStatus::Offline,
    ] {
        stack.set_status(status).await.expect("set status");
    }

    let restored = stack.restore().await.expect("restore");
    assert_eq!(restored, PresenceStatus::Idle);
    assert_eq!(stack.current(), PresenceStatus::Idle);
    assert_eq!(stack.previous(), Some(PresenceStatus::Idle));
    assert_eq!(
        store.read_status(UserId(1)).await.expect("read"),
        Some(PresenceStatus::Idle)
    );
}

#[tokio::test]
async fn restore_survives_multiple_offline_cycles() {
    let (stack, _) = stack();
    stack.set_status(PresenceStatus::Dnd).await.expect("dnd");
    stack.set_status(PresenceStatus::Offline).await.expect("off");
    stack.set_status(PresenceStatus::Online).await.expect("on");
    stack.set_status(PresenceStatus::Offline).await.expect("off again");

    assert_eq!(stack.previous(), Some(PresenceStatus::Dnd));
    assert_eq!(stack.restore().await.expect("restore"), PresenceStatus::Dnd);
}

#[tokio::test]
async fn restore_without_previous_keeps_current() {
    let (stack, store) = stack();
    assert_eq!(stack.restore().await.expect("restore"), PresenceStatus::Online);
    assert!(store.snapshot().await.is_empty());
}

#[tokio::test]
async fn hydrate_adopts_stored_status_without_touching_previous() {
    let store = Arc::new(InMemoryPresenceStore::with_status(
        UserId(1),
        PresenceStatus::Dnd,
    ));
    let stack = PresenceStack::new(UserId(1), store);

    assert_eq!(stack.hydrate().await.expect("hydrate"), PresenceStatus::Dnd);
    assert_eq!(stack.previous(), None);
}

#[tokio::test]
async fn persist_failure_is_reported_but_transition_stands() {
    let stack = PresenceStack::new(UserId(1), Arc::new(FailingStore));
    let err = stack
        .set_status(PresenceStatus::Idle)
        .await
        .expect_err("store should fail");
    assert!(matches!(err, PresenceError::Persist { user_id: 1, .. }));
    assert_eq!(stack.current(), PresenceStatus::Idle);
    assert_eq!(stack.previous(), Some(PresenceStatus::Online));
}

#[tokio::test]
async fn apply_remote_updates_observers_without_persisting() {
    let (stack, store) = stack();
    let mut rx = stack.subscribe();

    assert!(stack.apply_remote(PresenceStatus::Dnd));
    rx.changed().await.expect("changed");
    assert_eq!(rx.borrow().current, PresenceStatus::Dnd);
    assert!(store.snapshot().await.is_empty());

    assert!(!stack.apply_remote(PresenceStatus::Dnd));
}

#[test]
fn custom_message_is_kept_across_status_changes() {
    let (stack, _) = stack();
    stack.set_custom_message(Some("heads down".into()));
    stack.apply_remote(PresenceStatus::Dnd);
    assert_eq!(stack.record().custom_message.as_deref(), Some("heads down"));
}
