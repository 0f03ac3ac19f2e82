use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn unknown_user_has_no_presence() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let status = storage.read_status(UserId(404)).await.expect("read");
    assert_eq!(status, None);
}

#[tokio::test]
async fn write_status_overwrites_previous_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .write_status(UserId(1), PresenceStatus::Idle)
        .await
        .expect("first write");
    storage
        .write_status(UserId(1), PresenceStatus::Dnd)
        .await
        .expect("second write");

    let status = storage.read_status(UserId(1)).await.expect("read");
    assert_eq!(status, Some(PresenceStatus::Dnd));
}

#[tokio::test]
async fn write_status_keeps_custom_message() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .write_presence(UserId(5), PresenceStatus::Online, Some("in a meeting"))
        .await
        .expect("presence write");
    storage
        .write_status(UserId(5), PresenceStatus::Idle)
        .await
        .expect("status write");

    let presence = storage
        .read_presence(UserId(5))
        .await
        .expect("read")
        .expect("present");
    assert_eq!(presence.status, PresenceStatus::Idle);
    assert_eq!(presence.custom_message.as_deref(), Some("in a meeting"));
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage
        .write_status(UserId(2), PresenceStatus::Invisible)
        .await
        .expect("write");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    let reopened = Storage::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.read_status(UserId(2)).await.expect("read"),
        Some(PresenceStatus::Invisible)
    );
}

#[test]
fn memory_url_has_no_sqlite_path() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/presence.db?mode=rwc"),
        Some(PathBuf::from("./data/presence.db"))
    );
}
