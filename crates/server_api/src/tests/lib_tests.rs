use super::*;
use shared::domain::PresenceStatus;

async fn setup() -> ApiContext {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    ApiContext {
        storage,
        livekit: LiveKitConfig {
            api_key: "k".into(),
            api_secret: "s".into(),
            ttl_seconds: 60,
        },
    }
}

#[tokio::test]
async fn token_requires_room_and_identity() {
    let ctx = setup().await;

    let err = issue_token(&ctx, "  ", "user:1", None).expect_err("missing room");
    assert_eq!(err.code, ErrorCode::Validation);
    let err = issue_token(&ctx, "conversation:4", "", None).expect_err("missing identity");
    assert_eq!(err.code, ErrorCode::Validation);

    let issued = issue_token(&ctx, "conversation:4", "user:1", Some("https://a/b.png"))
        .expect("token");
    assert_eq!(issued.token.split('.').count(), 3);
}

#[tokio::test]
async fn unknown_user_has_no_presence() {
    let ctx = setup().await;
    let err = read_presence(&ctx, UserId(9)).await.expect_err("absent");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn written_presence_reads_back_with_trimmed_message() {
    let ctx = setup().await;
    let written = write_presence(
        &ctx,
        UserId(3),
        WritePresenceRequest {
            status: PresenceStatus::Dnd,
            custom_message: Some("  focusing  ".into()),
        },
    )
    .await
    .expect("write");
    assert_eq!(written.custom_message.as_deref(), Some("focusing"));

    let read = read_presence(&ctx, UserId(3)).await.expect("read");
    assert_eq!(read.status, PresenceStatus::Dnd);
    assert_eq!(read.custom_message.as_deref(), Some("focusing"));
}

#[tokio::test]
async fn oversized_custom_message_is_rejected() {
    let ctx = setup().await;
    let err = write_presence(
        &ctx,
        UserId(3),
        WritePresenceRequest {
            status: PresenceStatus::Online,
            custom_message: Some("x".repeat(MAX_CUSTOM_MESSAGE_CHARS + 1)),
        },
    )
    .await
    .expect_err("too long");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(read_presence(&ctx, UserId(3)).await.is_err());
}

#[tokio::test]
async fn status_only_write_keeps_the_custom_message() {
    let ctx = setup().await;
    write_presence(
        &ctx,
        UserId(5),
        WritePresenceRequest {
            status: PresenceStatus::Online,
            custom_message: Some("on call duty".into()),
        },
    )
    .await
    .expect("write");

    let record = write_presence(
        &ctx,
        UserId(5),
        WritePresenceRequest {
            status: PresenceStatus::Idle,
            custom_message: None,
        },
    )
    .await
    .expect("status only");
    assert_eq!(record.status, PresenceStatus::Idle);
    assert_eq!(record.custom_message.as_deref(), Some("on call duty"));

    let cleared = write_presence(
        &ctx,
        UserId(5),
        WritePresenceRequest {
            status: PresenceStatus::Idle,
            custom_message: Some("   ".into()),
        },
    )
    .await
    .expect("clear");
    assert_eq!(cleared.custom_message, None);
}
