use super::{apply_env_overrides, apply_file_overrides, normalize_database_url, prepare_database_url, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}

#[test]
fn app_prefixed_env_wins_over_legacy_names() {
    let env: HashMap<&str, &str> = [
        ("SERVER_BIND", "0.0.0.0:1"),
        ("APP__BIND_ADDR", "0.0.0.0:2"),
        ("LIVEKIT_API_SECRET", "s3cret"),
        ("APP__LIVEKIT_TTL_SECONDS", "not-a-number"),
        ("APP__RELAY_BUFFER", "0"),
    ]
    .into_iter()
    .collect();

    let mut settings = Settings::default();
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_bind, "0.0.0.0:2");
    assert_eq!(settings.livekit_api_secret, "s3cret");
    assert_eq!(settings.livekit_ttl_seconds, 3600);
    assert_eq!(settings.relay_buffer, 1);
}

#[test]
fn settings_file_overrides_known_keys() {
    let mut settings = Settings::default();
    apply_file_overrides(
        &mut settings,
        r#"
bind_addr = "127.0.0.1:9000"
livekit_url = "wss://media.example"
livekit_ttl_seconds = 120
unknown = true
"#,
    );

    assert_eq!(settings.server_bind, "127.0.0.1:9000");
    assert_eq!(settings.livekit_url.as_deref(), Some("wss://media.example"));
    assert_eq!(settings.livekit_ttl_seconds, 120);
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("call_relay_open_test_{suffix}"));
    let db_path = temp_root.join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}
