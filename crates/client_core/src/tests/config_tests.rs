use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_match_documented_windows() {
    let settings = ClientSettings::default();
    assert_eq!(settings.dedup_window(), Duration::from_secs(2));
    assert_eq!(settings.token_timeout(), Duration::from_secs(8));
    assert_eq!(settings.ring_timeout(), Duration::from_secs(45));
}

#[test]
fn app_prefixed_env_wins_over_alias() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        lookup_from(&[
            ("SERVER_URL", "http://alias:1"),
            ("APP__SERVER_URL", "http://app:2"),
            ("APP__TOKEN_TIMEOUT_SECS", "5"),
        ]),
    );
    assert_eq!(settings.server_url, "http://app:2");
    assert_eq!(settings.token_timeout_secs, 5);
}

#[test]
fn non_numeric_override_is_ignored() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        lookup_from(&[("APP__DEDUP_WINDOW_MS", "soon")]),
    );
    assert_eq!(settings.dedup_window_ms, 2_000);
}

#[test]
fn partial_file_keeps_defaults_for_missing_keys() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("call_core_client_settings_{suffix}.toml"));
    fs::write(&path, "server_url = \"http://file:9\"\nring_timeout_secs = 10\n").expect("write");

    let parsed: ClientSettings =
        toml::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    assert_eq!(parsed.server_url, "http://file:9");
    assert_eq!(parsed.ring_timeout_secs, 10);
    assert_eq!(parsed.dedup_window_ms, 2_000);

    fs::remove_file(path).expect("cleanup");
}
