use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub livekit_api_key: String,
    pub livekit_api_secret: String,
    pub livekit_url: Option<String>,
    pub livekit_ttl_seconds: i64,
    /// Capacity of the relay fan-out channel; slow sockets past it drop frames.
    pub relay_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/server.db".into(),
            livekit_api_key: "devkey".into(),
            livekit_api_secret: "devsecret".into(),
            livekit_url: None,
            livekit_ttl_seconds: 3600,
            relay_buffer: 1024,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let text = |key: &str| file_cfg.get(key).and_then(|v| v.as_str()).map(str::to_string);

    if let Some(v) = text("bind_addr") {
        settings.server_bind = v;
    }
    if let Some(v) = text("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = text("livekit_url") {
        settings.livekit_url = Some(v);
    }
    if let Some(v) = file_cfg.get("livekit_ttl_seconds").and_then(|v| v.as_integer()) {
        settings.livekit_ttl_seconds = v;
    }
    if let Some(v) = file_cfg
        .get("relay_buffer")
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.relay_buffer = v;
    }
}

/// Legacy names first so the `APP__` form wins when both are set.
pub(crate) fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = lookup(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = lookup(key) {
            settings.database_url = v;
        }
    }
    for key in ["LIVEKIT_API_KEY", "APP__LIVEKIT_API_KEY"] {
        if let Some(v) = lookup(key) {
            settings.livekit_api_key = v;
        }
    }
    for key in ["LIVEKIT_API_SECRET", "APP__LIVEKIT_API_SECRET"] {
        if let Some(v) = lookup(key) {
            settings.livekit_api_secret = v;
        }
    }
    for key in ["LIVEKIT_URL", "APP__LIVEKIT_URL"] {
        if let Some(v) = lookup(key) {
            settings.livekit_url = Some(v);
        }
    }
    if let Some(parsed) = lookup("APP__LIVEKIT_TTL_SECONDS").and_then(|v| v.parse::<i64>().ok()) {
        settings.livekit_ttl_seconds = parsed;
    }
    if let Some(parsed) = lookup("APP__RELAY_BUFFER").and_then(|v| v.parse::<usize>().ok()) {
        settings.relay_buffer = parsed.max(1);
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

pub(crate) fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
