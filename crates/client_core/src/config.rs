use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: String,
    pub token_timeout_secs: u64,
    pub dedup_window_ms: u64,
    pub ring_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            token_timeout_secs: 8,
            dedup_window_ms: 2_000,
            ring_timeout_secs: 45,
            reconnect_delay_ms: 500,
            reconnect_max_delay_ms: 15_000,
        }
    }
}

impl ClientSettings {
    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new("client.toml"))
}

pub fn load_settings_from(path: &Path) -> ClientSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<ClientSettings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config: ignoring malformed client settings file");
                ClientSettings::default()
            }
        },
        Err(_) => ClientSettings::default(),
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Later keys in each list win, so `APP__*` overrides the short alias.
pub fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    let last = |keys: &[&str]| keys.iter().filter_map(|key| lookup(key)).last();

    if let Some(v) = last(&["SERVER_URL", "APP__SERVER_URL"]) {
        settings.server_url = v;
    }

    let numeric = |keys: &[&str], slot: &mut u64| {
        if let Some(v) = last(keys) {
            match v.trim().parse::<u64>() {
                Ok(parsed) => *slot = parsed,
                Err(_) => warn!(keys = ?keys, value = %v, "config: ignoring non-numeric override"),
            }
        }
    };

    numeric(&["APP__TOKEN_TIMEOUT_SECS"], &mut settings.token_timeout_secs);
    numeric(&["APP__DEDUP_WINDOW_MS"], &mut settings.dedup_window_ms);
    numeric(&["APP__RING_TIMEOUT_SECS"], &mut settings.ring_timeout_secs);
    numeric(&["APP__RECONNECT_DELAY_MS"], &mut settings.reconnect_delay_ms);
    numeric(
        &["APP__RECONNECT_MAX_DELAY_MS"],
        &mut settings.reconnect_max_delay_ms,
    );
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
