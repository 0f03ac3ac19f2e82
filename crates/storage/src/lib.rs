use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{PresenceStatus, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPresence {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub custom_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn read_presence(&self, user_id: UserId) -> Result<Option<StoredPresence>> {
        let row = sqlx::query(
            "SELECT status, custom_message, updated_at FROM presence WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read presence for user {}", user_id.0))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_status: String = row.try_get("status")?;
        let status = PresenceStatus::parse(&raw_status)
            .ok_or_else(|| anyhow!("unknown presence status '{raw_status}' for user {}", user_id.0))?;

        Ok(Some(StoredPresence {
            user_id,
            status,
            custom_message: row.try_get("custom_message")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    pub async fn read_status(&self, user_id: UserId) -> Result<Option<PresenceStatus>> {
        Ok(self
            .read_presence(user_id)
            .await?
            .map(|presence| presence.status))
    }

    /// Upserts the status and keeps any previously stored custom message.
    pub async fn write_status(&self, user_id: UserId, status: PresenceStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO presence (user_id, status, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET status=excluded.status, updated_at=excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write presence for user {}", user_id.0))?;
        Ok(())
    }

    pub async fn write_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        custom_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO presence (user_id, status, custom_message, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                status=excluded.status,
                custom_message=excluded.custom_message,
                updated_at=excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(status.as_str())
        .bind(custom_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write presence for user {}", user_id.0))?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
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
    })?;

    Ok(())
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
#[path = "tests/lib_tests.rs"]
mod tests;
