use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::{PresenceStatus, UserId},
    error::{ApiError, ApiException},
    protocol::{PresenceRecordPayload, WritePresenceRequest},
};
use storage::Storage;
use tokio::sync::Mutex;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn read_status(&self, user_id: UserId) -> Result<Option<PresenceStatus>>;
    async fn write_status(&self, user_id: UserId, status: PresenceStatus) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryPresenceStore {
    statuses: Mutex<HashMap<UserId, PresenceStatus>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(user_id: UserId, status: PresenceStatus) -> Self {
        Self {
            statuses: Mutex::new(HashMap::from([(user_id, status)])),
        }
    }

    pub async fn snapshot(&self) -> HashMap<UserId, PresenceStatus> {
        self.statuses.lock().await.clone()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn read_status(&self, user_id: UserId) -> Result<Option<PresenceStatus>> {
        Ok(self.statuses.lock().await.get(&user_id).copied())
    }

    async fn write_status(&self, user_id: UserId, status: PresenceStatus) -> Result<()> {
        self.statuses.lock().await.insert(user_id, status);
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for Storage {
    async fn read_status(&self, user_id: UserId) -> Result<Option<PresenceStatus>> {
        Storage::read_status(self, user_id).await
    }

    async fn write_status(&self, user_id: UserId, status: PresenceStatus) -> Result<()> {
        Storage::write_status(self, user_id, status).await
    }
}

pub struct HttpPresenceStore {
    http: Client,
    server_url: String,
}

impl HttpPresenceStore {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn presence_url(&self, user_id: UserId) -> String {
        format!("{}/presence/{}", self.server_url, user_id.0)
    }
}

#[async_trait]
impl PresenceStore for HttpPresenceStore {
    async fn read_status(&self, user_id: UserId) -> Result<Option<PresenceStatus>> {
        let res = self
            .http
            .get(self.presence_url(user_id))
            .send()
            .await
            .with_context(|| format!("failed to reach presence store for user {}", user_id.0))?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: PresenceRecordPayload = api_response(res).await?.json().await?;
        Ok(Some(record.status))
    }

    async fn write_status(&self, user_id: UserId, status: PresenceStatus) -> Result<()> {
        let res = self
            .http
            .put(self.presence_url(user_id))
            .json(&WritePresenceRequest {
                status,
                custom_message: None,
            })
            .send()
            .await
            .with_context(|| format!("failed to reach presence store for user {}", user_id.0))?;
        api_response(res).await?;
        Ok(())
    }
}

pub(crate) async fn api_response(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    match res.json::<ApiError>().await {
        Ok(body) => Err(ApiException::from(body).into()),
        Err(_) => Err(anyhow!("server answered {status}")),
    }
}
