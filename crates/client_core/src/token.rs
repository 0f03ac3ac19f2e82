use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::TokenResponse;

use crate::presence_store::api_response;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub room: String,
    pub identity: String,
    pub avatar: Option<String>,
}

/// Issues the short-lived credential a media room requires to join.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, request: &TokenRequest) -> Result<String>;
}

pub struct MissingTokenProvider;

#[async_trait]
impl TokenProvider for MissingTokenProvider {
    async fn fetch_token(&self, _request: &TokenRequest) -> Result<String> {
        Err(anyhow!("media token service is unavailable"))
    }
}

pub struct HttpTokenProvider {
    http: Client,
    server_url: String,
}

impl HttpTokenProvider {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self, request: &TokenRequest) -> Result<String> {
        let mut query = vec![
            ("room", request.room.as_str()),
            ("identity", request.identity.as_str()),
        ];
        if let Some(avatar) = request.avatar.as_deref() {
            query.push(("avatar", avatar));
        }

        let res = self
            .http
            .get(format!("{}/token", self.server_url))
            .query(&query)
            .send()
            .await
            .with_context(|| format!("failed to request media token for room {}", request.room))?;
        let res: TokenResponse = api_response(res).await?.json().await?;
        Ok(res.token)
    }
}
