use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use shared::domain::ConversationId;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConnectOptions {
    pub room_name: String,
    pub token: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: String,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    ParticipantJoined(RemoteParticipant),
    ParticipantLeft {
        identity: String,
    },
    TrackToggled {
        identity: String,
        source: TrackSource,
        enabled: bool,
    },
    ActiveSpeakersChanged {
        identities: Vec<String>,
    },
    /// The room dropped us without a local `disconnect` call.
    Disconnected,
}

/// Binding to a real-time media room. Only one room can be bound at a time
/// because the local capture devices are exclusive.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn connect(&self, options: MediaConnectOptions) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
    async fn set_track_enabled(&self, source: TrackSource, enabled: bool) -> anyhow::Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<MediaEvent>;
}

#[derive(Debug, Clone)]
pub struct LiveKitConfig {
    pub api_key: String,
    pub api_secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGrant {
    room_join: bool,
    room: String,
    can_publish: bool,
    can_subscribe: bool,
    can_publish_data: bool,
}

#[derive(Debug, Serialize)]
struct ParticipantMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    exp: i64,
    iat: i64,
    nbf: i64,
    video: VideoGrant,
    metadata: String,
}

pub fn room_name_for_conversation(conversation_id: ConversationId) -> String {
    format!("conversation:{}", conversation_id.0)
}

pub fn mint_token(
    cfg: &LiveKitConfig,
    identity: &str,
    room_name: &str,
    avatar: Option<&str>,
) -> anyhow::Result<String> {
    let now = Utc::now();
    let exp = now + Duration::seconds(cfg.ttl_seconds);
    let metadata = serde_json::to_string(&ParticipantMetadata { avatar })?;
    let claims = Claims {
        iss: cfg.api_key.clone(),
        sub: identity.to_string(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: exp.timestamp(),
        video: VideoGrant {
            room_join: true,
            room: room_name.to_string(),
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
        },
        metadata,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.api_secret.as_bytes()),
    )?)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
