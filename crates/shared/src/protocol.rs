use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{CallKind, ConversationId, PresenceStatus, Topic, UserId},
    error::ApiError,
};

/// Registry key for signal handlers. Wire names follow the `call:*` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    #[serde(rename = "call:start")]
    CallStart,
    #[serde(rename = "call:accepted")]
    CallAccepted,
    #[serde(rename = "call:declined")]
    CallDeclined,
    #[serde(rename = "call:ended")]
    CallEnded,
    #[serde(rename = "presence:update")]
    PresenceUpdate,
}

impl SignalType {
    pub const CALL_LIFECYCLE: [SignalType; 4] = [
        SignalType::CallStart,
        SignalType::CallAccepted,
        SignalType::CallDeclined,
        SignalType::CallEnded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallStart => "call:start",
            Self::CallAccepted => "call:accepted",
            Self::CallDeclined => "call:declined",
            Self::CallEnded => "call:ended",
            Self::PresenceUpdate => "presence:update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStartPayload {
    pub conversation_id: ConversationId,
    pub kind: CallKind,
    pub caller_id: UserId,
    pub caller_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_avatar: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatePayload {
    pub conversation_id: ConversationId,
    pub kind: CallKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdatePayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SignalPayload {
    #[serde(rename = "call:start")]
    CallStart(CallStartPayload),
    #[serde(rename = "call:accepted")]
    CallAccepted(CallStatePayload),
    #[serde(rename = "call:declined")]
    CallDeclined(CallStatePayload),
    #[serde(rename = "call:ended")]
    CallEnded(CallStatePayload),
    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceUpdatePayload),
}

impl SignalPayload {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Self::CallStart(_) => SignalType::CallStart,
            Self::CallAccepted(_) => SignalType::CallAccepted,
            Self::CallDeclined(_) => SignalType::CallDeclined,
            Self::CallEnded(_) => SignalType::CallEnded,
            Self::PresenceUpdate(_) => SignalType::PresenceUpdate,
        }
    }

    /// Presence updates are not tied to a conversation.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::CallStart(payload) => Some(payload.conversation_id),
            Self::CallAccepted(payload)
            | Self::CallDeclined(payload)
            | Self::CallEnded(payload) => Some(payload.conversation_id),
            Self::PresenceUpdate(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub sender_id: UserId,
    /// Instance id of the publishing connection; lets a client drop its own echoes.
    pub origin: Uuid,
    pub timestamp: DateTime<Utc>,
    pub signal: SignalPayload,
}

impl SignalEvent {
    pub fn new(sender_id: UserId, origin: Uuid, signal: SignalPayload) -> Self {
        Self {
            sender_id,
            origin,
            timestamp: Utc::now(),
            signal,
        }
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal.signal_type()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.signal.conversation_id()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    Publish { targets: Vec<Topic>, event: SignalEvent },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Event { topic: Topic, event: SignalEvent },
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecordPayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritePresenceRequest {
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}
