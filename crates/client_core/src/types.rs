use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{CallKind, ConversationId, Topic, UserId},
    protocol::CallStartPayload,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl LocalIdentity {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn media_identity(&self) -> String {
        format!("user:{}", self.user_id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Requesting,
    Connected,
    Switching,
    Leaving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
    pub screen_sharing: bool,
    pub speaking: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub kind: CallKind,
    pub started_at: DateTime<Utc>,
    pub generation: u64,
    pub initiated_locally: bool,
    /// Users who get `call:ended` when a locally initiated session is left.
    pub invitees: Vec<UserId>,
    pub participants: BTreeMap<String, Participant>,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
    pub screen_share_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Conversation being connected while `Requesting` or `Switching`.
    pub target: Option<ConversationId>,
    pub session: Option<CallSession>,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            target: None,
            session: None,
        }
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.session.as_ref().map(|session| session.conversation_id)
    }

    pub fn is_connected_to(&self, conversation_id: ConversationId) -> bool {
        self.phase == SessionPhase::Connected
            && self.active_conversation() == Some(conversation_id)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub conversation_id: ConversationId,
    pub kind: CallKind,
    pub mic_on: bool,
    pub cam_on: bool,
    pub initiated_locally: bool,
    pub invitees: Vec<UserId>,
}

impl JoinRequest {
    pub fn new(conversation_id: ConversationId, kind: CallKind) -> Self {
        Self {
            conversation_id,
            kind,
            mic_on: true,
            cam_on: kind == CallKind::Video,
            initiated_locally: false,
            invitees: Vec::new(),
        }
    }

    pub fn with_media(mut self, mic_on: bool, cam_on: bool) -> Self {
        self.mic_on = mic_on;
        self.cam_on = cam_on;
        self
    }

    pub fn as_initiator(mut self, invitees: Vec<UserId>) -> Self {
        self.initiated_locally = true;
        self.invitees = invitees;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInvite {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub caller_name: String,
    pub caller_avatar: Option<String>,
    pub kind: CallKind,
    pub participant_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl CallInvite {
    pub fn from_signal(payload: &CallStartPayload, created_at: DateTime<Utc>) -> Self {
        Self {
            conversation_id: payload.conversation_id,
            caller_id: payload.caller_id,
            caller_name: payload.caller_name.clone(),
            caller_avatar: payload.caller_avatar.clone(),
            kind: payload.kind,
            participant_ids: payload.participant_ids.clone(),
            created_at,
        }
    }

    pub fn peers_of(&self, local: UserId) -> Vec<UserId> {
        let mut peers = vec![self.caller_id];
        peers.extend(self.participant_ids.iter().copied());
        peers.sort();
        peers.dedup();
        peers.retain(|user_id| *user_id != local);
        peers
    }
}

/// Topics a call lifecycle signal fans out to: the conversation, every peer,
/// and the local user's own topic so other devices stay in sync.
pub fn call_topics(local: UserId, conversation_id: ConversationId, peers: &[UserId]) -> Vec<Topic> {
    let mut topics = vec![Topic::Conversation(conversation_id), Topic::User(local)];
    for peer in peers {
        let topic = Topic::User(*peer);
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    topics
}
