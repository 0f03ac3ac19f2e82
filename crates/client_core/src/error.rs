use std::time::Duration;

use shared::domain::ConversationId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("failed to request media token: {0}")]
    TokenRequest(String),
    #[error("media token request timed out after {0:?}")]
    TokenTimeout(Duration),
    #[error("failed to connect media engine: {0}")]
    Connect(String),
    #[error("join superseded by a newer session transition")]
    Superseded,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("another call transition is still in flight")]
    Busy,
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("no connected call session")]
    NotConnected,
    #[error("media engine rejected track change: {0}")]
    Media(String),
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal channel is disconnected")]
    Disconnected,
    #[error("signal transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("failed to read persisted presence for user {user_id}: {source}")]
    Read {
        user_id: i64,
        source: anyhow::Error,
    },
    #[error("failed to persist presence for user {user_id}: {source}")]
    Persist {
        user_id: i64,
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no ringing call in conversation {0}")]
    NoPendingCall(ConversationId),
    #[error("not in a call in conversation {0}")]
    NotInCall(ConversationId),
    #[error("conversation {0} already has a connected call")]
    AlreadyInCall(ConversationId),
    #[error("call in conversation {0} ended before the local join completed")]
    CallEnded(ConversationId),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Signal(#[from] SignalError),
}
