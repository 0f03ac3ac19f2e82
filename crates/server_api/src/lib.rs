use livekit_integration::{mint_token, LiveKitConfig};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{PresenceRecordPayload, TokenResponse, WritePresenceRequest},
};
use storage::Storage;
use tracing::{debug, info};

const MAX_CUSTOM_MESSAGE_CHARS: usize = 128;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub livekit: LiveKitConfig,
}

/// Mints a media-room token. The room name is taken as given so clients
/// stay free to derive it from whatever the conversation is keyed on.
pub fn issue_token(
    ctx: &ApiContext,
    room: &str,
    identity: &str,
    avatar: Option<&str>,
) -> Result<TokenResponse, ApiError> {
    let room = room.trim();
    let identity = identity.trim();
    if room.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "room is required"));
    }
    if identity.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "identity is required"));
    }
    let avatar = avatar.map(str::trim).filter(|avatar| !avatar.is_empty());

    let token = mint_token(&ctx.livekit, identity, room, avatar)
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("token mint failed: {e}")))?;
    debug!(room, identity, "api: media token issued");
    Ok(TokenResponse { token })
}

pub async fn read_presence(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<PresenceRecordPayload, ApiError> {
    let stored = ctx
        .storage
        .read_presence(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "no stored presence"))?;
    Ok(PresenceRecordPayload {
        user_id,
        status: stored.status,
        custom_message: stored.custom_message,
    })
}

/// An absent `custom_message` keeps whatever is stored; an empty one clears it.
pub async fn write_presence(
    ctx: &ApiContext,
    user_id: UserId,
    request: WritePresenceRequest,
) -> Result<PresenceRecordPayload, ApiError> {
    let Some(raw_message) = request.custom_message else {
        ctx.storage
            .write_status(user_id, request.status)
            .await
            .map_err(internal)?;
        info!(user_id = user_id.0, status = %request.status, "api: presence stored");
        return read_presence(ctx, user_id).await;
    };

    let custom_message = Some(raw_message.trim().to_string()).filter(|m| !m.is_empty());
    if custom_message
        .as_ref()
        .is_some_and(|message| message.chars().count() > MAX_CUSTOM_MESSAGE_CHARS)
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("custom message exceeds {MAX_CUSTOM_MESSAGE_CHARS} characters"),
        ));
    }

    ctx.storage
        .write_presence(user_id, request.status, custom_message.as_deref())
        .await
        .map_err(internal)?;
    info!(user_id = user_id.0, status = %request.status, "api: presence stored");
    Ok(PresenceRecordPayload {
        user_id,
        status: request.status,
        custom_message,
    })
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
