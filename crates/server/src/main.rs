use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use livekit_integration::LiveKitConfig;
use serde::Deserialize;
use server_api::{issue_token, read_presence, write_presence, ApiContext};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{ClientFrame, PresenceRecordPayload, ServerFrame, TokenResponse, WritePresenceRequest},
};
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};

mod app_state;
mod config;
mod relay;

use app_state::AppState;
use config::{load_settings, prepare_database_url};
use relay::{ConnectionTopics, Relay};

const MAX_BODY_BYTES: usize = 16 * 1024;

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    room: String,
    identity: String,
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        livekit: LiveKitConfig {
            api_key: settings.livekit_api_key,
            api_secret: settings.livekit_api_secret,
            ttl_seconds: settings.livekit_ttl_seconds,
        },
    };
    if let Some(livekit_url) = settings.livekit_url.as_deref() {
        info!(%livekit_url, "media server configured");
    }

    let state = AppState {
        api,
        relay: Relay::new(settings.relay_buffer),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/token", get(http_issue_token))
        .route(
            "/presence/:user_id",
            get(http_read_presence).put(http_write_presence),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn http_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        warn!(error = %e, "health check failed");
        http_error(ApiError::new(ErrorCode::Unavailable, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_issue_token(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, HttpError> {
    issue_token(&state.api, &q.room, &q.identity, q.avatar.as_deref())
        .map(Json)
        .map_err(http_error)
}

async fn http_read_presence(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<PresenceRecordPayload>, HttpError> {
    read_presence(&state.api, UserId(user_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_write_presence(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(req): Json<WritePresenceRequest>,
) -> Result<Json<PresenceRecordPayload>, HttpError> {
    write_presence(&state.api, UserId(user_id), req)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, UserId(q.user_id)))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let mut relay_rx = state.relay.subscribe();
    let mut topics = ConnectionTopics::new(user_id);
    info!(user_id = user_id.0, "relay: socket opened");

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else {
                    break;
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => topics.apply(&state.relay, frame),
                    Err(err) => {
                        debug!(user_id = user_id.0, error = %err, "relay: unreadable frame");
                        Some(ServerFrame::Error(ApiError::new(
                            ErrorCode::Validation,
                            format!("invalid frame: {err}"),
                        )))
                    }
                }
            }
            relayed = relay_rx.recv() => match relayed {
                Ok((topic, event)) if topics.wants(&topic) => {
                    Some(ServerFrame::Event { topic, event })
                }
                Ok(_) => None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = user_id.0, skipped, "relay: socket fell behind; frames dropped");
                    None
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(frame) = outgoing else {
            continue;
        };
        let text = match serde_json::to_string(&frame) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    info!(user_id = user_id.0, "relay: socket closed");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
