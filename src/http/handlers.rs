use super::state::AppState;
use crate::error::StreamError;
use crate::listener::ListenerState;
use crate::store::{AssetId, SessionId, TagId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamRequestBody {
    pub session_id: SessionId,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub session_id: SessionId,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
pub struct StartedStream {
    pub session_id: SessionId,
    pub mount: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifyStreamBody {
    #[serde(default)]
    pub tags: Option<Vec<TagId>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(flatten)]
    pub listener: ListenerState,
}

#[derive(Debug, Deserialize)]
pub struct PlayAssetBody {
    pub asset_id: AssetId,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub session_id: Option<SessionId>,
    pub operation: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: StreamError) -> Response {
    let status = match &err {
        StreamError::StreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        StreamError::NotFound { .. } => StatusCode::NOT_FOUND,
        StreamError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        StreamError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("{}", err);
    } else {
        warn!("{}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn relayed(session_id: Option<SessionId>, operation: &str, result: Result<(), StreamError>) -> Response {
    match result {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(RelayResponse {
                session_id,
                operation: operation.to_string(),
                status: "sent".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /streams
/// Start the session's stream if needed and return its URL
pub async fn request_stream(
    State(state): State<AppState>,
    Json(req): Json<StreamRequestBody>,
) -> Response {
    info!("Stream requested for session {}", req.session_id);

    let listener = ListenerState {
        latitude: req.latitude,
        longitude: req.longitude,
        ..Default::default()
    };
    match state.supervisor.request_stream(req.session_id, &listener).await {
        Ok(stream_url) => (
            StatusCode::OK,
            Json(StreamResponse {
                session_id: req.session_id,
                stream_url,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /streams
pub async fn list_streams(State(state): State<AppState>) -> Response {
    let streams: Vec<StartedStream> = state
        .supervisor
        .started_sessions()
        .await
        .into_iter()
        .map(|(session_id, mount)| StartedStream { session_id, mount })
        .collect();
    (StatusCode::OK, Json(streams)).into_response()
}

/// GET /streams/:session_id
pub async fn stream_status(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Response {
    match state.supervisor.stream_status(session_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /streams/:session_id/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Response {
    let result = state.supervisor.heartbeat(session_id).await;
    relayed(Some(session_id), "heartbeat", result)
}

/// POST /streams/:session_id/move_listener
pub async fn move_listener(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(listener): Json<ListenerState>,
) -> Response {
    let result = state.supervisor.move_listener(session_id, listener).await;
    relayed(Some(session_id), "move_listener", result)
}

/// POST /streams/:session_id/modify_stream
pub async fn modify_stream(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<ModifyStreamBody>,
) -> Response {
    let result = state
        .supervisor
        .modify_stream(session_id, req.tags, req.language, req.listener)
        .await;
    relayed(Some(session_id), "modify_stream", result)
}

/// POST /streams/:session_id/skip_ahead
pub async fn skip_ahead(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Response {
    let result = state.supervisor.skip_ahead(session_id).await;
    relayed(Some(session_id), "skip_ahead", result)
}

/// POST /streams/:session_id/play_asset
pub async fn play_asset(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<PlayAssetBody>,
) -> Response {
    let result = state.supervisor.play_asset(session_id, req.asset_id).await;
    relayed(Some(session_id), "play_asset", result)
}

/// POST /streams/refresh
pub async fn refresh_all(State(state): State<AppState>) -> Response {
    let result = state.supervisor.refresh_all().await;
    relayed(None, "refresh_recordings", result)
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
