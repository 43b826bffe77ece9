use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Stream lifecycle
        .route("/streams", get(handlers::list_streams).post(handlers::request_stream))
        .route("/streams/refresh", post(handlers::refresh_all))
        .route("/streams/:session_id", get(handlers::stream_status))
        // Session control relay
        .route("/streams/:session_id/heartbeat", post(handlers::heartbeat))
        .route("/streams/:session_id/move_listener", post(handlers::move_listener))
        .route("/streams/:session_id/modify_stream", post(handlers::modify_stream))
        .route("/streams/:session_id/skip_ahead", post(handlers::skip_ahead))
        .route("/streams/:session_id/play_asset", post(handlers::play_asset))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
