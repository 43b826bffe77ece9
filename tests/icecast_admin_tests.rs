// Integration tests for the Icecast admin client against an in-process
// stand-in server.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use roundstream::icecast::{IcecastAdmin, StreamServer};
use roundstream::StreamError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// admin:hackme
const AUTH: &str = "Basic YWRtaW46aGFja21l";

#[derive(Clone, Default)]
struct FakeIcecast {
    updates: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == AUTH)
        .unwrap_or(false)
}

async fn listmounts(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    (
        StatusCode::OK,
        r#"<?xml version="1.0"?>
<icestats>
  <source mount="/stream100.mp3"><listeners>2</listeners></source>
</icestats>"#
            .to_string(),
    )
}

async fn listclients(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    match params.get("mount").map(String::as_str) {
        Some("/stream100.mp3") => (
            StatusCode::OK,
            r#"<icestats><source mount="/stream100.mp3"><Listeners>2</Listeners></source></icestats>"#
                .to_string(),
        ),
        _ => (StatusCode::BAD_REQUEST, "Source does not exist".to_string()),
    }
}

async fn metadata(
    State(state): State<FakeIcecast>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    state.updates.lock().await.push(params);
    StatusCode::OK
}

async fn serve(state: FakeIcecast) -> String {
    let app = Router::new()
        .route("/admin/listmounts", get(listmounts))
        .route("/admin/listclients", get(listclients))
        .route("/admin/metadata", get(metadata))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn admin(base: &str, password: &str) -> IcecastAdmin {
    IcecastAdmin::new(base, "admin", password, Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_stream_exists_for_listed_mount() {
    let base = serve(FakeIcecast::default()).await;
    let admin = admin(&base, "hackme");

    assert!(admin.try_stream_exists("/stream100.mp3").await.unwrap());
    assert!(!admin.try_stream_exists("/stream7.mp3").await.unwrap());
    assert_eq!(admin.mounts().await.unwrap(), vec!["/stream100.mp3".to_string()]);
}

#[tokio::test]
async fn test_listener_count() {
    let base = serve(FakeIcecast::default()).await;
    let admin = admin(&base, "hackme");

    assert_eq!(admin.listener_count("/stream100.mp3").await, 2);
    // unknown mounts fail on the server and read as nobody listening
    assert_eq!(admin.listener_count("/stream7.mp3").await, 0);
}

#[tokio::test]
async fn test_bad_credentials_surface_through_try_only() {
    let base = serve(FakeIcecast::default()).await;
    let admin = admin(&base, "wrong");

    let err = admin.try_stream_exists("/stream100.mp3").await.unwrap_err();
    assert!(matches!(err, StreamError::ExternalService(_)));
    assert!(!admin.stream_exists("/stream100.mp3").await);
}

#[tokio::test]
async fn test_push_metadata_sends_updinfo() {
    let state = FakeIcecast::default();
    let base = serve(state.clone()).await;
    let admin = admin(&base, "hackme");

    admin.push_metadata(12, &[3, 4], "/stream100.mp3").await;

    let updates = state.updates.lock().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["mount"], "/stream100.mp3");
    assert_eq!(updates[0]["mode"], "updinfo");
    assert_eq!(updates[0]["song"], "asset=12&tags=3,4");
}

#[tokio::test]
async fn test_unreachable_server_is_not_ready() {
    // nothing listens on the discard port
    let admin = admin("http://127.0.0.1:9", "hackme");
    assert!(admin.try_stream_exists("/stream100.mp3").await.is_err());
    assert!(!admin.stream_exists("/stream100.mp3").await);
    assert_eq!(admin.listener_count("/stream100.mp3").await, 0);
}
