// Integration tests for the session supervisor

mod common;

use common::*;
use roundstream::config::{IcecastConfig, SpawnConfig};
use roundstream::control::{ControlEnvelope, ControlMessage};
use roundstream::listener::ListenerState;
use roundstream::store::*;
use roundstream::supervisor::StreamSupervisor;
use roundstream::StreamError;
use std::sync::Arc;

struct Fixture {
    supervisor: StreamSupervisor,
    server: Arc<FakeServer>,
    spawner: Arc<FakeSpawner>,
    publisher: Arc<FakePublisher>,
}

fn fixture(catalog: Catalog, brings_up: bool) -> Fixture {
    let server = Arc::new(FakeServer::default());
    let spawner = Arc::new(FakeSpawner::new(server.clone(), brings_up));
    let publisher = Arc::new(FakePublisher::default());
    let icecast = IcecastConfig {
        public_host: "radio.test".to_string(),
        ..Default::default()
    };
    let spawn = SpawnConfig {
        wait_interval_ms: 1000,
        wait_retries: 3,
        ..Default::default()
    };
    let supervisor = StreamSupervisor::new(
        Arc::new(MemoryStore::new(catalog)),
        server.clone(),
        spawner.clone(),
        publisher.clone(),
        icecast,
        spawn,
    );
    Fixture {
        supervisor,
        server,
        spawner,
        publisher,
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_spawns_and_waits_for_mount() {
    let f = fixture(catalog(Vec::new()), true);
    let listener = ListenerState::at(BASE_LAT, BASE_LON);

    let url = f.supervisor.request_stream(100, &listener).await.unwrap();
    assert_eq!(url, "http://radio.test:8000/stream100.mp3");

    let spawned = f.spawner.spawned.lock().await.clone();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].session_id, 100);
    assert_eq!(spawned[0].project_id, 1);
    assert_eq!(spawned[0].latitude, Some(BASE_LAT));
    assert_eq!(spawned[0].audio_format, Some(AudioFormat::Mp3));

    assert_eq!(
        f.supervisor.started_sessions().await,
        vec![(100, "/stream100.mp3".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_live_stream_is_reused() {
    let f = fixture(catalog(Vec::new()), true);
    f.server.set_live("/stream100.mp3").await;

    let url = f
        .supervisor
        .request_stream(100, &ListenerState::unknown())
        .await
        .unwrap();
    assert!(url.ends_with("/stream100.mp3"));
    assert!(f.spawner.spawned.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mount_that_never_appears_times_out() {
    let f = fixture(catalog(Vec::new()), false);

    let err = f
        .supervisor
        .request_stream(100, &ListenerState::unknown())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StreamError::StreamTimeout {
            mount: "/stream100.mp3".to_string(),
            attempts: 3
        }
    );
    // initial check plus one per attempt
    assert_eq!(f.server.checks(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_project_format_picks_mount() {
    let mut catalog = catalog(Vec::new());
    catalog.projects[0].audio_format = AudioFormat::Ogg;
    let f = fixture(catalog, true);

    let url = f
        .supervisor
        .request_stream(100, &ListenerState::unknown())
        .await
        .unwrap();
    assert!(url.ends_with("/stream100.ogg"));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let f = fixture(catalog(Vec::new()), true);
    let err = f
        .supervisor
        .request_stream(5, &ListenerState::unknown())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_relay_operations_publish_to_session() {
    let f = fixture(catalog(Vec::new()), true);

    f.supervisor.heartbeat(100).await.unwrap();
    f.supervisor.skip_ahead(100).await.unwrap();
    f.supervisor.play_asset(100, 9).await.unwrap();
    f.supervisor
        .move_listener(100, ListenerState::at(1.0, 2.0))
        .await
        .unwrap();
    f.supervisor.refresh_all().await.unwrap();

    let sent = f.publisher.sent.lock().await.clone();
    assert_eq!(
        sent,
        vec![
            ControlEnvelope::to(100, ControlMessage::Heartbeat),
            ControlEnvelope::to(100, ControlMessage::SkipAhead),
            ControlEnvelope::to(100, ControlMessage::PlayAsset { asset_id: 9 }),
            ControlEnvelope::to(
                100,
                ControlMessage::MoveListener {
                    listener: ListenerState::at(1.0, 2.0)
                }
            ),
            ControlEnvelope::broadcast(ControlMessage::RefreshRecordings),
        ]
    );
}

#[tokio::test]
async fn test_modify_stream_requires_live_mount() {
    let f = fixture(catalog(Vec::new()), true);

    let err = f
        .supervisor
        .modify_stream(100, Some(vec![1]), None, ListenerState::unknown())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(f.publisher.sent.lock().await.is_empty());

    f.server.set_live("/stream100.mp3").await;
    f.supervisor
        .modify_stream(100, Some(vec![1]), Some("fr".to_string()), ListenerState::unknown())
        .await
        .unwrap();
    assert_eq!(f.publisher.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn test_stream_status_reports_listeners() {
    let f = fixture(catalog(Vec::new()), true);
    f.server.set_live("/stream100.mp3").await;
    f.server.set_listeners(3);

    let status = f.supervisor.stream_status(100).await.unwrap();
    assert!(status.live);
    assert_eq!(status.listeners, 3);
    assert_eq!(status.mount, "/stream100.mp3");
}

#[tokio::test(start_paused = true)]
async fn test_ended_sessions_are_forgotten() {
    let f = fixture(catalog(Vec::new()), true);
    f.supervisor
        .request_stream(100, &ListenerState::unknown())
        .await
        .unwrap();
    assert_eq!(f.supervisor.started_sessions().await.len(), 1);

    f.server.set_down("/stream100.mp3").await;
    assert!(f.supervisor.started_sessions().await.is_empty());

    // a new request starts a fresh session
    f.supervisor
        .request_stream(100, &ListenerState::unknown())
        .await
        .unwrap();
    assert_eq!(f.spawner.spawned.lock().await.len(), 2);
    assert_eq!(f.supervisor.started_sessions().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_of_ended_session_drops_it() {
    let f = fixture(catalog(Vec::new()), true);
    f.supervisor
        .request_stream(100, &ListenerState::unknown())
        .await
        .unwrap();

    f.server.set_down("/stream100.mp3").await;
    let status = f.supervisor.stream_status(100).await.unwrap();
    assert!(!status.live);
    assert_eq!(status.listeners, 0);

    f.server.set_live("/stream100.mp3").await;
    assert!(f.supervisor.started_sessions().await.is_empty());
}
