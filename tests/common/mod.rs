// Shared fixtures and fakes for the integration tests.
#![allow(dead_code)]

use chrono::Utc;
use roundstream::ambient::StreamProbe;
use roundstream::control::{ControlEnvelope, ControlPublisher};
use roundstream::icecast::StreamServer;
use roundstream::session::StreamRequest;
use roundstream::store::*;
use roundstream::supervisor::SessionSpawner;
use roundstream::StreamResult;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const BASE_LAT: f64 = 45.0;
pub const BASE_LON: f64 = -73.0;
const METERS_PER_DEGREE_LAT: f64 = 111_194.93;

/// Latitude `meters` north of the base point.
pub fn north(meters: f64) -> f64 {
    BASE_LAT + meters / METERS_PER_DEGREE_LAT
}

pub fn recording(id: AssetId, north_m: f64) -> Recording {
    Recording {
        id,
        project_id: 1,
        filename: format!("rec{}.wav", id),
        latitude: Some(north(north_m)),
        longitude: Some(BASE_LON),
        duration_ms: 30_000,
        tags: BTreeSet::new(),
        weight: 0.0,
        likes: 0,
        flags: 0,
        submitted: true,
        created: Utc::now(),
        volume: 1.0,
        language: "en".to_string(),
        session_id: None,
    }
}

pub fn tagged(mut rec: Recording, tags: &[TagId]) -> Recording {
    rec.tags = tags.iter().copied().collect();
    rec
}

pub fn project(id: ProjectId) -> ProjectRecord {
    ProjectRecord {
        id,
        name: format!("project {}", id),
        recording_radius: Some(10.0),
        ordering: AssetOrdering::Random,
        repeat_mode: RepeatMode::Stop,
        audio_format: AudioFormat::Mp3,
        geo_listen_enabled: true,
        timed_asset_priority: true,
        default_tags: Vec::new(),
    }
}

pub fn session_record(id: SessionId, project_id: ProjectId) -> SessionRecord {
    SessionRecord {
        id,
        project_id,
        language: "en".to_string(),
        recording_radius: None,
        geo_listen_enabled: true,
        device_id: None,
    }
}

pub fn tuning(id: u64) -> TrackTuning {
    TrackTuning {
        id,
        project_id: 1,
        min_volume: 0.8,
        max_volume: 1.0,
        min_duration_ms: 5_000,
        max_duration_ms: 10_000,
        min_deadair_ms: 1_000,
        max_deadair_ms: 2_000,
        min_fadein_ms: 500,
        max_fadein_ms: 1_000,
        min_fadeout_ms: 500,
        max_fadeout_ms: 1_000,
        min_pan_pos: -1.0,
        max_pan_pos: 1.0,
        min_pan_duration_ms: 2_000,
        max_pan_duration_ms: 4_000,
        repeat_recordings: false,
    }
}

pub fn speaker(id: SpeakerId, north_m: f64, uri: &str) -> Speaker {
    Speaker {
        id,
        project_id: 1,
        latitude: north(north_m),
        longitude: BASE_LON,
        active: true,
        min_distance: 10.0,
        max_distance: 100.0,
        min_volume: 0.0,
        max_volume: 1.0,
        uri: uri.to_string(),
        backup_uri: None,
    }
}

/// Catalog with project 1 and session 100.
pub fn catalog(recordings: Vec<Recording>) -> Catalog {
    Catalog {
        projects: vec![project(1)],
        sessions: vec![session_record(100, 1)],
        recordings,
        ..Default::default()
    }
}

/// Stream server whose mounts and listeners are set by the test.
#[derive(Default)]
pub struct FakeServer {
    live: Mutex<HashSet<String>>,
    listeners: AtomicU32,
    checks: AtomicU32,
    pub metadata: Mutex<Vec<(AssetId, Vec<TagId>, String)>>,
}

impl FakeServer {
    pub async fn set_live(&self, mount: &str) {
        self.live.lock().await.insert(mount.to_string());
    }

    pub async fn set_down(&self, mount: &str) {
        self.live.lock().await.remove(mount);
    }

    pub fn set_listeners(&self, count: u32) {
        self.listeners.store(count, Ordering::SeqCst);
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StreamServer for FakeServer {
    async fn try_stream_exists(&self, mount: &str) -> StreamResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.live.lock().await.contains(mount))
    }

    async fn listener_count(&self, _mount: &str) -> u32 {
        self.listeners.load(Ordering::SeqCst)
    }

    async fn push_metadata(&self, asset_id: AssetId, tags: &[TagId], mount: &str) {
        self.metadata
            .lock()
            .await
            .push((asset_id, tags.to_vec(), mount.to_string()));
    }
}

/// Probe that reports only the listed URIs as live.
pub struct FakeProbe {
    live: HashSet<String>,
}

impl FakeProbe {
    pub fn with_live(uris: &[&str]) -> Self {
        Self {
            live: uris.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl StreamProbe for FakeProbe {
    async fn is_live(&self, uri: &str) -> bool {
        self.live.contains(uri)
    }
}

/// Records spawn requests, optionally bringing the mount up on the server.
pub struct FakeSpawner {
    server: Arc<FakeServer>,
    brings_up: bool,
    pub spawned: Mutex<Vec<StreamRequest>>,
}

impl FakeSpawner {
    pub fn new(server: Arc<FakeServer>, brings_up: bool) -> Self {
        Self {
            server,
            brings_up,
            spawned: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl SessionSpawner for FakeSpawner {
    async fn spawn(&self, request: &StreamRequest) -> anyhow::Result<()> {
        self.spawned.lock().await.push(request.clone());
        if self.brings_up {
            let format = request.audio_format.unwrap_or_default();
            let mount = roundstream::mount_point(request.session_id, format);
            self.server.set_live(&mount).await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub sent: Mutex<Vec<ControlEnvelope>>,
}

#[async_trait::async_trait]
impl ControlPublisher for FakePublisher {
    async fn publish(&self, envelope: ControlEnvelope) -> anyhow::Result<()> {
        self.sent.lock().await.push(envelope);
        Ok(())
    }
}
