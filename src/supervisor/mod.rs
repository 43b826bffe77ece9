//! Session process lifecycle
//!
//! The supervisor starts one session process per listener session, waits for
//! its mount to come up and relays client operations onto the control bus.

mod spawner;

pub use spawner::{ProcessSpawner, SessionSpawner};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{IcecastConfig, SpawnConfig};
use crate::control::{ControlEnvelope, ControlMessage, ControlPublisher};
use crate::error::{StreamError, StreamResult};
use crate::icecast::{mount_point, StreamServer};
use crate::listener::ListenerState;
use crate::session::StreamRequest;
use crate::store::{AssetId, AssetStore, ProjectRecord, SessionId, TagId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub session_id: SessionId,
    pub mount: String,
    pub url: String,
    pub live: bool,
    pub listeners: u32,
}

pub struct StreamSupervisor {
    store: Arc<dyn AssetStore>,
    server: Arc<dyn StreamServer>,
    spawner: Arc<dyn SessionSpawner>,
    control: Arc<dyn ControlPublisher>,
    icecast: IcecastConfig,
    spawn: SpawnConfig,
    /// Mounts of sessions started by this supervisor.
    started: RwLock<HashMap<SessionId, String>>,
}

impl StreamSupervisor {
    pub fn new(
        store: Arc<dyn AssetStore>,
        server: Arc<dyn StreamServer>,
        spawner: Arc<dyn SessionSpawner>,
        control: Arc<dyn ControlPublisher>,
        icecast: IcecastConfig,
        spawn: SpawnConfig,
    ) -> Self {
        Self {
            store,
            server,
            spawner,
            control,
            icecast,
            spawn,
            started: RwLock::new(HashMap::new()),
        }
    }

    /// Make sure a stream is running for `session_id` and return its URL.
    ///
    /// Spawns a session process unless the mount is already live, then polls
    /// the server until the mount appears.
    pub async fn request_stream(
        &self,
        session_id: SessionId,
        listener: &ListenerState,
    ) -> StreamResult<String> {
        let (project, mount) = self.resolve(session_id).await?;
        let url = self.icecast.public_url(&mount);

        if self.server.stream_exists(&mount).await {
            info!("Stream {} already live", mount);
            return Ok(url);
        }

        let request = StreamRequest {
            session_id,
            project_id: project.id,
            latitude: listener.latitude,
            longitude: listener.longitude,
            audio_format: Some(project.audio_format),
            bitrate: None,
        };
        self.spawner
            .spawn(&request)
            .await
            .map_err(|e| StreamError::ExternalService(format!("failed to spawn session: {:#}", e)))?;

        self.wait_for_stream(&mount).await?;
        self.started.write().await.insert(session_id, mount.clone());
        info!("Stream {} is up at {}", mount, url);
        Ok(url)
    }

    pub async fn stream_status(&self, session_id: SessionId) -> StreamResult<StreamStatus> {
        let (_, mount) = self.resolve(session_id).await?;
        let live = self.server.stream_exists(&mount).await;
        let listeners = if live {
            self.server.listener_count(&mount).await
        } else {
            self.forget(session_id).await;
            0
        };
        Ok(StreamStatus {
            session_id,
            url: self.icecast.public_url(&mount),
            mount,
            live,
            listeners,
        })
    }

    /// Sessions this supervisor has started whose mounts are still live.
    ///
    /// Sessions whose mount has gone away are forgotten.
    pub async fn started_sessions(&self) -> Vec<(SessionId, String)> {
        let snapshot: Vec<_> = self
            .started
            .read()
            .await
            .iter()
            .map(|(id, mount)| (*id, mount.clone()))
            .collect();

        let mut sessions = Vec::with_capacity(snapshot.len());
        for (session_id, mount) in snapshot {
            if self.server.stream_exists(&mount).await {
                sessions.push((session_id, mount));
            } else {
                self.forget(session_id).await;
            }
        }
        sessions.sort();
        sessions
    }

    async fn forget(&self, session_id: SessionId) {
        if self.started.write().await.remove(&session_id).is_some() {
            info!("Session {} has ended", session_id);
        }
    }

    pub async fn heartbeat(&self, session_id: SessionId) -> StreamResult<()> {
        self.send(session_id, ControlMessage::Heartbeat).await
    }

    pub async fn move_listener(
        &self,
        session_id: SessionId,
        listener: ListenerState,
    ) -> StreamResult<()> {
        self.send(session_id, ControlMessage::MoveListener { listener })
            .await
    }

    /// Only delivered while the session's mount is live.
    pub async fn modify_stream(
        &self,
        session_id: SessionId,
        tags: Option<Vec<TagId>>,
        language: Option<String>,
        listener: ListenerState,
    ) -> StreamResult<()> {
        let (_, mount) = self.resolve(session_id).await?;
        if !self.server.stream_exists(&mount).await {
            return Err(StreamError::not_found("stream", mount));
        }
        self.send(
            session_id,
            ControlMessage::ModifyStream {
                tags,
                language,
                listener,
            },
        )
        .await
    }

    pub async fn skip_ahead(&self, session_id: SessionId) -> StreamResult<()> {
        self.send(session_id, ControlMessage::SkipAhead).await
    }

    pub async fn play_asset(&self, session_id: SessionId, asset_id: AssetId) -> StreamResult<()> {
        self.send(session_id, ControlMessage::PlayAsset { asset_id })
            .await
    }

    /// Ask every running session to reload its recordings.
    pub async fn refresh_all(&self) -> StreamResult<()> {
        self.publish(ControlEnvelope::broadcast(ControlMessage::RefreshRecordings))
            .await
    }

    async fn resolve(&self, session_id: SessionId) -> StreamResult<(ProjectRecord, String)> {
        let session = self.store.get_session(session_id).await?;
        let project = match self.store.get_project(session.project_id).await {
            Ok(project) => project,
            Err(e) if e.is_not_found() => {
                return Err(StreamError::Configuration(format!(
                    "session {} refers to missing project {}",
                    session_id, session.project_id
                )))
            }
            Err(e) => return Err(e),
        };
        let mount = mount_point(session_id, project.audio_format);
        Ok((project, mount))
    }

    async fn wait_for_stream(&self, mount: &str) -> StreamResult<()> {
        let attempts = self.spawn.wait_retries;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.spawn.wait_interval()).await;
            match self.server.try_stream_exists(mount).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("Waiting for {} ({}/{})", mount, attempt, attempts),
                Err(e) => warn!("Waiting for {} ({}/{}): {}", mount, attempt, attempts, e),
            }
        }
        Err(StreamError::StreamTimeout {
            mount: mount.to_string(),
            attempts,
        })
    }

    async fn send(&self, session_id: SessionId, message: ControlMessage) -> StreamResult<()> {
        self.publish(ControlEnvelope::to(session_id, message)).await
    }

    async fn publish(&self, envelope: ControlEnvelope) -> StreamResult<()> {
        self.control
            .publish(envelope)
            .await
            .map_err(|e| StreamError::ExternalService(format!("{:#}", e)))
    }
}
