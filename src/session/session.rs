use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::request::StreamRequest;
use super::watchdog::Watchdog;
use crate::ambient::{AmbientMixer, ProbeOutcome, StreamProbe};
use crate::collection::{CollectionConfig, RecordingCollection};
use crate::config::{Config, IcecastConfig, StreamConfig};
use crate::control::ControlMessage;
use crate::error::{StreamError, StreamResult};
use crate::icecast::{mount_point, StreamServer};
use crate::listener::ListenerState;
use crate::pipeline::{AudioGraph, GraphEvent, SinkConfig, SourceId, SourceKind};
use crate::store::{
    AssetStore, ProjectRecord, SessionEvent, SessionId, Speaker, TagId,
};
use crate::track::{TrackContext, TrackPlayer, TrackTimer};

/// Event logged when a session shuts down.
pub const CLEANUP_EVENT: &str = "cleanup_session";

/// Process-level settings a session is built with.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub stream: StreamConfig,
    pub icecast: IcecastConfig,
    /// Directory recording filenames are relative to.
    pub media_root: PathBuf,
    /// Skip recordings whose media file is missing.
    pub check_media: bool,
    /// Fixed seed for collection and track randomness.
    pub rng_seed: Option<u64>,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stream: config.stream.clone(),
            icecast: config.icecast.clone(),
            media_root: config.catalog.media_root.clone(),
            check_media: config.catalog.check_media,
            rng_seed: None,
        }
    }
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionServices {
    pub store: Arc<dyn AssetStore>,
    pub server: Arc<dyn StreamServer>,
    pub probe: Arc<dyn StreamProbe>,
}

/// One listener's stream: the audio graph, its track players and ambient
/// mixer, driven by control messages.
pub struct StreamSession {
    session_id: SessionId,
    project: ProjectRecord,
    options: SessionOptions,
    sink: SinkConfig,
    services: SessionServices,
    graph: Box<dyn AudioGraph>,
    collection: Arc<RecordingCollection>,
    players: Vec<TrackPlayer>,
    timers: mpsc::UnboundedReceiver<TrackTimer>,
    /// Handed to the mixer once the graph runs.
    speakers: Vec<Speaker>,
    mixer: Option<AmbientMixer>,
    silence: Option<SourceId>,
    listener: ListenerState,
    tag_filter: Vec<TagId>,
    watchdog: Watchdog,
    playing: bool,
    torn_down: bool,
}

impl StreamSession {
    /// Resolve the session's configuration from the store and build its
    /// components. Nothing is attached to the graph yet.
    pub async fn new(
        request: StreamRequest,
        services: SessionServices,
        graph: Box<dyn AudioGraph>,
        options: SessionOptions,
    ) -> StreamResult<Self> {
        let session_id = request.session_id;
        info!("Creating stream session {}", session_id);

        let store = services.store.clone();
        let session = store.get_session(session_id).await?;
        if session.project_id != request.project_id {
            warn!(
                "Session {} belongs to project {}, started for project {}",
                session_id, session.project_id, request.project_id
            );
        }

        let project = match store.get_project(request.project_id).await {
            Ok(project) => project,
            Err(e) if e.is_not_found() => {
                return Err(StreamError::Configuration(format!(
                    "project {} not found",
                    request.project_id
                )))
            }
            Err(e) => return Err(e),
        };

        let radius_m = session
            .recording_radius
            .or(project.recording_radius)
            .unwrap_or(options.stream.recording_radius_m);

        let format = request.audio_format.unwrap_or(project.audio_format);
        let sink = SinkConfig {
            mount: mount_point(session_id, format),
            format,
            bitrate: request.bitrate.unwrap_or(options.stream.bitrate),
            master_volume: options.stream.master_volume,
            host: options.icecast.host.clone(),
            port: options.icecast.port,
            source_username: options.icecast.source_username.clone(),
            source_password: options.icecast.source_password.clone(),
        };

        let collection = Arc::new(RecordingCollection::new(
            store.clone(),
            CollectionConfig {
                session_id,
                project_id: project.id,
                radius_m,
                ordering: project.ordering,
                repeat_mode: project.repeat_mode,
                banned_timeout: options.stream.banned_timeout(),
                geo_listen_enabled: project.geo_listen_enabled && session.geo_listen_enabled,
                default_tags: project.default_tags.clone(),
                language: Some(session.language.clone()),
                timed_asset_priority: project.timed_asset_priority,
                media_root: options.check_media.then(|| options.media_root.clone()),
                rng_seed: options.rng_seed,
            },
        ));

        let tunings = store.track_tunings(project.id).await?;
        let speakers = store.active_speakers(project.id).await?;

        let (timer_tx, timers) = mpsc::unbounded_channel();
        let ctx = TrackContext {
            session_id,
            mount: sink.mount.clone(),
            media_root: options.media_root.clone(),
            collection: collection.clone(),
            store: store.clone(),
            server: services.server.clone(),
        };
        let players = tunings
            .into_iter()
            .enumerate()
            .map(|(index, tuning)| {
                let player = TrackPlayer::new(
                    index,
                    tuning,
                    ctx.clone(),
                    timer_tx.clone(),
                    options.stream.num_pan_steps,
                    options.stream.pan_interval(),
                );
                match options.rng_seed {
                    Some(seed) => player.with_seed(seed.wrapping_add(index as u64 + 1)),
                    None => player,
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Session {}: project {} radius {}m, {} tracks, {} speakers, mount {}",
            session_id,
            project.id,
            radius_m,
            players.len(),
            speakers.len(),
            sink.mount
        );

        let watchdog = Watchdog::new(options.stream.heartbeat_timeout());

        Ok(Self {
            session_id,
            project,
            options,
            sink,
            services,
            graph,
            collection,
            players,
            timers,
            speakers,
            mixer: None,
            silence: None,
            listener: request.listener(),
            tag_filter: Vec::new(),
            watchdog,
            playing: false,
            torn_down: false,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn project(&self) -> &ProjectRecord {
        &self.project
    }

    pub fn sink(&self) -> &SinkConfig {
        &self.sink
    }

    pub fn collection(&self) -> Arc<RecordingCollection> {
        self.collection.clone()
    }

    pub fn players(&self) -> &[TrackPlayer] {
        &self.players
    }

    pub fn mixer(&self) -> Option<&AmbientMixer> {
        self.mixer.as_ref()
    }

    pub fn silence_source(&self) -> Option<SourceId> {
        self.silence
    }

    pub fn listener(&self) -> &ListenerState {
        &self.listener
    }

    pub fn tag_filter(&self) -> &[TagId] {
        &self.tag_filter
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Start the graph and serve `control` until the watchdog expires or the
    /// graph fails. Always tears down before returning.
    pub async fn run(&mut self, mut control: mpsc::Receiver<ControlMessage>) -> Result<()> {
        let mut events = match self.graph.start(&self.sink).await {
            Ok(events) => events,
            Err(e) => {
                self.teardown().await;
                return Err(e).context("Failed to start audio graph");
            }
        };
        info!(
            "Session {} - {} graph started on {}",
            self.session_id,
            self.graph.name(),
            self.sink.mount
        );

        self.attach_ambient().await;
        self.collection
            .update_request(self.listener.clone(), self.tag_filter.clone())
            .await;

        let stream = self.options.stream.clone();
        let mut ping = ticker(stream.ping_interval());
        let mut pan = ticker(stream.pan_interval());
        let mut ramp = ticker(stream.ramp_interval());
        let mut retry = ticker(stream.retry_interval());

        loop {
            tokio::select! {
                Some(message) = control.recv() => self.handle_message(message).await,
                event = events.recv() => match event {
                    Some(GraphEvent::Playing) => {
                        if self.on_playing().await {
                            for t in [&mut ping, &mut pan, &mut ramp, &mut retry] {
                                t.reset();
                            }
                        }
                    }
                    Some(GraphEvent::EndOfStream(source)) => self.on_source_done(source).await,
                    Some(GraphEvent::SourceError { source, message }) => {
                        warn!("Session {} - source {} failed: {}", self.session_id, source, message);
                        self.on_source_done(source).await;
                    }
                    Some(GraphEvent::Error(message)) => {
                        error!("Session {} - pipeline error: {}", self.session_id, message);
                        break;
                    }
                    None => {
                        warn!("Session {} - graph event channel closed", self.session_id);
                        break;
                    }
                },
                Some(timer) = self.timers.recv() => self.dispatch_timer(timer).await,
                Some(outcome) = next_probe(self.mixer.as_mut()) => {
                    if let Some(mixer) = self.mixer.as_mut() {
                        mixer.on_probe_result(outcome, self.graph.as_mut()).await;
                    }
                }
                _ = ping.tick(), if self.playing => {
                    if !self.check_alive().await {
                        break;
                    }
                }
                _ = pan.tick(), if self.playing => {
                    for player in self.players.iter_mut() {
                        player.pan_tick(self.graph.as_mut()).await;
                    }
                }
                _ = ramp.tick(), if self.playing && self.mixer.is_some() => {
                    if let Some(mixer) = self.mixer.as_mut() {
                        mixer.ramp_tick(self.graph.as_mut()).await;
                    }
                }
                _ = retry.tick(), if self.playing => self.nudge_players().await,
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Apply one control message.
    pub async fn handle_message(&mut self, message: ControlMessage) {
        debug!("Session {} - {}", self.session_id, message.name());
        match message {
            ControlMessage::Heartbeat => self.watchdog.heartbeat(),
            ControlMessage::MoveListener { listener } => {
                self.watchdog.heartbeat();
                if listener.position().is_some() {
                    self.move_listener(listener).await;
                }
            }
            ControlMessage::ModifyStream {
                tags,
                language,
                listener,
            } => {
                self.watchdog.heartbeat();
                if let Some(language) = language {
                    if let Err(e) = self
                        .services
                        .store
                        .set_session_language(self.session_id, &language)
                        .await
                    {
                        warn!("Session {} - failed to store language: {}", self.session_id, e);
                    }
                    self.collection.set_language(&language).await;
                }
                if let Some(tags) = tags {
                    self.tag_filter = tags;
                }
                let moved = listener.position().is_some();
                if moved {
                    self.listener = listener.clone();
                }
                self.refresh_recordings().await;
                if moved {
                    self.move_listener(listener).await;
                }
            }
            ControlMessage::RefreshRecordings => self.refresh_recordings().await,
            ControlMessage::SkipAhead => {
                for player in self.players.iter_mut() {
                    player.skip_ahead(self.graph.as_mut()).await;
                }
            }
            ControlMessage::PlayAsset { asset_id } => {
                // stop once a track has started the asset
                for player in self.players.iter_mut() {
                    match player.play_asset(asset_id, self.graph.as_mut()).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Session {} - cannot play asset {}: {}", self.session_id, asset_id, e);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Stop the graph and players and log the cleanup event. Safe to call
    /// more than once.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        info!("Session {} - tearing down", self.session_id);

        for player in self.players.iter_mut() {
            player.shutdown();
        }
        if self.graph.is_running() {
            if let Err(e) = self.graph.stop().await {
                warn!("Session {} - failed to stop graph: {:#}", self.session_id, e);
            }
        }

        let event = SessionEvent {
            session_id: self.session_id,
            event_type: CLEANUP_EVENT.to_string(),
            server_time: Utc::now(),
        };
        if let Err(e) = self.services.store.log_event(event).await {
            warn!("Session {} - failed to log cleanup: {}", self.session_id, e);
        }
    }

    /// Returns true the first time the graph reports playing.
    async fn on_playing(&mut self) -> bool {
        if self.playing {
            debug!("Session {} - graph playing again", self.session_id);
            return false;
        }
        info!("Session {} - graph playing", self.session_id);
        self.playing = true;
        self.collection.start().await;
        for player in self.players.iter_mut() {
            player.start();
        }
        self.watchdog.heartbeat();
        true
    }

    async fn attach_ambient(&mut self) {
        let speakers = std::mem::take(&mut self.speakers);
        if speakers.is_empty() {
            self.attach_silence().await;
            return;
        }
        let mixer = AmbientMixer::new(
            self.listener.clone(),
            speakers,
            self.services.probe.clone(),
            self.options.stream.ambient_ramp_step,
        )
        .with_probe_backoff(self.options.stream.speaker_probe_backoff());
        self.mixer = Some(mixer);
    }

    async fn attach_silence(&mut self) {
        match self.graph.add_source(SourceKind::Silence).await {
            Ok(source) => self.silence = Some(source),
            Err(e) => warn!("Session {} - failed to add silence: {:#}", self.session_id, e),
        }
    }

    async fn on_source_done(&mut self, source: SourceId) {
        for player in self.players.iter_mut() {
            if player.on_source_finished(source, self.graph.as_mut()).await {
                return;
            }
        }
        if let Some(mixer) = self.mixer.as_mut() {
            if mixer.on_source_ended(source, self.graph.as_mut()).await {
                return;
            }
        }
        if self.silence == Some(source) {
            warn!("Session {} - silence source ended, replacing", self.session_id);
            self.silence = None;
            self.attach_silence().await;
            return;
        }
        debug!("Session {} - event for unknown source {}", self.session_id, source);
    }

    async fn dispatch_timer(&mut self, timer: TrackTimer) {
        let track = match timer {
            TrackTimer::Start { track, .. } | TrackTimer::Teardown { track, .. } => track,
        };
        match self.players.get_mut(track) {
            Some(player) => player.on_timer(timer, self.graph.as_mut()).await,
            None => debug!("Session {} - timer for unknown track {}", self.session_id, track),
        }
    }

    async fn check_alive(&mut self) -> bool {
        let listeners = self.services.server.listener_count(&self.sink.mount).await;
        if self.watchdog.is_alive(listeners) {
            return true;
        }
        info!(
            "Session {} - no listeners and no heartbeat for {:?}",
            self.session_id,
            self.watchdog.idle_for()
        );
        false
    }

    async fn move_listener(&mut self, listener: ListenerState) {
        self.listener = listener.clone();
        if let Some(mixer) = self.mixer.as_mut() {
            mixer.move_listener(listener.clone());
        }
        self.collection.move_listener(listener).await;
    }

    async fn refresh_recordings(&mut self) {
        self.collection
            .update_request(self.listener.clone(), self.tag_filter.clone())
            .await;
        self.nudge_players().await;
    }

    async fn nudge_players(&mut self) {
        for player in self.players.iter_mut() {
            player.nudge(self.graph.as_mut()).await;
        }
    }
}

/// Next probe result of `mixer`; never resolves without a mixer.
async fn next_probe(mixer: Option<&mut AmbientMixer>) -> Option<ProbeOutcome> {
    match mixer {
        Some(mixer) => mixer.next_probe().await,
        None => std::future::pending().await,
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
