use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::clip::{uniform_ms, ClipPlan};
use super::pan::Panner;
use crate::collection::RecordingCollection;
use crate::error::StreamResult;
use crate::icecast::StreamServer;
use crate::pipeline::{AudioGraph, SourceId, SourceKind};
use crate::store::{AssetId, AssetStore, ListeningHistoryItem, Recording, SessionId, TrackTuning};

/// Collaborators shared by every track of a session.
#[derive(Clone)]
pub struct TrackContext {
    pub session_id: SessionId,
    pub mount: String,
    pub media_root: PathBuf,
    pub collection: Arc<RecordingCollection>,
    pub store: Arc<dyn AssetStore>,
    pub server: Arc<dyn StreamServer>,
}

/// One-shot timer fired back into the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTimer {
    /// Dead air is over, try to start a clip.
    Start { track: usize, generation: u64 },
    /// A skip fade-out finished, remove the source.
    Teardown { track: usize, generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Waiting,
    Playing,
    DeadAir,
}

struct ActiveClip {
    source: SourceId,
    recording: Recording,
    fading: bool,
}

enum TrackState {
    /// `armed` when a start timer is pending, otherwise idle until nudged.
    Waiting { armed: bool },
    Playing(ActiveClip),
    DeadAir,
}

/// In-band stream title for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub track_id: u64,
    pub remaining: usize,
    pub asset: Option<AssetId>,
    pub tags: Vec<u64>,
    pub complete: bool,
}

impl fmt::Display for TrackMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audiotrack={}&remaining={}", self.track_id, self.remaining)?;
        match self.asset {
            Some(asset) if self.complete => write!(f, "&asset={}&complete=true", asset),
            Some(asset) => {
                let tags: Vec<String> = self.tags.iter().map(|t| t.to_string()).collect();
                write!(f, "&asset={}&tags={}", asset, tags.join(","))
            }
            None => write!(f, "&status=nothing_nearby"),
        }
    }
}

/// Plays randomized clips from the collection on one track slot.
pub struct TrackPlayer {
    index: usize,
    tuning: TrackTuning,
    ctx: TrackContext,
    timers: mpsc::UnboundedSender<TrackTimer>,
    state: TrackState,
    generation: u64,
    panner: Panner,
    rng: StdRng,
}

impl TrackPlayer {
    pub fn new(
        index: usize,
        tuning: TrackTuning,
        ctx: TrackContext,
        timers: mpsc::UnboundedSender<TrackTimer>,
        num_pan_steps: u32,
        pan_interval: Duration,
    ) -> Self {
        let panner = Panner::new(&tuning, num_pan_steps, pan_interval);
        Self {
            index,
            tuning,
            ctx,
            timers,
            state: TrackState::Waiting { armed: false },
            generation: 0,
            panner,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for clip and pan choices.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> TrackStatus {
        match self.state {
            TrackState::Waiting { .. } => TrackStatus::Waiting,
            TrackState::Playing(_) => TrackStatus::Playing,
            TrackState::DeadAir => TrackStatus::DeadAir,
        }
    }

    pub fn current_recording(&self) -> Option<AssetId> {
        match &self.state {
            TrackState::Playing(clip) => Some(clip.recording.id),
            _ => None,
        }
    }

    pub fn current_source(&self) -> Option<SourceId> {
        match &self.state {
            TrackState::Playing(clip) => Some(clip.source),
            _ => None,
        }
    }

    pub fn pan_position(&self) -> f64 {
        self.panner.position()
    }

    /// Arm the first dead-air timer. Called once the graph is playing.
    pub fn start(&mut self) {
        let delay = self.dead_air();
        self.arm(delay, false);
        self.state = TrackState::Waiting { armed: true };
    }

    /// Stop reacting to pending timers.
    pub fn shutdown(&mut self) {
        self.generation += 1;
    }

    pub async fn on_timer(&mut self, timer: TrackTimer, graph: &mut dyn AudioGraph) {
        match timer {
            TrackTimer::Start { generation, .. } if generation == self.generation => {
                self.try_start(graph).await;
            }
            TrackTimer::Teardown { generation, .. } if generation == self.generation => {
                self.teardown(graph).await;
            }
            _ => debug!("Track {}: stale timer {:?}", self.index, timer),
        }
    }

    /// Pull the next recording and start it, or go idle if there is none.
    pub async fn try_start(&mut self, graph: &mut dyn AudioGraph) {
        self.generation += 1;

        let rec = match self.ctx.collection.get_recording().await {
            Some(rec) => rec,
            None => {
                debug!("Track {}: nothing nearby", self.index);
                self.state = TrackState::Waiting { armed: false };
                self.set_graph_metadata(None, false, graph).await;
                return;
            }
        };

        let plan = ClipPlan::choose(&self.tuning, &rec, &mut self.rng);
        let kind = SourceKind::Clip {
            path: self.ctx.media_root.join(&rec.filename),
            start: plan.start,
            duration: plan.duration,
        };

        let source = match graph.add_source(kind).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Track {}: failed to attach recording {}: {:#}", self.index, rec.id, e);
                self.enter_dead_air();
                return;
            }
        };
        if let Err(e) = graph.set_envelope(source, plan.envelope()).await {
            warn!("Track {}: failed to set envelope: {:#}", self.index, e);
            if let Err(e) = graph.remove_source(source).await {
                debug!("Track {}: cleanup failed: {:#}", self.index, e);
            }
            self.enter_dead_air();
            return;
        }
        if let Err(e) = graph.set_pan(source, self.panner.position()).await {
            debug!("Track {}: failed to set pan: {:#}", self.index, e);
        }

        info!(
            "Session {} - Playing asset {} filename: {}, duration: {:.2} secs",
            self.ctx.session_id,
            rec.id,
            rec.filename,
            plan.duration.as_secs_f64()
        );

        let history = ListeningHistoryItem {
            session_id: self.ctx.session_id,
            asset_id: rec.id,
            start_time: Utc::now(),
            duration_ms: plan.duration.as_millis() as u64,
        };
        if let Err(e) = self.ctx.store.append_history(history).await {
            warn!("Failed to record history for asset {}: {}", rec.id, e);
        }

        let tags: Vec<u64> = rec.tags.iter().copied().collect();
        self.ctx
            .server
            .push_metadata(rec.id, &tags, &self.ctx.mount)
            .await;

        let asset = rec.id;
        self.state = TrackState::Playing(ActiveClip {
            source,
            recording: rec,
            fading: false,
        });
        self.set_graph_metadata(Some(asset), false, graph).await;
    }

    /// Handle end-of-stream or failure of `source`. Returns false if the
    /// source is not this track's clip.
    pub async fn on_source_finished(&mut self, source: SourceId, graph: &mut dyn AudioGraph) -> bool {
        if self.current_source() != Some(source) {
            return false;
        }
        let asset = self.current_recording();
        self.set_graph_metadata(asset, true, graph).await;
        self.teardown(graph).await;
        true
    }

    /// Fade the current clip out, then tear it down.
    pub async fn skip_ahead(&mut self, graph: &mut dyn AudioGraph) {
        let fade = Duration::from_millis(uniform_ms(
            &mut self.rng,
            self.tuning.min_fadeout_ms,
            self.tuning.max_fadeout_ms,
        ));
        let source = match &mut self.state {
            TrackState::Playing(clip) if !clip.fading => {
                clip.fading = true;
                clip.source
            }
            _ => {
                debug!("Track {}: nothing to skip", self.index);
                return;
            }
        };

        info!("Track {}: skipping ahead, fading out over {:?}", self.index, fade);
        if let Err(e) = graph.fade_out(source, fade).await {
            warn!("Track {}: fade out failed: {:#}", self.index, e);
            self.teardown(graph).await;
            return;
        }
        self.arm(fade, true);
    }

    /// Queue `asset_id` next and cut over to it.
    ///
    /// Returns true when this track started the asset right away. A playing
    /// track only fades out and picks the asset up after its dead air.
    pub async fn play_asset(&mut self, asset_id: AssetId, graph: &mut dyn AudioGraph) -> StreamResult<bool> {
        self.ctx.collection.add_recording(asset_id).await?;
        match self.state {
            TrackState::Playing(_) => {
                self.skip_ahead(graph).await;
                Ok(false)
            }
            _ => {
                self.try_start(graph).await;
                Ok(self.current_recording() == Some(asset_id))
            }
        }
    }

    /// Try to start if idle with nothing scheduled.
    pub async fn nudge(&mut self, graph: &mut dyn AudioGraph) {
        if let TrackState::Waiting { armed: false } = self.state {
            self.try_start(graph).await;
        }
    }

    pub async fn pan_tick(&mut self, graph: &mut dyn AudioGraph) {
        let position = match self.panner.tick(&mut self.rng) {
            Some(p) => p,
            None => return,
        };
        if let Some(source) = self.current_source() {
            if let Err(e) = graph.set_pan(source, position).await {
                debug!("Track {}: failed to pan: {:#}", self.index, e);
            }
        }
    }

    async fn teardown(&mut self, graph: &mut dyn AudioGraph) {
        if let TrackState::Playing(clip) = &self.state {
            if let Err(e) = graph.remove_source(clip.source).await {
                warn!("Track {}: failed to remove source: {:#}", self.index, e);
            }
            debug!("Track {}: finished asset {}", self.index, clip.recording.id);
        }
        self.enter_dead_air();
    }

    fn enter_dead_air(&mut self) {
        let delay = self.dead_air();
        self.arm(delay, false);
        self.state = TrackState::DeadAir;
    }

    fn dead_air(&mut self) -> Duration {
        Duration::from_millis(uniform_ms(
            &mut self.rng,
            self.tuning.min_deadair_ms,
            self.tuning.max_deadair_ms,
        ))
    }

    fn arm(&mut self, delay: Duration, teardown: bool) {
        self.generation += 1;
        let generation = self.generation;
        let track = self.index;
        let timer = if teardown {
            TrackTimer::Teardown { track, generation }
        } else {
            TrackTimer::Start { track, generation }
        };
        let tx = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(timer);
        });
    }

    async fn set_graph_metadata(
        &mut self,
        asset: Option<AssetId>,
        complete: bool,
        graph: &mut dyn AudioGraph,
    ) {
        let tags = match &self.state {
            TrackState::Playing(clip) if Some(clip.recording.id) == asset => {
                clip.recording.tags.iter().copied().collect()
            }
            _ => Vec::new(),
        };
        let metadata = TrackMetadata {
            track_id: self.tuning.id,
            remaining: self.ctx.collection.remaining().await,
            asset,
            tags,
            complete,
        };
        if let Err(e) = graph.set_metadata(&metadata.to_string()).await {
            debug!("Track {}: failed to set metadata: {:#}", self.index, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_formats() {
        let mut m = TrackMetadata {
            track_id: 2,
            remaining: 4,
            asset: Some(9),
            tags: vec![1, 3],
            complete: false,
        };
        assert_eq!(m.to_string(), "audiotrack=2&remaining=4&asset=9&tags=1,3");
        m.complete = true;
        assert_eq!(m.to_string(), "audiotrack=2&remaining=4&asset=9&complete=true");
        m.asset = None;
        assert_eq!(m.to_string(), "audiotrack=2&remaining=4&status=nothing_nearby");
    }
}
