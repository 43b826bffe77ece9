//! Per-session playlist over the geofenced, tag-filtered asset pool.
//!
//! Every tracked recording sits in exactly one [`Partition`]. All partition
//! state lives behind a single lock so refreshes, moves and picks never
//! interleave.

pub mod filters;
pub mod ordering;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::StreamResult;
use crate::listener::ListenerState;
use crate::store::{
    AssetId, AssetOrdering, AssetStore, ProjectId, Recording, RecordingQuery, RepeatMode,
    SessionId, TagFilterKind, TagId, TimedAsset,
};
use filters::apply_tag_filters;
use ordering::{insertion_index, order_recordings};

/// Settings fixed for the lifetime of one collection.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    /// Geofence radius in meters.
    pub radius_m: f64,
    pub ordering: AssetOrdering,
    pub repeat_mode: RepeatMode,
    pub banned_timeout: Duration,
    pub geo_listen_enabled: bool,
    /// Used when a request names no tags.
    pub default_tags: Vec<TagId>,
    pub language: Option<String>,
    pub timed_asset_priority: bool,
    /// When set, recordings whose media file is missing here are skipped.
    pub media_root: Option<PathBuf>,
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Far,
    Unplayed,
    Played,
    Banned,
}

struct State {
    listener: ListenerState,
    tag_filter: Vec<TagId>,
    language: Option<String>,
    tracked: HashMap<AssetId, Recording>,
    catalog_order: Vec<AssetId>,
    far: HashSet<AssetId>,
    unplayed: VecDeque<AssetId>,
    played: HashSet<AssetId>,
    banned: HashSet<AssetId>,
    last_played: HashMap<AssetId, Instant>,
    played_in_cycle: HashSet<AssetId>,
    timed: Vec<TimedAsset>,
    started_at: Option<Instant>,
    rng: StdRng,
}

pub struct RecordingCollection {
    store: Arc<dyn AssetStore>,
    config: CollectionConfig,
    state: Mutex<State>,
}

impl RecordingCollection {
    /// Create an empty collection. Call [`update_request`](Self::update_request)
    /// to populate it.
    pub fn new(store: Arc<dyn AssetStore>, config: CollectionConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = State {
            listener: ListenerState::unknown(),
            tag_filter: Vec::new(),
            language: config.language.clone(),
            tracked: HashMap::new(),
            catalog_order: Vec::new(),
            far: HashSet::new(),
            unplayed: VecDeque::new(),
            played: HashSet::new(),
            banned: HashSet::new(),
            last_played: HashMap::new(),
            played_in_cycle: HashSet::new(),
            timed: Vec::new(),
            started_at: None,
            rng,
        };
        Self {
            store,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Mark the start of playback. Timed assets are offset from here.
    pub async fn start(&self) {
        self.state.lock().await.started_at = Some(Instant::now());
    }

    /// Re-fetch the candidate pool and re-partition it for `listener`.
    ///
    /// Store failures are logged and leave the collection empty.
    pub async fn update_request(&self, listener: ListenerState, tag_filter: Vec<TagId>) {
        let mut state = self.state.lock().await;

        let tags = if tag_filter.is_empty() {
            self.config.default_tags.clone()
        } else {
            tag_filter.clone()
        };
        let query = RecordingQuery {
            project_id: self.config.project_id,
            tag_ids: tags,
            language: state.language.clone(),
        };
        let candidates = self.fetch_candidates(&query, &listener).await;
        let timed = match self.store.timed_assets(self.config.project_id).await {
            Ok(timed) => timed,
            Err(e) => {
                warn!("Failed to load timed assets: {}", e);
                Vec::new()
            }
        };

        state.listener = listener;
        state.tag_filter = tag_filter;
        state.catalog_order = candidates.iter().map(|r| r.id).collect();
        state.tracked = candidates.into_iter().map(|r| (r.id, r)).collect();
        state.timed = timed;

        let now = Instant::now();
        let timeout = self.config.banned_timeout;
        let State {
            tracked,
            banned,
            last_played,
            played_in_cycle,
            ..
        } = &mut *state;
        banned.retain(|id| tracked.contains_key(id));
        for (id, at) in last_played.iter() {
            if tracked.contains_key(id) && now.duration_since(*at) < timeout {
                banned.insert(*id);
            }
        }
        played_in_cycle.retain(|id| tracked.contains_key(id));

        state.reclassify(&self.config);
        info!(
            "Asset counts - tracked: {}, unplayed: {}, played: {}, banned: {}, far: {}",
            state.tracked.len(),
            state.unplayed.len(),
            state.played.len(),
            state.banned.len(),
            state.far.len()
        );
    }

    /// Re-partition the tracked recordings for a new listener position.
    pub async fn move_listener(&self, listener: ListenerState) {
        let mut state = self.state.lock().await;
        state.listener = listener;
        state.reclassify(&self.config);
        debug!(
            "Listener moved: {} unplayed, {} far",
            state.unplayed.len(),
            state.far.len()
        );
    }

    /// Take the next recording to play, banning it from replay.
    pub async fn get_recording(&self) -> Option<Recording> {
        let rec = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            state.expire_bans(&self.config, now);
            let id = state.pick(&self.config, now)?;
            state.mark_played(&self.config, id, now);
            state.tracked.get(&id).cloned()?
        };

        if let Some(root) = &self.config.media_root {
            let path = root.join(&rec.filename);
            let exists = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !exists {
                error!("File not found for recording {}: {}", rec.id, path.display());
                return None;
            }
        }

        debug!("Selected recording {} ({})", rec.id, rec.filename);
        Some(rec)
    }

    /// Queue `asset_id` to play next regardless of distance or bans.
    pub async fn add_recording(&self, asset_id: AssetId) -> StreamResult<()> {
        let rec = self.store.get_recording(asset_id).await?;
        let mut state = self.state.lock().await;
        state.detach(asset_id);
        if !state.tracked.contains_key(&asset_id) {
            state.catalog_order.push(asset_id);
        }
        state.tracked.insert(asset_id, rec);
        state.unplayed.push_front(asset_id);
        info!("Queued recording {} to play next", asset_id);
        Ok(())
    }

    pub async fn has_nearby_unplayed(&self) -> bool {
        !self.state.lock().await.unplayed.is_empty()
    }

    /// Number of recordings still waiting to play.
    pub async fn remaining(&self) -> usize {
        self.state.lock().await.unplayed.len()
    }

    pub async fn partition_of(&self, asset_id: AssetId) -> Option<Partition> {
        let state = self.state.lock().await;
        if state.banned.contains(&asset_id) {
            Some(Partition::Banned)
        } else if state.unplayed.contains(&asset_id) {
            Some(Partition::Unplayed)
        } else if state.played.contains(&asset_id) {
            Some(Partition::Played)
        } else if state.far.contains(&asset_id) {
            Some(Partition::Far)
        } else {
            None
        }
    }

    /// Unplayed recordings in play order.
    pub async fn unplayed_ids(&self) -> Vec<AssetId> {
        self.state.lock().await.unplayed.iter().copied().collect()
    }

    pub async fn listener(&self) -> ListenerState {
        self.state.lock().await.listener.clone()
    }

    pub async fn tag_filter(&self) -> Vec<TagId> {
        self.state.lock().await.tag_filter.clone()
    }

    /// Language used for the next refresh.
    pub async fn set_language(&self, language: &str) {
        self.state.lock().await.language = Some(language.to_string());
    }

    async fn fetch_candidates(
        &self,
        query: &RecordingQuery,
        listener: &ListenerState,
    ) -> Vec<Recording> {
        let mut recs = match self.store.get_recordings(query).await {
            Ok(recs) => recs,
            Err(e) => {
                error!("Failed to load recordings for session {}: {}", self.config.session_id, e);
                return Vec::new();
            }
        };

        match self.store.blocked_asset_ids(self.config.session_id).await {
            Ok(blocked) if !blocked.is_empty() => {
                let blocked: HashSet<AssetId> = blocked.into_iter().collect();
                recs.retain(|r| !blocked.contains(&r.id));
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to load blocked assets: {}", e),
        }

        let filters: Vec<TagFilterKind> = match self.store.get_tags(&query.tag_ids).await {
            Ok(tags) => tags.iter().filter_map(|t| t.filter).collect(),
            Err(e) => {
                warn!("Failed to load tag filters: {}", e);
                Vec::new()
            }
        };
        if filters.is_empty() {
            recs
        } else {
            apply_tag_filters(recs, &filters, listener, Utc::now())
        }
    }
}

impl State {
    fn is_nearby(&self, config: &CollectionConfig, rec: &Recording) -> bool {
        if !config.geo_listen_enabled {
            return true;
        }
        self.listener.can_hear(rec.location(), config.radius_m)
    }

    fn is_nearby_id(&self, config: &CollectionConfig, id: AssetId) -> Option<bool> {
        self.tracked.get(&id).map(|r| self.is_nearby(config, r))
    }

    /// Remove `id` from every partition.
    fn detach(&mut self, id: AssetId) {
        self.far.remove(&id);
        self.played.remove(&id);
        self.banned.remove(&id);
        self.unplayed.retain(|x| *x != id);
    }

    fn ordered(&mut self, ids: Vec<AssetId>, ordering: AssetOrdering) -> Vec<AssetId> {
        let tracked = &self.tracked;
        let mut refs: Vec<&Recording> = ids.iter().filter_map(|id| tracked.get(id)).collect();
        order_recordings(&mut refs, ordering, &mut self.rng);
        refs.iter().map(|r| r.id).collect()
    }

    fn reclassify(&mut self, config: &CollectionConfig) {
        let mut fresh = Vec::new();
        let mut far = HashSet::new();
        let mut played = HashSet::new();
        let mut forget = Vec::new();

        for id in &self.catalog_order {
            let rec = match self.tracked.get(id) {
                Some(rec) => rec,
                None => continue,
            };
            let nearby = self.is_nearby(config, rec);
            if self.banned.contains(id) {
                if !nearby {
                    forget.push(*id);
                }
            } else if !nearby {
                far.insert(*id);
                forget.push(*id);
            } else if self.played_in_cycle.contains(id) {
                played.insert(*id);
            } else {
                fresh.push(*id);
            }
        }

        for id in forget {
            self.played_in_cycle.remove(&id);
        }
        self.far = far;
        self.played = played;
        self.unplayed = self.ordered(fresh, config.ordering).into();
    }

    /// Release recordings whose ban window has elapsed.
    fn expire_bans(&mut self, config: &CollectionConfig, now: Instant) {
        let mut expired: Vec<(Instant, AssetId)> = self
            .banned
            .iter()
            .filter_map(|id| {
                let at = self.last_played.get(id).copied().unwrap_or(now);
                (now.duration_since(at) >= config.banned_timeout).then_some((at, *id))
            })
            .collect();
        expired.sort();

        for (_, id) in expired {
            self.banned.remove(&id);
            match self.is_nearby_id(config, id) {
                None => {}
                Some(false) => {
                    self.far.insert(id);
                    self.played_in_cycle.remove(&id);
                }
                Some(true) if self.played_in_cycle.contains(&id) => {
                    self.played.insert(id);
                }
                Some(true) => self.merge_unplayed(config, id),
            }
        }
    }

    fn merge_unplayed(&mut self, config: &CollectionConfig, id: AssetId) {
        let index = {
            let queue: Vec<&Recording> = self
                .unplayed
                .iter()
                .filter_map(|x| self.tracked.get(x))
                .collect();
            match self.tracked.get(&id) {
                Some(rec) => insertion_index(&queue, rec, config.ordering),
                None => return,
            }
        };
        let index = index.min(self.unplayed.len());
        self.unplayed.insert(index, id);
    }

    /// Refill the unplayed queue with every nearby, unbanned recording.
    fn reset_unplayed(&mut self, config: &CollectionConfig) {
        let ids: Vec<AssetId> = self
            .catalog_order
            .iter()
            .copied()
            .filter(|id| !self.banned.contains(id))
            .filter(|id| self.is_nearby_id(config, *id).unwrap_or(false))
            .collect();
        for id in &ids {
            self.played_in_cycle.remove(id);
            self.played.remove(id);
        }
        debug!("Continuous mode: resetting {} recordings", ids.len());
        self.unplayed = self.ordered(ids, config.ordering).into();
    }

    fn take_timed(&mut self, config: &CollectionConfig, now: Instant) -> Option<AssetId> {
        let started = self.started_at?;
        let elapsed = now.duration_since(started).as_secs_f64();
        let mut ids: Vec<AssetId> = self
            .timed
            .iter()
            .filter(|t| t.start as f64 <= elapsed && elapsed <= t.end as f64)
            .map(|t| t.asset_id)
            .filter(|id| {
                self.tracked.contains_key(id)
                    && !self.banned.contains(id)
                    && !self.played_in_cycle.contains(id)
            })
            .collect();
        ids.dedup();
        self.ordered(ids, config.ordering).first().copied()
    }

    fn pick(&mut self, config: &CollectionConfig, now: Instant) -> Option<AssetId> {
        if config.timed_asset_priority {
            if let Some(id) = self.take_timed(config, now) {
                return Some(id);
            }
        }
        if let Some(id) = self.unplayed.pop_front() {
            return Some(id);
        }
        if config.repeat_mode == RepeatMode::Continuous {
            self.reset_unplayed(config);
            if let Some(id) = self.unplayed.pop_front() {
                return Some(id);
            }
        }
        if !config.timed_asset_priority {
            return self.take_timed(config, now);
        }
        None
    }

    fn mark_played(&mut self, config: &CollectionConfig, id: AssetId, now: Instant) {
        self.detach(id);
        self.last_played.insert(id, now);
        self.played_in_cycle.insert(id);
        if !config.banned_timeout.is_zero() {
            self.banned.insert(id);
        } else if self.is_nearby_id(config, id).unwrap_or(false) {
            self.played.insert(id);
        } else {
            self.far.insert(id);
            self.played_in_cycle.remove(&id);
        }
    }
}
