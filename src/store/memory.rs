use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::models::*;
use super::{AssetStore, RecordingQuery};
use crate::error::{StreamError, StreamResult};
use crate::media;

/// Recordings shorter than this are never streamed.
pub const MIN_RECORDING_MS: u64 = 1000;

/// A block vote cast from `device_id` against `asset_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedAsset {
    pub device_id: String,
    pub asset_id: AssetId,
}

/// On-disk catalog layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub projects: Vec<ProjectRecord>,
    pub sessions: Vec<SessionRecord>,
    pub recordings: Vec<Recording>,
    pub speakers: Vec<Speaker>,
    pub track_tunings: Vec<TrackTuning>,
    pub tags: Vec<Tag>,
    pub timed_assets: Vec<TimedAsset>,
    pub blocked: Vec<BlockedAsset>,
    /// Votes blocking the author of `asset_id`, and with it every asset
    /// submitted from that author's device.
    pub blocked_users: Vec<BlockedAsset>,
}

impl Catalog {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))
    }

    /// Fill in missing recording durations from the media files.
    pub fn probe_durations(&mut self, media_root: &Path) {
        for rec in self.recordings.iter_mut().filter(|r| r.duration_ms == 0) {
            let path = media_root.join(&rec.filename);
            match media::probe_duration(&path) {
                Ok(d) => rec.duration_ms = d.as_millis() as u64,
                Err(e) => warn!("Could not probe recording {}: {:#}", rec.id, e),
            }
        }
    }

    /// Device the recording was submitted from.
    fn author_device(&self, asset_id: AssetId) -> Option<&str> {
        let session_id = self.recordings.iter().find(|r| r.id == asset_id)?.session_id?;
        self.sessions
            .iter()
            .find(|s| s.id == session_id)?
            .device_id
            .as_deref()
    }
}

/// Catalog held in memory, with history and events appended to a log.
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    history: RwLock<Vec<ListeningHistoryItem>>,
    events: RwLock<Vec<SessionEvent>>,
    history_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            history: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            history_path: None,
        }
    }

    /// Load a catalog file, probing durations under `media_root` when given.
    pub fn load(path: impl AsRef<Path>, media_root: Option<&Path>) -> Result<Self> {
        let mut catalog = Catalog::from_file(path.as_ref())?;
        if let Some(root) = media_root {
            catalog.probe_durations(root);
        }
        info!(
            "Loaded catalog: {} projects, {} recordings, {} speakers",
            catalog.projects.len(),
            catalog.recordings.len(),
            catalog.speakers.len()
        );
        Ok(Self::new(catalog))
    }

    /// Also append history and events as JSON lines to `path`.
    pub fn with_history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(path.into());
        self
    }

    pub async fn history(&self) -> Vec<ListeningHistoryItem> {
        self.history.read().await.clone()
    }

    pub async fn events(&self) -> Vec<SessionEvent> {
        self.events.read().await.clone()
    }

    /// Replace a recording, or add it if new. Takes effect on the next refresh.
    pub async fn upsert_recording(&self, recording: Recording) {
        let mut catalog = self.catalog.write().await;
        match catalog.recordings.iter_mut().find(|r| r.id == recording.id) {
            Some(existing) => *existing = recording,
            None => catalog.recordings.push(recording),
        }
    }

    async fn append_line<T: Serialize>(&self, value: &T) -> StreamResult<()> {
        let path = match &self.history_path {
            Some(p) => p,
            None => return Ok(()),
        };
        let mut line = serde_json::to_string(value).map_err(StreamError::external)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(StreamError::external)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(StreamError::external)?;
        Ok(())
    }
}

/// True if `rec` has at least one requested tag in every category the
/// request touches.
fn matches_tags(rec: &Recording, requested: &[TagId], categories: &HashMap<TagId, u64>) -> bool {
    let mut by_category: HashMap<u64, Vec<TagId>> = HashMap::new();
    for tag in requested {
        match categories.get(tag) {
            Some(cat) => by_category.entry(*cat).or_default().push(*tag),
            None => debug!("Ignoring unknown tag {}", tag),
        }
    }
    by_category
        .values()
        .all(|tags| tags.iter().any(|t| rec.tags.contains(t)))
}

#[async_trait::async_trait]
impl AssetStore for MemoryStore {
    async fn get_session(&self, session_id: SessionId) -> StreamResult<SessionRecord> {
        self.catalog
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| StreamError::not_found("session", session_id))
    }

    async fn get_project(&self, project_id: ProjectId) -> StreamResult<ProjectRecord> {
        self.catalog
            .read()
            .await
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or_else(|| StreamError::not_found("project", project_id))
    }

    async fn set_session_language(
        &self,
        session_id: SessionId,
        language: &str,
    ) -> StreamResult<()> {
        let mut catalog = self.catalog.write().await;
        let session = catalog
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StreamError::not_found("session", session_id))?;
        session.language = language.to_string();
        Ok(())
    }

    async fn get_recordings(&self, query: &RecordingQuery) -> StreamResult<Vec<Recording>> {
        let catalog = self.catalog.read().await;
        let categories: HashMap<TagId, u64> =
            catalog.tags.iter().map(|t| (t.id, t.category_id)).collect();

        let recs: Vec<Recording> = catalog
            .recordings
            .iter()
            .filter(|r| r.project_id == query.project_id)
            .filter(|r| r.submitted && r.duration_ms >= MIN_RECORDING_MS)
            .filter(|r| match &query.language {
                Some(lang) => &r.language == lang,
                None => true,
            })
            .filter(|r| matches_tags(r, &query.tag_ids, &categories))
            .cloned()
            .collect();

        debug!(
            "Query for project {} with tags {:?} matched {} recordings",
            query.project_id,
            query.tag_ids,
            recs.len()
        );
        Ok(recs)
    }

    async fn get_recording(&self, asset_id: AssetId) -> StreamResult<Recording> {
        self.catalog
            .read()
            .await
            .recordings
            .iter()
            .find(|r| r.id == asset_id)
            .cloned()
            .ok_or_else(|| StreamError::not_found("recording", asset_id))
    }

    async fn get_tags(&self, tag_ids: &[TagId]) -> StreamResult<Vec<Tag>> {
        let wanted: BTreeSet<TagId> = tag_ids.iter().copied().collect();
        Ok(self
            .catalog
            .read()
            .await
            .tags
            .iter()
            .filter(|t| wanted.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn active_speakers(&self, project_id: ProjectId) -> StreamResult<Vec<Speaker>> {
        Ok(self
            .catalog
            .read()
            .await
            .speakers
            .iter()
            .filter(|s| s.project_id == project_id && s.active)
            .cloned()
            .collect())
    }

    async fn track_tunings(&self, project_id: ProjectId) -> StreamResult<Vec<TrackTuning>> {
        Ok(self
            .catalog
            .read()
            .await
            .track_tunings
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn timed_assets(&self, project_id: ProjectId) -> StreamResult<Vec<TimedAsset>> {
        Ok(self
            .catalog
            .read()
            .await
            .timed_assets
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn blocked_asset_ids(&self, session_id: SessionId) -> StreamResult<Vec<AssetId>> {
        let catalog = self.catalog.read().await;
        let device = match catalog
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .and_then(|s| s.device_id.as_deref())
        {
            Some(device) => device,
            None => return Ok(Vec::new()),
        };

        let mut blocked: Vec<AssetId> = catalog
            .blocked
            .iter()
            .filter(|b| b.device_id == device)
            .map(|b| b.asset_id)
            .collect();

        let authors: HashSet<&str> = catalog
            .blocked_users
            .iter()
            .filter(|b| b.device_id == device)
            .filter_map(|b| catalog.author_device(b.asset_id))
            .collect();
        if !authors.is_empty() {
            debug!("Session {} blocks {} authors", session_id, authors.len());
            for rec in &catalog.recordings {
                let by_blocked = catalog
                    .author_device(rec.id)
                    .map_or(false, |author| authors.contains(author));
                if by_blocked && !blocked.contains(&rec.id) {
                    blocked.push(rec.id);
                }
            }
        }
        Ok(blocked)
    }

    async fn append_history(&self, item: ListeningHistoryItem) -> StreamResult<()> {
        self.append_line(&item).await?;
        self.history.write().await.push(item);
        Ok(())
    }

    async fn log_event(&self, event: SessionEvent) -> StreamResult<()> {
        debug!(
            "Session {} event {} at {}",
            event.session_id,
            event.event_type,
            Utc::now()
        );
        self.append_line(&event).await?;
        self.events.write().await.push(event);
        Ok(())
    }
}
