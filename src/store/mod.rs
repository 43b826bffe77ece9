//! Catalog access for the streaming engine.
//!
//! The engine only ever talks to the catalog through [`AssetStore`]. The
//! crate ships [`MemoryStore`], loaded from a JSON catalog file.

pub mod memory;
pub mod models;
pub mod timeout;

pub use memory::{BlockedAsset, Catalog, MemoryStore, MIN_RECORDING_MS};
pub use models::*;
pub use timeout::TimeoutStore;

use crate::error::StreamResult;

/// Candidate query for one session's recording pool.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingQuery {
    pub project_id: ProjectId,
    /// Requested tag ids. Empty means no tag restriction.
    pub tag_ids: Vec<TagId>,
    /// Restrict to recordings in this language.
    pub language: Option<String>,
}

/// Query contract for recordings, speakers, tunings and session state.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    async fn get_session(&self, session_id: SessionId) -> StreamResult<SessionRecord>;

    async fn get_project(&self, project_id: ProjectId) -> StreamResult<ProjectRecord>;

    async fn set_session_language(&self, session_id: SessionId, language: &str)
        -> StreamResult<()>;

    /// Submitted recordings matching the query.
    ///
    /// A recording matches when it carries at least one requested tag from
    /// every tag category present in the request.
    async fn get_recordings(&self, query: &RecordingQuery) -> StreamResult<Vec<Recording>>;

    async fn get_recording(&self, asset_id: AssetId) -> StreamResult<Recording>;

    async fn get_tags(&self, tag_ids: &[TagId]) -> StreamResult<Vec<Tag>>;

    async fn active_speakers(&self, project_id: ProjectId) -> StreamResult<Vec<Speaker>>;

    async fn track_tunings(&self, project_id: ProjectId) -> StreamResult<Vec<TrackTuning>>;

    async fn timed_assets(&self, project_id: ProjectId) -> StreamResult<Vec<TimedAsset>>;

    /// Assets the session's device has blocked.
    async fn blocked_asset_ids(&self, session_id: SessionId) -> StreamResult<Vec<AssetId>>;

    async fn append_history(&self, item: ListeningHistoryItem) -> StreamResult<()>;

    async fn log_event(&self, event: SessionEvent) -> StreamResult<()>;
}
