use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::models::*;
use super::{AssetStore, RecordingQuery};
use crate::error::{StreamError, StreamResult};

/// Bounds every call on an inner store. A call that overruns fails with
/// [`StreamError::ExternalService`].
pub struct TimeoutStore {
    inner: Arc<dyn AssetStore>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn AssetStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl Future<Output = StreamResult<T>> + Send,
    ) -> StreamResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::ExternalService(format!(
                "store {} timed out after {:?}",
                op, self.timeout
            ))),
        }
    }
}

#[async_trait::async_trait]
impl AssetStore for TimeoutStore {
    async fn get_session(&self, session_id: SessionId) -> StreamResult<SessionRecord> {
        self.bounded("get_session", self.inner.get_session(session_id))
            .await
    }

    async fn get_project(&self, project_id: ProjectId) -> StreamResult<ProjectRecord> {
        self.bounded("get_project", self.inner.get_project(project_id))
            .await
    }

    async fn set_session_language(
        &self,
        session_id: SessionId,
        language: &str,
    ) -> StreamResult<()> {
        self.bounded(
            "set_session_language",
            self.inner.set_session_language(session_id, language),
        )
        .await
    }

    async fn get_recordings(&self, query: &RecordingQuery) -> StreamResult<Vec<Recording>> {
        self.bounded("get_recordings", self.inner.get_recordings(query))
            .await
    }

    async fn get_recording(&self, asset_id: AssetId) -> StreamResult<Recording> {
        self.bounded("get_recording", self.inner.get_recording(asset_id))
            .await
    }

    async fn get_tags(&self, tag_ids: &[TagId]) -> StreamResult<Vec<Tag>> {
        self.bounded("get_tags", self.inner.get_tags(tag_ids)).await
    }

    async fn active_speakers(&self, project_id: ProjectId) -> StreamResult<Vec<Speaker>> {
        self.bounded("active_speakers", self.inner.active_speakers(project_id))
            .await
    }

    async fn track_tunings(&self, project_id: ProjectId) -> StreamResult<Vec<TrackTuning>> {
        self.bounded("track_tunings", self.inner.track_tunings(project_id))
            .await
    }

    async fn timed_assets(&self, project_id: ProjectId) -> StreamResult<Vec<TimedAsset>> {
        self.bounded("timed_assets", self.inner.timed_assets(project_id))
            .await
    }

    async fn blocked_asset_ids(&self, session_id: SessionId) -> StreamResult<Vec<AssetId>> {
        self.bounded(
            "blocked_asset_ids",
            self.inner.blocked_asset_ids(session_id),
        )
        .await
    }

    async fn append_history(&self, item: ListeningHistoryItem) -> StreamResult<()> {
        self.bounded("append_history", self.inner.append_history(item))
            .await
    }

    async fn log_event(&self, event: SessionEvent) -> StreamResult<()> {
        self.bounded("log_event", self.inner.log_event(event)).await
    }
}
