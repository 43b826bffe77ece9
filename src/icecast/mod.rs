pub mod admin;

pub use admin::IcecastAdmin;

use tracing::warn;

use crate::error::StreamResult;
use crate::store::{AssetId, AudioFormat, SessionId, TagId};

/// Mount name for a session's stream, e.g. `/stream42.mp3`
pub fn mount_point(session_id: SessionId, format: AudioFormat) -> String {
    format!("/stream{}.{}", session_id, format.extension())
}

/// Admin view of the streaming server.
///
/// Apart from [`try_stream_exists`](StreamServer::try_stream_exists), calls
/// are best effort: failures are logged and read as "not there".
#[async_trait::async_trait]
pub trait StreamServer: Send + Sync {
    /// Whether `mount` is currently live. Errors are surfaced.
    async fn try_stream_exists(&self, mount: &str) -> StreamResult<bool>;

    async fn stream_exists(&self, mount: &str) -> bool {
        match self.try_stream_exists(mount).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Mount check for {} failed: {}", mount, e);
                false
            }
        }
    }

    /// Listeners connected to `mount`, 0 if unknown.
    async fn listener_count(&self, mount: &str) -> u32;

    /// Announce the asset now playing on `mount`.
    async fn push_metadata(&self, asset_id: AssetId, tags: &[TagId], mount: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_point() {
        assert_eq!(mount_point(42, AudioFormat::Mp3), "/stream42.mp3");
        assert_eq!(mount_point(7, AudioFormat::Ogg), "/stream7.ogg");
    }
}
