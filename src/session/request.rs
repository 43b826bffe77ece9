use serde::{Deserialize, Serialize};

use crate::listener::ListenerState;
use crate::store::{AudioFormat, ProjectId, SessionId};

/// Parameters a session process is started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Overrides the project's format.
    #[serde(default)]
    pub audio_format: Option<AudioFormat>,
    #[serde(default)]
    pub bitrate: Option<u32>,
}

impl StreamRequest {
    pub fn new(session_id: SessionId, project_id: ProjectId) -> Self {
        Self {
            session_id,
            project_id,
            latitude: None,
            longitude: None,
            audio_format: None,
            bitrate: None,
        }
    }

    pub fn listener(&self) -> ListenerState {
        ListenerState {
            latitude: self.latitude,
            longitude: self.longitude,
            ..Default::default()
        }
    }

    /// Arguments for the `stream` subcommand.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "stream".to_string(),
            "--session-id".to_string(),
            self.session_id.to_string(),
            "--project-id".to_string(),
            self.project_id.to_string(),
        ];
        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            args.push("--latitude".to_string());
            args.push(lat.to_string());
            args.push("--longitude".to_string());
            args.push(lon.to_string());
        }
        if let Some(format) = self.audio_format {
            args.push("--audio-format".to_string());
            args.push(format.to_string());
        }
        if let Some(bitrate) = self.bitrate {
            args.push("--bitrate".to_string());
            args.push(bitrate.to_string());
        }
        args
    }
}
