use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::GraphBackend;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub icecast: IcecastConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "roundstream".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Streaming server connection. Admin credentials query mounts, source
/// credentials publish audio.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IcecastConfig {
    pub host: String,
    pub port: u16,
    /// Host name listeners use to reach the server.
    pub public_host: String,
    pub admin_username: String,
    pub admin_password: String,
    pub source_username: String,
    pub source_password: String,
    pub request_timeout_ms: u64,
}

impl Default for IcecastConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            public_host: "localhost".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "hackme".to_string(),
            source_username: "source".to_string(),
            source_password: "hackme".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

impl IcecastConfig {
    /// URL listeners use for `mount`.
    pub fn public_url(&self, mount: &str) -> String {
        format!("http://{}:{}{}", self.public_host, self.port, mount)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "roundstream.control".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// JSON catalog file.
    pub path: PathBuf,
    /// Directory recording filenames are relative to.
    pub media_root: PathBuf,
    /// Listening history and session events, as JSON lines.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    /// Skip recordings whose media file is missing.
    #[serde(default = "default_true")]
    pub check_media: bool,
}

/// Per-session engine tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Audio graph session processes render with.
    pub graph_backend: GraphBackend,
    /// Geofence radius when neither session nor project sets one.
    pub recording_radius_m: f64,
    pub banned_timeout_secs: u64,
    pub heartbeat_timeout_secs: u64,
    /// Watchdog interval.
    pub ping_interval_ms: u64,
    pub stereo_pan_interval_ms: u64,
    pub num_pan_steps: u32,
    /// How often idle tracks retry for a recording.
    pub track_retry_interval_ms: u64,
    pub ambient_ramp_interval_ms: u64,
    pub ambient_ramp_step: f64,
    /// Wait before re-probing a speaker whose streams were down.
    pub speaker_probe_backoff_secs: u64,
    pub master_volume: f64,
    /// Encoder bitrate when the request names none.
    pub bitrate: u32,
    pub store_timeout_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            graph_backend: GraphBackend::None,
            recording_radius_m: 16.0,
            banned_timeout_secs: 60 * 60,
            heartbeat_timeout_secs: 30,
            ping_interval_ms: 10_000,
            stereo_pan_interval_ms: 10,
            num_pan_steps: 200,
            track_retry_interval_ms: 1000,
            ambient_ramp_interval_ms: 50,
            ambient_ramp_step: 0.05,
            speaker_probe_backoff_secs: 60,
            master_volume: 3.0,
            bitrate: 128,
            store_timeout_ms: 5000,
            probe_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn banned_timeout(&self) -> Duration {
        Duration::from_secs(self.banned_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn pan_interval(&self) -> Duration {
        Duration::from_millis(self.stereo_pan_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.track_retry_interval_ms.max(1))
    }

    pub fn ramp_interval(&self) -> Duration {
        Duration::from_millis(self.ambient_ramp_interval_ms.max(1))
    }

    pub fn speaker_probe_backoff(&self) -> Duration {
        Duration::from_secs(self.speaker_probe_backoff_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// How the supervisor waits for a spawned session's mount.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub wait_interval_ms: u64,
    pub wait_retries: u32,
    /// Session binary. Defaults to the running executable.
    pub program: Option<PathBuf>,
    /// Config file passed to spawned sessions.
    pub config_path: Option<PathBuf>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            wait_interval_ms: 1000,
            wait_retries: 15,
            program: None,
            config_path: None,
        }
    }
}

impl SpawnConfig {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load `path` (TOML), then apply `ROUNDSTREAM__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ROUNDSTREAM").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[catalog]
path = "catalog.json"
media_root = "media"

[stream]
recording_radius_m = 25.0
bitrate = 96
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.stream.recording_radius_m, 25.0);
        assert_eq!(config.stream.bitrate, 96);
        assert_eq!(config.stream.graph_backend, GraphBackend::None);
        assert_eq!(config.stream.heartbeat_timeout_secs, 30);
        assert_eq!(config.spawn.wait_retries, 15);
        assert_eq!(config.nats.subject_prefix, "roundstream.control");
        assert!(config.catalog.check_media);
        assert_eq!(config.service.http.port, 3000);
    }

    #[test]
    fn test_public_url() {
        let icecast = IcecastConfig {
            public_host: "radio.example.org".to_string(),
            ..Default::default()
        };
        assert_eq!(
            icecast.public_url("/stream3.mp3"),
            "http://radio.example.org:8000/stream3.mp3"
        );
    }
}
