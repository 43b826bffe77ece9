pub mod virtual_graph;

pub use virtual_graph::{SourceSnapshot, VirtualGraph};

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{StreamError, StreamResult};
use crate::store::AudioFormat;

/// Which audio graph a session process renders with.
///
/// `None` means no renderer is available to this build; sessions refuse to
/// start rather than run without publishing a mount. `Virtual` is a dry run:
/// the full session logic runs against [`VirtualGraph`] and nothing reaches
/// the streaming server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphBackend {
    #[default]
    None,
    Virtual,
}

impl std::str::FromStr for GraphBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(GraphBackend::None),
            "virtual" => Ok(GraphBackend::Virtual),
            other => Err(format!("unknown graph backend: {}", other)),
        }
    }
}

/// Build the graph for `backend`.
pub fn build_graph(backend: GraphBackend) -> StreamResult<Box<dyn AudioGraph>> {
    match backend {
        GraphBackend::None => Err(StreamError::Configuration(
            "no audio graph backend configured (set stream.graph_backend, or pass --dry-run)"
                .to_string(),
        )),
        GraphBackend::Virtual => Ok(Box::new(VirtualGraph::new())),
    }
}

/// Handle for a source attached to the graph.
pub type SourceId = u64;

/// Where and how the mixed output is encoded and published.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Icecast mount, e.g. `/stream42.mp3`
    pub mount: String,
    pub format: AudioFormat,
    /// Encoder bitrate in kbit/s
    pub bitrate: u32,
    /// Gain applied to the final mix
    pub master_volume: f64,
    pub host: String,
    pub port: u16,
    pub source_username: String,
    pub source_password: String,
}

/// What a graph source plays.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Segment `[start, start + duration)` of a media file.
    Clip {
        path: PathBuf,
        start: Duration,
        duration: Duration,
    },
    /// Live HTTP audio stream.
    Stream { uri: String },
    /// Keeps the mix running when nothing else is attached.
    Silence,
}

/// One point of a volume envelope, in source time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    pub at: Duration,
    pub volume: f64,
}

impl EnvelopePoint {
    pub fn new(at: Duration, volume: f64) -> Self {
        Self { at, volume }
    }
}

/// Events reported by a running graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// The graph reached the playing state.
    Playing,
    /// A source ran out of media.
    EndOfStream(SourceId),
    /// A single source failed. The rest of the graph keeps running.
    SourceError { source: SourceId, message: String },
    /// The graph itself failed.
    Error(String),
}

/// Audio mixing graph driven by the session
///
/// The session configures sources, envelopes, pan and volume through this
/// trait and never touches samples directly.
#[async_trait::async_trait]
pub trait AudioGraph: Send + Sync {
    /// Start rendering to the sink
    ///
    /// Returns a channel receiver for graph events
    async fn start(&mut self, sink: &SinkConfig) -> Result<mpsc::Receiver<GraphEvent>>;

    async fn add_source(&mut self, kind: SourceKind) -> Result<SourceId>;

    async fn remove_source(&mut self, source: SourceId) -> Result<()>;

    async fn set_envelope(&mut self, source: SourceId, points: Vec<EnvelopePoint>) -> Result<()>;

    async fn set_volume(&mut self, source: SourceId, volume: f64) -> Result<()>;

    /// Stereo position in `[-1, 1]`
    async fn set_pan(&mut self, source: SourceId, pan: f64) -> Result<()>;

    /// Ramp the source down to silence over `over`.
    async fn fade_out(&mut self, source: SourceId, over: Duration) -> Result<()>;

    /// Stream title sent in-band with the audio.
    async fn set_metadata(&mut self, title: &str) -> Result<()>;

    /// Stop rendering and drop all sources
    async fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Graph name for logging
    fn name(&self) -> &str;
}
