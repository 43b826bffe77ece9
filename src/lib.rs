pub mod ambient;
pub mod collection;
pub mod config;
pub mod control;
pub mod error;
pub mod geo;
pub mod http;
pub mod icecast;
pub mod listener;
pub mod media;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod track;

pub use ambient::{AmbientMixer, HttpStreamProbe, StreamProbe};
pub use collection::{CollectionConfig, Partition, RecordingCollection};
pub use config::Config;
pub use control::{ControlClient, ControlEnvelope, ControlMessage, ControlPublisher};
pub use error::{StreamError, StreamResult};
pub use geo::GeoPoint;
pub use http::{create_router, AppState};
pub use icecast::{mount_point, IcecastAdmin, StreamServer};
pub use listener::ListenerState;
pub use pipeline::{AudioGraph, GraphEvent, SinkConfig, SourceKind, VirtualGraph};
pub use session::{SessionOptions, SessionServices, StreamRequest, StreamSession};
pub use store::{AssetStore, MemoryStore, TimeoutStore};
pub use supervisor::{ProcessSpawner, SessionSpawner, StreamSupervisor};
pub use track::{TrackPlayer, TrackStatus};
