use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

pub type AssetId = u64;
pub type TagId = u64;
pub type SessionId = u64;
pub type ProjectId = u64;
pub type SpeakerId = u64;

/// A pre-recorded clip in the asset pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: AssetId,
    pub project_id: ProjectId,
    /// Media file, relative to the media root.
    pub filename: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Length of the media in milliseconds. Zero means "probe the file".
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tags: BTreeSet<TagId>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default = "default_true")]
    pub submitted: bool,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    /// Per-recording gain applied on top of the track's volume range.
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default = "default_language")]
    pub language: String,
    /// Session the recording was submitted from. Identifies its author.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

impl Recording {
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// A live ambient stream mixed in by proximity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: SpeakerId,
    pub project_id: ProjectId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    pub min_distance: f64,
    pub max_distance: f64,
    pub min_volume: f64,
    pub max_volume: f64,
    pub uri: String,
    #[serde(default)]
    pub backup_uri: Option<String>,
}

impl Speaker {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Timing and mixing bounds for one track slot. All times in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTuning {
    pub id: u64,
    pub project_id: ProjectId,
    pub min_volume: f64,
    pub max_volume: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub min_deadair_ms: u64,
    pub max_deadair_ms: u64,
    pub min_fadein_ms: u64,
    pub max_fadein_ms: u64,
    pub min_fadeout_ms: u64,
    pub max_fadeout_ms: u64,
    pub min_pan_pos: f64,
    pub max_pan_pos: f64,
    pub min_pan_duration_ms: u64,
    pub max_pan_duration_ms: u64,
    /// Catalog flag kept for compatibility. Replays are governed by the
    /// collection's ban window and repeat mode, not by this flag.
    #[serde(default)]
    pub repeat_recordings: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrdering {
    #[default]
    Random,
    ByLike,
    ByWeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Stop,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Ogg,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" => Ok(AudioFormat::Ogg),
            other => Err(format!("unsupported audio format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    /// Geofence radius in meters.
    #[serde(default)]
    pub recording_radius: Option<f64>,
    #[serde(default)]
    pub ordering: AssetOrdering,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub audio_format: AudioFormat,
    #[serde(default = "default_true")]
    pub geo_listen_enabled: bool,
    #[serde(default = "default_true")]
    pub timed_asset_priority: bool,
    /// Tags applied when a listener does not choose any.
    #[serde(default)]
    pub default_tags: Vec<TagId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub project_id: ProjectId,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub recording_radius: Option<f64>,
    #[serde(default = "default_true")]
    pub geo_listen_enabled: bool,
    /// Device identity, used to look up assets the listener has blocked.
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Declarative restriction attached to a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagFilterKind {
    Within10km,
    TenMostRecentDays,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub category_id: u64,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub filter: Option<TagFilterKind>,
}

/// An asset that is only eligible during a window of the session's play time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedAsset {
    pub project_id: ProjectId,
    pub asset_id: AssetId,
    /// Seconds after playback started.
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningHistoryItem {
    pub session_id: SessionId,
    pub asset_id: AssetId,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub event_type: String,
    pub server_time: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f64 {
    1.0
}

fn default_language() -> String {
    "en".to_string()
}
