//! Track players: one randomized clip state machine per track slot.

pub mod clip;
pub mod pan;
pub mod player;

pub use clip::ClipPlan;
pub use pan::Panner;
pub use player::{TrackContext, TrackMetadata, TrackPlayer, TrackStatus, TrackTimer};
