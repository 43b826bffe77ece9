pub mod client;
pub mod messages;

pub use client::{subject_for, ControlClient};
pub use messages::{route, ControlEnvelope, ControlMessage};

use anyhow::Result;

/// Outbound side of the control bus.
#[async_trait::async_trait]
pub trait ControlPublisher: Send + Sync {
    async fn publish(&self, envelope: ControlEnvelope) -> Result<()>;
}
