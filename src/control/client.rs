use anyhow::{Context, Result};
use async_nats::Client;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{route, ControlEnvelope, ControlMessage};
use super::ControlPublisher;
use crate::store::SessionId;

/// Control bus over NATS.
///
/// Targeted messages go to `<prefix>.<session_id>`, broadcasts to
/// `<prefix>.all`.
#[derive(Clone)]
pub struct ControlClient {
    client: Client,
    prefix: String,
}

impl ControlClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    pub fn subject(&self, session_id: Option<SessionId>) -> String {
        subject_for(&self.prefix, session_id)
    }

    /// Forward this session's messages into `tx` until either side closes.
    pub async fn bridge(
        &self,
        session_id: SessionId,
        tx: mpsc::Sender<ControlMessage>,
    ) -> Result<JoinHandle<()>> {
        let targeted = self.subject(Some(session_id));
        let broadcast = self.subject(None);

        let direct = self
            .client
            .subscribe(targeted.clone())
            .await
            .context("Failed to subscribe to session subject")?;
        let all = self
            .client
            .subscribe(broadcast.clone())
            .await
            .context("Failed to subscribe to broadcast subject")?;

        info!("Subscribed to {} and {}", targeted, broadcast);

        let handle = tokio::spawn(async move {
            let mut messages = futures::stream::select(direct, all);
            while let Some(msg) = messages.next().await {
                let envelope: ControlEnvelope = match serde_json::from_slice(&msg.payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Dropping malformed control message on {}: {}", msg.subject, e);
                        continue;
                    }
                };
                let message = match route(envelope, session_id) {
                    Some(message) => message,
                    None => continue,
                };
                debug!("Control message for session {}: {}", session_id, message.name());
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            debug!("Control bridge for session {} stopped", session_id);
        });

        Ok(handle)
    }
}

#[async_trait::async_trait]
impl ControlPublisher for ControlClient {
    async fn publish(&self, envelope: ControlEnvelope) -> Result<()> {
        let subject = self.subject(envelope.session_id);
        let payload = serde_json::to_vec(&envelope)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish control message")?;

        debug!("Published {} to {}", envelope.message.name(), subject);
        Ok(())
    }
}

pub fn subject_for(prefix: &str, session_id: Option<SessionId>) -> String {
    match session_id {
        Some(id) => format!("{}.{}", prefix, id),
        None => format!("{}.all", prefix),
    }
}
