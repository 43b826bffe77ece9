use serde::{Deserialize, Serialize};

use crate::listener::ListenerState;
use crate::store::{AssetId, SessionId, TagId};

/// Operations a running session accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ControlMessage {
    Heartbeat,
    MoveListener {
        listener: ListenerState,
    },
    ModifyStream {
        /// Replaces the tag filter when present.
        #[serde(default)]
        tags: Option<Vec<TagId>>,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        listener: ListenerState,
    },
    RefreshRecordings,
    SkipAhead,
    PlayAsset {
        asset_id: AssetId,
    },
}

impl ControlMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Heartbeat => "heartbeat",
            ControlMessage::MoveListener { .. } => "move_listener",
            ControlMessage::ModifyStream { .. } => "modify_stream",
            ControlMessage::RefreshRecordings => "refresh_recordings",
            ControlMessage::SkipAhead => "skip_ahead",
            ControlMessage::PlayAsset { .. } => "play_asset",
        }
    }
}

/// Control message as sent on the bus. No `session_id` means broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub message: ControlMessage,
}

impl ControlEnvelope {
    pub fn to(session_id: SessionId, message: ControlMessage) -> Self {
        Self {
            session_id: Some(session_id),
            message,
        }
    }

    pub fn broadcast(message: ControlMessage) -> Self {
        Self {
            session_id: None,
            message,
        }
    }
}

/// Message to deliver to `session_id`, if any.
///
/// Messages for other sessions are dropped. Of the broadcasts only
/// `refresh_recordings` is honored.
pub fn route(envelope: ControlEnvelope, session_id: SessionId) -> Option<ControlMessage> {
    match envelope.session_id {
        Some(target) if target == session_id => Some(envelope.message),
        Some(_) => None,
        None => match envelope.message {
            ControlMessage::RefreshRecordings => Some(ControlMessage::RefreshRecordings),
            _ => None,
        },
    }
}
