use thiserror::Error;

/// Errors surfaced by the streaming engine.
///
/// Inside a running session most of these are logged and degraded to
/// silence; only startup paths and explicit lookups return them to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("stream {mount} did not appear after {attempts} attempts")]
    StreamTimeout { mount: String, attempts: u32 },
}

impl StreamError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn external(err: impl std::fmt::Display) -> Self {
        Self::ExternalService(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = StreamError::not_found("recording", 42);
        assert_eq!(err.to_string(), "recording 42 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_timeout_message() {
        let err = StreamError::StreamTimeout {
            mount: "/stream7.mp3".to_string(),
            attempts: 15,
        };
        assert_eq!(
            err.to_string(),
            "stream /stream7.mp3 did not appear after 15 attempts"
        );
        assert!(!err.is_not_found());
    }
}
