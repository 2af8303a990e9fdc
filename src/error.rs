//! Orchestration error types

use crate::identity::{ConnectionId, StreamId};

/// Failure reported by the native engine when a command cannot be carried out
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is not running")]
    NotRunning,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine failure: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Certificate file not found: {0}")]
    MissingCertificate(String),

    #[error("Private key file not found: {0}")]
    MissingPrivateKey(String),

    #[error("CA certificate file not found: {0}")]
    MissingCaCertificate(String),

    #[error("Missing required setting: {0}")]
    Required(&'static str),

    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Connection {0} already exists")]
    DuplicateConnection(ConnectionId),

    #[error("Stream {stream_id} already exists on connection {connection_id}")]
    DuplicateStream {
        connection_id: ConnectionId,
        stream_id: StreamId,
    },

    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to stop engine: {0}")]
    Stop(EngineError),

    #[error("Handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("Dispatch loop is already running")]
    AlreadyRunning,

    #[error("Server has been dropped")]
    ServerDropped,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServerError {
    /// True for errors that indicate the engine delivered events out of order
    /// or twice, as opposed to failures in the application or the engine itself.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ServerError::DuplicateConnection(_)
                | ServerError::DuplicateStream { .. }
                | ServerError::NotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_kind_and_id() {
        let err = ServerError::NotFound {
            kind: "Stream",
            id: "7".to_string(),
        };
        assert_eq!(err.to_string(), "Stream 7 does not exist");
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn engine_errors_are_not_protocol_violations() {
        let err = ServerError::from(EngineError::NotRunning);
        assert!(!err.is_protocol_violation());
        assert_eq!(err.to_string(), "Engine error: Engine is not running");
    }
}
