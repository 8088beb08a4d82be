//! Crate-level error type for the PongU client
//!
//! Each layer has its own error enum; this one wraps them for callers of
//! [`crate::client::MessageClient`] and the CLI.

use crate::config::ConfigError;
use crate::protocol::CodecError;
use crate::session::SessionError;
use crate::transport::MqttError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for PongU client operations
#[derive(Debug, Error)]
pub enum PonguError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),

    #[error("Transport error: {0}")]
    TransportError(#[from] MqttError),

    #[error("Encoding error: {0}")]
    CodecError(#[from] CodecError),

    #[error("Client is shut down")]
    ClientClosed,

    #[error("Not connected to broker after {0:?}")]
    ConnectTimeout(Duration),
}

/// Result type for PongU operations
pub type PonguResult<T> = Result<T, PonguError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: PonguError = MqttError::Closed.into();
        assert!(matches!(err, PonguError::TransportError(MqttError::Closed)));

        let err: PonguError = SessionError::EmptyNick.into();
        assert!(err.to_string().contains("Nickname cannot be empty"));

        let err: PonguError = CodecError::EmptyPayload.into();
        assert!(matches!(err, PonguError::CodecError(_)));
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            PonguError::ClientClosed,
            PonguError::ConnectTimeout(Duration::from_secs(5)),
            PonguError::ConfigError(ConfigError::InvalidConfig("bad".to_string())),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
