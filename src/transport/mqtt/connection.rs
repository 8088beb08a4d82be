//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! error types and broker option construction.

use crate::protocol::TopicError;
use crate::session::Session;
use rumqttc::{ConnectReturnCode, MqttOptions};
use std::time::Duration;
use thiserror::Error;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Attempting to connect
    Connecting,
    /// Broker acknowledged the connection
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Tuning for the rumqttc client and network loop
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub keep_alive: Duration,
    /// Pause before polling again after a network error
    pub reconnect_delay: Duration,
    /// Capacity of the rumqttc request channel
    pub request_capacity: usize,
    /// Capacity of the transport event channel
    pub event_capacity: usize,
    /// How long shutdown waits for the DISCONNECT to be flushed
    pub shutdown_grace: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
            request_capacity: 10,
            event_capacity: 256,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid transport settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("Publish acknowledgment lost - transport stopped before the broker confirmed")]
    AckLost,
    #[error("Transport is closed")]
    Closed,
}

/// Build rumqttc options for a session
pub fn configure_mqtt_options(session: &Session, settings: &MqttSettings) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(session.client_id(), session.host(), session.port());

    if let Some(credentials) = session.credentials() {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(true);

    mqtt_options
}

/// Numeric CONNACK return code (0 = accepted, 1..=5 = refused)
pub fn return_code_number(code: ConnectReturnCode) -> u8 {
    code as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Credentials;

    #[test]
    fn test_settings_default() {
        let settings = MqttSettings::default();
        assert_eq!(settings.keep_alive, Duration::from_secs(60));
        assert_eq!(settings.reconnect_delay, Duration::from_secs(1));
        assert_eq!(settings.request_capacity, 10);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let session = Session::new(
            "alice",
            "broker.local",
            1884,
            Some(Credentials::new("student", "secret")),
        )
        .unwrap();
        let options = configure_mqtt_options(&session, &MqttSettings::default());

        assert_eq!(options.client_id(), session.client_id());
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("student".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_configure_mqtt_options_without_credentials() {
        let session = Session::new("bob", "localhost", 1883, None).unwrap();
        let options = configure_mqtt_options(&session, &MqttSettings::default());
        assert_eq!(options.credentials(), None);
    }

    #[test]
    fn test_return_code_numbers() {
        assert_eq!(return_code_number(ConnectReturnCode::Success), 0);
        assert_eq!(
            return_code_number(ConnectReturnCode::RefusedProtocolVersion),
            1
        );
        assert_eq!(return_code_number(ConnectReturnCode::BadClientId), 2);
        assert_eq!(return_code_number(ConnectReturnCode::ServiceUnavailable), 3);
        assert_eq!(
            return_code_number(ConnectReturnCode::BadUserNamePassword),
            4
        );
        assert_eq!(return_code_number(ConnectReturnCode::NotAuthorized), 5);
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Disconnected("test".to_string())
        );
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::DisconnectFailed("test".to_string().into()),
            MqttError::InvalidSettings("test".to_string()),
            MqttError::InvalidTopic(TopicError::Empty),
            MqttError::AckLost,
            MqttError::Closed,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
