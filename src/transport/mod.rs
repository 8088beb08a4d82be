//! Transport layer between the message client and the broker
//!
//! This module provides the transport abstraction consumed by
//! [`crate::client::MessageClient`] and its MQTT implementation. Inbound
//! traffic and connection changes are delivered as [`TransportEvent`]s on a
//! channel handed out when the transport is created.

use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::{oneshot, watch};

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttError};

/// Events emitted by a transport's network loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection (every `Connecting -> Connected` transition)
    Connected,
    /// Broker refused the connection with a nonzero CONNACK return code
    ConnectionRefused { code: u8 },
    /// Connection lost or closed
    Disconnected { reason: String },
    /// Publish received on a subscribed topic
    Message { topic: String, payload: Bytes },
}

/// Handle returned by [`Transport::publish`]
#[derive(Debug)]
pub struct PublishHandle {
    ack: Option<oneshot::Receiver<()>>,
}

impl PublishHandle {
    /// Handle whose acknowledgment arrives on `ack`
    pub fn pending(ack: oneshot::Receiver<()>) -> Self {
        Self { ack: Some(ack) }
    }

    /// Handle for a publish that is already acknowledged
    pub fn acknowledged() -> Self {
        Self { ack: None }
    }

    /// Wait until the transport confirms the publish: PUBACK for QoS 1,
    /// PUBCOMP for QoS 2, socket write for QoS 0. There is no timeout.
    pub async fn wait_for_ack(self) -> Result<(), MqttError> {
        match self.ack {
            Some(ack) => ack.await.map_err(|_| MqttError::AckLost),
            None => Ok(()),
        }
    }
}

/// Transport trait for broker communication
///
/// All operations take `&self` so one transport can be shared between the
/// caller and the background session task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Re-initiate the broker connection if it is not currently up
    async fn connect(&self) -> Result<(), MqttError>;

    /// Disconnect from the broker and stop the network loop
    async fn disconnect(&self) -> Result<(), MqttError>;

    /// Publish raw payload bytes
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, MqttError>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Watch connection state changes
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}
