//! Mock transport for testing
//!
//! Records everything the client sends and lets a test play the broker's
//! side: accept or refuse the connection, drop it, deliver messages, and
//! hold back acknowledgments.

use crate::protocol::{encode_envelope, validate_publish_topic, validate_topic_filter};
use crate::transport::{ConnectionState, MqttError, PublishHandle, Transport, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::warn;

/// A publish as the mock transport received it
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock transport for testing. Clones share all recorded state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    connect_calls: Arc<AtomicUsize>,
    disconnect_calls: Arc<AtomicUsize>,
    hold_acks: Arc<AtomicBool>,
    held_acks: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
    should_fail: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl MockTransport {
    /// Create a mock in the `Connecting` state, plus the event stream a
    /// client consumes
    pub fn new() -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, events_rx) = mpsc::channel(64);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        (
            Self {
                published_messages: Arc::default(),
                subscriptions: Arc::default(),
                connect_calls: Arc::default(),
                disconnect_calls: Arc::default(),
                hold_acks: Arc::default(),
                held_acks: Arc::default(),
                should_fail: Arc::default(),
                events,
                state_tx: Arc::new(state_tx),
            },
            events_rx,
        )
    }

    fn emit(&self, event: TransportEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Mock transport could not emit event: {}", e);
        }
    }

    /// Broker accepts the connection
    pub fn accept_connection(&self) {
        self.state_tx.send_replace(ConnectionState::Connected);
        self.emit(TransportEvent::Connected);
    }

    /// Broker refuses the connection with `code`
    pub fn refuse_connection(&self, code: u8) {
        self.state_tx.send_replace(ConnectionState::Disconnected(format!(
            "Connection refused: {code}"
        )));
        self.emit(TransportEvent::ConnectionRefused { code });
    }

    pub fn drop_connection(&self, reason: &str) {
        self.state_tx
            .send_replace(ConnectionState::Disconnected(reason.to_string()));
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Deliver raw payload bytes on `topic`
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    /// Deliver `body` encoded the way peers put it on the wire
    pub fn deliver_envelope<S: Serialize + ?Sized>(&self, topic: &str, body: &S) {
        match encode_envelope(body) {
            Ok(payload) => self.deliver(topic, payload),
            Err(e) => warn!("Mock transport could not encode envelope: {}", e),
        }
    }

    /// Keep QoS 1/2 publishes pending until [`MockTransport::release_acks`]
    pub fn hold_acks(&self) {
        self.hold_acks.store(true, Ordering::SeqCst);
    }

    /// Acknowledge every held publish; returns how many were released
    pub async fn release_acks(&self) -> usize {
        self.hold_acks.store(false, Ordering::SeqCst);
        let held: Vec<_> = self.held_acks.lock().await.drain(..).collect();
        let count = held.len();
        for ack in held {
            let _ = ack.send(());
        }
        count
    }

    /// Drop every held acknowledgment, as a transport teardown would
    pub async fn lose_acks(&self) {
        self.held_acks.lock().await.clear();
    }

    pub fn fail_publishes(&self) {
        self.should_fail.store(true, Ordering::SeqCst);
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn get_subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub async fn held_ack_count(&self) -> usize {
        self.held_acks.lock().await.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), MqttError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connection_state().is_connected() {
            self.accept_connection();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state_tx
            .send_replace(ConnectionState::Disconnected("Client shut down".to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, MqttError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }
        validate_publish_topic(topic)?;

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });

        if qos != QoS::AtMostOnce && self.hold_acks.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.held_acks.lock().await.push(tx);
            Ok(PublishHandle::pending(rx))
        } else {
            Ok(PublishHandle::acknowledged())
        }
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        validate_topic_filter(topic)?;
        self.subscriptions
            .lock()
            .await
            .push((topic.to_string(), qos));
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_publishes() {
        let (mock, _events) = MockTransport::new();
        let handle = mock
            .publish("class/resp", b"e30=".to_vec(), QoS::AtLeastOnce, true)
            .await
            .unwrap();
        assert!(handle.wait_for_ack().await.is_ok());

        let published = mock.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "class/resp");
        assert!(published[0].retain);
    }

    #[tokio::test]
    async fn test_mock_holds_and_releases_acks() {
        let (mock, _events) = MockTransport::new();
        mock.hold_acks();

        let handle = mock
            .publish("class/resp", b"e30=".to_vec(), QoS::AtLeastOnce, true)
            .await
            .unwrap();
        assert_eq!(mock.held_ack_count().await, 1);
        assert_eq!(mock.release_acks().await, 1);
        assert!(handle.wait_for_ack().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_connect_emits_event() {
        let (mock, mut events) = MockTransport::new();
        mock.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert!(mock.connection_state().is_connected());

        // Already connected: no second event
        mock.connect().await.unwrap();
        assert_eq!(mock.connect_calls(), 2);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mock_rejects_invalid_topics() {
        let (mock, _events) = MockTransport::new();
        assert!(mock
            .publish("class/#", Vec::new(), QoS::AtMostOnce, false)
            .await
            .is_err());
        assert!(mock.subscribe("", QoS::AtLeastOnce).await.is_err());
    }
}
