//! Impure I/O operations for MQTT client
//!
//! This module handles network communication, async coordination, and
//! integration with the rumqttc client. The network loop runs on its own tokio
//! task from construction until disconnect.

use super::ack_tracker::AckTracker;
use super::connection::{
    configure_mqtt_options, return_code_number, ConnectionState, MqttError, MqttSettings,
};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::mqtt_span;
use crate::protocol::{validate_publish_topic, validate_topic_filter};
use crate::session::Session;
use crate::transport::{PublishHandle, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// rumqttc-backed transport for one session
pub struct MqttClient {
    client_id: String,
    client: Arc<Mutex<AsyncClient>>,
    acks: Arc<Mutex<AckTracker>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    wake: Arc<Notify>,
    parked: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl MqttClient {
    /// Create the client and start its network loop, which opens the
    /// connection. Transport events are delivered on the returned receiver.
    pub async fn new(
        session: &Session,
        settings: MqttSettings,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), MqttError> {
        if settings.event_capacity == 0 {
            return Err(MqttError::InvalidSettings(
                "event capacity must be at least 1".to_string(),
            ));
        }

        let mqtt_options = configure_mqtt_options(session, &settings);
        let (client, event_loop) = AsyncClient::new(mqtt_options, settings.request_capacity);
        let (event_tx, event_rx) = mpsc::channel(settings.event_capacity);
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();

        let state_tx = Arc::new(state_tx);
        let acks = Arc::new(Mutex::new(AckTracker::new()));
        let wake = Arc::new(Notify::new());
        let parked = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        let network_loop = NetworkLoop {
            client_id: session.client_id(),
            acks: acks.clone(),
            forwarder: MessageForwarder::new(event_tx),
            state_tx: state_tx.clone(),
            shutdown_rx,
            wake: wake.clone(),
            parked: parked.clone(),
            closing: closing.clone(),
            reconnect_delay: settings.reconnect_delay,
        };
        let span = mqtt_span!(client_id = %session.client_id(), broker = %session.host());
        let handle = tokio::spawn(network_loop.run(event_loop).instrument(span));

        info!(
            "Opening connection to {}:{} as {}",
            session.host(),
            session.port(),
            session.client_id()
        );

        Ok((
            MqttClient {
                client_id: session.client_id(),
                client: Arc::new(Mutex::new(client)),
                acks,
                state_tx,
                state_rx,
                shutdown_tx,
                wake,
                parked,
                closing,
                event_loop_handle: Mutex::new(Some(handle)),
                shutdown_grace: settings.shutdown_grace,
            },
            event_rx,
        ))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Number of publishes still waiting for the broker
    pub async fn pending_acks(&self) -> usize {
        self.acks.lock().await.pending()
    }

    fn ensure_open(&self) -> Result<(), MqttError> {
        if self.closing.load(Ordering::SeqCst) {
            Err(MqttError::Closed)
        } else {
            Ok(())
        }
    }

    /// Stop the network loop, waiting up to the shutdown grace period
    async fn stop_event_loop(&self, flush_disconnect: bool) {
        let Some(mut handle) = self.event_loop_handle.lock().await.take() else {
            return;
        };

        if !flush_disconnect {
            let _ = self.shutdown_tx.send(true);
        }

        match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
            Ok(Ok(())) => info!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                let _ = self.shutdown_tx.send(true);
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn connect(&self) -> Result<(), MqttError> {
        self.ensure_open()?;

        if self.connection_state().is_connected() {
            debug!("Already connected, connect() is a no-op");
            return Ok(());
        }

        info!("Opening connection");
        if self.parked.load(Ordering::SeqCst) {
            self.wake.notify_one();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            debug!("Transport already closed");
            return Ok(());
        }

        info!("Closing connection");
        let mut result = Ok(());
        let flush_disconnect = self.connection_state().is_connected();
        if flush_disconnect {
            let client = self.client.lock().await;
            if let Err(e) = client.disconnect().await {
                result = Err(MqttError::DisconnectFailed(Box::new(e)));
            }
        }

        // Nothing will flush the DISCONNECT if queueing it failed
        self.stop_event_loop(flush_disconnect && result.is_ok()).await;
        self.acks.lock().await.fail_all();
        self.state_tx
            .send_replace(ConnectionState::Disconnected("Client shut down".to_string()));

        info!("MQTT client disconnected");
        result
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, MqttError> {
        self.ensure_open()?;
        validate_publish_topic(topic)?;

        // Registration order must match queue order, so hold the client lock
        let client = self.client.lock().await;
        let ack = self.acks.lock().await.register(qos);
        if let Err(e) = client.publish(topic, qos, retain, payload).await {
            self.acks.lock().await.cancel_latest();
            return Err(MqttError::PublishFailed(Box::new(e)));
        }

        debug!("Queued publish to {} (qos {:?}, retain {})", topic, qos, retain);
        Ok(PublishHandle::pending(ack))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.ensure_open()?;
        validate_topic_filter(topic)?;

        let client = self.client.lock().await;
        client
            .subscribe(topic, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        debug!("Subscribing to {} (qos {:?})", topic, qos);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Signal shutdown to the network loop if it is still running
        let _ = self.shutdown_tx.send(true);

        if let Ok(mut guard) = self.event_loop_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }

        // No async in Drop: call disconnect() for a graceful DISCONNECT
    }
}

/// State owned by the background network loop task
struct NetworkLoop {
    client_id: String,
    acks: Arc<Mutex<AckTracker>>,
    forwarder: MessageForwarder,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_rx: watch::Receiver<bool>,
    wake: Arc<Notify>,
    parked: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl NetworkLoop {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!("Starting MQTT event loop for client: {}", self.client_id);

        loop {
            if self.parked.load(Ordering::SeqCst) {
                tokio::select! {
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() || *self.shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = self.wake.notified() => {
                        self.parked.store(false, Ordering::SeqCst);
                        let _ = self.state_tx.send(ConnectionState::Connecting);
                        info!("Retrying connection on request");
                    }
                }
            }

            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }
                result = event_loop.poll() => {
                    let keep_running = match result {
                        Ok(event) => self.process_event(&event).await,
                        Err(e) => self.handle_error(e).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.acks.lock().await.fail_all();
        if self.state_tx.borrow().is_connected() {
            let _ = self
                .state_tx
                .send(ConnectionState::Disconnected("Event loop stopped".to_string()));
        }
        info!("MQTT event loop stopped for client: {}", self.client_id);
    }

    /// Process a routed MQTT event. Returns true to continue the loop.
    async fn process_event(&mut self, event: &Event) -> bool {
        match MessageHandler::route_mqtt_event(event) {
            EventRoute::ConnectionAcknowledged { session_present } => {
                info!(session_present, "Connected to broker");
                let _ = self.state_tx.send(ConnectionState::Connected);
                self.forwarder.forward(TransportEvent::Connected);
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {} (retain {})", topic, retain);
                self.forwarder
                    .forward(TransportEvent::Message { topic, payload });
                true
            }
            EventRoute::PublishSent { packet_id } => {
                self.acks.lock().await.on_publish_sent(packet_id);
                true
            }
            EventRoute::PublishAcknowledged { packet_id } => {
                debug!(target: "mqtt_transport", "Publish {} acknowledged", packet_id);
                self.acks.lock().await.on_acknowledged(packet_id);
                true
            }
            EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                match MessageHandler::validate_subscription_success(&granted) {
                    Ok(()) => {
                        debug!(target: "mqtt_transport", "Subscription {} confirmed: {:?}", packet_id, granted)
                    }
                    Err(e) => warn!("{}", e),
                }
                true
            }
            EventRoute::Disconnected => {
                let reason = "Broker sent DISCONNECT".to_string();
                warn!("{}", reason);
                let _ = self
                    .state_tx
                    .send(ConnectionState::Disconnected(reason.clone()));
                self.forwarder
                    .forward(TransportEvent::Disconnected { reason });
                true
            }
            EventRoute::DisconnectSent => {
                let reason = "Client disconnected".to_string();
                let _ = self
                    .state_tx
                    .send(ConnectionState::Disconnected(reason.clone()));
                self.forwarder
                    .forward(TransportEvent::Disconnected { reason });
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Handle a network loop error. Returns true to continue the loop.
    async fn handle_error(&mut self, error: ConnectionError) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            debug!("Event loop error during shutdown: {}", error);
            return false;
        }

        let code = match error {
            ConnectionError::ConnectionRefused(code) => return_code_number(code),
            other => return self.handle_network_error(other).await,
        };

        error!("Connection failed with result code {}", code);
        // No automatic retry: wait for an explicit connect(), which only wakes
        // a parked loop. Must be parked before the refusal is published.
        self.parked.store(true, Ordering::SeqCst);
        let _ = self.state_tx.send(ConnectionState::Disconnected(format!(
            "Connection refused with result code {code}"
        )));
        self.forwarder
            .forward(TransportEvent::ConnectionRefused { code });
        true
    }

    /// Network errors are retried by polling again after the reconnect delay
    async fn handle_network_error(&mut self, error: ConnectionError) -> bool {
        let was_connected = self.state_tx.borrow().is_connected();

        warn!("MQTT event loop error for {}: {}", self.client_id, error);
        let reason = error.to_string();
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected(reason.clone()));
        if was_connected {
            self.forwarder
                .forward(TransportEvent::Disconnected { reason });
        }

        if !interruptible_sleep(self.shutdown_rx.clone(), self.reconnect_delay).await {
            return false;
        }

        let _ = self.state_tx.send(ConnectionState::Connecting);
        true
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens on the discard port, so connection attempts fail fast
    fn unreachable_session() -> Session {
        Session::new("test-client", "127.0.0.1", 9, None).unwrap()
    }

    fn fast_settings() -> MqttSettings {
        MqttSettings {
            reconnect_delay: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(shutdown_rx, Duration::from_secs(10)).await);
    }

    fn network_loop(
        events: mpsc::Sender<TransportEvent>,
    ) -> (NetworkLoop, watch::Receiver<ConnectionState>, watch::Sender<bool>) {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();
        let network = NetworkLoop {
            client_id: "test-client".to_string(),
            acks: Arc::new(Mutex::new(AckTracker::new())),
            forwarder: MessageForwarder::new(events),
            state_tx: Arc::new(state_tx),
            shutdown_rx,
            wake: Arc::new(Notify::new()),
            parked: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            reconnect_delay: Duration::from_millis(20),
        };
        (network, state_rx, shutdown_tx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refusal_parks_before_it_is_reported() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (mut network, mut state_rx, _shutdown_tx) = network_loop(events_tx);
        let parked = network.parked.clone();

        // Reads the flag the moment the refusal becomes visible
        let observer = tokio::spawn(async move {
            let _ = state_rx.changed().await;
            parked.load(Ordering::SeqCst)
        });

        let keep_going = network
            .handle_error(ConnectionError::ConnectionRefused(
                rumqttc::ConnectReturnCode::NotAuthorized,
            ))
            .await;

        assert!(keep_going);
        assert!(observer.await.unwrap(), "loop was not parked when refusal was published");
        assert!(matches!(
            events_rx.recv().await,
            Some(TransportEvent::ConnectionRefused { code: 5 })
        ));
        assert!(matches!(
            *network.state_tx.borrow(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_refusal_during_shutdown_stops_loop() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (mut network, _state_rx, _shutdown_tx) = network_loop(events_tx);
        network.closing.store(true, Ordering::SeqCst);

        let keep_going = network
            .handle_error(ConnectionError::ConnectionRefused(
                rumqttc::ConnectReturnCode::NotAuthorized,
            ))
            .await;

        assert!(!keep_going);
        assert!(!network.parked.load(Ordering::SeqCst));
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_zero_event_capacity() {
        let settings = MqttSettings {
            event_capacity: 0,
            ..Default::default()
        };
        let result = MqttClient::new(&unreachable_session(), settings).await;
        assert!(matches!(result, Err(MqttError::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn test_not_connected_without_broker() {
        let (client, _events) = MqttClient::new(&unreachable_session(), fast_settings())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!client.connection_state().is_connected());
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client, _events) = MqttClient::new(&unreachable_session(), fast_settings())
            .await
            .unwrap();

        assert!(client.disconnect().await.is_ok());
        assert!(client.disconnect().await.is_ok());
        assert!(matches!(
            client.connection_state(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_operations_fail_after_disconnect() {
        let (client, _events) = MqttClient::new(&unreachable_session(), fast_settings())
            .await
            .unwrap();
        client.disconnect().await.unwrap();

        assert!(matches!(
            client
                .publish("class/resp", b"x".to_vec(), QoS::AtLeastOnce, true)
                .await,
            Err(MqttError::Closed)
        ));
        assert!(matches!(
            client.subscribe("class/recv", QoS::AtLeastOnce).await,
            Err(MqttError::Closed)
        ));
        assert!(matches!(client.connect().await, Err(MqttError::Closed)));
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topic() {
        let (client, _events) = MqttClient::new(&unreachable_session(), fast_settings())
            .await
            .unwrap();

        let result = client
            .publish("class/#", b"x".to_vec(), QoS::AtLeastOnce, false)
            .await;
        assert!(matches!(result, Err(MqttError::InvalidTopic(_))));
        assert_eq!(client.pending_acks().await, 0);

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_publish_fails_on_disconnect() {
        let (client, _events) = MqttClient::new(&unreachable_session(), fast_settings())
            .await
            .unwrap();

        // Queued while disconnected; never written, never acknowledged
        let handle = client
            .publish("class/resp", b"x".to_vec(), QoS::AtLeastOnce, true)
            .await
            .unwrap();
        assert_eq!(client.pending_acks().await, 1);

        client.disconnect().await.unwrap();
        assert!(matches!(
            handle.wait_for_ack().await,
            Err(MqttError::AckLost)
        ));
    }
}
