//! The PongU message client
//!
//! [`MessageClient`] owns one transport connection and exposes the four
//! participant operations: connect, announce presence, publish and collect.
//! A background session task reacts to transport events: it announces
//! presence and subscribes to the broadcast topic on every successful
//! connect, and decodes inbound messages into the collector's inbox.

use crate::config::PonguConfig;
use crate::error::{PonguError, PonguResult};
use crate::net::local_ip_or_loopback;
use crate::protocol::{
    decode_payload, encode_envelope, is_truthy, topic_matches, unix_now, validate_topic_filter,
    CodecError, InboundMessage, PresenceEnvelope, ResponseEnvelope, BROADCAST_TOPIC,
    PRESENCE_TOPIC, RESPONSE_TOPIC,
};
use crate::session::Session;
use crate::session_span;
use crate::store::{Collector, Inbox, MessageStore};
use crate::transport::mqtt::{MqttClient, MqttSettings};
use crate::transport::{ConnectionState, MqttError, Transport, TransportEvent};
use rumqttc::QoS;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Client-side tuning that is independent of the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// How long a collect waits for the first message when none is pending
    pub collect_window: Duration,
    /// Most distinct topics held in the inbox between collects
    pub inbound_capacity: usize,
    /// Values the message store starts out with
    pub userdata: HashMap<String, Value>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            collect_window: Duration::from_secs(3),
            inbound_capacity: 64,
            userdata: HashMap::new(),
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &PonguConfig) -> Self {
        Self {
            collect_window: config.collect_window(),
            inbound_capacity: config.client.inbound_capacity,
            userdata: config.userdata.clone(),
        }
    }
}

/// Handle to a running message client. Clones share the same connection.
pub struct MessageClient<T: Transport = MqttClient> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for MessageClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T: Transport> {
    session: Session,
    transport: Arc<T>,
    routes: Arc<RwLock<HashSet<String>>>,
    collector: Mutex<Collector>,
    collect_window: Duration,
    closed: AtomicBool,
    session_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.session_task.get_mut().take() {
            handle.abort();
        }
    }
}

impl MessageClient<MqttClient> {
    /// Create an MQTT-backed client. The network loop starts connecting
    /// immediately; use [`MessageClient::wait_until_connected`] to wait for
    /// the broker.
    pub async fn new(
        session: Session,
        settings: MqttSettings,
        options: ClientOptions,
    ) -> PonguResult<Self> {
        let (transport, events) = MqttClient::new(&session, settings).await?;
        Self::start(session, transport, events, options)
    }

    pub async fn from_config(config: &PonguConfig) -> PonguResult<Self> {
        config.validate()?;
        let session = config.to_session()?;
        Self::new(
            session,
            config.mqtt_settings(),
            ClientOptions::from_config(config),
        )
        .await
    }
}

impl<T: Transport> MessageClient<T> {
    /// Start a client over an existing transport and its event stream
    pub fn start(
        session: Session,
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
        options: ClientOptions,
    ) -> PonguResult<Self> {
        if options.inbound_capacity == 0 {
            return Err(MqttError::InvalidSettings(
                "inbound capacity must be at least 1".to_string(),
            )
            .into());
        }

        let transport = Arc::new(transport);
        // Subscribed on every connect, so routed from the start
        let routes = Arc::new(RwLock::new(HashSet::from([BROADCAST_TOPIC.to_string()])));
        let inbox = Arc::new(Inbox::new(options.inbound_capacity));

        let task = SessionTask {
            nick: session.nick().to_string(),
            transport: transport.clone(),
            routes: routes.clone(),
            inbox: inbox.clone(),
        };
        let span = session_span!(nick = %session.nick(), client_id = %session.client_id());
        let handle = tokio::spawn(task.run(events).instrument(span));

        debug!("Started session task for {}", session.client_id());

        Ok(Self {
            inner: Arc::new(Inner {
                session,
                transport,
                routes,
                collector: Mutex::new(Collector::new(
                    inbox,
                    MessageStore::from(options.userdata),
                )),
                collect_window: options.collect_window,
                closed: AtomicBool::new(false),
                session_task: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn nick(&self) -> &str {
        self.inner.session.nick()
    }

    pub fn client_id(&self) -> String {
        self.inner.session.client_id()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.connection_state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> PonguResult<()> {
        if self.is_closed() {
            Err(PonguError::ClientClosed)
        } else {
            Ok(())
        }
    }

    /// Re-initiate the broker connection. A no-op while connected.
    pub async fn connect(&self) -> PonguResult<()> {
        self.ensure_open()?;
        self.inner.transport.connect().await?;
        Ok(())
    }

    /// Wait until the transport reports a connection
    pub async fn wait_until_connected(&self, timeout: Duration) -> PonguResult<()> {
        let mut state = self.inner.transport.watch_state();
        let result =
            match tokio::time::timeout(timeout, state.wait_for(ConnectionState::is_connected))
                .await
            {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(_)) => Err(MqttError::Closed.into()),
                Err(_) => Err(PonguError::ConnectTimeout(timeout)),
            };
        result
    }

    /// Publish a presence envelope to `user_logs`
    pub async fn announce_presence(&self) -> PonguResult<()> {
        self.ensure_open()?;
        announce_presence(self.inner.transport.as_ref(), self.nick()).await
    }

    /// Publish to `class/resp` and wait for the broker acknowledgment
    pub async fn publish_messages(&self, message: impl Into<Value>) -> PonguResult<()> {
        self.publish_messages_to(RESPONSE_TOPIC, message).await
    }

    /// Publish a response envelope, retained at QoS 1, and wait for the
    /// broker acknowledgment. There is no timeout.
    pub async fn publish_messages_to(
        &self,
        topic: &str,
        message: impl Into<Value>,
    ) -> PonguResult<()> {
        self.ensure_open()?;

        let envelope = ResponseEnvelope::new(self.nick(), message.into(), unix_now());
        let payload = encode_envelope(&envelope)?;
        let handle = self
            .inner
            .transport
            .publish(topic, payload, QoS::AtLeastOnce, true)
            .await?;
        handle.wait_for_ack().await?;

        info!("Published message to {}", topic);
        Ok(())
    }

    /// Collect from `class/recv`
    pub async fn collect_messages(&self) -> PonguResult<HashMap<String, Value>> {
        self.collect_messages_from(BROADCAST_TOPIC).await
    }

    /// Subscribe to `topic`, apply what arrives within the collect window and
    /// return a snapshot of every topic's last value.
    pub async fn collect_messages_from(&self, topic: &str) -> PonguResult<HashMap<String, Value>> {
        self.ensure_open()?;
        validate_topic_filter(topic).map_err(MqttError::from)?;

        // Registered before subscribing so retained re-delivery is kept
        if self.inner.routes.write().await.insert(topic.to_string()) {
            debug!("Registered receive handler for {}", topic);
        }
        self.inner
            .transport
            .subscribe(topic, QoS::AtLeastOnce)
            .await?;

        let mut collector = self.inner.collector.lock().await;
        let applied = collector.drain(self.inner.collect_window).await;
        info!("Collected {} message(s) from {}", applied, topic);

        Ok(collector.store().snapshot())
    }

    /// Stop the session task and disconnect. Safe to call more than once;
    /// errors are logged, not returned.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Client already shut down");
            return;
        }

        if let Some(handle) = self.inner.session_task.lock().await.take() {
            handle.abort();
        }

        if let Err(e) = self.inner.transport.disconnect().await {
            warn!("Error while disconnecting: {}", e);
        }

        info!("Client {} shut down", self.client_id());
    }

    /// Run `f` with this client and shut it down afterwards
    pub async fn scoped<F, Fut, R>(self, f: F) -> R
    where
        F: FnOnce(MessageClient<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        let result = f(self.clone()).await;
        self.shutdown().await;
        result
    }
}

async fn announce_presence<T: Transport>(transport: &T, nick: &str) -> PonguResult<()> {
    let ip_address = local_ip_or_loopback();
    let envelope = PresenceEnvelope::new(nick, ip_address.to_string(), unix_now());
    let payload = encode_envelope(&envelope)?;

    // QoS 0: the handle is ready as soon as the packet is written
    transport
        .publish(PRESENCE_TOPIC, payload, QoS::AtMostOnce, false)
        .await?;
    debug!("Announced presence from {}", ip_address);
    Ok(())
}

/// Reacts to transport events for the lifetime of the client
struct SessionTask<T: Transport> {
    nick: String,
    transport: Arc<T>,
    routes: Arc<RwLock<HashSet<String>>>,
    inbox: Arc<Inbox>,
}

impl<T: Transport> SessionTask<T> {
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => self.on_connected().await,
                TransportEvent::ConnectionRefused { code } => {
                    error!("Connection refused by broker with result code {}", code);
                }
                TransportEvent::Disconnected { reason } => {
                    warn!("Disconnected from broker: {}", reason);
                }
                TransportEvent::Message { topic, payload } => {
                    self.on_message(topic, &payload).await;
                }
            }
        }
        debug!("Transport event stream ended");
    }

    async fn on_connected(&self) {
        info!("Connected to broker");

        if let Err(e) = announce_presence(self.transport.as_ref(), &self.nick).await {
            error!("Failed to announce presence: {}", e);
        }
        if let Err(e) = self
            .transport
            .subscribe(BROADCAST_TOPIC, QoS::AtLeastOnce)
            .await
        {
            error!("Failed to subscribe to {}: {}", BROADCAST_TOPIC, e);
        }
    }

    async fn on_message(&self, topic: String, payload: &[u8]) {
        let routed = self
            .routes
            .read()
            .await
            .iter()
            .any(|filter| topic_matches(filter, &topic));
        if !routed {
            debug!("No receive handler for {}, dropping message", topic);
            return;
        }

        let body = match decode_payload(payload) {
            Ok(body) => body,
            Err(CodecError::EmptyPayload) => {
                debug!("Empty payload on {}, ignoring", topic);
                return;
            }
            Err(e) => {
                error!("Could not decode message on {}: {}", topic, e);
                return;
            }
        };

        if !is_truthy(&body) {
            debug!("Ignoring empty message on {}", topic);
            return;
        }

        self.inbox.push(InboundMessage { topic, body }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn mock_client(window: Duration) -> (MessageClient<MockTransport>, MockTransport) {
        let session = Session::new("alice", "localhost", 1883, None).unwrap();
        let (transport, events) = MockTransport::new();
        let handle = transport.clone();
        let options = ClientOptions {
            collect_window: window,
            ..ClientOptions::default()
        };
        let client = MessageClient::start(session, transport, events, options).unwrap();
        (client, handle)
    }

    #[test]
    fn test_options_from_config() {
        let mut config = PonguConfig::default();
        config.client.collect_window_secs = 7;
        config.client.inbound_capacity = 8;
        let options = ClientOptions::from_config(&config);
        assert_eq!(options.collect_window, Duration::from_secs(7));
        assert_eq!(options.inbound_capacity, 8);
    }

    #[tokio::test]
    async fn test_zero_inbound_capacity_rejected() {
        let session = Session::new("alice", "localhost", 1883, None).unwrap();
        let (transport, events) = MockTransport::new();
        let options = ClientOptions {
            inbound_capacity: 0,
            ..ClientOptions::default()
        };
        assert!(MessageClient::start(session, transport, events, options).is_err());
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown() {
        let (client, _mock) = mock_client(Duration::from_millis(10));
        client.shutdown().await;

        assert!(client.is_closed());
        assert!(matches!(
            client.publish_messages("late").await,
            Err(PonguError::ClientClosed)
        ));
        assert!(matches!(
            client.collect_messages().await,
            Err(PonguError::ClientClosed)
        ));
    }

    #[tokio::test]
    async fn test_unrouted_topic_is_dropped() {
        let (client, mock) = mock_client(Duration::from_millis(50));
        mock.deliver_envelope("class/other", &json!({"x": 1}));

        let messages = client.collect_messages().await.unwrap();
        assert!(messages.is_empty());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_collect_rejects_invalid_filter() {
        let (client, _mock) = mock_client(Duration::from_millis(10));
        assert!(matches!(
            client.collect_messages_from("class/#/recv").await,
            Err(PonguError::TransportError(MqttError::InvalidTopic(_)))
        ));
        client.shutdown().await;
    }
}
