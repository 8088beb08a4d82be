//! Pure message routing for MQTT events
//!
//! This module turns rumqttc events into routing decisions and forwards the
//! ones the session cares about as [`TransportEvent`]s.

use crate::transport::TransportEvent;
use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                    packet_id: pubcomp.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .map(|code| match code {
                            SubscribeReasonCode::Success(qos) => Some(*qos),
                            SubscribeReasonCode::Failure => None,
                        })
                        .collect(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { packet_id: *pkid },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(granted: &[Option<QoS>]) -> Result<(), String> {
        if granted.iter().any(Option::is_none) {
            Err(format!("Subscription refused by broker: {granted:?}"))
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// Publish written to the socket
    PublishSent { packet_id: u16 },
    /// Broker confirmed a QoS 1 (PUBACK) or QoS 2 (PUBCOMP) publish
    PublishAcknowledged { packet_id: u16 },
    /// Subscription confirmed; `None` entries were refused
    SubscriptionConfirmed {
        packet_id: u16,
        granted: Vec<Option<QoS>>,
    },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our DISCONNECT was written to the socket
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Other outgoing event (handled automatically)
    OutgoingEvent,
}

/// Forwards transport events to the session without blocking the network loop
#[derive(Debug, Clone)]
pub struct MessageForwarder {
    sender: mpsc::Sender<TransportEvent>,
}

impl MessageForwarder {
    pub fn new(sender: mpsc::Sender<TransportEvent>) -> Self {
        Self { sender }
    }

    /// Forward an event; returns false if it was dropped
    pub fn forward(&self, event: TransportEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Transport event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Transport event receiver closed");
                false
            }
        }
    }
}
