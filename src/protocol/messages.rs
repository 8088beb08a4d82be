//! Envelope types exchanged with the PongU broker
//!
//! Field order matters: envelopes are serialized in declaration order and the
//! wire payload is expected to be stable for a given message and timestamp.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence announcement published to [`crate::protocol::PRESENCE_TOPIC`]
///
/// # Examples
/// ```
/// use pongu::protocol::PresenceEnvelope;
///
/// let presence = PresenceEnvelope::new("alice", "192.168.1.20", 1_700_000_000);
/// let json = serde_json::to_string(&presence).unwrap();
/// assert_eq!(
///     json,
///     r#"{"nick":"alice","ip_address":"192.168.1.20","time":1700000000}"#
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEnvelope {
    pub nick: String,
    pub ip_address: String,
    /// Unix epoch seconds at announcement time
    pub time: i64,
}

impl PresenceEnvelope {
    pub fn new(nick: impl Into<String>, ip_address: impl Into<String>, time: i64) -> Self {
        Self {
            nick: nick.into(),
            ip_address: ip_address.into(),
            time,
        }
    }
}

/// Participant response published to [`crate::protocol::RESPONSE_TOPIC`]
///
/// `message` is any JSON value; plain strings are the common case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub nick: String,
    pub message: Value,
    /// Unix epoch seconds at send time
    pub sent_time: i64,
}

impl ResponseEnvelope {
    pub fn new(nick: impl Into<String>, message: Value, sent_time: i64) -> Self {
        Self {
            nick: nick.into(),
            message,
            sent_time,
        }
    }
}

/// Message decoded from a collected topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub body: Value,
}

/// Current time as Unix epoch seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
