//! MQTT transport built on rumqttc
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Connection state, settings, errors and broker options
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`ack_tracker`] - Pairing publishes with broker acknowledgments
//! - [`client`] - Impure I/O operations and the background network loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use pongu::session::Session;
//! use pongu::transport::mqtt::{MqttClient, MqttSettings};
//! use pongu::transport::Transport;
//! use rumqttc::QoS;
//!
//! # tokio_test::block_on(async {
//! let session = Session::new("alice", "localhost", 1883, None)?;
//! let (client, _events) = MqttClient::new(&session, MqttSettings::default()).await?;
//!
//! let handle = client
//!     .publish("class/resp", b"aGVsbG8=".to_vec(), QoS::AtLeastOnce, true)
//!     .await?;
//! handle.wait_for_ack().await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod ack_tracker;
pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use ack_tracker::AckTracker;
pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, MqttSettings};
pub use message_handler::{EventRoute, MessageHandler};
