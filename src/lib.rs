//! PongU - a small MQTT presence and chat client
//!
//! Participants announce themselves on `user_logs`, publish JSON responses to
//! `class/resp` and collect broadcasts from `class/recv`. Every payload on the
//! wire is the base64 encoding of a JSON envelope.
//!
//! # Overview
//!
//! - [`client::MessageClient`]: connect, announce presence, publish, collect
//! - [`protocol`]: envelopes, wire codec and topic helpers
//! - [`transport`]: the transport trait and its rumqttc implementation
//! - [`config`]: TOML configuration
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pongu::client::{ClientOptions, MessageClient};
//! use pongu::session::Session;
//! use pongu::transport::mqtt::MqttSettings;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let session = Session::new("alice", "localhost", 1883, None)?;
//! let client =
//!     MessageClient::new(session, MqttSettings::default(), ClientOptions::default()).await?;
//!
//! let messages = client
//!     .scoped(|client| async move {
//!         client.wait_until_connected(Duration::from_secs(5)).await?;
//!         client.publish_messages(json!({"answer": 42})).await?;
//!         client.collect_messages().await
//!     })
//!     .await?;
//! println!("{messages:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod store;
pub mod testing;
pub mod transport;

pub use client::{ClientOptions, MessageClient};
pub use config::{ConfigError, PonguConfig};
pub use error::{PonguError, PonguResult};
pub use session::{Credentials, Session};
pub use transport::mqtt::MqttClient;
