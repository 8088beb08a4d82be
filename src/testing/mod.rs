//! Testing utilities and mock implementations
//!
//! [`MockTransport`] stands in for the broker so the client can be exercised
//! without a running MQTT server.

pub mod mocks;

pub use mocks::*;
