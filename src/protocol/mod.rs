//! Envelope types, wire codec and topics for the PongU service

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::{decode_envelope, decode_payload, encode_envelope, is_truthy, CodecError};
pub use messages::*;
pub use topics::*;
