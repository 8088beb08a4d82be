//! Wire encoding for PongU envelopes
//!
//! Every payload on the wire is `base64(utf8(json(envelope)))`. The JSON text
//! uses `", "` and `": "` separators and escapes every non-ASCII character as a
//! lowercase `\uXXXX` sequence, so peers that compare payloads byte for byte
//! see the same bytes for the same envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload is empty")]
    EmptyPayload,
    #[error("Payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON formatter producing the spaced, ASCII-only text used on the wire
#[derive(Debug, Clone, Copy, Default)]
pub struct WireFormatter;

impl Formatter for WireFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            // DEL is ASCII but still escaped on the wire
            if ch.is_ascii() && ch != '\x7f' {
                continue;
            }
            if start < index {
                writer.write_all(fragment[start..index].as_bytes())?;
            }
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Serialize a value to the wire JSON text (before base64)
pub fn to_wire_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, WireFormatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

/// Encode an envelope into a wire payload
pub fn encode_envelope<T: Serialize + ?Sized>(envelope: &T) -> Result<Vec<u8>, CodecError> {
    let json = to_wire_json(envelope)?;
    Ok(STANDARD.encode(json).into_bytes())
}

/// Decode a wire payload into a JSON value
///
/// Surrounding ASCII whitespace is ignored; anything else outside the base64
/// alphabet is an error.
pub fn decode_payload(payload: &[u8]) -> Result<Value, CodecError> {
    decode_envelope(payload)
}

/// Decode a wire payload into a typed envelope
pub fn decode_envelope<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    let trimmed = trim_ascii_whitespace(payload);
    if trimmed.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let json = STANDARD.decode(trimmed)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Truthiness of a decoded payload: null, false, zero, and empty
/// strings/arrays/objects are not stored.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
