//! Wire encoding for envelopes exchanged over sockets.
//!
//! A message is the UTF-8 JSON encoding of an envelope, base64 encoded with
//! the standard alphabet. Messages are close-delimited: the sender writes one
//! message then shuts down its write half.
//!
//! Older clients wrapped the JSON text in a JSON string literal before base64
//! encoding. Such payloads are accepted when the wrapped text is itself strict
//! JSON; nothing is ever evaluated.
//!
//! ```
//! use apiproxy::envelope::QueryEnvelope;
//! use apiproxy::protocol::{decode, encode};
//!
//! let query = QueryEnvelope::new().with("service", "bogus");
//! let bytes = encode(&query).unwrap();
//! let decoded: QueryEnvelope = decode(&bytes).unwrap();
//! assert_eq!(decoded, query);
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;

/// Default hard cap on an inbound message, in bytes (10 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Size of each read when draining a socket.
pub const READ_CHUNK_SIZE: usize = 2048;

/// Encode a value as base64 of its JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if the value cannot be represented as JSON.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(message)?;
    Ok(STANDARD.encode(json).into_bytes())
}

/// Decode a base64 JSON message.
///
/// Surrounding ASCII whitespace is ignored.
///
/// # Errors
///
/// Returns a [`ProtocolError`] when the payload is empty, not base64, or not
/// JSON of the expected shape.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    let trimmed = payload.trim_ascii();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let json = STANDARD.decode(trimmed)?;
    let value: Value = serde_json::from_slice(&json)?;
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };

    Ok(serde_json::from_value(value)?)
}

/// Reject payloads above `limit` bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when `size > limit`.
pub fn check_size(size: usize, limit: usize) -> Result<(), ProtocolError> {
    if size > limit {
        return Err(ProtocolError::PayloadTooLarge { size, limit });
    }
    Ok(())
}
