//! JSON codec using `serde_json`.
//!
//! Raw-socket commands and their replies are JSON text, as is the WebSocket
//! stream handshake.

use crate::envelope::{Envelope, Value};
use crate::error::{ClientError, Result};

/// JSON codec for command envelopes.
pub struct JsonCodec;

impl JsonCodec {
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode JSON text that must hold an object.
    pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
        let value: Value = Self::decode(bytes)?;
        Envelope::from_value(value)
            .ok_or_else(|| ClientError::Protocol("JSON message is not an object".to_string()))
    }
}
