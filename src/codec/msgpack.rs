//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so structs travel as maps keyed by
//! field name; the server decodes envelopes by key, never by position.
//!
//! # Example
//!
//! ```
//! use inferlink_client::codec::MsgPackCodec;
//! use inferlink_client::envelope::Envelope;
//!
//! let env = Envelope::with_op("system_info");
//! let bytes = MsgPackCodec::encode(&env).unwrap();
//! let back = MsgPackCodec::decode_envelope(&bytes).unwrap();
//! assert_eq!(back.op(), Some("system_info"));
//! ```

use crate::envelope::{Envelope, Value};
use crate::error::{ClientError, Result};

/// MessagePack codec for envelopes and inference results.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode MsgPack bytes that must hold a map.
    pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
        let value: Value = Self::decode(bytes)?;
        Envelope::from_value(value).ok_or_else(|| {
            ClientError::Protocol("MsgPack message is not a structured object".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Detection {
        label: String,
        score: f64,
        #[serde(with = "serde_bytes")]
        mask: Vec<u8>,
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let det = Detection {
            label: "cat".to_string(),
            score: 0.9,
            mask: vec![1, 2, 3],
        };
        let encoded = MsgPackCodec::encode(&det).unwrap();

        // fixmap with 3 entries, not fixarray
        assert_eq!(encoded[0], 0x83);

        let decoded: Detection = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, det);
    }

    #[test]
    fn test_binary_survives_as_value() {
        let det = Detection {
            label: "dog".to_string(),
            score: 0.5,
            mask: vec![0xFF, 0x00],
        };
        let encoded = MsgPackCodec::encode(&det).unwrap();
        let env = MsgPackCodec::decode_envelope(&encoded).unwrap();

        assert_eq!(env.get("mask"), Some(&Value::Binary(vec![0xFF, 0x00])));
        assert_eq!(env.get("label").and_then(Value::as_str), Some("dog"));
    }

    #[test]
    fn test_envelope_round_trip_keeps_version() {
        let mut env = Envelope::with_op("stream").field("name", "yolo");
        env.ensure_version();

        let bytes = MsgPackCodec::encode(&env).unwrap();
        let back = MsgPackCodec::decode_envelope(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_decode_envelope_rejects_array() {
        let bytes = MsgPackCodec::encode(&vec![1, 2, 3]).unwrap();
        let err = MsgPackCodec::decode_envelope(&bytes).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Value> = MsgPackCodec::decode(&[0xC1]);
        assert!(result.is_err());
    }
}
