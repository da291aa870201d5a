//! Codec module - serialization of envelopes.
//!
//! - [`JsonCodec`] - JSON text, used for raw-socket commands and the
//!   WebSocket handshake
//! - [`MsgPackCodec`] - MessagePack (`to_vec_named`), used for inference
//!   results on both transports
//!
//! Codecs are marker structs with static methods. [`Format`] selects one at
//! runtime where a channel may carry either.
//!
//! # Example
//!
//! ```
//! use inferlink_client::codec::Format;
//! use inferlink_client::envelope::Envelope;
//!
//! let env = Envelope::with_op("sleep");
//! let bytes = Format::Json.encode(&env).unwrap();
//! assert_eq!(Format::Json.decode(&bytes).unwrap(), env);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::envelope::Envelope;
use crate::error::Result;

/// Serialization format of an envelope on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    MsgPack,
}

impl Format {
    pub fn encode(self, envelope: &Envelope) -> Result<Vec<u8>> {
        match self {
            Format::Json => JsonCodec::encode(envelope),
            Format::MsgPack => MsgPackCodec::encode(envelope),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Envelope> {
        match self {
            Format::Json => JsonCodec::decode_envelope(bytes),
            Format::MsgPack => MsgPackCodec::decode_envelope(bytes),
        }
    }
}
