//! Minimal client-side WebSocket codec.
//!
//! Enough of RFC 6455 for a non-compressed client: frame headers with
//! 7/16/64-bit lengths, masking, reentrant decoding, reassembly of
//! fragmented messages, and the Upgrade handshake. No extensions, no
//! subprotocols.

mod decoder;
mod frame;
mod handshake;

pub use decoder::{Decoded, FrameDecoder, Message, MessageAssembler};
pub use frame::{
    apply_mask, encode_frame, Frame, FrameHeader, HeaderStatus, Opcode, MAX_HEADER_SIZE,
    MIN_HEADER_SIZE,
};
pub use handshake::{
    build_request, generate_key, parse_response, HandshakeResponse, MAX_RESPONSE_HEAD,
};
