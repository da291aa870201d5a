//! Protocol module - wire framing for both transports.
//!
//! - [`length_prefix`]: 4-byte big-endian length + payload (raw socket)
//! - [`websocket`]: RFC 6455 frames and handshake (HTTP server streams)

pub mod length_prefix;
pub mod websocket;
