//! Transport module - byte movement to and from the server.
//!
//! - [`Connection`]: raw TCP socket with length-prefixed frames
//! - [`WebSocket`]: poll-driven WebSocket client for HTTP servers
//! - [`HttpControl`]: REST control plane for HTTP servers

mod http;
mod socket;
mod websocket;

pub use http::HttpControl;
pub use socket::{Connection, FrameReader, FrameWriter};
pub use websocket::{WebSocket, WsState};
