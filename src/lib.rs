//! # inferlink-client
//!
//! Rust client SDK for the inference server protocol.
//!
//! A client talks to one server over one of two transports, chosen by the
//! address scheme:
//!
//! - **Raw socket** (`host`, `tcp://`, `asio://`): JSON command envelopes and
//!   a dedicated stream connection, both framed with a 4-byte big-endian
//!   length prefix.
//! - **HTTP** (`http://`): REST control plane plus a WebSocket stream on
//!   `/v1/stream`.
//!
//! ## Architecture
//!
//! - **Control Plane**: synchronous request/reply ([`command`], [`transport::HttpControl`])
//! - **Data Plane**: pipelined inference frames with bounded in-flight depth,
//!   results delivered in send order to a callback ([`stream`])
//!
//! Inference results are MessagePack envelopes; every envelope carries a
//! protocol version tag.
//!
//! ## Example
//!
//! ```ignore
//! use inferlink_client::{Session, Value};
//!
//! #[tokio::main]
//! async fn main() -> inferlink_client::Result<()> {
//!     let mut session = Session::connect("http://localhost:8778").await?;
//!     for model in session.model_list().await? {
//!         println!("{}", model.name);
//!     }
//!
//!     session.open_stream("mobilenet_v2", 1, &Value::Null).await?;
//!     let result = session.predict(&[std::fs::read("cat.jpg")?]).await?;
//!     println!("{:?}", result);
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod codec;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod stream;
pub mod transport;

mod session;

pub use address::{ServerAddress, ServerKind};
pub use config::{
    ClientConfig, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_CONNECT_RETRIES, DEFAULT_FRAME_QUEUE_DEPTH,
    DEFAULT_INFERENCE_TIMEOUT, DEFAULT_PORT,
};
pub use envelope::{Envelope, Value};
pub use error::{ClientError, ErrorKind, RecordedError, Result};
pub use session::{ModelInfo, Session, SessionBuilder};
pub use stream::{FrameInfo, SessionState};
