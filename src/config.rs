//! Client configuration.
//!
//! [`ClientConfig`] carries the timeouts and limits shared by every layer.
//! All fields have defaults; use [`SessionBuilder`](crate::SessionBuilder)
//! to override them fluently.

use std::time::Duration;

/// Default TCP port of the inference server.
pub const DEFAULT_PORT: u16 = 8778;

/// Default connection timeout.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default inference timeout.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(180);

/// Default depth of the outstanding frame queue.
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 8;

/// Default number of raw-socket connect attempts.
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// Largest payload a length-prefixed frame may carry (max i32).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = i32::MAX as u32;

/// Wake-up interval of the poll-driven WebSocket worker.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound for writing the end-of-stream marker when a stream closes.
pub const END_OF_STREAM_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration shared by transports, command exchange and stream pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound for each connect attempt, handshake and control-plane request.
    pub connection_timeout: Duration,
    /// Bound for each wait on queue space or on an inference result.
    pub inference_timeout: Duration,
    /// Raw-socket connect attempts before giving up.
    pub connect_retries: u32,
    /// Largest accepted length-prefixed payload.
    pub max_payload_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}
