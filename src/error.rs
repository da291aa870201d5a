//! Error types for inferlink-client.

use std::fmt;

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// HTTP control-plane request failed below the application level.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connect failure, rejected upgrade handshake, or bad HTTP status.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed length header, invalid WebSocket frame, unexpected opcode.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Missing or incompatible protocol version.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with `success: false`.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Waiting for queue space or for a reply exceeded the inference timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// API misuse (send before open, no callback installed, ...).
    #[error("Incorrect API use: {0}")]
    Usage(String),

    /// Peer closed the connection while a reply was expected.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The stream was torn down while a caller was waiting on it.
    #[error("Stream aborted: {0}")]
    StreamAborted(String),
}

/// Coarse classification of [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket-level failure or rejected handshake.
    Transport,
    /// Wire-format violation.
    Framing,
    /// Version mismatch or malformed envelope.
    Protocol,
    /// Server-reported failure.
    Application,
    /// Inference timeout.
    Timeout,
    /// Programmer error.
    Usage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Framing => "framing",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Application => "application",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Usage => "usage",
        };
        f.write_str(name)
    }
}

impl ClientError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Io(_)
            | ClientError::Http(_)
            | ClientError::Connection(_)
            | ClientError::ConnectionClosed
            | ClientError::StreamAborted(_) => ErrorKind::Transport,
            ClientError::Framing(_) => ErrorKind::Framing,
            ClientError::Json(_)
            | ClientError::MsgPackEncode(_)
            | ClientError::MsgPackDecode(_)
            | ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Operation(_) => ErrorKind::Application,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Usage(_) => ErrorKind::Usage,
        }
    }
}

/// A stream failure captured by the pipeline.
///
/// Sticky until the next stream open; clonable so it can be re-raised from
/// every call that observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    /// Classification of the original error.
    pub kind: ErrorKind,
    /// Rendered message of the original error.
    pub message: String,
}

impl RecordedError {
    /// Capture an error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ClientError> for RecordedError {
    fn from(err: &ClientError) -> Self {
        // string variants keep their bare text so re-raising does not stack prefixes
        let message = match err {
            ClientError::Connection(msg)
            | ClientError::Framing(msg)
            | ClientError::Protocol(msg)
            | ClientError::Operation(msg)
            | ClientError::Timeout(msg)
            | ClientError::Usage(msg)
            | ClientError::StreamAborted(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self::new(err.kind(), message)
    }
}

impl From<RecordedError> for ClientError {
    fn from(rec: RecordedError) -> Self {
        match rec.kind {
            ErrorKind::Transport => ClientError::Connection(rec.message),
            ErrorKind::Framing => ClientError::Framing(rec.message),
            ErrorKind::Protocol => ClientError::Protocol(rec.message),
            ErrorKind::Application => ClientError::Operation(rec.message),
            ErrorKind::Timeout => ClientError::Timeout(rec.message),
            ErrorKind::Usage => ClientError::Usage(rec.message),
        }
    }
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(ClientError::Framing("x".into()).kind(), ErrorKind::Framing);
        assert_eq!(ClientError::ConnectionClosed.kind(), ErrorKind::Transport);
        assert_eq!(ClientError::Operation("x".into()).kind(), ErrorKind::Application);
        assert_eq!(ClientError::Timeout("x".into()).kind(), ErrorKind::Timeout);
        assert_eq!(ClientError::Usage("x".into()).kind(), ErrorKind::Usage);
        assert_eq!(ClientError::Protocol("x".into()).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_recorded_error_round_trip_keeps_kind() {
        let original = ClientError::Timeout("100 ms".into());
        let recorded = RecordedError::from(&original);
        assert_eq!(recorded.kind, ErrorKind::Timeout);

        let raised = ClientError::from(recorded);
        assert!(matches!(raised, ClientError::Timeout(ref m) if m.contains("100 ms")));
    }

    #[test]
    fn test_recorded_application_error_keeps_server_text() {
        let recorded = RecordedError::from(&ClientError::Operation("bad model".into()));
        assert_eq!(recorded.message, "bad model");
        assert_eq!(recorded.to_string(), "bad model");
    }
}
