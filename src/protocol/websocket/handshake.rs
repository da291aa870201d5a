//! HTTP/1.1 Upgrade handshake (RFC 6455 §4.1).
//!
//! The client sends a GET with `Upgrade: websocket`, a random base64
//! `Sec-WebSocket-Key` and version 13. Any response status other than 101 is
//! a connection error. Bytes following the response head already belong to
//! the frame stream and are handed back to the caller.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{ClientError, Result};

/// Upper bound on the response head, to fail fast on garbage.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// Build the upgrade request for `path` on `authority` (`host:port`).
pub fn build_request(authority: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {authority}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Parsed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Parse the response head from `buf`.
///
/// Returns `Ok(None)` until the blank line ending the head has arrived;
/// otherwise the response and the number of bytes it occupied. A status
/// other than 101 is a [`ClientError::Connection`].
pub fn parse_response(buf: &[u8]) -> Result<Option<(HandshakeResponse, usize)>> {
    let end = match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => pos + 4,
        None if buf.len() > MAX_RESPONSE_HEAD => {
            return Err(ClientError::Connection(
                "WebSocket handshake response head too large".to_string(),
            ))
        }
        None => return Ok(None),
    };

    let head = std::str::from_utf8(&buf[..end]).map_err(|_| {
        ClientError::Connection("WebSocket handshake response is not valid text".to_string())
    })?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|_| version.starts_with("HTTP/"))
        .ok_or_else(|| {
            ClientError::Connection(format!(
                "malformed WebSocket handshake status line '{}'",
                status_line
            ))
        })?;

    let headers = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
            l.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    if status != 101 {
        return Err(ClientError::Connection(format!(
            "WebSocket upgrade rejected: {}",
            status_line
        )));
    }

    Ok(Some((HandshakeResponse { status, headers }, end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key_is_16_bytes_base64() {
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_build_request() {
        let req = build_request("host:8778", "/v1/stream", "abc==");
        assert!(req.starts_with("GET /v1/stream HTTP/1.1\r\n"));
        assert!(req.contains("Host: host:8778\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Connection: Upgrade\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: abc==\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse_response(b"HTTP/1.1 101 Switching").unwrap().is_none());
    }

    #[test]
    fn test_parse_101_with_leftover() {
        let mut buf = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n".to_vec();
        let head_len = buf.len();
        buf.extend_from_slice(&[0x82, 0x00]);

        let (resp, used) = parse_response(&buf).unwrap().unwrap();
        assert_eq!(resp.status, 101);
        assert_eq!(
            resp.headers,
            vec![("Upgrade".to_string(), "websocket".to_string())]
        );
        assert_eq!(used, head_len);
        assert_eq!(&buf[used..], &[0x82, 0x00]);
    }

    #[test]
    fn test_parse_rejects_non_101() {
        let err = parse_response(b"HTTP/1.1 404 Not Found\r\n\r\n").unwrap_err();
        assert!(matches!(err, ClientError::Connection(ref m) if m.contains("404")));
    }

    #[test]
    fn test_parse_rejects_garbage_status() {
        assert!(parse_response(b"garbage\r\n\r\n").is_err());
    }
}
