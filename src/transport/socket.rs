//! Raw TCP connection speaking the length-prefixed protocol.
//!
//! # Example
//!
//! ```ignore
//! use inferlink_client::transport::Connection;
//!
//! let mut conn = Connection::connect(&address, &config).await?;
//! conn.send(br#"{"op":"modelzoo","VERSION":4}"#).await?;
//! let reply = conn.recv().await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::address::ServerAddress;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::length_prefix;

/// Open a TCP stream, retrying a bounded number of times.
///
/// Each attempt is bounded by the connection timeout.
pub(crate) async fn connect_tcp(address: &ServerAddress, config: &ClientConfig) -> Result<TcpStream> {
    let authority = address.authority();
    let attempts = config.connect_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(config.connection_timeout, TcpStream::connect(&authority)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                debug!("Connected to {} on attempt {}", authority, attempt);
                return Ok(stream);
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = "timed out".to_string(),
        }
        warn!(
            "Connect attempt {}/{} to {} failed: {}",
            attempt, attempts, authority, last_error
        );
    }

    Err(ClientError::Connection(format!(
        "unable to connect to server {} after {} attempts with timeout {} ms: {}",
        authority,
        attempts,
        config.connection_timeout.as_millis(),
        last_error
    )))
}

/// Render the peer as `ip:port`, falling back to the configured authority.
fn endpoint_of(stream: &TcpStream, address: &ServerAddress) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| address.authority())
}

/// One raw-socket connection.
pub struct Connection {
    stream: TcpStream,
    endpoint: String,
    max_payload_size: u32,
}

impl Connection {
    /// Connect with retries.
    pub async fn connect(address: &ServerAddress, config: &ClientConfig) -> Result<Self> {
        let stream = connect_tcp(address, config).await?;
        let endpoint = endpoint_of(&stream, address);
        Ok(Self {
            stream,
            endpoint,
            max_payload_size: config.max_payload_size,
        })
    }

    /// `ip:port` of the server, for error messages.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one framed message.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        length_prefix::write_frame(&mut self.stream, payload, self.max_payload_size).await
    }

    /// Receive one framed message. `None` means the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        length_prefix::read_frame(&mut self.stream, self.max_payload_size).await
    }

    /// Write the end-of-stream marker, bounded by `limit`.
    pub async fn end_stream(&mut self, limit: Duration) -> Result<()> {
        tokio::time::timeout(limit, length_prefix::write_end_of_stream(&mut self.stream))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "Timeout {} ms writing end-of-stream marker to server '{}'",
                    limit.as_millis(),
                    self.endpoint
                ))
            })?
    }

    /// Shut down the write side; the socket closes on drop.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Split into independently owned halves for the streaming worker.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (
            FrameReader {
                read,
                max_payload_size: self.max_payload_size,
            },
            FrameWriter {
                write,
                endpoint: self.endpoint,
                max_payload_size: self.max_payload_size,
            },
        )
    }
}

/// Read half of a split [`Connection`].
pub struct FrameReader {
    read: OwnedReadHalf,
    max_payload_size: u32,
}

impl FrameReader {
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        length_prefix::read_frame(&mut self.read, self.max_payload_size).await
    }
}

/// Write half of a split [`Connection`].
pub struct FrameWriter {
    write: OwnedWriteHalf,
    endpoint: String,
    max_payload_size: u32,
}

impl FrameWriter {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send each chunk as its own frame.
    pub async fn send_all<B: AsRef<[u8]>>(&mut self, chunks: &[B]) -> Result<()> {
        length_prefix::write_frames(&mut self.write, chunks, self.max_payload_size).await
    }

    pub async fn end_stream(&mut self, limit: Duration) -> Result<()> {
        tokio::time::timeout(limit, length_prefix::write_end_of_stream(&mut self.write))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "Timeout {} ms writing end-of-stream marker to server '{}'",
                    limit.as_millis(),
                    self.endpoint
                ))
            })?
    }

    pub async fn close(mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServerKind;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_send_recv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let frame = length_prefix::read_frame(&mut sock, u32::MAX)
                .await
                .unwrap()
                .unwrap();
            length_prefix::write_frame(&mut sock, &frame, u32::MAX)
                .await
                .unwrap();
        });

        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Socket);
        let mut conn = Connection::connect(&addr, &ClientConfig::default())
            .await
            .unwrap();
        assert_eq!(conn.endpoint(), format!("127.0.0.1:{}", port));

        conn.send(b"echo").await.unwrap();
        let reply = conn.recv().await.unwrap().unwrap();
        assert_eq!(&reply[..], b"echo");

        server.await.unwrap();
        assert!(conn.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        // bind then drop to obtain a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig {
            connect_retries: 2,
            connection_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        };
        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Socket);

        let err = Connection::connect(&addr, &config).await.err().unwrap();
        match err {
            ClientError::Connection(msg) => assert!(msg.contains("2 attempts")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_split_halves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            while let Some(frame) = length_prefix::read_frame(&mut sock, u32::MAX).await.unwrap() {
                if frame.is_empty() {
                    break;
                }
                seen.push(frame);
            }
            for f in &seen {
                length_prefix::write_frame(&mut sock, f, u32::MAX).await.unwrap();
            }
            seen.len()
        });

        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Socket);
        let conn = Connection::connect(&addr, &ClientConfig::default())
            .await
            .unwrap();
        let (mut reader, mut writer) = conn.into_split();

        writer.send_all(&[&b"a"[..], &b"bc"[..]]).await.unwrap();
        writer.end_stream(Duration::from_millis(500)).await.unwrap();

        assert_eq!(&reader.recv().await.unwrap().unwrap()[..], b"a");
        assert_eq!(&reader.recv().await.unwrap().unwrap()[..], b"bc");
        assert_eq!(server.await.unwrap(), 2);
    }
}
