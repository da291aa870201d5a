//! Synchronous command exchange on the raw-socket command channel.
//!
//! One request, one reply. Taking `&mut self` keeps a single command in
//! flight per channel.
//!
//! # Example
//!
//! ```ignore
//! use inferlink_client::command::CommandChannel;
//! use inferlink_client::envelope::Envelope;
//!
//! let mut channel = CommandChannel::connect(&address, &config).await?;
//! let reply = channel.send_command("modelList", Envelope::with_op("modelzoo")).await?;
//! ```

use std::time::Duration;

use tracing::{debug, trace};

use crate::address::ServerAddress;
use crate::codec::JsonCodec;
use crate::config::ClientConfig;
use crate::envelope::{Envelope, Value};
use crate::error::{ClientError, Result};
use crate::transport::Connection;

/// Command/response channel to one server.
pub struct CommandChannel {
    conn: Connection,
    reply_timeout: Duration,
}

impl CommandChannel {
    pub async fn connect(address: &ServerAddress, config: &ClientConfig) -> Result<Self> {
        let conn = Connection::connect(address, config).await?;
        Ok(Self::new(conn, config))
    }

    pub fn new(conn: Connection, config: &ClientConfig) -> Self {
        Self {
            conn,
            reply_timeout: config.inference_timeout,
        }
    }

    /// `ip:port` of the server.
    pub fn endpoint(&self) -> &str {
        self.conn.endpoint()
    }

    /// Send `envelope` and wait for exactly one reply.
    ///
    /// The current protocol version is stamped if missing. The reply must be
    /// an object carrying the version tag; `success: false` in it is an
    /// [`Operation`](ClientError::Operation) error prefixed with `source`.
    pub async fn send_command(&mut self, source: &str, mut envelope: Envelope) -> Result<Envelope> {
        envelope.ensure_version();
        let request = JsonCodec::encode(&envelope)?;
        trace!("{} -> {}: {} bytes", source, self.endpoint(), request.len());
        self.conn.send(&request).await?;

        let reply = tokio::time::timeout(self.reply_timeout, self.conn.recv())
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "Timeout {} ms waiting for response from server '{}'",
                    self.reply_timeout.as_millis(),
                    self.conn.endpoint()
                ))
            })??
            .ok_or(ClientError::ConnectionClosed)?;

        let value: Value = JsonCodec::decode(&reply)?;
        let reply = Envelope::from_value(value).ok_or_else(|| {
            ClientError::Protocol(format!(
                "Response from server '{}' is incorrect.",
                self.endpoint()
            ))
        })?;
        reply.check_version(self.endpoint())?;
        reply.check_success(source)?;
        Ok(reply)
    }

    /// Send `envelope` without waiting for a reply.
    pub async fn fire_and_forget(&mut self, mut envelope: Envelope) -> Result<()> {
        envelope.ensure_version();
        debug!(
            "Sending {} to {} without awaiting reply",
            envelope.op().unwrap_or("command"),
            self.endpoint()
        );
        let request = JsonCodec::encode(&envelope)?;
        self.conn.send(&request).await
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await
    }
}
