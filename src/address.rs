//! Server address parsing.
//!
//! Addresses have the form `[scheme://]host[:port]`; IPv6 literals are
//! bracketed, as in `http://[::1]:8778`. The scheme selects the transport:
//!
//! | Scheme              | Transport                        |
//! |---------------------|----------------------------------|
//! | none, `tcp`, `asio` | length-prefixed raw socket       |
//! | `http`              | HTTP control plane + WebSocket   |
//!
//! # Example
//!
//! ```
//! use inferlink_client::{ServerAddress, ServerKind};
//!
//! let addr: ServerAddress = "http://10.0.0.5:9000".parse().unwrap();
//! assert_eq!(addr.kind, ServerKind::Http);
//! assert_eq!(addr.host, "10.0.0.5");
//! assert_eq!(addr.port, 9000);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::config::DEFAULT_PORT;
use crate::error::{ClientError, Result};

/// Wire protocol spoken by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerKind {
    /// Length-prefixed binary protocol over a raw TCP socket.
    Socket,
    /// HTTP requests for control, WebSocket for streaming.
    Http,
}

impl ServerKind {
    fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "asio" => Ok(ServerKind::Socket),
            "http" => Ok(ServerKind::Http),
            other => Err(ClientError::Usage(format!(
                "unsupported server address scheme '{}://'",
                other
            ))),
        }
    }
}

/// Host, port and protocol of an inference server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Domain name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Transport selected by the scheme.
    pub kind: ServerKind,
}

impl ServerAddress {
    /// Build an address from parts.
    pub fn new(host: impl Into<String>, port: u16, kind: ServerKind) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
        }
    }

    /// Parse `[scheme://]host[:port]`.
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();

        let (kind, rest) = match address.find("://") {
            Some(pos) => (ServerKind::from_scheme(&address[..pos])?, &address[pos + 3..]),
            None => (ServerKind::Socket, address),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.strip_prefix('[') {
            Some(bracketed) => {
                let end = bracketed.find(']').ok_or_else(|| {
                    ClientError::Usage(format!("unterminated IPv6 address in '{}'", address))
                })?;
                let port = match &bracketed[end + 1..] {
                    "" => DEFAULT_PORT,
                    tail => match tail.strip_prefix(':') {
                        Some(port_str) => parse_port(port_str, address)?,
                        None => {
                            return Err(ClientError::Usage(format!(
                                "unexpected '{}' after IPv6 address in '{}'",
                                tail, address
                            )))
                        }
                    },
                };
                (&bracketed[..end], port)
            }
            None => match rest.rfind(':') {
                Some(pos) => (&rest[..pos], parse_port(&rest[pos + 1..], address)?),
                None => (rest, DEFAULT_PORT),
            },
        };

        if host.contains(':') && !rest.starts_with('[') {
            return Err(ClientError::Usage(format!(
                "IPv6 address in '{}' must be enclosed in brackets",
                address
            )));
        }
        if host.is_empty() {
            return Err(ClientError::Usage(format!(
                "server address '{}' has no host",
                address
            )));
        }

        Ok(Self::new(host, port, kind))
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Base URL for HTTP requests.
    pub fn http_base(&self) -> String {
        format!("http://{}", self.authority())
    }
}

fn parse_port(port_str: &str, address: &str) -> Result<u16> {
    port_str
        .parse::<u16>()
        .map_err(|_| ClientError::Usage(format!("invalid port '{}' in '{}'", port_str, address)))
}

impl FromStr for ServerAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ServerKind::Http => write!(f, "http://{}", self.authority()),
            ServerKind::Socket => f.write_str(&self.authority()),
        }
    }
}
