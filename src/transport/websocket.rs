//! Poll-driven WebSocket client over a tokio `TcpStream`.
//!
//! All socket I/O after the handshake is non-blocking (`try_read` /
//! `try_write`) and happens through `&self`, so one task can poll while
//! another sends. The codec state lives behind a short-held mutex that is
//! never kept across an `.await`.
//!
//! [`WebSocket::poll`] drives both directions: it waits up to a timeout for
//! the socket to become ready, drains whatever arrived into the reassembly
//! state machine, answers PING/CLOSE, flushes queued output and reports
//! whether anything happened. Completed data messages are collected with
//! [`WebSocket::dispatch`].

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::address::ServerAddress;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::websocket::{
    build_request, encode_frame, generate_key, parse_response, Decoded, FrameDecoder, Message,
    MessageAssembler, Opcode,
};
use crate::transport::socket::connect_tcp;

const READ_CHUNK: usize = 64 * 1024;

/// Normal closure status code.
const CLOSE_NORMAL: u16 = 1000;

/// Closure status sent after a framing error.
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Connection state of the WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Open,
    /// We sent CLOSE and wait for the echo.
    Closing,
    Closed,
}

struct WsIo {
    decoder: FrameDecoder,
    assembler: MessageAssembler,
    outgoing: BytesMut,
    inbox: VecDeque<Message>,
    state: WsState,
}

/// A client WebSocket.
pub struct WebSocket {
    stream: TcpStream,
    io: Mutex<WsIo>,
    endpoint: String,
    write_timeout: Duration,
}

impl WebSocket {
    /// Connect and perform the Upgrade handshake on `path`.
    ///
    /// The handshake is bounded by the connection timeout.
    pub async fn connect(address: &ServerAddress, path: &str, config: &ClientConfig) -> Result<Self> {
        let mut stream = connect_tcp(address, config).await?;
        let endpoint = address.to_string();

        let key = generate_key();
        let request = build_request(&address.authority(), path, &key);

        let handshake = async {
            stream.write_all(request.as_bytes()).await?;

            let mut buf = BytesMut::with_capacity(1024);
            loop {
                if stream.read_buf(&mut buf).await? == 0 {
                    return Err(ClientError::Connection(format!(
                        "server '{}' closed the connection during WebSocket handshake",
                        endpoint
                    )));
                }
                if let Some((response, used)) = parse_response(&buf)? {
                    debug!("WebSocket upgrade on {}{} -> {}", endpoint, path, response.status);
                    buf.advance(used);
                    return Ok(buf);
                }
            }
        };

        let leftover = tokio::time::timeout(config.connection_timeout, handshake)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "Timeout {} ms waiting for WebSocket handshake with server '{}'",
                    config.connection_timeout.as_millis(),
                    endpoint
                ))
            })??;

        let mut decoder = FrameDecoder::new(config.max_payload_size as u64);
        decoder.extend(&leftover);

        Ok(Self {
            stream,
            io: Mutex::new(WsIo {
                decoder,
                assembler: MessageAssembler::new(config.max_payload_size as u64),
                outgoing: BytesMut::new(),
                inbox: VecDeque::new(),
                state: WsState::Open,
            }),
            endpoint,
            write_timeout: config.inference_timeout,
        })
    }

    /// Server address, for error messages.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn lock(&self) -> MutexGuard<'_, WsIo> {
        // the codec state stays consistent even if a holder panicked
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> WsState {
        self.lock().state
    }

    /// Queue a masked TEXT message and flush it.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.enqueue(Opcode::Text, text.as_bytes())?;
        self.flush().await
    }

    /// Queue a masked BINARY message and flush it.
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.enqueue(Opcode::Binary, data)?;
        self.flush().await
    }

    fn enqueue(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let mut ws = self.lock();
        if ws.state != WsState::Open {
            return Err(ClientError::ConnectionClosed);
        }
        encode_frame(opcode, true, payload, Some(rand::random()), &mut ws.outgoing);
        Ok(())
    }

    /// Write queued output until it is all on the wire.
    async fn flush(&self) -> Result<()> {
        let deadline = Instant::now() + self.write_timeout;
        loop {
            if self.try_flush()? {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, self.stream.writable())
                .await
                .is_err()
            {
                return Err(ClientError::Timeout(format!(
                    "Timeout {} ms sending data to server '{}'",
                    self.write_timeout.as_millis(),
                    self.endpoint
                )));
            }
        }
    }

    /// Non-blocking write of queued output. `true` when nothing is left.
    fn try_flush(&self) -> Result<bool> {
        let mut ws = self.lock();
        while !ws.outgoing.is_empty() {
            match self.stream.try_write(&ws.outgoing) {
                Ok(0) => {
                    return Err(ClientError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )))
                }
                Ok(n) => ws.outgoing.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => {
                    ws.state = WsState::Closed;
                    return Err(e.into());
                }
            }
        }
        Ok(true)
    }

    /// Wait up to `timeout` for socket activity, then process it.
    ///
    /// Returns whether any bytes were read or written. Peer shutdown without
    /// a CLOSE frame, framing errors and unexpected opcodes close the socket
    /// and are returned as errors.
    pub async fn poll(&self, timeout: Duration) -> Result<bool> {
        if self.state() == WsState::Closed {
            return Err(ClientError::ConnectionClosed);
        }

        let interest = if self.lock().outgoing.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        let ready = match tokio::time::timeout(timeout, self.stream.ready(interest)).await {
            Ok(ready) => ready?,
            Err(_) => return Ok(false),
        };

        let mut activity = false;
        if ready.is_readable() || ready.is_read_closed() {
            activity |= self.read_available()?;
        }
        let pending = self.lock().outgoing.len();
        self.try_flush()?;
        activity |= self.lock().outgoing.len() != pending;
        Ok(activity)
    }

    /// Drain the socket into the decoder and process complete frames.
    fn read_available(&self) -> Result<bool> {
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut ws = self.lock();
        let mut read_any = false;

        loop {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    let was_open = ws.state == WsState::Open;
                    ws.state = WsState::Closed;
                    process_frames(&mut ws)?;
                    if was_open && ws.inbox.is_empty() {
                        return Err(ClientError::ConnectionClosed);
                    }
                    return Ok(true);
                }
                Ok(n) => {
                    trace!("WebSocket read {} bytes from {}", n, self.endpoint);
                    ws.decoder.extend(&chunk[..n]);
                    read_any = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    ws.state = WsState::Closed;
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = process_frames(&mut ws) {
            warn!("Closing WebSocket to {}: {}", self.endpoint, e);
            if ws.state == WsState::Open {
                encode_frame(
                    Opcode::Close,
                    true,
                    &CLOSE_PROTOCOL_ERROR.to_be_bytes(),
                    Some(rand::random()),
                    &mut ws.outgoing,
                );
            }
            ws.state = WsState::Closed;
            drop(ws);
            self.abort();
            return Err(e);
        }
        Ok(read_any)
    }

    /// Best-effort flush of queued output (the CLOSE frame), then shut the
    /// socket down in both directions.
    fn abort(&self) {
        if let Err(e) = self.try_flush() {
            debug!("Could not flush CLOSE to {}: {}", self.endpoint, e);
        }
        self.lock().outgoing.clear();
        if let Err(e) = shutdown_socket(&self.stream) {
            debug!("Shutdown of WebSocket to {} failed: {}", self.endpoint, e);
        }
    }

    /// Take the next completed data message, if any.
    pub fn dispatch(&self) -> Option<Message> {
        self.lock().inbox.pop_front()
    }

    /// Send a text message and wait for the first data message in reply.
    pub async fn text_send_receive(&self, text: &str, timeout: Duration) -> Result<Message> {
        self.send_text(text).await?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.dispatch() {
                return Ok(msg);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout(format!(
                    "Timeout {} ms waiting for response from server '{}'",
                    timeout.as_millis(),
                    self.endpoint
                )));
            }
            self.poll(remaining).await?;
        }
    }

    /// Send a CLOSE frame (bounded by `limit`) and mark the socket closed.
    pub async fn close(&self, limit: Duration) -> Result<()> {
        {
            let mut ws = self.lock();
            if ws.state != WsState::Open {
                ws.state = WsState::Closed;
                return Ok(());
            }
            encode_frame(
                Opcode::Close,
                true,
                &CLOSE_NORMAL.to_be_bytes(),
                Some(rand::random()),
                &mut ws.outgoing,
            );
            ws.state = WsState::Closing;
        }
        let flushed = tokio::time::timeout(limit, self.flush()).await;
        self.lock().state = WsState::Closed;
        match flushed {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }
}

/// Shut down a socket that stays registered with the reactor.
///
/// `TcpStream::shutdown` needs `&mut`, but the stream is shared with a
/// concurrent poller; a duplicated handle reaches the same socket.
fn shutdown_socket(stream: &TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    let handle = {
        use std::os::fd::AsFd;
        std::net::TcpStream::from(stream.as_fd().try_clone_to_owned()?)
    };
    #[cfg(windows)]
    let handle = {
        use std::os::windows::io::AsSocket;
        std::net::TcpStream::from(stream.as_socket().try_clone_to_owned()?)
    };
    handle.shutdown(std::net::Shutdown::Both)
}

/// Run decoded frames through reassembly; answer control frames.
fn process_frames(ws: &mut WsIo) -> Result<()> {
    loop {
        let frame = match ws.decoder.decode()? {
            Decoded::Frame(frame) => frame,
            Decoded::NeedMore(_) => return Ok(()),
        };
        let Some(message) = ws.assembler.push(frame)? else {
            continue;
        };
        match message {
            Message::Ping(payload) => {
                if ws.state == WsState::Open {
                    encode_frame(Opcode::Pong, true, &payload, Some(rand::random()), &mut ws.outgoing);
                }
            }
            Message::Pong(_) => {}
            Message::Close(payload) => {
                if ws.state == WsState::Open {
                    encode_frame(Opcode::Close, true, &payload, Some(rand::random()), &mut ws.outgoing);
                }
                ws.state = WsState::Closed;
                debug!("WebSocket closed by peer");
            }
            data => ws.inbox.push_back(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServerKind;
    use crate::protocol::websocket::{apply_mask, FrameHeader, HeaderStatus};
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accept one connection, answer the upgrade, return the socket.
    async fn accept_upgrade(listener: &TcpListener) -> TcpStream {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        sock.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();
        sock
    }

    /// Read one client frame (must be masked) and return opcode + unmasked payload.
    async fn read_client_frame(sock: &mut TcpStream) -> (Opcode, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let HeaderStatus::Complete(h) = FrameHeader::parse(&buf).unwrap() {
                let total = h.header_size + h.payload_len as usize;
                if buf.len() >= total {
                    let key = h.mask_key.expect("client frames are masked");
                    let mut payload = buf[h.header_size..total].to_vec();
                    apply_mask(&mut payload, key);
                    return (h.opcode, payload);
                }
            }
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn server_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> BytesMut {
        let mut dst = BytesMut::new();
        encode_frame(opcode, fin, payload, None, &mut dst);
        dst
    }

    async fn connect(port: u16) -> WebSocket {
        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Http);
        WebSocket::connect(&addr, "/v1/stream", &ClientConfig::default())
            .await
            .unwrap()
    }

    async fn poll_for_message(ws: &WebSocket) -> Message {
        for _ in 0..100 {
            if let Some(m) = ws.dispatch() {
                return m;
            }
            ws.poll(Duration::from_millis(50)).await.unwrap();
        }
        panic!("no message");
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut chunk = [0u8; 1024];
            let _ = sock.read(&mut chunk).await;
            sock.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Http);
        let err = WebSocket::connect(&addr, "/v1/stream", &ClientConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Connection(ref m) if m.contains("403")));
    }

    #[tokio::test]
    async fn test_send_is_masked_and_reply_received() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sock = accept_upgrade(&listener).await;
            let (opcode, payload) = read_client_frame(&mut sock).await;
            assert_eq!(opcode, Opcode::Binary);
            sock.write_all(&server_frame(Opcode::Binary, true, &payload))
                .await
                .unwrap();
            sock
        });

        let ws = connect(port).await;
        ws.send_binary(b"frame-data").await.unwrap();
        let msg = poll_for_message(&ws).await;
        assert_eq!(msg, Message::Binary(Bytes::from_static(b"frame-data")));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sock = accept_upgrade(&listener).await;
            sock.write_all(&server_frame(Opcode::Ping, true, b"are-you-there"))
                .await
                .unwrap();
            let (opcode, payload) = read_client_frame(&mut sock).await;
            (opcode, payload, sock)
        });

        let ws = connect(port).await;
        let mut result = None;
        for _ in 0..100 {
            ws.poll(Duration::from_millis(20)).await.unwrap();
            if server.is_finished() {
                result = Some(server.await.unwrap());
                break;
            }
        }
        let (opcode, payload, _sock) = result.expect("server saw no pong");
        assert_eq!(opcode, Opcode::Pong);
        assert_eq!(payload, b"are-you-there");
    }

    #[tokio::test]
    async fn test_fragmented_message_reassembled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sock = accept_upgrade(&listener).await;
            for (i, part) in [&b"ab"[..], b"cd", b"ef"].iter().enumerate() {
                let opcode = if i == 0 { Opcode::Binary } else { Opcode::Continuation };
                sock.write_all(&server_frame(opcode, i == 2, part)).await.unwrap();
                sock.flush().await.unwrap();
            }
            sock
        });

        let ws = connect(port).await;
        let msg = poll_for_message(&ws).await;
        assert_eq!(msg, Message::Binary(Bytes::from_static(b"abcdef")));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_is_echoed_and_state_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sock = accept_upgrade(&listener).await;
            sock.write_all(&server_frame(Opcode::Close, true, &1000u16.to_be_bytes()))
                .await
                .unwrap();
            read_client_frame(&mut sock).await.0
        });

        let ws = connect(port).await;
        for _ in 0..100 {
            if ws.state() == WsState::Closed {
                break;
            }
            ws.poll(Duration::from_millis(20)).await.unwrap();
        }
        assert_eq!(ws.state(), WsState::Closed);
        // flush of the echo happens in the same poll that saw the CLOSE
        assert_eq!(server.await.unwrap(), Opcode::Close);
        assert!(matches!(
            ws.send_binary(b"late").await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    /// Serve `bad` after the upgrade, then report what the client sent back
    /// and whether it closed the connection afterwards.
    async fn framing_error_peer(bad: Vec<u8>) -> (u16, tokio::task::JoinHandle<(Opcode, Vec<u8>, usize)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sock = accept_upgrade(&listener).await;
            sock.write_all(&bad).await.unwrap();
            let (opcode, payload) = read_client_frame(&mut sock).await;
            let mut rest = [0u8; 16];
            let trailing = tokio::time::timeout(Duration::from_secs(1), sock.read(&mut rest))
                .await
                .expect("client kept the connection open")
                .unwrap();
            (opcode, payload, trailing)
        });
        (port, server)
    }

    async fn poll_until_error(ws: &WebSocket) -> Option<ClientError> {
        for _ in 0..100 {
            if let Err(e) = ws.poll(Duration::from_millis(20)).await {
                return Some(e);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_unexpected_opcode_closes() {
        let (port, server) = framing_error_peer(vec![0x83, 0x00]).await;

        let ws = connect(port).await;
        let err = poll_until_error(&ws).await;
        assert!(matches!(err, Some(ClientError::Framing(_))));
        assert_eq!(ws.state(), WsState::Closed);

        // the peer sees a CLOSE with status 1002, then end of stream, while
        // the client object is still alive
        let (opcode, payload, trailing) = server.await.unwrap();
        assert_eq!(opcode, Opcode::Close);
        assert_eq!(payload, CLOSE_PROTOCOL_ERROR.to_be_bytes());
        assert_eq!(trailing, 0);
        assert!(matches!(
            ws.poll(Duration::from_millis(10)).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_length_with_top_bit_closes() {
        let mut bad = vec![0x82, 127];
        bad.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let (port, server) = framing_error_peer(bad).await;

        let ws = connect(port).await;
        let err = poll_until_error(&ws).await;
        assert!(matches!(err, Some(ClientError::Framing(_))));

        let (opcode, payload, trailing) = server.await.unwrap();
        assert_eq!(opcode, Opcode::Close);
        assert_eq!(payload, 1002u16.to_be_bytes());
        assert_eq!(trailing, 0);
        drop(ws);
    }
}
