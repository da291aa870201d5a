//! Session facade: one inference server, both planes.
//!
//! A [`Session`] picks its transport from the server address:
//!
//! | Address | Control plane | Data plane |
//! |---|---|---|
//! | `host`, `tcp://host`, `asio://host` | JSON commands on a length-prefixed socket | dedicated length-prefixed stream socket |
//! | `http://host` | REST requests | WebSocket on `/v1/stream` |
//!
//! Streaming follows open → observe → send* → drain, repeatable after each
//! drain; [`Session::predict`] wraps one frame of that cycle.
//!
//! # Example
//!
//! ```ignore
//! use inferlink_client::Session;
//!
//! #[tokio::main]
//! async fn main() -> inferlink_client::Result<()> {
//!     let mut session = Session::builder("tcp://192.168.0.10")
//!         .inference_timeout(std::time::Duration::from_secs(30))
//!         .connect()
//!         .await?;
//!
//!     session.open_stream("yolo_v5s", 4, &Default::default()).await?;
//!     session.result_observe(|result, frame| println!("{frame}: {result:?}"));
//!     for (i, image) in images.iter().enumerate() {
//!         session.send(&[image], i.to_string()).await?;
//!     }
//!     session.drain().await?;
//!     session.close().await
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::{ServerAddress, ServerKind};
use crate::codec::{JsonCodec, MsgPackCodec};
use crate::command::CommandChannel;
use crate::config::{ClientConfig, END_OF_STREAM_TIMEOUT};
use crate::envelope::{Envelope, Value};
use crate::error::{ClientError, RecordedError, Result};
use crate::protocol::length_prefix;
use crate::protocol::websocket::Message;
use crate::stream::{poll_worker, socket_worker, FrameInfo, SessionState, StreamCore};
use crate::transport::{Connection, FrameReader, FrameWriter, HttpControl, WebSocket};

/// Path of the WebSocket streaming endpoint on HTTP servers.
const STREAM_PATH: &str = "/v1/stream";

/// One model of the server's model zoo.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    /// Model configuration as published by the server.
    pub params: Value,
}

/// Fluent constructor for [`Session`].
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    address: String,
    config: ClientConfig,
}

impl SessionBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            config: ClientConfig::default(),
        }
    }

    /// Bound for connecting, handshakes and control-plane replies on HTTP.
    /// Default: 10 s
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Bound for each wait on queue space or on a result.
    /// Default: 180 s
    pub fn inference_timeout(mut self, timeout: Duration) -> Self {
        self.config.inference_timeout = timeout;
        self
    }

    /// Raw-socket connect attempts.
    /// Default: 3
    pub fn connect_retries(mut self, retries: u32) -> Self {
        self.config.connect_retries = retries.max(1);
        self
    }

    /// Largest length-prefixed payload accepted in either direction.
    pub fn max_payload_size(mut self, limit: u32) -> Self {
        self.config.max_payload_size = limit;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Parse the address and connect the control plane.
    pub async fn connect(self) -> Result<Session> {
        let address = ServerAddress::parse(&self.address)?;
        Session::connect_with(address, self.config).await
    }
}

struct SocketStream {
    writer: FrameWriter,
    /// `None` while the receive worker owns it.
    reader: Option<FrameReader>,
    worker: Option<JoinHandle<Option<FrameReader>>>,
}

struct WsStream {
    ws: Arc<WebSocket>,
    worker: Option<JoinHandle<()>>,
}

enum Backend {
    Socket {
        commands: Option<CommandChannel>,
        stream: Option<SocketStream>,
    },
    Http {
        control: HttpControl,
        stream: Option<WsStream>,
    },
}

/// Client session with one inference server.
pub struct Session {
    address: ServerAddress,
    config: ClientConfig,
    backend: Backend,
    core: Arc<StreamCore>,
}

impl Session {
    pub fn builder(address: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(address)
    }

    /// Connect with default configuration.
    pub async fn connect(address: &str) -> Result<Self> {
        SessionBuilder::new(address).connect().await
    }

    /// Connect to an already parsed address.
    ///
    /// The raw-socket command channel is connected immediately; the HTTP
    /// client connects on first request.
    pub async fn connect_with(address: ServerAddress, config: ClientConfig) -> Result<Self> {
        let backend = match address.kind {
            ServerKind::Socket => Backend::Socket {
                commands: Some(CommandChannel::connect(&address, &config).await?),
                stream: None,
            },
            ServerKind::Http => Backend::Http {
                control: HttpControl::new(&address, &config)?,
                stream: None,
            },
        };
        info!("Session with {} established", address);
        let core = Arc::new(StreamCore::new(address.to_string(), config.inference_timeout));
        Ok(Self {
            address,
            config,
            backend,
            core,
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.core.session_state() == SessionState::Closed {
            return Err(ClientError::Usage(format!("{}: session is closed", op)));
        }
        Ok(())
    }

    fn commands(&mut self) -> Result<&mut CommandChannel> {
        match &mut self.backend {
            Backend::Socket {
                commands: Some(channel),
                ..
            } => Ok(channel),
            _ => Err(ClientError::Usage("command channel is closed".to_string())),
        }
    }

    /// Run a raw-socket command and take the reply payload stored under `op`.
    async fn command(&mut self, source: &str, request: Envelope) -> Result<Value> {
        let op = request.op().unwrap_or_default().to_string();
        let mut reply = self.commands()?.send_command(source, request).await?;
        Ok(reply.remove(&op).unwrap_or(Value::Null))
    }

    // ---- control plane ----

    /// List the models of every model zoo the server serves.
    pub async fn model_list(&mut self) -> Result<Vec<ModelInfo>> {
        self.ensure_open("modelList")?;
        match &self.backend {
            Backend::Socket { .. } => {
                let zoo = self.command("modelList", Envelope::with_op("modelzoo")).await?;
                let Value::Array(nodes) = zoo else {
                    return Ok(Vec::new());
                };
                nodes.into_iter().map(model_from_node).collect()
            }
            Backend::Http { control, .. } => {
                let zoo = control.get("/v1/modelzoo", "modelList").await?;
                let Value::Map(models) = zoo else {
                    return Ok(Vec::new());
                };
                Ok(models
                    .into_iter()
                    .map(|(name, params)| ModelInfo { name, params })
                    .collect())
            }
        }
    }

    /// Host system information dictionary.
    pub async fn system_info(&mut self) -> Result<Value> {
        self.ensure_open("systemInfo")?;
        match &self.backend {
            Backend::Socket { .. } => {
                self.command("systemInfo", Envelope::with_op("system_info"))
                    .await
            }
            Backend::Http { control, .. } => control.get("/v1/system_info", "systemInfo").await,
        }
    }

    /// Label dictionary of `model`.
    pub async fn label_dictionary(&mut self, model: &str) -> Result<Value> {
        self.ensure_open("labelDictionary")?;
        match &self.backend {
            Backend::Socket { .. } => {
                let request = Envelope::with_op("label_dictionary").field("name", model);
                self.command("labelDictionary", request).await
            }
            Backend::Http { control, .. } => {
                let path = format!("/v1/label_dictionary/{}", model);
                control.get(&path, "labelDictionary").await
            }
        }
    }

    /// Server tracing facility management; the reply is request-specific.
    pub async fn trace_manage(&mut self, request: &Value) -> Result<Value> {
        self.ensure_open("traceManage")?;
        match &self.backend {
            Backend::Socket { .. } => {
                let request = Envelope::with_op("trace_manage").field("args", request.clone());
                self.command("traceManage", request).await
            }
            Backend::Http { control, .. } => {
                control
                    .post("/v1/trace_manage", Some(request), "traceManage")
                    .await
            }
        }
    }

    /// Model zoo management; the reply is request-specific.
    pub async fn model_zoo_manage(&mut self, request: &Value) -> Result<Value> {
        self.ensure_open("modelZooManage")?;
        match &self.backend {
            Backend::Socket { .. } => {
                let request = Envelope::with_op("zoo_manage").field("args", request.clone());
                self.command("modelZooManage", request).await
            }
            Backend::Http { control, .. } => {
                control
                    .post("/v1/zoo_manage", Some(request), "modelZooManage")
                    .await
            }
        }
    }

    /// Device control for tooling. Raw-socket servers only.
    pub async fn device_control(&mut self, request: &Value) -> Result<Value> {
        self.ensure_open("devCtrl")?;
        match &self.backend {
            Backend::Socket { .. } => {
                let request = Envelope::with_op("dev_ctrl").field("args", request.clone());
                self.command("devCtrl", request).await
            }
            Backend::Http { .. } => Err(ClientError::Usage(
                "device control is not supported by HTTP servers".to_string(),
            )),
        }
    }

    /// Ask the server to sleep `sleep_ms` and answer.
    ///
    /// With `ignore_errors` every failure is reported as `Ok(false)`.
    pub async fn ping(&mut self, sleep_ms: u64, ignore_errors: bool) -> Result<bool> {
        self.ensure_open("ping")?;
        let result = match &self.backend {
            Backend::Socket { .. } => {
                let request = Envelope::with_op("sleep").field("sleep_time_ms", sleep_ms);
                self.command("ping", request).await.map(drop)
            }
            Backend::Http { control, .. } => {
                let path = format!("/v1/sleep/{}", sleep_ms);
                control.post(&path, None, "ping").await.map(drop)
            }
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if ignore_errors => {
                debug!("Ping of {} failed: {}", self.address, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the server process to exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.ensure_open("shutdown")?;
        match &self.backend {
            Backend::Socket { .. } => {
                self.commands()?
                    .fire_and_forget(Envelope::with_op("shutdown"))
                    .await?;
                // an empty frame on a fresh connection releases the server's accept loop
                let mut conn = Connection::connect(&self.address, &self.config).await?;
                conn.end_stream(self.config.connection_timeout).await?;
                conn.close().await
            }
            Backend::Http { control, .. } => {
                // an unreachable server must raise here
                control.post("/v1/sleep/0", None, "ping").await?;
                if let Err(e) = control.post("/v1/shutdown", None, "shutdown").await {
                    debug!("Shutdown request to {} ended with: {}", self.address, e);
                }
                Ok(())
            }
        }
    }

    // ---- data plane ----

    /// Open a stream for `model` with at most `depth` frames outstanding.
    ///
    /// `params` are extra model parameters (a map; empty for none). Any
    /// previously open stream is closed first.
    pub async fn open_stream(&mut self, model: &str, depth: usize, params: &Value) -> Result<()> {
        self.ensure_open("openStream")?;
        if depth == 0 {
            return Err(ClientError::Usage(
                "openStream: frame queue depth must be at least 1".to_string(),
            ));
        }
        self.close_stream().await;

        match &mut self.backend {
            Backend::Socket { stream, .. } => {
                let mut request = Envelope::with_op("stream").field("name", model);
                if params.as_map().is_some_and(|m| !m.is_empty()) {
                    request.insert(
                        "config",
                        with_device_timeout(params, self.config.inference_timeout),
                    );
                }
                request.ensure_version();
                let request = JsonCodec::encode(&request)?;

                let conn = Connection::connect(&self.address, &self.config).await?;
                let (reader, mut writer) = conn.into_split();
                writer.send_all(&[request]).await?;
                *stream = Some(SocketStream {
                    writer,
                    reader: Some(reader),
                    worker: None,
                });
            }
            Backend::Http { stream, .. } => {
                let ws = WebSocket::connect(&self.address, STREAM_PATH, &self.config).await?;
                let mut request = BTreeMap::new();
                request.insert("name".to_string(), Value::from(model));
                request.insert("config".to_string(), params.clone());
                let text = serde_json::to_string(&Value::Map(request))?;

                let reply = ws
                    .text_send_receive(&text, self.config.connection_timeout)
                    .await?;
                let reply: Value = match reply {
                    Message::Text(text) => JsonCodec::decode(text.as_bytes())?,
                    Message::Binary(data) => MsgPackCodec::decode(&data)?,
                    other => {
                        return Err(ClientError::Protocol(format!(
                            "unexpected {:?} reply to stream configuration from server '{}'",
                            other, self.address
                        )))
                    }
                };
                if let Some(reply) = Envelope::from_value(reply) {
                    reply.check_success(&format!(
                        "Error configuring model {} on AI server {}",
                        model, self.address
                    ))?;
                }
                *stream = Some(WsStream {
                    ws: Arc::new(ws),
                    worker: None,
                });
            }
        }

        self.core.open(depth);
        info!("Stream for model {} opened on {} (queue depth {})", model, self.address, depth);
        Ok(())
    }

    /// Install the callback receiving every stream result with its frame token.
    ///
    /// Results arrive in send order, on a worker task.
    pub fn result_observe<F>(&mut self, callback: F)
    where
        F: FnMut(Envelope, FrameInfo) + Send + 'static,
    {
        self.core.set_callback(Some(Box::new(callback)));
    }

    /// Remove the result callback.
    pub fn result_unobserve(&mut self) {
        self.core.set_callback(None);
    }

    fn stream_is_open(&self) -> bool {
        match &self.backend {
            Backend::Socket { stream, .. } => stream.is_some(),
            Backend::Http { stream, .. } => stream.is_some(),
        }
    }

    /// Send one frame made of `chunks` for inference.
    ///
    /// Waits while `depth` frames are outstanding. After a stream failure
    /// the recorded error is returned and nothing is sent.
    pub async fn send<B: AsRef<[u8]>>(
        &mut self,
        chunks: &[B],
        frame_info: impl Into<FrameInfo>,
    ) -> Result<()> {
        self.ensure_open("dataSend")?;
        if !self.stream_is_open() {
            return Err(ClientError::Usage("dataSend: socket was not opened".to_string()));
        }
        if !self.core.has_callback() {
            return Err(ClientError::Usage(
                "dataSend: observation callback is not installed".to_string(),
            ));
        }
        if chunks.is_empty() || chunks.iter().any(|c| c.as_ref().is_empty()) {
            return Err(ClientError::Usage(
                "dataSend: frame data must not be empty".to_string(),
            ));
        }

        self.core.admit(frame_info.into()).await?;
        let mut pending = PendingFrame::new(&self.core);

        for chunk in chunks {
            // rejected before any byte is written
            length_prefix::encode_header(chunk.as_ref().len(), self.config.max_payload_size)?;
        }

        let core = self.core.clone();
        let sent = match &mut self.backend {
            Backend::Socket {
                stream: Some(stream),
                ..
            } => {
                pending.writing();
                send_socket(&core, stream, chunks).await
            }
            Backend::Http {
                stream: Some(stream),
                ..
            } => {
                pending.writing();
                send_ws(&core, stream, chunks).await
            }
            _ => Err(ClientError::Usage("dataSend: socket was not opened".to_string())),
        };
        match &sent {
            Ok(()) => pending.sent(),
            Err(e) if pending.is_writing() => {
                pending.sent();
                core.fail(e);
            }
            Err(_) => {}
        }
        sent
    }

    /// Wait for every outstanding result.
    ///
    /// Returns the recorded stream error, if any. After a clean drain the
    /// stream stays open for the next batch.
    pub async fn drain(&mut self) -> Result<()> {
        self.ensure_open("dataEnd")?;
        let drained = self.core.drain().await;

        match &mut self.backend {
            Backend::Socket {
                stream: Some(stream),
                ..
            } => {
                if let Some(worker) = stream.worker.take() {
                    if drained.is_ok() {
                        match worker.await {
                            Ok(reader) => stream.reader = reader,
                            Err(e) => warn!("Socket receive worker ended abnormally: {}", e),
                        }
                    } else {
                        worker.abort();
                    }
                }
            }
            Backend::Http {
                stream: Some(stream),
                ..
            } => {
                if let Some(worker) = stream.worker.take() {
                    if drained.is_ok() {
                        if let Err(e) = worker.await {
                            warn!("WebSocket poll worker ended abnormally: {}", e);
                        }
                    } else {
                        worker.abort();
                    }
                }
            }
            _ => {}
        }
        drained
    }

    /// Single-frame inference: send `chunks`, wait for its result.
    ///
    /// Rejected while a streaming callback is installed.
    pub async fn predict<B: AsRef<[u8]>>(&mut self, chunks: &[B]) -> Result<Envelope> {
        if self.core.has_callback() {
            return Err(ClientError::Usage(
                "cannot perform single-frame inference: client was configured for streaming inference"
                    .to_string(),
            ));
        }

        let output = Arc::new(Mutex::new(None));
        let _guard = CallbackGuard::install(&self.core, output.clone());

        self.send(chunks, FrameInfo::new()).await?;
        self.drain().await?;

        let result = output.lock().unwrap_or_else(|e| e.into_inner()).take();
        result.ok_or_else(|| {
            ClientError::Protocol(format!("server '{}' returned no result", self.address))
        })
    }

    /// Frames sent but not yet resulted.
    pub fn outstanding_count(&self) -> usize {
        self.core.outstanding()
    }

    /// First error of the current stream, if any.
    pub fn last_error(&self) -> Option<RecordedError> {
        self.core.last_error()
    }

    pub fn session_state(&self) -> SessionState {
        self.core.session_state()
    }

    /// Close the stream connection without waiting for outstanding results.
    pub async fn close_stream(&mut self) {
        match &mut self.backend {
            Backend::Socket { stream, .. } => {
                let Some(mut stream) = stream.take() else {
                    return;
                };
                if let Some(worker) = stream.worker.take() {
                    worker.abort();
                }
                self.core.detach();
                if let Err(e) = stream.writer.end_stream(END_OF_STREAM_TIMEOUT).await {
                    debug!("End-of-stream marker to {} not written: {}", self.address, e);
                }
                if let Err(e) = stream.writer.close().await {
                    debug!("Stream socket to {} closed with: {}", self.address, e);
                }
            }
            Backend::Http { stream, .. } => {
                let Some(mut stream) = stream.take() else {
                    return;
                };
                if let Some(worker) = stream.worker.take() {
                    worker.abort();
                }
                self.core.detach();
                if let Err(e) = stream.ws.close(END_OF_STREAM_TIMEOUT).await {
                    debug!("WebSocket to {} closed with: {}", self.address, e);
                }
            }
        }
        debug!("Stream to {} closed", self.address);
    }

    /// Drain outstanding results, close every connection and move to `Closed`.
    ///
    /// Calls made afterwards fail with a usage error.
    pub async fn close(&mut self) -> Result<()> {
        if self.core.session_state() == SessionState::Closed {
            return Ok(());
        }
        let drained = if self.core.outstanding() > 0 {
            self.drain().await
        } else {
            Ok(())
        };
        self.close_stream().await;

        if let Backend::Socket { commands, .. } = &mut self.backend {
            if let Some(channel) = commands.take() {
                if let Err(e) = channel.close().await {
                    debug!("Command channel to {} closed with: {}", self.address, e);
                }
            }
        }
        self.core.close();
        info!("Session with {} closed", self.address);
        drained
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.core.close();
        match &mut self.backend {
            Backend::Socket {
                stream: Some(stream),
                ..
            } => {
                if let Some(worker) = stream.worker.take() {
                    worker.abort();
                }
            }
            Backend::Http {
                stream: Some(stream),
                ..
            } => {
                if let Some(worker) = stream.worker.take() {
                    worker.abort();
                }
            }
            _ => {}
        }
    }
}

async fn send_socket<B: AsRef<[u8]>>(
    core: &Arc<StreamCore>,
    stream: &mut SocketStream,
    chunks: &[B],
) -> Result<()> {
    stream.writer.send_all(chunks).await?;

    if stream.worker.as_ref().is_some_and(|w| w.is_finished()) {
        if let Some(worker) = stream.worker.take() {
            stream.reader = worker.await.ok().flatten();
        }
    }
    if stream.worker.is_none() {
        let reader = stream.reader.take().ok_or_else(|| {
            ClientError::Connection(format!(
                "stream connection to '{}' is no longer usable",
                core.endpoint()
            ))
        })?;
        stream.worker = Some(socket_worker::spawn(core.clone(), reader));
    }
    Ok(())
}

async fn send_ws<B: AsRef<[u8]>>(
    core: &Arc<StreamCore>,
    stream: &mut WsStream,
    chunks: &[B],
) -> Result<()> {
    for chunk in chunks {
        stream.ws.send_binary(chunk.as_ref()).await?;
    }
    if stream.worker.as_ref().map_or(true, |w| w.is_finished()) {
        stream.worker = Some(poll_worker::spawn(core.clone(), stream.ws.clone()));
    }
    Ok(())
}

/// Parse one raw-socket model zoo entry: `{ "name": ..., "ModelParams": "<json>" }`.
fn model_from_node(node: Value) -> Result<ModelInfo> {
    let name = node
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Protocol("model zoo entry has no name".to_string()))?
        .to_string();
    let params = match node.get("ModelParams") {
        Some(Value::String(text)) => JsonCodec::decode(text.as_bytes())?,
        Some(other) => other.clone(),
        None => Value::Null,
    };
    Ok(ModelInfo { name, params })
}

/// Copy of `params` with `DEVICE[0].DeviceTimeout_ms` set to the inference timeout.
fn with_device_timeout(params: &Value, timeout: Duration) -> Value {
    let mut config = params.as_map().cloned().unwrap_or_default();
    let timeout_ms = Value::Float(timeout.as_millis() as f64);

    let device = config
        .entry("DEVICE".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !matches!(device, Value::Array(_)) {
        *device = Value::Array(Vec::new());
    }
    if let Value::Array(sections) = device {
        if sections.is_empty() {
            sections.push(Value::Map(BTreeMap::new()));
        }
        if let Some(Value::Map(first)) = sections.first_mut() {
            first.insert("DeviceTimeout_ms".to_string(), timeout_ms);
        }
    }
    Value::Map(config)
}

/// Installs a result-capturing callback for one prediction and removes it on drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStage {
    /// Admitted, nothing written yet.
    Admitted,
    /// Write in progress; part of the frame may be on the wire.
    Writing,
    Sent,
}

/// Admission of one frame in `Session::send`.
///
/// Dropped before the write starts, the admission is retracted. Dropped
/// mid-write (the send future was cancelled), the connection may carry a
/// partial frame, so the stream is failed.
struct PendingFrame {
    core: Arc<StreamCore>,
    stage: FrameStage,
}

impl PendingFrame {
    fn new(core: &Arc<StreamCore>) -> Self {
        Self {
            core: core.clone(),
            stage: FrameStage::Admitted,
        }
    }

    fn writing(&mut self) {
        self.stage = FrameStage::Writing;
    }

    fn is_writing(&self) -> bool {
        self.stage == FrameStage::Writing
    }

    fn sent(&mut self) {
        self.stage = FrameStage::Sent;
    }
}

impl Drop for PendingFrame {
    fn drop(&mut self) {
        match self.stage {
            FrameStage::Admitted => self.core.retract(),
            FrameStage::Writing => {
                self.core.fail(&ClientError::StreamAborted(format!(
                    "send to server '{}' was cancelled while writing a frame",
                    self.core.endpoint()
                )));
            }
            FrameStage::Sent => {}
        }
    }
}

struct CallbackGuard {
    core: Arc<StreamCore>,
}

impl CallbackGuard {
    fn install(core: &Arc<StreamCore>, output: Arc<Mutex<Option<Envelope>>>) -> Self {
        core.set_callback(Some(Box::new(move |result, _| {
            *output.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
        })));
        Self { core: core.clone() }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.core.set_callback(None);
    }
}
