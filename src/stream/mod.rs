//! Streaming pipeline: bounded in-flight inference with ordered delivery.
//!
//! Callers and the receive worker coordinate through [`StreamCore`]: one
//! mutex-protected state block (outstanding queue, stop flag, first error,
//! session state) plus one [`Notify`] signalled on every change of interest.
//! The mutex is a `std::sync::Mutex` and is never held across an `.await`;
//! waiters register with [`Notify`] before inspecting state so no wake-up
//! is lost.
//!
//! ```text
//!            open                send (depth free)        drain, empty, no error
//!   Idle ─────────► Streaming ◄──────────────┐  Draining ───────────────────► Idle
//!                      │  └──────────────────┘     ▲
//!                      │ drain / error             │
//!                      └───────────────────────────┘
//!   any ── close ──► Closed
//! ```
//!
//! Two workers drive receive:
//! - [`socket_worker`]: one framed read per outstanding request on the raw
//!   stream connection, each bounded by the inference timeout.
//! - [`poll_worker`]: repeated `WebSocket::poll` with dispatch of completed
//!   messages between polls.
//!
//! Results are delivered in send order. The first failure is recorded,
//! forces the outstanding count to zero and stops the batch; it stays
//! recorded until the stream is reopened.

pub mod poll_worker;
pub mod socket_worker;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::envelope::Envelope;
use crate::error::{ClientError, ErrorKind, RecordedError, Result};

/// Caller-supplied correlation token travelling with each frame.
pub type FrameInfo = String;

/// User callback receiving each result with its frame token.
pub type ResultCallback = Box<dyn FnMut(Envelope, FrameInfo) + Send + 'static>;

/// Lifecycle of the streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream open, or the last batch drained cleanly.
    Idle,
    /// Accepting frames.
    Streaming,
    /// Stop requested or error recorded; waiting for outstanding to reach zero.
    Draining,
    /// Terminal.
    Closed,
}

/// What the receive worker should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    /// At least one reply is outstanding.
    Receive,
    /// Batch finished, failed, or stream closed.
    Exit,
}

struct StreamState {
    /// One token per frame accepted whose result has not arrived.
    queue: VecDeque<FrameInfo>,
    /// Results popped from `queue` whose callback is still running.
    delivering: usize,
    depth: usize,
    stop: bool,
    last_error: Option<RecordedError>,
    session: SessionState,
}

impl StreamState {
    /// Frames sent and not yet fully resulted.
    fn outstanding(&self) -> usize {
        self.queue.len() + self.delivering
    }

    fn record(&mut self, err: RecordedError) -> bool {
        let first = self.last_error.is_none();
        if first {
            self.last_error = Some(err);
        }
        self.queue.clear();
        self.stop = true;
        if self.session != SessionState::Closed {
            self.session = SessionState::Draining;
        }
        first
    }
}

/// The installed callback. While a delivery borrows it, `lent` is set and
/// `generation` tells whether it was replaced in the meantime.
#[derive(Default)]
struct CallbackSlot {
    callback: Option<ResultCallback>,
    lent: bool,
    generation: u64,
}

/// Shared state block of one stream.
pub struct StreamCore {
    state: Mutex<StreamState>,
    changed: Notify,
    callback: Mutex<CallbackSlot>,
    endpoint: String,
    inference_timeout: Duration,
}

impl StreamCore {
    /// A core in `Idle` state.
    pub fn new(endpoint: impl Into<String>, inference_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(StreamState {
                queue: VecDeque::new(),
                delivering: 0,
                depth: 1,
                stop: false,
                last_error: None,
                session: SessionState::Idle,
            }),
            changed: Notify::new(),
            callback: Mutex::new(CallbackSlot::default()),
            endpoint: endpoint.into(),
            inference_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self) -> MutexGuard<'_, CallbackSlot> {
        self.callback.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake(&self) {
        self.changed.notify_waiters();
    }

    /// Register for the next wake-up before the caller inspects state.
    fn listen(&self) -> Pin<Box<Notified<'_>>> {
        let mut notified = Box::pin(self.changed.notified());
        notified.as_mut().enable();
        notified
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn inference_timeout(&self) -> Duration {
        self.inference_timeout
    }

    /// `Idle`/`Draining` → `Streaming`: fresh queue, cleared error, new depth.
    pub fn open(&self, depth: usize) {
        let mut state = self.lock();
        state.queue.clear();
        state.depth = depth.max(1);
        state.stop = false;
        state.last_error = None;
        state.session = SessionState::Streaming;
        drop(state);
        debug!("Stream to {} opened with queue depth {}", self.endpoint, depth);
        self.wake();
    }

    /// Stream connection torn down: forget outstanding frames and return to
    /// `Idle`. The recorded error stays readable until the next open.
    pub fn detach(&self) {
        let mut state = self.lock();
        state.queue.clear();
        state.stop = true;
        if state.session != SessionState::Closed {
            state.session = SessionState::Idle;
        }
        drop(state);
        self.wake();
    }

    /// Terminal transition; wakes every waiter.
    pub fn close(&self) {
        let mut state = self.lock();
        state.session = SessionState::Closed;
        state.stop = true;
        state.queue.clear();
        drop(state);
        self.wake();
    }

    /// Number of frames sent but not yet resulted.
    ///
    /// A result counts as outstanding until its callback has returned.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding()
    }

    pub fn depth(&self) -> usize {
        self.lock().depth
    }

    pub fn session_state(&self) -> SessionState {
        self.lock().session
    }

    /// The recorded first error of this stream, if any.
    pub fn last_error(&self) -> Option<RecordedError> {
        self.lock().last_error.clone()
    }

    /// Install or remove the result callback; returns the previous one.
    ///
    /// May be called from inside the callback. A callback replaced while it
    /// runs is dropped when it returns, so `None` is returned for it.
    pub fn set_callback(&self, callback: Option<ResultCallback>) -> Option<ResultCallback> {
        let mut slot = self.slot();
        slot.generation += 1;
        slot.lent = false;
        std::mem::replace(&mut slot.callback, callback)
    }

    pub fn has_callback(&self) -> bool {
        let slot = self.slot();
        slot.callback.is_some() || slot.lent
    }

    /// Record `err` as the stream failure unless one is already recorded.
    ///
    /// Outstanding is forced to zero and the batch stops. Returns whether
    /// this call recorded the error.
    pub fn fail(&self, err: &ClientError) -> bool {
        let first = self.lock().record(RecordedError::from(err));
        if first {
            error!("Stream to {} failed: {}", self.endpoint, err);
        }
        self.wake();
        first
    }

    /// Reserve a slot for one frame, waiting while the queue is full.
    ///
    /// Fails immediately if an error is recorded, and with a timeout error
    /// (recorded as well) if no slot frees up within the inference timeout.
    pub async fn admit(&self, frame_info: FrameInfo) -> Result<()> {
        let deadline = Instant::now() + self.inference_timeout;
        loop {
            let notified = self.listen();
            {
                let mut state = self.lock();
                if state.session == SessionState::Closed {
                    return Err(ClientError::StreamAborted("stream was closed".to_string()));
                }
                if let Some(err) = &state.last_error {
                    return Err(err.clone().into());
                }
                if state.outstanding() < state.depth {
                    state.queue.push_back(frame_info);
                    state.stop = false;
                    state.session = SessionState::Streaming;
                    trace!("Frame admitted, {} outstanding", state.outstanding());
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let depth = self.depth();
                let err = ClientError::Timeout(format!(
                    "Timeout {} ms waiting for space in queue on server '{}' (queue depth is {})",
                    self.inference_timeout.as_millis(),
                    self.endpoint,
                    depth
                ));
                self.fail(&err);
                return Err(err);
            }
        }
    }

    /// Undo the last admission when its frame never reached the wire.
    pub fn retract(&self) {
        let mut state = self.lock();
        state.queue.pop_back();
        drop(state);
        self.wake();
    }

    /// Deliver one result to the oldest outstanding frame.
    ///
    /// The token is popped first, the callback runs with no lock held, and
    /// only then does the outstanding count drop. A result reporting
    /// `success: false` is recorded as the stream error. The callback is
    /// skipped once an earlier error was recorded, and its panics are
    /// swallowed.
    pub fn complete(&self, result: Envelope) {
        let server_error = result.error_message();
        let (frame_info, deliver) = {
            let mut state = self.lock();
            let Some(frame_info) = state.queue.pop_front() else {
                warn!("Discarding unsolicited result from {}", self.endpoint);
                return;
            };
            let deliver = state.last_error.is_none();
            if let Some(msg) = &server_error {
                state.record(RecordedError::new(ErrorKind::Application, msg.clone()));
            }
            if deliver {
                state.delivering += 1;
            }
            (frame_info, deliver)
        };
        if let Some(msg) = &server_error {
            error!("Server {} reported inference failure: {}", self.endpoint, msg);
        }

        if deliver {
            self.invoke_callback(result, frame_info);
            let mut state = self.lock();
            state.delivering = state.delivering.saturating_sub(1);
        }
        self.wake();
    }

    fn invoke_callback(&self, result: Envelope, frame_info: FrameInfo) {
        let (mut callback, generation) = {
            let mut slot = self.slot();
            let Some(callback) = slot.callback.take() else {
                return;
            };
            slot.lent = true;
            (callback, slot.generation)
        };

        if catch_unwind(AssertUnwindSafe(|| callback(result, frame_info))).is_err() {
            debug!("Result callback panicked; ignored");
        }

        let mut slot = self.slot();
        if slot.generation == generation {
            slot.callback = Some(callback);
            slot.lent = false;
        }
    }

    /// Mark the batch as finishing: no frames are expected beyond those outstanding.
    pub fn request_stop(&self) {
        let mut state = self.lock();
        state.stop = true;
        if state.session == SessionState::Streaming {
            state.session = SessionState::Draining;
        }
        drop(state);
        self.wake();
    }

    /// Wait until every outstanding result arrived or an error is recorded.
    ///
    /// Each wait is bounded by the inference timeout, restarted whenever a
    /// result arrives. Expiry is recorded as a timeout error. On success the
    /// stream returns to `Idle`, ready for the next batch.
    pub async fn drain(&self) -> Result<()> {
        self.request_stop();

        let mut deadline = Instant::now() + self.inference_timeout;
        let mut last_len = usize::MAX;
        loop {
            let notified = self.listen();
            let len = {
                let mut state = self.lock();
                if let Some(err) = &state.last_error {
                    return Err(err.clone().into());
                }
                if state.session == SessionState::Closed {
                    return Err(ClientError::StreamAborted("stream was closed".to_string()));
                }
                if state.outstanding() == 0 {
                    state.session = SessionState::Idle;
                    debug!("Stream to {} drained", self.endpoint);
                    return Ok(());
                }
                state.outstanding()
            };
            if len < last_len {
                deadline = Instant::now() + self.inference_timeout;
                last_len = len;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let err = ClientError::Timeout(format!(
                    "Timeout {} ms waiting for inference completion on server '{}' (current queue size is {})",
                    self.inference_timeout.as_millis(),
                    self.endpoint,
                    len
                ));
                self.fail(&err);
                return Err(err);
            }
        }
    }

    /// Block the worker until there is something to receive or it should exit.
    pub async fn next_action(&self) -> WorkerAction {
        loop {
            let notified = self.listen();
            {
                let state = self.lock();
                if state.last_error.is_some() || state.session == SessionState::Closed {
                    return WorkerAction::Exit;
                }
                if !state.queue.is_empty() {
                    return WorkerAction::Receive;
                }
                if state.stop {
                    return WorkerAction::Exit;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`next_action`](Self::next_action) for the
    /// poll worker; `None` means idle but keep running.
    pub fn poll_action(&self) -> Option<WorkerAction> {
        let state = self.lock();
        if state.last_error.is_some() || state.session == SessionState::Closed {
            Some(WorkerAction::Exit)
        } else if !state.queue.is_empty() {
            Some(WorkerAction::Receive)
        } else if state.stop {
            Some(WorkerAction::Exit)
        } else {
            None
        }
    }
}
