//! Receive worker for the WebSocket stream of HTTP servers.
//!
//! Alternates `WebSocket::poll` with dispatch of completed messages. BINARY
//! results are MsgPack, TEXT results are JSON; both must decode to a map.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{StreamCore, WorkerAction};
use crate::codec::Format;
use crate::config::POLL_INTERVAL;
use crate::envelope::Envelope;
use crate::error::{ClientError, Result};
use crate::protocol::websocket::Message;
use crate::transport::WebSocket;

/// Spawn the poll loop for one batch.
pub fn spawn(core: Arc<StreamCore>, ws: Arc<WebSocket>) -> JoinHandle<()> {
    tokio::spawn(poll_loop(core, ws))
}

fn decode_result(message: Message) -> Option<Result<Envelope>> {
    match message {
        Message::Binary(data) => Some(Format::MsgPack.decode(&data)),
        Message::Text(text) => Some(Format::Json.decode(text.as_bytes())),
        _ => None,
    }
}

async fn poll_loop(core: Arc<StreamCore>, ws: Arc<WebSocket>) {
    debug!("WebSocket poll worker for {} started", core.endpoint());
    let mut last_progress = Instant::now();
    loop {
        match core.poll_action() {
            Some(WorkerAction::Exit) => break,
            Some(WorkerAction::Receive) => {}
            None => last_progress = Instant::now(),
        }

        while let Some(message) = ws.dispatch() {
            match decode_result(message) {
                Some(Ok(result)) => {
                    core.complete(result);
                    last_progress = Instant::now();
                }
                Some(Err(e)) => {
                    core.fail(&e);
                    return;
                }
                None => warn!("Ignoring control message from {}", core.endpoint()),
            }
        }

        if core.poll_action() == Some(WorkerAction::Receive)
            && last_progress.elapsed() >= core.inference_timeout()
        {
            core.fail(&ClientError::Timeout(format!(
                "Timeout {} ms waiting for response from server '{}'",
                core.inference_timeout().as_millis(),
                core.endpoint()
            )));
            break;
        }

        if let Err(e) = ws.poll(POLL_INTERVAL).await {
            core.fail(&e);
            break;
        }
    }
    debug!("WebSocket poll worker for {} stopped", core.endpoint());
}
