//! Receive worker for the raw-socket stream connection.
//!
//! Reads one length-prefixed MsgPack result per outstanding frame, each read
//! bounded by the inference timeout. The worker exits when the batch drains,
//! an error is recorded or the stream closes, and hands its reader back so
//! the next batch can reuse the connection.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{StreamCore, WorkerAction};
use crate::codec::MsgPackCodec;
use crate::error::ClientError;
use crate::transport::FrameReader;

/// Spawn the receive loop. The handle yields the reader on a clean exit.
pub fn spawn(core: Arc<StreamCore>, reader: FrameReader) -> JoinHandle<Option<FrameReader>> {
    tokio::spawn(receive_loop(core, reader))
}

async fn receive_loop(core: Arc<StreamCore>, mut reader: FrameReader) -> Option<FrameReader> {
    debug!("Socket receive worker for {} started", core.endpoint());
    loop {
        if core.next_action().await == WorkerAction::Exit {
            break;
        }

        let frame = match tokio::time::timeout(core.inference_timeout(), reader.recv()).await {
            Err(_) => {
                core.fail(&ClientError::Timeout(format!(
                    "Timeout {} ms waiting for response from server '{}'",
                    core.inference_timeout().as_millis(),
                    core.endpoint()
                )));
                return None;
            }
            Ok(Err(e)) => {
                core.fail(&e);
                return None;
            }
            Ok(Ok(None)) => {
                core.fail(&ClientError::Connection(format!(
                    "server '{}' closed the stream with {} results outstanding",
                    core.endpoint(),
                    core.outstanding()
                )));
                return None;
            }
            Ok(Ok(Some(frame))) => frame,
        };

        if frame.is_empty() {
            warn!("Skipping empty frame from {}", core.endpoint());
            continue;
        }
        trace!("Result frame of {} bytes from {}", frame.len(), core.endpoint());

        match MsgPackCodec::decode_envelope(&frame) {
            Ok(result) => core.complete(result),
            Err(e) => {
                core.fail(&e);
                return None;
            }
        }
    }
    debug!("Socket receive worker for {} stopped", core.endpoint());
    Some(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ServerAddress, ServerKind};
    use crate::config::ClientConfig;
    use crate::envelope::Envelope;
    use crate::error::ErrorKind;
    use crate::protocol::length_prefix;
    use crate::transport::Connection;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (FrameReader, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Socket);
        let cfg = ClientConfig::default();
        let (conn, accepted) = tokio::join!(
            Connection::connect(&addr, &cfg),
            listener.accept()
        );
        let (reader, _writer) = conn.unwrap().into_split();
        (reader, accepted.unwrap().0)
    }

    fn result(n: i64) -> Vec<u8> {
        MsgPackCodec::encode(&Envelope::new().field("n", n)).unwrap()
    }

    #[tokio::test]
    async fn test_worker_delivers_and_hands_back_reader() {
        let (reader, mut server) = pair().await;
        let core = Arc::new(StreamCore::new("test", Duration::from_secs(5)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        core.set_callback(Some(Box::new(move |env: Envelope, info| {
            sink.lock().unwrap().push((env.get("n").and_then(|v| v.as_i64()), info));
        })));
        core.open(2);
        core.admit("a".into()).await.unwrap();
        core.admit("b".into()).await.unwrap();

        let worker = spawn(core.clone(), reader);
        for n in [1, 2] {
            length_prefix::write_frame(&mut server, &result(n), u32::MAX)
                .await
                .unwrap();
        }
        core.drain().await.unwrap();

        assert!(worker.await.unwrap().is_some());
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![(Some(1), "a".to_string()), (Some(2), "b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_worker_records_disconnect() {
        let (reader, server) = pair().await;
        let core = Arc::new(StreamCore::new("test", Duration::from_secs(5)));
        core.open(2);
        core.admit("a".into()).await.unwrap();

        let worker = spawn(core.clone(), reader);
        drop(server);

        assert!(worker.await.unwrap().is_none());
        assert_eq!(core.outstanding(), 0);
        assert_eq!(core.last_error().unwrap().kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_worker_times_out() {
        let (reader, _server) = pair().await;
        let core = Arc::new(StreamCore::new("test", Duration::from_millis(100)));
        core.open(2);
        core.admit("a".into()).await.unwrap();

        let worker = spawn(core.clone(), reader);
        assert!(worker.await.unwrap().is_none());
        let err = core.last_error().unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("100 ms"));
    }

    #[tokio::test]
    async fn test_worker_rejects_non_map_result() {
        let (reader, mut server) = pair().await;
        let core = Arc::new(StreamCore::new("test", Duration::from_secs(5)));
        core.open(1);
        core.admit("a".into()).await.unwrap();

        let worker = spawn(core.clone(), reader);
        let not_a_map = MsgPackCodec::encode(&vec![1, 2, 3]).unwrap();
        length_prefix::write_frame(&mut server, &not_a_map, u32::MAX)
            .await
            .unwrap();

        assert!(worker.await.unwrap().is_none());
        assert_eq!(core.last_error().unwrap().kind, ErrorKind::Protocol);
    }
}
