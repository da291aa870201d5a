//! Incremental frame decoding and message reassembly.
//!
//! [`FrameDecoder`] owns an accumulating receive buffer. [`FrameDecoder::decode`]
//! is reentrant: it either yields one complete frame or reports how many more
//! bytes it needs, leaving partial data buffered for the next call.
//!
//! [`MessageAssembler`] turns frames into logical [`Message`]s, joining a
//! TEXT/BINARY frame with FIN=0 and its CONTINUATION frames into one message
//! delivered when FIN=1. Control frames may arrive between fragments. The
//! joined message is bounded by the same limit as a single frame.

use bytes::{Bytes, BytesMut};

use super::frame::{apply_mask, Frame, FrameHeader, HeaderStatus, Opcode};
use crate::error::{ClientError, Result};

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// Insufficient data: at least this many more bytes are needed.
    NeedMore(usize),
}

/// Accumulating, reentrant frame decoder.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload_size: u64,
}

impl FrameDecoder {
    pub fn new(max_payload_size: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_payload_size,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one frame from the buffered bytes.
    ///
    /// Bytes are consumed only when a complete frame is returned.
    pub fn decode(&mut self) -> Result<Decoded> {
        let header = match FrameHeader::parse(&self.buffer)? {
            HeaderStatus::Complete(h) => h,
            HeaderStatus::Incomplete(n) => return Ok(Decoded::NeedMore(n)),
        };

        if header.payload_len > self.max_payload_size {
            return Err(ClientError::Framing(format!(
                "WebSocket frame of {} bytes exceeds maximum {}",
                header.payload_len, self.max_payload_size
            )));
        }

        let payload_len = header.payload_len as usize;
        let total = header.header_size + payload_len;
        if self.buffer.len() < total {
            return Ok(Decoded::NeedMore(total - self.buffer.len()));
        }

        let _ = self.buffer.split_to(header.header_size);
        let mut payload = self.buffer.split_to(payload_len);
        if let Some(key) = header.mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Decoded::Frame(Frame {
            fin: header.fin,
            opcode: header.opcode,
            payload: payload.freeze(),
        }))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A complete logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Bytes),
}

#[derive(Debug)]
struct Partial {
    opcode: Opcode,
    data: BytesMut,
}

/// Joins fragmented data frames into messages.
#[derive(Debug)]
pub struct MessageAssembler {
    partial: Option<Partial>,
    max_message_size: u64,
}

impl MessageAssembler {
    pub fn new(max_message_size: u64) -> Self {
        Self {
            partial: None,
            max_message_size,
        }
    }

    /// Feed one frame; returns a message once one is complete.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            Opcode::Ping => Ok(Some(Message::Ping(frame.payload))),
            Opcode::Pong => Ok(Some(Message::Pong(frame.payload))),
            Opcode::Close => Ok(Some(Message::Close(frame.payload))),
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(ClientError::Framing(
                        "new data frame while a fragmented message is in progress".to_string(),
                    ));
                }
                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.partial = Some(Partial {
                    opcode: frame.opcode,
                    data: BytesMut::from(&frame.payload[..]),
                });
                Ok(None)
            }
            Opcode::Continuation => {
                let partial = self.partial.as_mut().ok_or_else(|| {
                    ClientError::Framing("continuation frame without a message start".to_string())
                })?;
                let joined = partial.data.len() as u64 + frame.payload.len() as u64;
                if joined > self.max_message_size {
                    self.partial = None;
                    return Err(ClientError::Framing(format!(
                        "fragmented WebSocket message of at least {} bytes exceeds maximum {}",
                        joined, self.max_message_size
                    )));
                }
                partial.data.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.partial.take() {
                    Some(done) => finish(done.opcode, done.data.freeze()).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    /// Whether a fragmented message is being accumulated.
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }
}

fn finish(opcode: Opcode, data: Bytes) -> Result<Message> {
    match opcode {
        Opcode::Text => String::from_utf8(data.to_vec())
            .map(Message::Text)
            .map_err(|_| ClientError::Framing("text message is not valid UTF-8".to_string())),
        _ => Ok(Message::Binary(data)),
    }
}
