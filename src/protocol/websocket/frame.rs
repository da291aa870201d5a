//! WebSocket frame header, masking and encoding (RFC 6455 §5.2).
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ClientError, Result};

/// Smallest possible header: two bytes, no extended length, no mask.
pub const MIN_HEADER_SIZE: usize = 2;

/// Largest possible header: 2 + 8 (64-bit length) + 4 (mask key).
pub const MAX_HEADER_SIZE: usize = 14;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_MASK: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse an opcode nibble. Reserved values are a framing error.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(ClientError::Framing(format!(
                "unexpected WebSocket opcode 0x{:X}",
                other
            ))),
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
    /// Bytes occupied by the header itself, including extended length and mask key.
    pub header_size: usize,
}

/// Result of parsing a possibly incomplete header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    Complete(FrameHeader),
    /// At least this many more bytes are required.
    Incomplete(usize),
}

impl FrameHeader {
    /// Parse a header from the start of `buf`.
    ///
    /// Never blocks and never consumes: an incomplete buffer yields
    /// [`HeaderStatus::Incomplete`] with the number of missing bytes.
    /// Reserved bits are ignored.
    pub fn parse(buf: &[u8]) -> Result<HeaderStatus> {
        if buf.len() < MIN_HEADER_SIZE {
            return Ok(HeaderStatus::Incomplete(MIN_HEADER_SIZE - buf.len()));
        }

        let fin = buf[0] & FIN_BIT != 0;
        let opcode = Opcode::from_u8(buf[0] & OPCODE_MASK)?;
        let masked = buf[1] & MASK_BIT != 0;
        let len7 = buf[1] & LEN_MASK;

        let ext_len = match len7 {
            LEN_16 => 2,
            LEN_64 => 8,
            _ => 0,
        };
        let header_size = MIN_HEADER_SIZE + ext_len + if masked { 4 } else { 0 };
        if buf.len() < header_size {
            return Ok(HeaderStatus::Incomplete(header_size - buf.len()));
        }

        let payload_len = match len7 {
            LEN_16 => u16::from_be_bytes([buf[2], buf[3]]) as u64,
            LEN_64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(ClientError::Framing(
                        "WebSocket frame length has its most significant bit set".to_string(),
                    ));
                }
                len
            }
            short => short as u64,
        };

        if opcode.is_control() && (!fin || payload_len > 125) {
            return Err(ClientError::Framing(format!(
                "invalid {:?} control frame (fin={}, length={})",
                opcode, fin, payload_len
            )));
        }

        let mask_key = if masked {
            let at = MIN_HEADER_SIZE + ext_len;
            Some([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        } else {
            None
        };

        Ok(HeaderStatus::Complete(FrameHeader {
            fin,
            opcode,
            payload_len,
            mask_key,
            header_size,
        }))
    }

    /// Write this header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        let first = (if self.fin { FIN_BIT } else { 0 }) | self.opcode as u8;
        let mask_bit = if self.mask_key.is_some() { MASK_BIT } else { 0 };

        dst.put_u8(first);
        if self.payload_len < LEN_16 as u64 {
            dst.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= u16::MAX as u64 {
            dst.put_u8(mask_bit | LEN_16);
            dst.put_u16(self.payload_len as u16);
        } else {
            dst.put_u8(mask_bit | LEN_64);
            dst.put_u64(self.payload_len);
        }
        if let Some(key) = self.mask_key {
            dst.put_slice(&key);
        }
    }
}

/// XOR `data` in place with `key[i % 4]`. Applying it twice is the identity.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Encode one frame, masking the payload when `mask_key` is given.
pub fn encode_frame(
    opcode: Opcode,
    fin: bool,
    payload: &[u8],
    mask_key: Option<[u8; 4]>,
    dst: &mut BytesMut,
) {
    let header = FrameHeader {
        fin,
        opcode,
        payload_len: payload.len() as u64,
        mask_key,
        header_size: 0,
    };
    dst.reserve(MAX_HEADER_SIZE + payload.len());
    header.write(dst);

    let start = dst.len();
    dst.put_slice(payload);
    if let Some(key) = mask_key {
        apply_mask(&mut dst[start..], key);
    }
}

/// A complete frame with its payload unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}
