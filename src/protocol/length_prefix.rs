//! Length-prefixed framing for the raw-socket protocol.
//!
//! Wire layout, repeated per message:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┐
//! │ Length (u32 BE)    │ Payload (Length bytes)   │
//! └────────────────────┴──────────────────────────┘
//! ```
//!
//! A zero-length payload is the end-of-stream marker. The length field is
//! bounded by `i32::MAX`.
//!
//! # Example
//!
//! ```
//! use inferlink_client::protocol::length_prefix::{decode_header, encode};
//!
//! let wire = encode(b"hello", u32::MAX).unwrap();
//! assert_eq!(&wire[..4], &[0, 0, 0, 5]);
//! assert_eq!(decode_header(&wire).unwrap(), 5);
//! ```

use std::io::IoSlice;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::error::{ClientError, Result};

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Body buffer growth step; memory follows the bytes actually received.
const READ_CHUNK: usize = 64 * 1024;

/// Check a payload length against the configured and absolute limits.
fn checked_length(len: usize, max_payload_size: u32) -> Result<u32> {
    let limit = max_payload_size.min(DEFAULT_MAX_PAYLOAD_SIZE) as usize;
    if len > limit {
        return Err(ClientError::Framing(format!(
            "payload size {} exceeds maximum {}",
            len, limit
        )));
    }
    Ok(len as u32)
}

/// Encode a length header.
///
/// Fails before anything reaches the wire when `len` exceeds the limit.
#[inline]
pub fn encode_header(len: usize, max_payload_size: u32) -> Result<[u8; HEADER_SIZE]> {
    Ok(checked_length(len, max_payload_size)?.to_be_bytes())
}

/// Encode a complete frame (header + payload).
pub fn encode(payload: &[u8], max_payload_size: u32) -> Result<Bytes> {
    let header = encode_header(payload.len(), max_payload_size)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode a length header.
///
/// Needs at least [`HEADER_SIZE`] bytes; extra bytes are ignored.
pub fn decode_header(buf: &[u8]) -> Result<u32> {
    if buf.len() < HEADER_SIZE {
        return Err(ClientError::Framing(format!(
            "length header needs {} bytes, got {}",
            HEADER_SIZE,
            buf.len()
        )));
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    checked_length(len as usize, DEFAULT_MAX_PAYLOAD_SIZE)?;
    Ok(len)
}

/// Read exactly one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. EOF inside a header or a payload is a framing error; truncated
/// data is never returned.
pub async fn read_frame<R>(reader: &mut R, max_payload_size: u32) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ClientError::Framing(format!(
                "connection closed after {} of {} length header bytes",
                filled, HEADER_SIZE
            )));
        }
        filled += n;
    }

    let len = decode_header(&header)? as usize;
    checked_length(len, max_payload_size)?;
    if len == 0 {
        return Ok(Some(Bytes::new()));
    }

    let mut body = BytesMut::with_capacity(len.min(READ_CHUNK));
    while body.len() < len {
        let want = (len - body.len()).min(READ_CHUNK);
        body.reserve(want);
        let n = (&mut *reader).take(want as u64).read_buf(&mut body).await?;
        if n == 0 {
            return Err(ClientError::Framing(format!(
                "connection closed after {} of {} payload bytes",
                body.len(),
                len
            )));
        }
    }
    Ok(Some(body.freeze()))
}

/// Write one frame per chunk, in order, handling partial writes.
///
/// All headers are validated before the first byte is written.
pub async fn write_frames<W, B>(writer: &mut W, chunks: &[B], max_payload_size: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
    B: AsRef<[u8]>,
{
    let headers = chunks
        .iter()
        .map(|c| encode_header(c.as_ref().len(), max_payload_size))
        .collect::<Result<Vec<_>>>()?;

    let parts: Vec<&[u8]> = headers
        .iter()
        .zip(chunks)
        .flat_map(|(h, c)| [&h[..], c.as_ref()])
        .filter(|p| !p.is_empty())
        .collect();
    let total_size: usize = parts.iter().map(|p| p.len()).sum();

    let mut total_written = 0;
    while total_written < total_size {
        let slices = remaining_slices(&parts, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Write a single frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_payload_size: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frames(writer, &[payload], max_payload_size).await
}

/// Write the end-of-stream marker (a zero-length frame).
pub async fn write_end_of_stream<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &[], DEFAULT_MAX_PAYLOAD_SIZE).await
}

/// IoSlices covering everything after the first `skip` bytes of `parts`.
fn remaining_slices<'a>(parts: &[&'a [u8]], skip: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(parts.len());
    let mut offset = 0;
    for part in parts {
        let end = offset + part.len();
        if skip < end {
            slices.push(IoSlice::new(&part[skip.saturating_sub(offset)..]));
        }
        offset = end;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_encode_header_big_endian() {
        assert_eq!(encode_header(0x0102_0304, u32::MAX).unwrap(), [1, 2, 3, 4]);
        assert_eq!(decode_header(&[1, 2, 3, 4]).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_encode_decode_lengths() {
        for len in [0usize, 1, 125, 126, 65535, 65536, 1 << 20] {
            let payload = vec![0xABu8; len];
            let wire = encode(&payload, DEFAULT_MAX_PAYLOAD_SIZE).unwrap();
            assert_eq!(decode_header(&wire).unwrap() as usize, len);
            assert_eq!(&wire[HEADER_SIZE..], &payload[..]);
        }
    }

    #[test]
    fn test_header_at_i32_max_is_accepted() {
        assert_eq!(
            decode_header(&(i32::MAX as u32).to_be_bytes()).unwrap(),
            i32::MAX as u32
        );
    }

    #[test]
    fn test_header_above_i32_max_is_rejected() {
        let err = decode_header(&(i32::MAX as u32 + 1).to_be_bytes()).unwrap_err();
        assert!(matches!(err, ClientError::Framing(_)));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let err = encode(&[0u8; 16], 8).unwrap_err();
        assert!(matches!(err, ClientError::Framing(_)));
    }

    #[test]
    fn test_decode_header_short_buffer() {
        assert!(decode_header(&[0, 0, 1]).is_err());
    }

    #[tokio::test]
    async fn test_read_frame_round_trip() {
        let (mut client, mut server) = duplex(1024);
        write_frames(&mut client, &[&b"abc"[..], &b"defg"[..]], u32::MAX)
            .await
            .unwrap();

        let a = read_frame(&mut server, u32::MAX).await.unwrap().unwrap();
        let b = read_frame(&mut server, u32::MAX).await.unwrap().unwrap();
        assert_eq!(&a[..], b"abc");
        assert_eq!(&b[..], b"defg");
    }

    #[tokio::test]
    async fn test_read_frame_large_body_across_chunks() {
        let payload: Vec<u8> = (0..(3 * READ_CHUNK + 17)).map(|i| (i % 253) as u8).collect();
        let (mut client, mut server) = duplex(4096);
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload, u32::MAX).await.unwrap();
        });

        let frame = read_frame(&mut server, u32::MAX).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(&frame[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_read_frame_huge_header_does_not_preallocate() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&(i32::MAX as u32).to_be_bytes()).await.unwrap();
        client.write_all(b"tiny").await.unwrap();
        drop(client);

        // fails on the truncated body instead of reserving 2 GiB up front
        let err = read_frame(&mut server, u32::MAX).await.unwrap_err();
        assert!(matches!(err, ClientError::Framing(ref m) if m.contains("4 of 2147483647")));
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof_is_none() {
        let (client, mut server) = duplex(64);
        drop(client);
        assert!(read_frame(&mut server, u32::MAX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_partial_header_is_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, u32::MAX).await.unwrap_err();
        assert!(matches!(err, ClientError::Framing(_)));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body_is_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0, 0, 10]).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);

        let err = read_frame(&mut server, u32::MAX).await.unwrap_err();
        assert!(matches!(err, ClientError::Framing(_)));
    }

    #[tokio::test]
    async fn test_end_of_stream_marker() {
        let (mut client, mut server) = duplex(64);
        write_end_of_stream(&mut client).await.unwrap();

        let frame = read_frame(&mut server, u32::MAX).await.unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_write_frames_through_small_pipe() {
        // pipe smaller than the payload forces partial writes
        let (mut client, mut server) = duplex(7);
        let payload = vec![0x5Au8; 100];
        let expected = payload.clone();

        let reader = tokio::spawn(async move { read_frame(&mut server, u32::MAX).await });
        write_frame(&mut client, &payload, u32::MAX).await.unwrap();

        let frame = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(&frame[..], &expected[..]);
    }

    #[test]
    fn test_remaining_slices_skips_written_prefix() {
        let parts: Vec<&[u8]> = vec![b"abc", b"de", b"fgh"];
        let slices = remaining_slices(&parts, 4);
        let joined: Vec<u8> = slices.iter().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(joined, b"efgh");
    }
}
