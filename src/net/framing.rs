//! Length-prefixed message framing
//!
//! A frame is a fixed-width ASCII decimal length header, left-aligned and
//! padded with spaces, followed by exactly that many payload bytes:
//!
//! ```text
//! "42  {"update_cars":{...}}"
//!  ^^^^ header (HEADER_LEN bytes)
//! ```
//!
//! Payloads longer than [`MAX_PAYLOAD_LEN`] cannot be represented. This is a
//! documented limit of the format and is not validated at runtime.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::NetError;

/// Width of the length header in bytes
pub const HEADER_LEN: usize = 4;

/// Largest payload the header can describe
pub const MAX_PAYLOAD_LEN: usize = 9_999;

/// Encode a payload into a single frame (header + payload)
pub fn encode(payload: &[u8]) -> Bytes {
    debug_assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "payload of {} bytes exceeds the frame header",
        payload.len()
    );

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    let header = format!("{:<width$}", payload.len(), width = HEADER_LEN);
    frame.put_slice(header.as_bytes());
    frame.put_slice(payload);
    frame.freeze()
}

/// Parse a length header
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<usize, NetError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| NetError::FrameDecode(format!("non-ascii header {:?}", header)))?;

    text.trim_matches(|c: char| c == ' ' || c == '\0')
        .parse::<usize>()
        .map_err(|_| NetError::FrameDecode(format!("invalid length header {:?}", text)))
}

/// Read exactly one frame and return its payload.
///
/// Suspends the calling task until the whole frame has arrived, however many
/// reads that takes. A stream that ends (zero-length read) before a full frame
/// is available yields [`NetError::ConnectionClosed`].
pub async fn read_message<R>(reader: &mut R) -> Result<Bytes, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let len = decode_header(&header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Bytes::from(payload))
}

/// Write one pre-encoded frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Frame a payload and write it. Header and payload go out in one buffer.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &encode(payload)).await
}
