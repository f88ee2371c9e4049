//! Message framing.
//!
//! Every backend message is `tag ‖ length ‖ payload`, where `length` is a
//! big-endian i32 counting itself plus the payload. Frontend messages share
//! the layout except for the startup packet, which has no tag.
//!
//! Reads are bounded by a previously declared length and consume exactly the
//! bytes they ask for; there is no buffering across calls beyond what the
//! transport provides.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of the length field, which counts itself
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Largest chunk reserved up front for a single read
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// A backend message under construction.
///
/// Fields are appended in order with fixed-width big-endian encoding for
/// integers and raw bytes for everything else. No field carries its own
/// length prefix unless the caller writes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: u8,
    payload: BytesMut,
}

impl Message {
    pub fn new(tag: u8) -> Self {
        Message {
            tag,
            payload: BytesMut::new(),
        }
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.payload.put_u8(value);
        self
    }

    pub fn put_i16(&mut self, value: i16) -> &mut Self {
        self.payload.put_i16(value);
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.payload.put_i32(value);
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    /// Append a null-terminated string
    pub fn put_cstr(&mut self, s: &str) -> &mut Self {
        self.payload.extend_from_slice(s.as_bytes());
        self.payload.put_u8(0);
        self
    }

    /// Direct access for encoders that write into the payload themselves
    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    /// Value of the length field: payload plus the field itself
    pub fn length_field(&self) -> io::Result<i32> {
        i32::try_from(self.payload.len() + LENGTH_FIELD_SIZE).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message payload too large: {} bytes", self.payload.len()),
            )
        })
    }

    /// Total bytes on the wire, tag included
    pub fn encoded_len(&self) -> usize {
        1 + LENGTH_FIELD_SIZE + self.payload.len()
    }

    /// Encode the message to bytes
    pub fn encode(&self) -> io::Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode the message into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) -> io::Result<()> {
        let length = self.length_field()?;
        buf.reserve(self.encoded_len());
        buf.put_u8(self.tag);
        buf.put_i32(length);
        buf.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Serialize `message` and write it to the transport.
///
/// Returns the number of bytes written.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let buf = message.encode()?;
    write_raw(writer, &buf).await
}

/// Write bytes that are not framed, like the single-byte SSL answer.
pub async fn write_raw<W>(writer: &mut W, bytes: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    trace!(bytes = ?bytes, "[WRITE]");
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(bytes.len())
}

/// Read exactly `len` bytes or fail with a short read reporting how many
/// bytes actually arrived.
pub async fn read_exactly<R>(reader: &mut R, len: usize) -> Result<BytesMut, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(len.min(READ_CHUNK_SIZE));
    while buf.len() < len {
        let remaining = (len - buf.len()) as u64;
        let n = (&mut *reader).take(remaining).read_buf(&mut buf).await?;
        if n == 0 {
            return Err(ProtocolError::ShortRead {
                expected: len,
                actual: buf.len(),
            });
        }
    }
    Ok(buf)
}

/// Read a big-endian i32
pub async fn read_i32<R>(reader: &mut R) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = read_exactly(reader, 4).await?;
    Ok(buf.get_i32())
}

/// Read a single byte, returning `None` if the stream is already closed.
///
/// Used at message boundaries, where end-of-stream is a clean disconnect
/// rather than a truncated frame.
pub async fn read_tag<R>(reader: &mut R) -> Result<Option<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// Read the payload that follows a length field.
///
/// `length` is the raw value of the field (it counts itself). `min` and
/// `max` bound the whole length, field included.
pub async fn read_payload<R>(
    reader: &mut R,
    length: i32,
    min: usize,
    max: usize,
) -> Result<BytesMut, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let total = usize::try_from(length).map_err(|_| ProtocolError::InvalidLength(length))?;
    if total < min.max(LENGTH_FIELD_SIZE) {
        return Err(ProtocolError::InvalidLength(length));
    }
    if total > max {
        return Err(ProtocolError::MessageTooLarge { length: total, max });
    }
    read_exactly(reader, total - LENGTH_FIELD_SIZE).await
}
