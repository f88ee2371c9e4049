//! Startup negotiation.
//!
//! The first client message carries no tag: a length, a 4-byte magic, then
//! (for a normal startup) null-terminated key/value parameter strings ending
//! with an extra null. A client may first send an SSL request, which is
//! refused with a single `N` byte; it then sends a real startup message on
//! the same connection. Callers run [`process_startup`] until it reports
//! [`StartupOutcome::Ready`].

use super::constants::{
    MAX_STARTUP_PACKET_LENGTH, SSL_NOT_SUPPORTED, SSL_REQUEST, STARTUP_MESSAGE,
};
use super::frame::{read_exactly, read_payload, write_raw};
use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Length field plus magic
const MIN_STARTUP_LENGTH: usize = 8;

/// Parameters sent with the startup message.
///
/// Kept for logging only; nothing is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupParameters {
    params: Vec<(String, String)>,
}

impl StartupParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn user(&self) -> Option<&str> {
        self.get("user")
    }

    pub fn database(&self) -> Option<&str> {
        self.get("database")
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Consume null-terminated strings until the buffer is exhausted,
    /// pairing them up as key/value.
    fn parse(mut buf: BytesMut) -> Self {
        let mut strings = Vec::new();
        while buf.has_remaining() {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let s = String::from_utf8_lossy(&buf[..end]).into_owned();
            buf.advance((end + 1).min(buf.len()));
            strings.push(s);
        }

        let mut params = Vec::new();
        let mut iter = strings.into_iter();
        while let Some(key) = iter.next() {
            // An empty key is the list terminator
            if key.is_empty() {
                break;
            }
            let value = iter.next().unwrap_or_default();
            params.push((key, value));
        }
        StartupParameters { params }
    }
}

/// Result of one pass through the startup negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// SSL was requested and refused; a real startup message comes next
    SslRefused,
    /// Startup accepted; do not run the negotiation again
    Ready(StartupParameters),
    /// The client closed the connection before sending anything
    Disconnected,
}

/// Read one startup-phase message and answer it.
pub async fn process_startup<S>(stream: &mut S) -> Result<StartupOutcome, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let length = match read_exactly(stream, 4).await {
        Ok(mut buf) => buf.get_i32(),
        Err(ProtocolError::ShortRead { actual: 0, .. }) => {
            return Ok(StartupOutcome::Disconnected)
        }
        Err(e) => return Err(e),
    };

    let mut payload = read_payload(
        stream,
        length,
        MIN_STARTUP_LENGTH,
        MAX_STARTUP_PACKET_LENGTH,
    )
    .await?;
    let protocol_version = payload.get_u32();

    match protocol_version {
        SSL_REQUEST => {
            debug!("SSL requested, refusing");
            write_raw(stream, &[SSL_NOT_SUPPORTED]).await?;
            Ok(StartupOutcome::SslRefused)
        }
        STARTUP_MESSAGE => Ok(StartupOutcome::Ready(StartupParameters::parse(payload))),
        other => Err(ProtocolError::UnknownProtocolVersion(other)),
    }
}
