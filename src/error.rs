//! Error types for the protocol engine.

use std::io;

/// Errors that end a client connection.
///
/// Every variant is fatal to the connection it occurred on and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Transport failure (reset, broken pipe, ...)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream closed in the middle of a frame
    #[error("Buffer underflow, only read {actual} bytes (expected {expected})")]
    ShortRead { expected: usize, actual: usize },

    /// A declared length too small to cover its own header
    #[error("Invalid message length: {0}")]
    InvalidLength(i32),

    /// A declared length over the configured limit
    #[error("Message length {length} exceeds maximum of {max} bytes")]
    MessageTooLarge { length: usize, max: usize },

    /// Startup magic that is neither a normal startup nor an SSL request
    #[error("Unknown protocol version: {0}")]
    UnknownProtocolVersion(u32),

    /// A message tag this server does not handle
    #[error("Expected 'Q', but got '{}'", .0.escape_ascii())]
    UnexpectedMessage(u8),

    /// Query text that is not valid UTF-8
    #[error("Query string is not valid UTF-8")]
    InvalidUtf8,

    /// A row wider than the 16-bit field count allows
    #[error("Row has {0} columns, at most 32767 are allowed")]
    TooManyColumns(usize),
}
