//! pgany: PostgreSQL wire protocol-compatible servers over any backend
//!
//! The protocol engine speaks enough of the v3 protocol for real client
//! libraries to connect and run simple queries:
//! - SSL requests are refused, startup is accepted unconditionally
//! - Simple queries are handed to a pluggable [`Backend`]
//! - Results stream back as RowDescription, DataRow and CommandComplete
//! - Backend failures become ErrorResponse messages
//!
//! Each connection is an independent tokio task; see [`server::Server`].

pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;

pub use backend::{Backend, QueryError, ResultSet, Row};
pub use error::ProtocolError;
pub use protocol::Value;
pub use session::Session;
