//! PostgreSQL wire protocol (v3) engine.
//!
//! - `frame`: length-prefixed message framing and bounded reads
//! - `value`: wire encoding of result values
//! - `messages`: backend message builders
//! - `startup`: SSL refusal and startup negotiation
//! - `constants`: magic numbers, tags and placeholder metadata

pub mod constants;
pub mod frame;
pub mod messages;
pub mod startup;
pub mod value;

pub use frame::Message;
pub use startup::{process_startup, StartupOutcome, StartupParameters};
pub use value::Value;
