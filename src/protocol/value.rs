//! Wire representation of result values.
//!
//! Inside a data row every value is preceded by its own i32 length. Numbers
//! are sent as raw big-endian bytes of their native width. Text is sent as
//! its UTF-8 bytes plus a trailing null, and the declared length includes
//! that null. `Null` is the length `-1` with no value bytes.

use bytes::{BufMut, BytesMut};

/// A scalar value in a result row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Text(String),
}

impl Value {
    /// Declared length of the encoded value, or `None` for SQL NULL.
    pub fn encoded_len(&self) -> Option<usize> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(1),
            Value::SmallInt(_) => Some(2),
            Value::Int(_) => Some(4),
            Value::BigInt(_) => Some(8),
            Value::Text(s) => Some(s.len() + 1),
        }
    }

    /// Write the length prefix followed by the value bytes.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self.encoded_len() {
            Some(len) => buf.put_i32(len as i32),
            None => {
                buf.put_i32(-1);
                return;
            }
        }

        match self {
            Value::Null => {}
            Value::Bool(b) => buf.put_u8(u8::from(*b)),
            Value::SmallInt(n) => buf.put_i16(*n),
            Value::Int(n) => buf.put_i32(*n),
            Value::BigInt(n) => buf.put_i64(*n),
            Value::Text(s) => {
                buf.extend_from_slice(s.as_bytes());
                buf.put_u8(0);
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
