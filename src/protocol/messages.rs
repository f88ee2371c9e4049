//! Backend message builders.
//!
//! Each function builds one complete [`Message`]; writing it is left to the
//! caller so sessions and tests share the same encoding.

use super::constants::*;
use super::frame::Message;
use super::value::Value;
use crate::backend::Row;
use crate::error::ProtocolError;

/// Field count as sent on the wire
fn field_count(columns: usize) -> Result<i16, ProtocolError> {
    i16::try_from(columns).map_err(|_| ProtocolError::TooManyColumns(columns))
}

/// AuthenticationOk: unconditional success
pub fn authentication_ok() -> Message {
    let mut msg = Message::new(AUTHENTICATION);
    msg.put_i32(AUTH_OK);
    msg
}

/// ReadyForQuery with idle transaction status
pub fn ready_for_query() -> Message {
    let mut msg = Message::new(READY_FOR_QUERY);
    msg.put_u8(TRANSACTION_STATUS_IDLE);
    msg
}

/// RowDescription derived from the column names of `first_row`.
///
/// Every field gets the same placeholder metadata.
pub fn row_description(first_row: &Row) -> Result<Message, ProtocolError> {
    let mut msg = Message::new(ROW_DESCRIPTION);
    msg.put_i16(field_count(first_row.len())?);
    for name in first_row.column_names() {
        msg.put_cstr(name)
            .put_i32(PLACEHOLDER_TABLE_OID)
            .put_i16(PLACEHOLDER_ATTRIBUTE_NUMBER)
            .put_i32(PLACEHOLDER_TYPE_OID)
            .put_i16(PLACEHOLDER_TYPE_LENGTH)
            .put_i32(PLACEHOLDER_TYPE_MODIFIER)
            .put_i16(PLACEHOLDER_FORMAT_CODE);
    }
    Ok(msg)
}

/// DataRow for `row`, with values laid out in the order of `columns`.
///
/// A row whose column names match `columns` exactly is encoded by position,
/// so repeated names keep their own values. Any other row is matched by
/// name, and a column the row does not have is sent as NULL.
pub fn data_row(columns: &[&str], row: &Row) -> Result<Message, ProtocolError> {
    let mut msg = Message::new(DATA_ROW);
    msg.put_i16(field_count(columns.len())?);
    if row.column_names().eq(columns.iter().copied()) {
        for value in row.values() {
            value.encode_into(msg.payload_mut());
        }
    } else {
        for name in columns {
            row.get(name)
                .unwrap_or(&Value::Null)
                .encode_into(msg.payload_mut());
        }
    }
    Ok(msg)
}

/// CommandComplete carrying `tag`
pub fn command_complete(tag: &str) -> Message {
    let mut msg = Message::new(COMMAND_COMPLETE);
    msg.put_cstr(tag);
    msg
}

/// EmptyQueryResponse, sent instead of a result for blank query text
pub fn empty_query_response() -> Message {
    Message::new(EMPTY_QUERY_RESPONSE)
}

/// ErrorResponse with severity, SQLSTATE code and message fields
pub fn error_response(code: &str, message: &str) -> Message {
    let mut msg = Message::new(ERROR_RESPONSE);
    msg.put_u8(FIELD_SEVERITY)
        .put_cstr(SEVERITY_ERROR)
        .put_u8(FIELD_SEVERITY_NONLOCALIZED)
        .put_cstr(SEVERITY_ERROR)
        .put_u8(FIELD_CODE)
        .put_cstr(code)
        .put_u8(FIELD_MESSAGE)
        .put_cstr(message)
        .put_u8(0);
    msg
}
