//! PostgreSQL wire protocol constants.

/// Protocol version 3.0, sent by a normal startup message
pub const STARTUP_MESSAGE: u32 = 196608;

/// Magic sent by a client asking to negotiate SSL
pub const SSL_REQUEST: u32 = 80877103;

/// Upper bound on the startup packet, matching the limit real servers enforce
pub const MAX_STARTUP_PACKET_LENGTH: usize = 10000;

/// Single-byte answer to an SSL request: not supported
pub const SSL_NOT_SUPPORTED: u8 = b'N';

// Backend (server to client) message tags
pub const AUTHENTICATION: u8 = b'R';
pub const READY_FOR_QUERY: u8 = b'Z';
pub const ROW_DESCRIPTION: u8 = b'T';
pub const DATA_ROW: u8 = b'D';
pub const COMMAND_COMPLETE: u8 = b'C';
pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
pub const ERROR_RESPONSE: u8 = b'E';

// Frontend (client to server) message tags
pub const QUERY: u8 = b'Q';
pub const TERMINATE: u8 = b'X';

/// AuthenticationOk status code
pub const AUTH_OK: i32 = 0;

/// Transaction status: Idle (not in a transaction)
pub const TRANSACTION_STATUS_IDLE: u8 = b'I';

// Row description placeholders. The server does no type introspection, so
// every field is described with the same schema-unaware metadata.
pub const PLACEHOLDER_TABLE_OID: i32 = 0;
pub const PLACEHOLDER_ATTRIBUTE_NUMBER: i16 = 0;
pub const PLACEHOLDER_TYPE_OID: i32 = 0;
pub const PLACEHOLDER_TYPE_LENGTH: i16 = -1;
pub const PLACEHOLDER_TYPE_MODIFIER: i32 = 0;
pub const PLACEHOLDER_FORMAT_CODE: i16 = 0;

// ErrorResponse field codes
pub const FIELD_SEVERITY: u8 = b'S';
pub const FIELD_SEVERITY_NONLOCALIZED: u8 = b'V';
pub const FIELD_CODE: u8 = b'C';
pub const FIELD_MESSAGE: u8 = b'M';

pub const SEVERITY_ERROR: &str = "ERROR";

/// SQLSTATE internal_error
pub const SQLSTATE_INTERNAL_ERROR: &str = "XX000";

/// SQLSTATE too_many_columns
pub const SQLSTATE_TOO_MANY_COLUMNS: &str = "54011";

/// Largest field count a RowDescription or DataRow can declare
pub const MAX_FIELD_COUNT: usize = i16::MAX as usize;
