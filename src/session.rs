//! Per-connection protocol session.
//!
//! A session owns one client stream from the startup packet to disconnect:
//! negotiate startup, accept authentication unconditionally, then loop over
//! ReadyForQuery, one simple query, and its result. Errors end only this
//! session.

use crate::backend::{Backend, QueryError, ResultSet};
use crate::error::ProtocolError;
use crate::protocol::constants::{QUERY, SQLSTATE_TOO_MANY_COLUMNS, TERMINATE};
use crate::protocol::frame::{read_i32, read_payload, read_tag, write_message, LENGTH_FIELD_SIZE};
use crate::protocol::messages;
use crate::protocol::{process_startup, Message, StartupOutcome};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Default upper bound on a single frontend message, length field included
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A message sent by the client after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Simple query with its text
    Query(String),
    Terminate,
}

/// Read one tagged frontend message.
///
/// Returns `None` if the stream closed at a message boundary.
pub async fn read_frontend_message<R>(
    reader: &mut R,
    max_message_size: usize,
) -> Result<Option<FrontendMessage>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let tag = match read_tag(reader).await? {
        Some(tag) => tag,
        None => return Ok(None),
    };

    match tag {
        QUERY => {
            let length = read_i32(reader).await?;
            let payload = read_payload(reader, length, LENGTH_FIELD_SIZE, max_message_size).await?;
            let mut body = payload.to_vec();
            // Clients null-terminate the query text
            if body.last() == Some(&0) {
                body.pop();
            }
            let query = String::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Some(FrontendMessage::Query(query)))
        }
        TERMINATE => {
            let length = read_i32(reader).await?;
            read_payload(reader, length, LENGTH_FIELD_SIZE, max_message_size).await?;
            Ok(Some(FrontendMessage::Terminate))
        }
        other => Err(ProtocolError::UnexpectedMessage(other)),
    }
}

/// Query text with nothing to run
fn is_empty_query(query: &str) -> bool {
    query
        .trim_matches(|c: char| c.is_whitespace() || c == ';')
        .is_empty()
}

/// Run the query on the blocking pool so a slow backend only stalls its own
/// connection.
async fn execute(backend: Arc<dyn Backend>, query: String) -> Result<ResultSet, QueryError> {
    match tokio::task::spawn_blocking(move || backend.execute(&query)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(QueryError::new("query execution panicked")),
        Err(_) => Err(QueryError::new("query execution was cancelled")),
    }
}

/// One client connection
pub struct Session<S> {
    stream: S,
    backend: Arc<dyn Backend>,
    max_message_size: usize,
    handshake_complete: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, backend: Arc<dyn Backend>) -> Self {
        Session {
            stream,
            backend,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_complete: false,
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Drive the connection until the client terminates or disconnects.
    pub async fn run(&mut self) -> Result<(), ProtocolError> {
        if !self.startup().await? {
            debug!("Client closed the connection during startup");
            return Ok(());
        }

        self.send(&messages::authentication_ok()).await?;

        loop {
            self.send(&messages::ready_for_query()).await?;

            match read_frontend_message(&mut self.stream, self.max_message_size).await? {
                Some(FrontendMessage::Query(query)) => self.handle_query(query).await?,
                Some(FrontendMessage::Terminate) => {
                    debug!("Client sent terminate");
                    break;
                }
                None => {
                    debug!("Client closed the connection");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run the startup negotiation until it is accepted.
    ///
    /// Returns `false` if the client went away first.
    async fn startup(&mut self) -> Result<bool, ProtocolError> {
        loop {
            match process_startup(&mut self.stream).await? {
                StartupOutcome::SslRefused => continue,
                StartupOutcome::Ready(params) => {
                    debug!(
                        user = params.user().unwrap_or_default(),
                        database = params.database().unwrap_or_default(),
                        "Startup complete"
                    );
                    self.handshake_complete = true;
                    return Ok(true);
                }
                StartupOutcome::Disconnected => return Ok(false),
            }
        }
    }

    async fn handle_query(&mut self, query: String) -> Result<(), ProtocolError> {
        debug!(query = %query, "Received query");

        if is_empty_query(&query) {
            self.send(&messages::empty_query_response()).await?;
            return Ok(());
        }

        match execute(Arc::clone(&self.backend), query).await {
            Ok(result) => self.send_result(&result).await,
            Err(e) => {
                warn!(code = %e.code, error = %e.message, "Query failed");
                self.send(&messages::error_response(&e.code, &e.message)).await?;
                Ok(())
            }
        }
    }

    async fn send_result(&mut self, result: &ResultSet) -> Result<(), ProtocolError> {
        if let Some(first) = result.rows.first() {
            // Nothing is sent for a result the wire format cannot describe
            let description = match messages::row_description(first) {
                Ok(description) => description,
                Err(e @ ProtocolError::TooManyColumns(_)) => {
                    warn!(error = %e, "Result rejected");
                    let reply = messages::error_response(SQLSTATE_TOO_MANY_COLUMNS, &e.to_string());
                    return self.send(&reply).await;
                }
                Err(e) => return Err(e),
            };
            self.send(&description).await?;

            let columns: Vec<&str> = first.column_names().collect();
            for row in &result.rows {
                self.send(&messages::data_row(&columns, row)?).await?;
            }
        }

        self.send(&messages::command_complete(&result.completion_tag())).await
    }

    async fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        write_message(&mut self.stream, message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DemoBackend, Row};
    use crate::protocol::constants::{SSL_REQUEST, STARTUP_MESSAGE};
    use tokio_test::io::Builder;

    fn startup_packet(magic: u32, params: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((8 + params.len()) as i32).to_be_bytes());
        buf.extend_from_slice(&magic.to_be_bytes());
        buf.extend_from_slice(params);
        buf
    }

    fn query(text: &str) -> Vec<u8> {
        let mut buf = vec![b'Q'];
        buf.extend_from_slice(&((text.len() + 5) as i32).to_be_bytes());
        buf.extend_from_slice(text.as_bytes());
        buf.push(0);
        buf
    }

    fn wire(msg: Message) -> Vec<u8> {
        msg.encode().unwrap().to_vec()
    }

    const AUTH_OK: &[u8] = b"R\x00\x00\x00\x08\x00\x00\x00\x00";
    const READY: &[u8] = b"Z\x00\x00\x00\x05I";
    const TERMINATE_MSG: &[u8] = b"X\x00\x00\x00\x04";

    fn single_int_backend() -> Arc<dyn Backend> {
        Arc::new(|_: &str| -> Result<ResultSet, QueryError> {
            Ok(ResultSet::new(vec![Row::new().with("a", 1)]))
        })
    }

    #[tokio::test]
    async fn test_startup_then_ready() {
        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .build();

        let mut session = Session::new(&mut mock, Arc::new(DemoBackend));
        session.run().await.unwrap();
        assert!(session.handshake_complete());
    }

    #[tokio::test]
    async fn test_ssl_refused_then_startup() {
        let mut mock = Builder::new()
            .read(&startup_packet(SSL_REQUEST, b""))
            .write(b"N")
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        let mut session = Session::new(&mut mock, Arc::new(DemoBackend));
        session.run().await.unwrap();
        assert!(session.handshake_complete());
    }

    #[tokio::test]
    async fn test_select_one() {
        let mut row_description = vec![b'T', 0, 0, 0, 26, 0, 1, b'a', 0];
        row_description.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
        row_description.extend_from_slice(&[0, 0, 0, 0, 0, 0]);

        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query("SELECT 1"))
            .write(&row_description)
            .write(&[b'D', 0, 0, 0, 14, 0, 1, 0, 0, 0, 4, 0, 0, 0, 1])
            .write(b"C\x00\x00\x00\x0dSELECT 1\x00")
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        let mut session = Session::new(&mut mock, single_int_backend());
        session.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_sends_nothing_more() {
        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, Arc::new(DemoBackend))
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_truncated_startup_closes() {
        let mut packet = 20i32.to_be_bytes().to_vec();
        packet.extend_from_slice(&[0u8; 10]);
        let mut mock = Builder::new().read(&packet).build();

        let mut session = Session::new(&mut mock, Arc::new(DemoBackend));
        match session.run().await {
            Err(ProtocolError::ShortRead { expected, actual }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!session.handshake_complete());
    }

    #[tokio::test]
    async fn test_unknown_magic_never_ready() {
        let mut mock = Builder::new()
            .read(&startup_packet(80877102, b""))
            .build();

        let mut session = Session::new(&mut mock, Arc::new(DemoBackend));
        assert!(matches!(
            session.run().await,
            Err(ProtocolError::UnknownProtocolVersion(80877102))
        ));
        assert!(!session.handshake_complete());
    }

    #[tokio::test]
    async fn test_query_error_keeps_session_alive() {
        let backend: Arc<dyn Backend> = Arc::new(|q: &str| -> Result<ResultSet, QueryError> {
            Err(QueryError::with_code("42601", format!("syntax error in {q}")))
        });

        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query("SELEC"))
            .write(&wire(messages::error_response("42601", "syntax error in SELEC")))
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, backend).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_backend_reports_error() {
        let backend: Arc<dyn Backend> = Arc::new(|_: &str| -> Result<ResultSet, QueryError> {
            panic!("backend blew up")
        });

        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query("SELECT 1"))
            .write(&wire(messages::error_response("XX000", "query execution panicked")))
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, backend).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_query() {
        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query(" ; "))
            .write(b"I\x00\x00\x00\x04")
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, Arc::new(DemoBackend))
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_result_set_sends_only_complete() {
        let backend: Arc<dyn Backend> = Arc::new(|_: &str| -> Result<ResultSet, QueryError> {
            Ok(ResultSet::empty().with_tag("CREATE TABLE"))
        });

        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query("CREATE TABLE t (a int)"))
            .write(&wire(messages::command_complete("CREATE TABLE")))
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, backend).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_column_names_keep_their_values() {
        let backend: Arc<dyn Backend> = Arc::new(|_: &str| -> Result<ResultSet, QueryError> {
            Ok(ResultSet::new(vec![Row::new().with("a", 1).with("a", 2)]))
        });
        let row = Row::new().with("a", 1).with("a", 2);

        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query("SELECT 1 AS a, 2 AS a"))
            .write(&wire(messages::row_description(&row).unwrap()))
            .write(&[b'D', 0, 0, 0, 22, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2])
            .write(b"C\x00\x00\x00\x0dSELECT 1\x00")
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, backend).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_too_many_columns_reports_error() {
        let backend: Arc<dyn Backend> = Arc::new(|_: &str| -> Result<ResultSet, QueryError> {
            let mut row = Row::new();
            for i in 0..40000 {
                row.push(format!("c{i}"), i);
            }
            Ok(ResultSet::new(vec![row]))
        });

        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(&query("SELECT *"))
            .write(&wire(messages::error_response(
                "54011",
                "Row has 40000 columns, at most 32767 are allowed",
            )))
            .write(READY)
            .read(TERMINATE_MSG)
            .build();

        Session::new(&mut mock, backend).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_message_is_fatal() {
        let mut mock = Builder::new()
            .read(&startup_packet(STARTUP_MESSAGE, b"user\0alice\0\0"))
            .write(AUTH_OK)
            .write(READY)
            .read(b"P")
            .build();

        let result = Session::new(&mut mock, Arc::new(DemoBackend)).run().await;
        assert!(matches!(result, Err(ProtocolError::UnexpectedMessage(b'P'))));
    }

    #[tokio::test]
    async fn test_read_frontend_query_strips_terminator() {
        let mut mock = Builder::new().read(&query("SELECT 'é'")).build();
        let msg = read_frontend_message(&mut mock, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(msg, Some(FrontendMessage::Query("SELECT 'é'".to_string())));
    }

    #[tokio::test]
    async fn test_read_frontend_query_without_terminator() {
        let mut mock = Builder::new().read(b"Q\x00\x00\x00\x0cSELECT 1").build();
        let msg = read_frontend_message(&mut mock, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(msg, Some(FrontendMessage::Query("SELECT 1".to_string())));
    }

    #[tokio::test]
    async fn test_read_frontend_invalid_utf8() {
        let mut mock = Builder::new().read(b"Q\x00\x00\x00\x07\xff\xfe\x00").build();
        assert!(matches!(
            read_frontend_message(&mut mock, DEFAULT_MAX_MESSAGE_SIZE).await,
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn test_read_frontend_query_too_large() {
        let mut mock = Builder::new().read(b"Q\x00\x00\x01\x00").build();
        assert!(matches!(
            read_frontend_message(&mut mock, 64).await,
            Err(ProtocolError::MessageTooLarge { length: 256, max: 64 })
        ));
    }

    #[test]
    fn test_is_empty_query() {
        assert!(is_empty_query(""));
        assert!(is_empty_query("  ;\n"));
        assert!(!is_empty_query("SELECT 1;"));
    }
}
