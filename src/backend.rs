//! Query backends.
//!
//! The protocol engine does not run queries itself. A session hands every
//! query string to a [`Backend`] and streams back whatever rows it produces.

use crate::protocol::constants::SQLSTATE_INTERNAL_ERROR;
use crate::protocol::value::Value;
use std::fmt;

/// One result row: column names paired with values, in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    /// Append a column
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, name: K, value: V) -> Self {
        self.push(name, value);
        self
    }

    pub fn push<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) {
        self.columns.push((name.into(), value.into()));
    }

    /// Look up a value by column name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Values in column order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The rows produced by one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    tag: Option<String>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        ResultSet { rows, tag: None }
    }

    /// An empty result, e.g. for statements that return no rows
    pub fn empty() -> Self {
        ResultSet::default()
    }

    /// Override the completion tag sent in CommandComplete
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Completion tag: the override if set, otherwise `SELECT <rows>`
    pub fn completion_tag(&self) -> String {
        match &self.tag {
            Some(tag) => tag.clone(),
            None => format!("SELECT {}", self.rows.len()),
        }
    }
}

/// A query failure reported back to the client as an ErrorResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    /// SQLSTATE code
    pub code: String,
    pub message: String,
}

impl QueryError {
    /// An internal error (`XX000`)
    pub fn new<S: Into<String>>(message: S) -> Self {
        QueryError::with_code(SQLSTATE_INTERNAL_ERROR, message)
    }

    pub fn with_code<C: Into<String>, S: Into<String>>(code: C, message: S) -> Self {
        QueryError {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for QueryError {}

/// Something that can run a query.
///
/// `execute` is synchronous and may block; sessions call it from tokio's
/// blocking pool.
pub trait Backend: Send + Sync + 'static {
    fn execute(&self, query: &str) -> Result<ResultSet, QueryError>;
}

impl<F> Backend for F
where
    F: Fn(&str) -> Result<ResultSet, QueryError> + Send + Sync + 'static,
{
    fn execute(&self, query: &str) -> Result<ResultSet, QueryError> {
        self(query)
    }
}

/// Answers every query with the same two rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoBackend;

impl Backend for DemoBackend {
    fn execute(&self, _query: &str) -> Result<ResultSet, QueryError> {
        Ok(ResultSet::new(vec![
            Row::new().with("a", 1).with("b", "B1").with("c", "C1"),
            Row::new().with("a", 2).with("b", "B2").with("c", "C2"),
        ]))
    }
}

/// Answers every query with a single `query` column holding the query text.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoBackend;

impl Backend for EchoBackend {
    fn execute(&self, query: &str) -> Result<ResultSet, QueryError> {
        Ok(ResultSet::new(vec![Row::new().with("query", query)]))
    }
}
