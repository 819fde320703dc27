//! Database access seam
//!
//! Everything above this module talks to SQL Server through [`SqlConnection`],
//! which keeps catalog reads and inference synchronous and lets tests drive
//! the pipeline with a scripted connection instead of a live server.

mod sandbox;
mod tds;

use std::fmt;

pub use sandbox::{with_rolled_back_transaction, SandboxScope, TempTableSandbox};
pub use tds::{ConnectionSettings, TdsConnection, TdsConnectionFactory};

/// A failure reported by the server or the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// Server error number, when the failure came from the server
    pub number: Option<u32>,
    pub message: String,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            number: None,
            message: message.into(),
        }
    }

    pub fn server(number: u32, message: impl Into<String>) -> Self {
        Self {
            number: Some(number),
            message: message.into(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "Msg {}: {}", number, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DbError {}

/// A single value read from a catalog query.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// An owned row addressable by column name (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbRow {
    columns: Vec<(String, DbValue)>,
}

impl DbRow {
    pub fn new(columns: Vec<(String, DbValue)>) -> Self {
        Self { columns }
    }

    /// Builder used by tests and fakes.
    pub fn with(mut self, name: &str, value: DbValue) -> Self {
        self.columns.push((name.to_string(), value));
        self
    }

    pub fn value(&self, name: &str) -> &DbValue {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
            .unwrap_or(&DbValue::Null)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.value(name) {
            DbValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.value(name) {
            DbValue::Int(i) => Some(*i),
            DbValue::Bool(b) => Some(i64::from(*b)),
            DbValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Reads a bit column; integers are treated as C-style booleans.
    pub fn flag(&self, name: &str) -> bool {
        match self.value(name) {
            DbValue::Bool(b) => *b,
            DbValue::Int(i) => *i != 0,
            _ => false,
        }
    }
}

/// Column schema observed by executing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedColumn {
    /// Empty for anonymous columns
    pub name: String,
    /// System type name as reported by the driver (e.g. "int", "nvarchar")
    pub type_name: String,
}

/// A synchronous connection to SQL Server.
pub trait SqlConnection: Send {
    /// Executes a batch and discards any results.
    fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Runs a query binding `params` to `@P1..@Pn` and returns the rows of its first result set.
    fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<DbRow>, DbError>;

    /// Executes a batch and returns the column schema of its first result set.
    fn describe_columns(&mut self, sql: &str) -> Result<Vec<ExecutedColumn>, DbError>;
}

/// Opens fresh connections to the same database.
pub trait ConnectionFactory: Sync {
    fn connect(&self) -> Result<Box<dyn SqlConnection>, DbError>;
}
