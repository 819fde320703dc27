//! Common test utilities for rust-sqlmeta tests
//!
//! [`FakeServer`] stands in for SQL Server: every statement is recorded, and
//! replies are chosen by substrings of the statement text and its bound
//! parameters.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rust_sqlmeta::db::{
    ConnectionFactory, DbError, DbRow, DbValue, ExecutedColumn, SqlConnection,
};
use rust_sqlmeta::parser::RunToken;
use rust_sqlmeta::InferOptions;

/// What the fake server answers to a matching call.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<DbRow>),
    Columns(Vec<ExecutedColumn>),
    Fail(DbError),
}

#[derive(Default)]
struct ServerState {
    replies: Vec<(Vec<String>, Reply)>,
    log: Vec<String>,
    /// Tracks global temp tables and refuses to create one twice
    strict_temp_tables: bool,
    live_temp_tables: HashSet<String>,
    connections_opened: usize,
}

/// A scripted server shared by every connection opened from it.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies with `reply` to calls whose text and parameters contain every
    /// needle. Earlier registrations win.
    pub fn on(&self, needles: &[&str], reply: Reply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .push((needles.iter().map(|n| n.to_string()).collect(), reply));
        self
    }

    /// Fails `CREATE TABLE ##name` while a table of that name exists, the
    /// way tempdb does for sessions sharing a global temp table name.
    pub fn reject_duplicate_temp_tables(&self) -> &Self {
        self.state.lock().unwrap().strict_temp_tables = true;
        self
    }

    pub fn connection(&self) -> FakeConnection {
        FakeConnection {
            server: self.clone(),
        }
    }

    /// Every statement received, parameters appended on separate lines.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Connections opened through [`ConnectionFactory::connect`].
    pub fn connections_opened(&self) -> usize {
        self.state.lock().unwrap().connections_opened
    }

    /// Position of the first logged call containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.log().iter().position(|entry| entry.contains(needle))
    }

    fn answer(&self, sql: &str, params: &[&str]) -> Option<Reply> {
        let mut haystack = sql.to_string();
        for param in params {
            haystack.push('\n');
            haystack.push_str(param);
        }
        let mut state = self.state.lock().unwrap();
        state.log.push(haystack.clone());
        state
            .replies
            .iter()
            .find(|(needles, _)| needles.iter().all(|n| haystack.contains(n.as_str())))
            .map(|(_, reply)| reply.clone())
    }
}

/// Name following `keyword` in `sql` when it is a global temp table.
fn global_table_after(sql: &str, keyword: &str) -> Option<String> {
    let rest = &sql[sql.find(keyword)? + keyword.len()..];
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '(')
        .collect();
    name.starts_with("##").then(|| name.to_lowercase())
}

impl FakeServer {
    fn track_temp_table(&self, sql: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        if !state.strict_temp_tables {
            return Ok(());
        }
        if let Some(name) = global_table_after(sql, "CREATE TABLE") {
            if !state.live_temp_tables.insert(name.clone()) {
                return Err(DbError::server(
                    2714,
                    format!("There is already an object named '{}' in the database.", name),
                ));
            }
        } else if let Some(name) = global_table_after(sql, "DROP TABLE") {
            state.live_temp_tables.remove(&name);
        }
        Ok(())
    }
}

impl ConnectionFactory for FakeServer {
    fn connect(&self) -> Result<Box<dyn SqlConnection>, DbError> {
        self.state.lock().unwrap().connections_opened += 1;
        Ok(Box::new(self.connection()))
    }
}

pub struct FakeConnection {
    server: FakeServer,
}

impl SqlConnection for FakeConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.server.track_temp_table(sql)?;
        match self.server.answer(sql, &[]) {
            Some(Reply::Fail(error)) => Err(error),
            _ => Ok(()),
        }
    }

    fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<DbRow>, DbError> {
        match self.server.answer(sql, params) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(error)) => Err(error),
            _ => Ok(Vec::new()),
        }
    }

    fn describe_columns(&mut self, sql: &str) -> Result<Vec<ExecutedColumn>, DbError> {
        match self.server.answer(sql, &[]) {
            Some(Reply::Columns(columns)) => Ok(columns),
            Some(Reply::Fail(error)) => Err(error),
            _ => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Catalog rows
// ============================================================================

pub const INT: i64 = 56;
pub const BIGINT: i64 = 127;
pub const BIT: i64 = 104;
pub const NVARCHAR: i64 = 231;
pub const DECIMAL: i64 = 106;
pub const GEOGRAPHY: i64 = 240;

pub const SYSTEM_TYPES: &str = "FROM sys.types";
pub const TABLE_TYPES: &str = "FROM sys.table_types";
pub const TABLES: &str = "FROM sys.tables o";
pub const PRIMARY_KEYS: &str = "is_primary_key = 1";
pub const PROCEDURES: &str = "OBJECT_DEFINITION";
pub const PARAMETERS: &str = "FROM sys.parameters";
pub const DESCRIBE_PARAMETERS: &str = "sp_describe_undeclared_parameters";
pub const DESCRIBE_RESULT_SET: &str = "sp_describe_first_result_set";

fn text(value: &str) -> DbValue {
    DbValue::Text(value.to_string())
}

pub fn system_type_rows() -> Vec<DbRow> {
    [
        (INT, "int"),
        (BIGINT, "bigint"),
        (BIT, "bit"),
        (NVARCHAR, "nvarchar"),
        (DECIMAL, "decimal"),
        (GEOGRAPHY, "geography"),
    ]
    .into_iter()
    .map(|(id, name)| {
        DbRow::default()
            .with("system_type_id", DbValue::Int(id))
            .with("name", text(name))
    })
    .collect()
}

/// A `sys.columns`-shaped column.
#[derive(Debug, Clone)]
pub struct Col {
    pub name: &'static str,
    pub system_type_id: i64,
    pub max_length: i64,
    pub is_nullable: bool,
    pub is_identity: bool,
}

pub fn col(name: &'static str, system_type_id: i64, max_length: i64) -> Col {
    Col {
        name,
        system_type_id,
        max_length,
        is_nullable: false,
        is_identity: false,
    }
}

impl Col {
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    fn row(&self, column_id: usize) -> DbRow {
        DbRow::default()
            .with("column_id", DbValue::Int(column_id as i64 + 1))
            .with("column_name", text(self.name))
            .with("system_type_id", DbValue::Int(self.system_type_id))
            .with("max_length", DbValue::Int(self.max_length))
            .with("precision", DbValue::Int(0))
            .with("scale", DbValue::Int(0))
            .with("is_nullable", DbValue::Bool(self.is_nullable))
            .with("is_identity", DbValue::Bool(self.is_identity))
            .with("is_computed", DbValue::Bool(false))
            .with("generated_always_type", DbValue::Int(0))
    }
}

/// Rows of the tables-and-views query for one table.
pub fn table_rows(schema: &str, name: &str, columns: &[Col]) -> Vec<DbRow> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            c.row(i)
                .with("schema_name", text(schema))
                .with("object_name", text(name))
                .with("is_view", DbValue::Bool(false))
        })
        .collect()
}

pub fn primary_key_rows(schema: &str, name: &str, columns: &[&str]) -> Vec<DbRow> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            DbRow::default()
                .with("schema_name", text(schema))
                .with("object_name", text(name))
                .with("column_name", text(c))
                .with("key_ordinal", DbValue::Int(i as i64 + 1))
        })
        .collect()
}

pub fn table_type_rows(user_type_id: i64, schema: &str, name: &str, columns: &[Col]) -> Vec<DbRow> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            c.row(i)
                .with("user_type_id", DbValue::Int(user_type_id))
                .with("schema_name", text(schema))
                .with("type_name", text(name))
        })
        .collect()
}

pub fn procedure_row(object_id: i64, schema: &str, name: &str, definition: &str) -> DbRow {
    DbRow::default()
        .with("object_id", DbValue::Int(object_id))
        .with("schema_name", text(schema))
        .with("procedure_name", text(name))
        .with("definition", text(definition))
}

/// A `sys.parameters` row; `user_type_id` differs from the system type for table types.
pub fn parameter_row(
    object_id: i64,
    parameter_id: i64,
    name: &str,
    system_type_id: i64,
    user_type_id: i64,
    max_length: i64,
) -> DbRow {
    DbRow::default()
        .with("object_id", DbValue::Int(object_id))
        .with("parameter_id", DbValue::Int(parameter_id))
        .with("name", text(name))
        .with("system_type_id", DbValue::Int(system_type_id))
        .with("user_type_id", DbValue::Int(user_type_id))
        .with("max_length", DbValue::Int(max_length))
        .with("precision", DbValue::Int(0))
        .with("scale", DbValue::Int(0))
        .with("is_output", DbValue::Bool(false))
        .with("is_cursor_ref", DbValue::Bool(false))
}

/// A `sp_describe_undeclared_parameters` row.
pub fn undeclared_parameter_row(name: &str, system_type_id: i64, max_length: i64) -> DbRow {
    DbRow::default()
        .with("name", text(name))
        .with("suggested_system_type_id", DbValue::Int(system_type_id))
        .with("suggested_user_type_id", DbValue::Int(system_type_id))
        .with("suggested_max_length", DbValue::Int(max_length))
        .with("suggested_precision", DbValue::Int(0))
        .with("suggested_scale", DbValue::Int(0))
        .with("suggested_is_output", DbValue::Bool(false))
}

/// A `sp_describe_undeclared_parameters` row the server wants as `OUTPUT`.
pub fn undeclared_output_parameter_row(name: &str, system_type_id: i64, max_length: i64) -> DbRow {
    DbRow::default()
        .with("name", text(name))
        .with("suggested_system_type_id", DbValue::Int(system_type_id))
        .with("suggested_user_type_id", DbValue::Int(system_type_id))
        .with("suggested_max_length", DbValue::Int(max_length))
        .with("suggested_is_output", DbValue::Bool(true))
}

/// `sp_describe_first_result_set` rows for `columns`, in order.
pub fn result_set_rows(columns: &[Col]) -> Vec<DbRow> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            DbRow::default()
                .with("column_ordinal", DbValue::Int(i as i64 + 1))
                .with("name", text(c.name))
                .with("system_type_id", DbValue::Int(c.system_type_id))
                .with("max_length", DbValue::Int(c.max_length))
                .with("precision", DbValue::Int(0))
                .with("scale", DbValue::Int(0))
                .with("is_nullable", DbValue::Bool(c.is_nullable))
                .with("is_identity_column", DbValue::Bool(c.is_identity))
                .with("is_computed_column", DbValue::Bool(false))
                .with("is_hidden", DbValue::Bool(false))
        })
        .collect()
}

/// A server with the standard system types and nothing else.
pub fn server_with_types() -> FakeServer {
    let server = FakeServer::new();
    server.on(&[SYSTEM_TYPES], Reply::Rows(system_type_rows()));
    server
}

/// Sequential options with a fixed run token.
pub fn options() -> InferOptions {
    InferOptions {
        parallelism: 1,
        run_token: RunToken::new("run42"),
    }
}
