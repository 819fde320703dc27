//! Error types for rust-sqlmeta

use std::path::PathBuf;
use thiserror::Error;

use crate::db::DbError;

/// Fatal errors that abort a metadata inference run
#[derive(Error, Debug)]
pub enum SqlMetaError {
    #[error("Database call failed while {context}")]
    Database {
        context: String,
        #[source]
        source: DbError,
    },

    #[error("Unsupported SQL type '{type_name}' for {subject} in {unit}")]
    UnsupportedType {
        unit: String,
        subject: String,
        type_name: String,
    },

    #[error("Unknown table type '{name}' referenced by {unit}")]
    UnknownTableType { unit: String, name: String },

    #[error("Cannot read the definition of procedure {procedure}; grant VIEW DEFINITION on it (or on its schema) to the connecting login")]
    ProcedureDefinitionUnreadable { procedure: String },

    #[error("Name '{name}' is used both as a temp table and as a parameter in {unit}")]
    TempTableParameterCollision { unit: String, name: String },

    #[error("Temp table '{name}' is defined more than once for {unit}")]
    DuplicateTempTable { unit: String, name: String },

    #[error("Temp table definition for {unit} must contain exactly one CREATE TABLE statement, found {count}:\n{sql}")]
    MalformedTempTable {
        unit: String,
        count: usize,
        sql: String,
    },

    #[error("Table {table} has no primary key, which '{kind}' requires")]
    MissingPrimaryKey { table: String, kind: String },

    #[error("'{kind}' for table {table} requires an explicit list of filter columns")]
    MissingFilterColumns { table: String, kind: String },

    #[error("Column '{column}' named by '{kind}' does not exist in table {table}")]
    UnknownColumn {
        table: String,
        kind: String,
        column: String,
    },

    #[error("'{kind}' for table {table} produces no columns to {purpose}")]
    EmptyColumnList {
        table: String,
        kind: String,
        purpose: String,
    },

    #[error("No table type matches columns ({columns}) of {table} for '{kind}'; create one or name it explicitly")]
    NoMatchingTableType {
        table: String,
        kind: String,
        columns: String,
    },

    #[error("Several table types match columns ({columns}) of {table} for '{kind}': {candidates}; name one explicitly")]
    AmbiguousTableType {
        table: String,
        kind: String,
        columns: String,
        candidates: String,
    },

    #[error("Table type {table_type} does not match columns ({columns}) of {table} for '{kind}'")]
    TableTypeMismatch {
        table: String,
        kind: String,
        table_type: String,
        columns: String,
    },

    #[error("Could not infer parameters of {unit}: {guidance}\n{sql}")]
    ParameterInference {
        unit: String,
        guidance: String,
        sql: String,
        #[source]
        source: DbError,
    },

    #[error("Could not infer the result set of {unit}: {guidance}\n{sql}")]
    ResultSetInference {
        unit: String,
        guidance: String,
        sql: String,
        #[source]
        source: DbError,
    },

    #[error("Cannot tokenize the text of {unit}")]
    UnparsableScript { unit: String },

    #[error("Failed to read script file: {path}")]
    ScriptReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
