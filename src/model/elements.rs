//! Typed metadata elements produced by catalog reads and inference

use std::fmt;

use super::types::SqlTypeDescriptor;
use crate::parser::names::quote_name;

/// A column of a table, view, table type, temp table or result set.
///
/// Columns a rule skips are never flagged: they are removed from table DTOs
/// and result sets, and only their names survive (in
/// `all_result_column_names` for result sets).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Catalog ordinal
    pub sort_key: i32,
    pub is_nullable: bool,
    pub is_identity: bool,
    pub is_computed: bool,
    pub is_generated_always: bool,
    /// Character count for character types, byte count otherwise, `-1` for `max`
    pub size: i32,
    pub precision: u8,
    pub scale: u8,
    pub sql_type: SqlTypeDescriptor,
    pub collation: Option<String>,
}

impl ColumnDescriptor {
    /// A nullable column with no identity/computed flags.
    pub fn new(name: impl Into<String>, sort_key: i32, sql_type: SqlTypeDescriptor) -> Self {
        Self {
            name: name.into(),
            sort_key,
            is_nullable: true,
            is_identity: false,
            is_computed: false,
            is_generated_always: false,
            size: 0,
            precision: 0,
            scale: 0,
            sql_type,
            collation: None,
        }
    }

    /// The T-SQL type of this column, e.g. `nvarchar(50)`.
    pub fn type_declaration(&self) -> String {
        self.sql_type
            .declaration(self.size, self.precision, self.scale)
    }

    /// Whether the server computes the value (insert/update must not supply it).
    pub fn is_server_generated(&self) -> bool {
        self.is_identity || self.is_computed || self.is_generated_always
    }

    /// Columns are structurally equal when they would bind the same way,
    /// regardless of name and nullability.
    pub fn same_shape(&self, other: &ColumnDescriptor) -> bool {
        self.sql_type.type_name == other.sql_type.type_name
            && self.size == other.size
            && self.precision == other.precision
            && self.scale == other.scale
    }
}

/// A user-defined table type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableTypeDescriptor {
    pub user_type_id: i32,
    pub schema_name: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableTypeDescriptor {
    /// `[schema].[name]`
    pub fn full_name(&self) -> String {
        format!("{}.{}", quote_name(&self.schema_name), quote_name(&self.name))
    }
}

/// The type of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterType {
    Scalar(SqlTypeDescriptor),
    Table(TableTypeDescriptor),
}

/// An input (or output) parameter of a script or procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    /// Name including the `@` sigil
    pub name: String,
    /// First-use offset for scripts, catalog ordinal for procedures
    pub sort_key: i64,
    pub size: i32,
    pub precision: u8,
    pub scale: u8,
    pub is_output: bool,
    pub is_cursor_ref: bool,
    pub is_nullable: bool,
    pub param_type: ParameterType,
    pub default_value: Option<String>,
}

impl ParameterDescriptor {
    pub fn table_type(&self) -> Option<&TableTypeDescriptor> {
        match &self.param_type {
            ParameterType::Table(t) => Some(t),
            ParameterType::Scalar(_) => None,
        }
    }

    /// Declaration usable in `@params` lists and `DECLARE` statements.
    pub fn type_declaration(&self) -> String {
        match &self.param_type {
            ParameterType::Scalar(t) => t.declaration(self.size, self.precision, self.scale),
            ParameterType::Table(t) => format!("{} READONLY", t.full_name()),
        }
    }

    /// Declaration of a local variable standing in for this parameter.
    pub fn variable_declaration(&self) -> String {
        match &self.param_type {
            ParameterType::Scalar(t) => t.declaration(self.size, self.precision, self.scale),
            ParameterType::Table(t) => t.full_name(),
        }
    }
}

/// A temp table that must exist while a unit is analysed.
#[derive(Debug, Clone, PartialEq)]
pub struct TempTable {
    /// Name as written in the definition, e.g. `#args`
    pub name: String,
    pub create_statement: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Typed hint for a parameter a synthesized script introduces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterHint {
    pub name: String,
    /// Scalar declaration (`nvarchar(50)`) or table type name (`[dbo].[IdList]`)
    pub type_declaration: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProcedure {
    pub schema_name: String,
    pub name: String,
    pub object_id: i32,
    pub definition: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub temp_tables: Vec<TempTable>,
    /// `None` when the procedure returns no rows
    pub result_set: Option<Vec<ColumnDescriptor>>,
    /// Every result column name, skipped or anonymous ones included
    pub all_result_column_names: Vec<String>,
}

impl StoredProcedure {
    /// `[schema].[name]`
    pub fn full_name(&self) -> String {
        format!("{}.{}", quote_name(&self.schema_name), quote_name(&self.name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// Logical output path, `/`-separated
    pub identity: String,
    pub source_text: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub temp_tables: Vec<TempTable>,
    /// `None` when the script returns no rows
    pub result_set: Option<Vec<ColumnDescriptor>>,
    pub all_result_column_names: Vec<String>,
    pub is_synthesized: bool,
    pub parameter_hints: Vec<ParameterHint>,
}

impl Script {
    /// A user-authored script awaiting inference.
    pub fn new(identity: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            source_text: source_text.into(),
            parameters: Vec::new(),
            temp_tables: Vec::new(),
            result_set: None,
            all_result_column_names: Vec::new(),
            is_synthesized: false,
            parameter_hints: Vec::new(),
        }
    }
}

/// The unit an inference call operates on.
#[derive(Debug, Clone, Copy)]
pub enum ExecutableUnit<'a> {
    StoredProcedure(&'a StoredProcedure),
    Script(&'a Script),
    TempTable(&'a TempTable),
}

impl ExecutableUnit<'_> {
    /// Name used in diagnostics
    pub fn identity(&self) -> String {
        match self {
            ExecutableUnit::StoredProcedure(p) => format!("procedure {}", p.full_name()),
            ExecutableUnit::Script(s) => format!("script '{}'", s.identity),
            ExecutableUnit::TempTable(t) => format!("temp table {}", t.name),
        }
    }
}

impl fmt::Display for ExecutableUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// A table or view with its columns and primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDto {
    pub schema_name: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Ordered by key ordinal; empty when the key is absent or not fully kept
    pub primary_key_columns: Vec<ColumnDescriptor>,
    pub is_view: bool,
}

impl TableDto {
    /// `[schema].[name]`
    pub fn full_name(&self) -> String {
        format!("{}.{}", quote_name(&self.schema_name), quote_name(&self.name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key_columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(column))
    }

    /// Drops columns for which `skip` returns true. If any primary key column
    /// is dropped the key collapses to empty rather than becoming partial.
    pub fn without_columns(&self, mut skip: impl FnMut(&ColumnDescriptor) -> bool) -> TableDto {
        let columns: Vec<ColumnDescriptor> =
            self.columns.iter().filter(|c| !skip(c)).cloned().collect();
        let key_intact = self
            .primary_key_columns
            .iter()
            .all(|k| columns.iter().any(|c| c.name == k.name));
        TableDto {
            schema_name: self.schema_name.clone(),
            name: self.name.clone(),
            primary_key_columns: if key_intact {
                self.primary_key_columns.clone()
            } else {
                Vec::new()
            },
            columns,
            is_view: self.is_view,
        }
    }
}
