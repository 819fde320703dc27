//! Generated CRUD scripts for tables and views
//!
//! Synthesized scripts are ordinary [`Script`] units: they carry parameter
//! hints and staging temp tables but go through the same inference as
//! hand-written ones.

mod table_type_match;
mod templates;

use std::fmt;
use std::str::FromStr;

use crate::error::SqlMetaError;
use crate::model::{Script, TableDto, TableTypeDescriptor};
use crate::rules::TableScriptRule;

pub use table_type_match::{map_columns, select_table_type, ColumnMapping};
pub use templates::synthesize_script;

/// A generated statement shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptKind {
    GetAll,
    GetById,
    GetByIdBatch,
    GetByColumns,
    GetByColumnsBatch,
    Insert,
    InsertBatch,
    Update,
    UpdateBatch,
    Merge,
    MergeBatch,
    Delete,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 12] = [
        ScriptKind::GetAll,
        ScriptKind::GetById,
        ScriptKind::GetByIdBatch,
        ScriptKind::GetByColumns,
        ScriptKind::GetByColumnsBatch,
        ScriptKind::Insert,
        ScriptKind::InsertBatch,
        ScriptKind::Update,
        ScriptKind::UpdateBatch,
        ScriptKind::Merge,
        ScriptKind::MergeBatch,
        ScriptKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::GetAll => "getAll",
            ScriptKind::GetById => "getById",
            ScriptKind::GetByIdBatch => "getByIdBatch",
            ScriptKind::GetByColumns => "getByColumns",
            ScriptKind::GetByColumnsBatch => "getByColumnsBatch",
            ScriptKind::Insert => "insert",
            ScriptKind::InsertBatch => "insertBatch",
            ScriptKind::Update => "update",
            ScriptKind::UpdateBatch => "updateBatch",
            ScriptKind::Merge => "merge",
            ScriptKind::MergeBatch => "mergeBatch",
            ScriptKind::Delete => "delete",
        }
    }

    /// Rows are matched on the primary key.
    pub fn requires_primary_key(&self) -> bool {
        matches!(
            self,
            ScriptKind::GetById
                | ScriptKind::GetByIdBatch
                | ScriptKind::Update
                | ScriptKind::UpdateBatch
                | ScriptKind::Merge
                | ScriptKind::MergeBatch
                | ScriptKind::Delete
        )
    }

    /// Rows are matched on configured filter columns.
    pub fn uses_filter_columns(&self) -> bool {
        matches!(self, ScriptKind::GetByColumns | ScriptKind::GetByColumnsBatch)
    }

    /// Keys arrive in a table-valued parameter.
    pub fn uses_table_type(&self) -> bool {
        matches!(self, ScriptKind::GetByIdBatch | ScriptKind::GetByColumnsBatch)
    }

    /// Rows are staged in an `#args` temp table.
    pub fn uses_staging_table(&self) -> bool {
        matches!(
            self,
            ScriptKind::InsertBatch | ScriptKind::UpdateBatch | ScriptKind::MergeBatch
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            ScriptKind::GetAll
                | ScriptKind::GetById
                | ScriptKind::GetByIdBatch
                | ScriptKind::GetByColumns
                | ScriptKind::GetByColumnsBatch
        )
    }

    /// Kinds that return the primary key unless column rules say otherwise.
    pub fn outputs_key_by_default(&self) -> bool {
        matches!(
            self,
            ScriptKind::Insert | ScriptKind::InsertBatch | ScriptKind::Merge | ScriptKind::MergeBatch
        )
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScriptKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown script kind '{}', expected one of: {}",
                    s,
                    ScriptKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// Every script requested for `table`, in rule order.
pub fn synthesize_table_scripts(
    table: &TableDto,
    rules: &[TableScriptRule],
    table_types: &[TableTypeDescriptor],
) -> Result<Vec<Script>, SqlMetaError> {
    rules
        .iter()
        .map(|rule| synthesize_script(table, rule, table_types))
        .collect()
}
