//! Catalog readers
//!
//! Each reader issues a fixed set of `sys.*` queries, collects every row and
//! then groups them. Nothing is cached between runs.

mod procedure_catalog;
mod schema_catalog;
mod type_catalog;

pub use procedure_catalog::{load_procedures, ProcedureCatalog};
pub use schema_catalog::load_tables;
pub use type_catalog::TypeCatalog;

use crate::db::{DbRow, SqlConnection};
use crate::error::SqlMetaError;
use crate::model::{ColumnDescriptor};

/// Runs a catalog query, attaching `context` to any failure.
pub(crate) fn query_rows(
    conn: &mut dyn SqlConnection,
    sql: &str,
    context: &str,
) -> Result<Vec<DbRow>, SqlMetaError> {
    conn.query(sql, &[]).map_err(|source| SqlMetaError::Database {
        context: context.to_string(),
        source,
    })
}

/// Builds a column from a `sys.columns`-shaped row.
///
/// Expects `column_name`, `column_id`, `system_type_id`, `max_length`,
/// `precision`, `scale`, `is_nullable`, `is_identity`, `is_computed` and
/// optionally `generated_always_type` and `collation_name`. Returns the
/// type name as the error when the type has no descriptor.
pub(crate) fn column_from_row(
    row: &DbRow,
    types: &TypeCatalog,
) -> Result<ColumnDescriptor, String> {
    let system_type_id = row.int("system_type_id").unwrap_or_default();
    let sql_type = types.scalar_type(system_type_id).ok_or_else(|| {
        types
            .system_type_name(system_type_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("system type {}", system_type_id))
    })?;

    let mut column = ColumnDescriptor::new(
        row.text("column_name").unwrap_or_default(),
        row.int("column_id").unwrap_or_default() as i32,
        sql_type,
    );
    column.is_nullable = row.flag("is_nullable");
    column.is_identity = row.flag("is_identity");
    column.is_computed = row.flag("is_computed");
    column.is_generated_always = row.int("generated_always_type").unwrap_or_default() > 0;
    column.size = sql_type.adjust_size(row.int("max_length").unwrap_or_default() as i32);
    column.precision = row.int("precision").unwrap_or_default() as u8;
    column.scale = row.int("scale").unwrap_or_default() as u8;
    column.collation = row.text("collation_name").map(str::to_string);
    Ok(column)
}
