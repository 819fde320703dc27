//! Tables and views with their columns and primary keys

use std::collections::BTreeMap;

use super::{column_from_row, query_rows, TypeCatalog};
use crate::db::{DbRow, SqlConnection};
use crate::error::SqlMetaError;
use crate::model::{Diagnostics, TableDto};
use crate::rules::RuleSet;

const COLUMN_LIST: &str = "c.column_id, c.name AS column_name, c.system_type_id, c.max_length, \
c.precision, c.scale, c.is_nullable, c.is_identity, c.is_computed, c.generated_always_type, \
c.collation_name";

const PRIMARY_KEYS_QUERY: &str = "\
SELECT s.name AS schema_name, t.name AS object_name, c.name AS column_name, ic.key_ordinal
FROM sys.indexes i
JOIN sys.tables t ON t.object_id = i.object_id
JOIN sys.schemas s ON s.schema_id = t.schema_id
JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
WHERE i.is_primary_key = 1
ORDER BY s.name, t.name, ic.key_ordinal";

fn tables_and_views_query() -> String {
    format!(
        "SELECT s.name AS schema_name, o.name AS object_name, CAST(0 AS bit) AS is_view, {columns}
FROM sys.tables o
JOIN sys.schemas s ON s.schema_id = o.schema_id
JOIN sys.columns c ON c.object_id = o.object_id
WHERE o.is_ms_shipped = 0
UNION ALL
SELECT s.name AS schema_name, o.name AS object_name, CAST(1 AS bit) AS is_view, {columns}
FROM sys.views o
JOIN sys.schemas s ON s.schema_id = o.schema_id
JOIN sys.columns c ON c.object_id = o.object_id
WHERE o.is_ms_shipped = 0
ORDER BY schema_name, object_name, column_id",
        columns = COLUMN_LIST
    )
}

type TableKey = (String, String, bool);

/// Loads every user table and view with all of its columns.
///
/// Columns whose type has no descriptor are left out, with a warning only
/// when the table is included and the column is not skipped by the rule set.
/// A primary key loses all of its columns if any of them was left out.
pub fn load_tables(
    conn: &mut dyn SqlConnection,
    types: &TypeCatalog,
    rules: &dyn RuleSet,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<TableDto>, SqlMetaError> {
    let column_rows = query_rows(conn, &tables_and_views_query(), "reading tables and views")?;
    let key_rows = query_rows(conn, PRIMARY_KEYS_QUERY, "reading primary keys")?;

    let mut grouped: BTreeMap<TableKey, Vec<&DbRow>> = BTreeMap::new();
    for row in &column_rows {
        grouped.entry(table_key(row)).or_default().push(row);
    }

    let mut keys: BTreeMap<(String, String), Vec<(i64, String)>> = BTreeMap::new();
    for row in &key_rows {
        let (schema, name, _) = table_key(row);
        keys.entry((schema, name)).or_default().push((
            row.int("key_ordinal").unwrap_or_default(),
            row.text("column_name").unwrap_or_default().to_string(),
        ));
    }

    let mut tables = Vec::with_capacity(grouped.len());
    for ((schema, name, is_view), rows) in grouped {
        let included = rules.should_include_table(&schema, &name);
        let mut table = TableDto {
            schema_name: schema.clone(),
            name: name.clone(),
            columns: Vec::with_capacity(rows.len()),
            primary_key_columns: Vec::new(),
            is_view,
        };

        for row in rows {
            let column_name = row.text("column_name").unwrap_or_default();
            match column_from_row(row, types) {
                Ok(column) => table.columns.push(column),
                Err(type_name)
                    if included && !rules.is_table_column_skipped(&schema, &name, column_name) =>
                {
                    diagnostics.warn(
                        format!("table {}", table.full_name()),
                        format!(
                            "column '{}' has unsupported type '{}' and is left out",
                            column_name, type_name
                        ),
                    )
                }
                Err(_) => {}
            }
        }
        table.columns.sort_by_key(|c| c.sort_key);

        if let Some(mut key) = keys.remove(&(schema, name)) {
            key.sort_by_key(|(ordinal, _)| *ordinal);
            let key_columns: Option<Vec<_>> = key
                .iter()
                .map(|(_, column)| table.column(column).cloned())
                .collect();
            table.primary_key_columns = key_columns.unwrap_or_default();
        }

        tables.push(table);
    }

    tracing::debug!(count = tables.len(), "loaded tables and views");
    Ok(tables)
}

fn table_key(row: &DbRow) -> TableKey {
    (
        row.text("schema_name").unwrap_or_default().to_string(),
        row.text("object_name").unwrap_or_default().to_string(),
        row.flag("is_view"),
    )
}
