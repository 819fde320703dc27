//! System type names and user-defined table types

use std::collections::BTreeMap;

use super::{column_from_row, query_rows};
use crate::db::{DbRow, SqlConnection};
use crate::error::SqlMetaError;
use crate::model::{Diagnostics, SqlTypeDescriptor, TableTypeDescriptor};
use crate::parser::names::split_qualified_name;

const SYSTEM_TYPES_QUERY: &str = "\
SELECT system_type_id, name
FROM sys.types
WHERE system_type_id = user_type_id";

const TABLE_TYPES_QUERY: &str = "\
SELECT tt.user_type_id, SCHEMA_NAME(tt.schema_id) AS schema_name, tt.name AS type_name,
       c.column_id, c.name AS column_name, c.system_type_id, c.max_length, c.precision,
       c.scale, c.is_nullable, c.is_identity, c.is_computed, c.collation_name
FROM sys.table_types tt
JOIN sys.columns c ON c.object_id = tt.type_table_object_id
ORDER BY tt.user_type_id, c.column_id";

/// Type lookups shared by every catalog reader and inferrer in a run.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    system_types: BTreeMap<i64, String>,
    table_types: Vec<TableTypeDescriptor>,
}

impl TypeCatalog {
    /// Reads both catalogs. Table types with a column of an unsupported type
    /// are left out with a warning.
    pub fn load(
        conn: &mut dyn SqlConnection,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, SqlMetaError> {
        let system_types = query_rows(conn, SYSTEM_TYPES_QUERY, "reading system types")?
            .iter()
            .filter_map(|row| Some((row.int("system_type_id")?, row.text("name")?.to_string())))
            .collect();
        let mut catalog = Self {
            system_types,
            table_types: Vec::new(),
        };

        let rows = query_rows(conn, TABLE_TYPES_QUERY, "reading table types")?;
        catalog.table_types = catalog.group_table_types(&rows, diagnostics);

        tracing::debug!(
            system_types = catalog.system_types.len(),
            table_types = catalog.table_types.len(),
            "loaded type catalog"
        );
        Ok(catalog)
    }

    /// Builds a catalog from already known types.
    pub fn from_parts(
        system_types: impl IntoIterator<Item = (i64, String)>,
        table_types: Vec<TableTypeDescriptor>,
    ) -> Self {
        Self {
            system_types: system_types.into_iter().collect(),
            table_types,
        }
    }

    fn group_table_types(
        &self,
        rows: &[DbRow],
        diagnostics: &mut Diagnostics,
    ) -> Vec<TableTypeDescriptor> {
        let mut grouped: BTreeMap<i64, Vec<&DbRow>> = BTreeMap::new();
        for row in rows {
            grouped
                .entry(row.int("user_type_id").unwrap_or_default())
                .or_default()
                .push(row);
        }

        let mut table_types = Vec::with_capacity(grouped.len());
        'types: for (user_type_id, rows) in grouped {
            let first = rows[0];
            let mut table_type = TableTypeDescriptor {
                user_type_id: user_type_id as i32,
                schema_name: first.text("schema_name").unwrap_or("dbo").to_string(),
                name: first.text("type_name").unwrap_or_default().to_string(),
                columns: Vec::with_capacity(rows.len()),
            };
            for row in rows {
                match column_from_row(row, self) {
                    Ok(column) => table_type.columns.push(column),
                    Err(type_name) => {
                        diagnostics.warn(
                            format!("table type {}", table_type.full_name()),
                            format!(
                                "column '{}' has unsupported type '{}'; the table type is ignored",
                                row.text("column_name").unwrap_or_default(),
                                type_name
                            ),
                        );
                        continue 'types;
                    }
                }
            }
            table_type.columns.sort_by_key(|c| c.sort_key);
            table_types.push(table_type);
        }
        table_types
    }

    pub fn system_type_name(&self, system_type_id: i64) -> Option<&str> {
        self.system_types.get(&system_type_id).map(String::as_str)
    }

    /// Descriptor for a system type id; `None` when the id is unknown or the
    /// type cannot be bound.
    pub fn scalar_type(&self, system_type_id: i64) -> Option<SqlTypeDescriptor> {
        self.system_type_name(system_type_id)
            .and_then(SqlTypeDescriptor::for_name)
    }

    pub fn table_types(&self) -> &[TableTypeDescriptor] {
        &self.table_types
    }

    pub fn table_type_by_id(&self, user_type_id: i64) -> Option<&TableTypeDescriptor> {
        self.table_types
            .iter()
            .find(|t| i64::from(t.user_type_id) == user_type_id)
    }

    /// Finds a table type by `schema.name`, `[schema].[name]` or bare name (in `dbo`).
    pub fn table_type_by_name(&self, name: &str) -> Option<&TableTypeDescriptor> {
        let (schema, type_name) = split_qualified_name(name, "dbo");
        self.table_types.iter().find(|t| {
            t.schema_name.eq_ignore_ascii_case(&schema) && t.name.eq_ignore_ascii_case(&type_name)
        })
    }
}
