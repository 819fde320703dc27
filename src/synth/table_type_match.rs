//! Structural matching of table columns to user-defined table types
//!
//! A table type can back a batch parameter when its columns have the same
//! shapes (type, size, precision, scale) as the columns being matched,
//! regardless of names and order.

use crate::error::SqlMetaError;
use crate::model::{ColumnDescriptor, TableDto, TableTypeDescriptor};
use crate::parser::names::split_qualified_name;

use super::ScriptKind;

/// One table type column bound to the table column it carries values for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub table_type_column: String,
    pub table_column: String,
}

/// Binds every column of `table_type` to a distinct column of `columns`.
///
/// Returned in table type column order. Among same-shaped candidates a column
/// with the same name is preferred. `None` when the shapes differ.
pub fn map_columns(
    table_type: &TableTypeDescriptor,
    columns: &[&ColumnDescriptor],
) -> Option<Vec<ColumnMapping>> {
    if table_type.columns.len() != columns.len() {
        return None;
    }

    // Same-name pairs bind first so a differently named type column cannot take them
    let mut bound: Vec<Option<usize>> = table_type
        .columns
        .iter()
        .map(|type_column| {
            columns.iter().position(|c| {
                c.same_shape(type_column) && c.name.eq_ignore_ascii_case(&type_column.name)
            })
        })
        .collect();
    let mut used = vec![false; columns.len()];
    for &i in bound.iter().flatten() {
        used[i] = true;
    }

    for (type_column, slot) in table_type.columns.iter().zip(bound.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        let chosen = (0..columns.len()).find(|&i| !used[i] && columns[i].same_shape(type_column))?;
        used[chosen] = true;
        *slot = Some(chosen);
    }

    table_type
        .columns
        .iter()
        .zip(bound)
        .map(|(type_column, slot)| {
            slot.map(|i| ColumnMapping {
                table_type_column: type_column.name.clone(),
                table_column: columns[i].name.clone(),
            })
        })
        .collect()
}

/// Picks the table type backing a batch parameter over `columns` of `table`.
///
/// An explicitly named type must exist and match. Otherwise the unique
/// matching type among `table_types` is chosen; none or several is an error.
pub fn select_table_type<'t>(
    table: &TableDto,
    kind: ScriptKind,
    columns: &[&ColumnDescriptor],
    table_types: &'t [TableTypeDescriptor],
    explicit: Option<&str>,
) -> Result<(&'t TableTypeDescriptor, Vec<ColumnMapping>), SqlMetaError> {
    if let Some(name) = explicit {
        let (schema, type_name) = split_qualified_name(name, "dbo");
        let table_type = table_types
            .iter()
            .find(|t| {
                t.schema_name.eq_ignore_ascii_case(&schema) && t.name.eq_ignore_ascii_case(&type_name)
            })
            .ok_or_else(|| SqlMetaError::UnknownTableType {
                unit: format!("'{}' for table {}", kind, table.full_name()),
                name: name.to_string(),
            })?;
        let mapping =
            map_columns(table_type, columns).ok_or_else(|| SqlMetaError::TableTypeMismatch {
                table: table.full_name(),
                kind: kind.to_string(),
                table_type: table_type.full_name(),
                columns: describe_columns(columns),
            })?;
        return Ok((table_type, mapping));
    }

    let mut matches: Vec<(&TableTypeDescriptor, Vec<ColumnMapping>)> = table_types
        .iter()
        .filter_map(|t| map_columns(t, columns).map(|m| (t, m)))
        .collect();

    match matches.len() {
        0 => Err(SqlMetaError::NoMatchingTableType {
            table: table.full_name(),
            kind: kind.to_string(),
            columns: describe_columns(columns),
        }),
        1 => Ok(matches.remove(0)),
        _ => Err(SqlMetaError::AmbiguousTableType {
            table: table.full_name(),
            kind: kind.to_string(),
            columns: describe_columns(columns),
            candidates: matches
                .iter()
                .map(|(t, _)| t.full_name())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

fn describe_columns(columns: &[&ColumnDescriptor]) -> String {
    columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.type_declaration()))
        .collect::<Vec<_>>()
        .join(", ")
}
