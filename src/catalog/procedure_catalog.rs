//! Stored procedures and their declared parameters

use std::collections::BTreeMap;

use super::{query_rows, TypeCatalog};
use crate::db::{DbRow, SqlConnection};
use crate::error::SqlMetaError;
use crate::model::{ParameterDescriptor, ParameterType, StoredProcedure};
use crate::parser::names::quote_name;
use crate::rules::RuleSet;

const PROCEDURES_QUERY: &str = "\
SELECT p.object_id, s.name AS schema_name, p.name AS procedure_name,
       OBJECT_DEFINITION(p.object_id) AS definition
FROM sys.procedures p
JOIN sys.schemas s ON s.schema_id = p.schema_id
WHERE p.is_ms_shipped = 0
ORDER BY s.name, p.name";

const PARAMETERS_QUERY: &str = "\
SELECT pr.object_id, pr.parameter_id, pr.name, pr.system_type_id, pr.user_type_id,
       pr.max_length, pr.precision, pr.scale, pr.is_output, pr.is_cursor_ref
FROM sys.parameters pr
JOIN sys.procedures p ON p.object_id = pr.object_id
WHERE p.is_ms_shipped = 0 AND pr.parameter_id > 0
ORDER BY pr.object_id, pr.parameter_id";

/// Procedures read from the catalog.
#[derive(Debug, Clone, Default)]
pub struct ProcedureCatalog {
    /// Included procedures, ordered by (schema, name)
    pub procedures: Vec<StoredProcedure>,
    /// `schema.name` of every user procedure, included or not
    pub all_names: Vec<String>,
}

/// Loads every procedure the rule set includes, with its catalog parameters
/// in ordinal order.
///
/// Parameters carry no defaults or nullability yet; those come from the
/// definition text during parameter inference.
pub fn load_procedures(
    conn: &mut dyn SqlConnection,
    types: &TypeCatalog,
    rules: &dyn RuleSet,
) -> Result<ProcedureCatalog, SqlMetaError> {
    let procedure_rows = query_rows(conn, PROCEDURES_QUERY, "reading procedure definitions")?;
    let parameter_rows = query_rows(conn, PARAMETERS_QUERY, "reading procedure parameters")?;

    let mut parameters_by_object: BTreeMap<i64, Vec<&DbRow>> = BTreeMap::new();
    for row in &parameter_rows {
        parameters_by_object
            .entry(row.int("object_id").unwrap_or_default())
            .or_default()
            .push(row);
    }

    let mut procedures = Vec::new();
    let mut all_names = Vec::with_capacity(procedure_rows.len());
    for row in &procedure_rows {
        let schema_name = row.text("schema_name").unwrap_or_default().to_string();
        let name = row.text("procedure_name").unwrap_or_default().to_string();
        all_names.push(format!("{}.{}", schema_name, name));
        if !rules.should_include_procedure(&schema_name, &name) {
            continue;
        }

        let full_name = format!("{}.{}", quote_name(&schema_name), quote_name(&name));
        let definition = row
            .text("definition")
            .ok_or_else(|| SqlMetaError::ProcedureDefinitionUnreadable {
                procedure: full_name.clone(),
            })?
            .to_string();

        let object_id = row.int("object_id").unwrap_or_default();
        let parameters = parameters_by_object
            .remove(&object_id)
            .unwrap_or_default()
            .into_iter()
            .map(|p| parameter_from_row(p, types, &full_name))
            .collect::<Result<Vec<_>, _>>()?;

        procedures.push(StoredProcedure {
            schema_name,
            name,
            object_id: object_id as i32,
            definition,
            parameters,
            temp_tables: Vec::new(),
            result_set: None,
            all_result_column_names: Vec::new(),
        });
    }

    tracing::debug!(
        included = procedures.len(),
        total = all_names.len(),
        "loaded procedures"
    );
    Ok(ProcedureCatalog {
        procedures,
        all_names,
    })
}

fn parameter_from_row(
    row: &DbRow,
    types: &TypeCatalog,
    procedure: &str,
) -> Result<ParameterDescriptor, SqlMetaError> {
    let name = row.text("name").unwrap_or_default().to_string();
    let system_type_id = row.int("system_type_id").unwrap_or_default();
    let user_type_id = row.int("user_type_id").unwrap_or_default();

    let (param_type, size) = match types.table_type_by_id(user_type_id) {
        Some(table_type) => (ParameterType::Table(table_type.clone()), 0),
        None => {
            let sql_type = types.scalar_type(system_type_id).ok_or_else(|| {
                SqlMetaError::UnsupportedType {
                    unit: format!("procedure {}", procedure),
                    subject: format!("parameter {}", name),
                    type_name: types
                        .system_type_name(system_type_id)
                        .unwrap_or("unknown")
                        .to_string(),
                }
            })?;
            let size = sql_type.adjust_size(row.int("max_length").unwrap_or_default() as i32);
            (ParameterType::Scalar(sql_type), size)
        }
    };
    let is_table = matches!(param_type, ParameterType::Table(_));

    Ok(ParameterDescriptor {
        name,
        sort_key: row.int("parameter_id").unwrap_or_default(),
        size,
        precision: row.int("precision").unwrap_or_default() as u8,
        scale: row.int("scale").unwrap_or_default() as u8,
        is_output: !is_table && row.flag("is_output"),
        is_cursor_ref: row.flag("is_cursor_ref"),
        is_nullable: false,
        param_type,
        default_value: None,
    })
}
