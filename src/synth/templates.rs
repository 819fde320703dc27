//! SQL text for each script kind

use crate::error::SqlMetaError;
use crate::model::{ColumnDescriptor, ParameterHint, Script, TableDto, TableTypeDescriptor, TempTable};
use crate::parser::names::{parameter_key, parameter_name_for_column, quote_name};
use crate::rules::TableScriptRule;

use super::table_type_match::select_table_type;
use super::ScriptKind;

const STAGING_TABLE: &str = "#args";
const KEYS_PARAMETER: &str = "@keys";

/// Columns each clause of a generated statement works with.
struct ColumnPlan<'t> {
    select: Vec<&'t ColumnDescriptor>,
    /// Primary key or filter columns, empty for kinds that match no rows
    keys: Vec<&'t ColumnDescriptor>,
    insert: Vec<&'t ColumnDescriptor>,
    set: Vec<&'t ColumnDescriptor>,
    output: Vec<&'t ColumnDescriptor>,
}

impl<'t> ColumnPlan<'t> {
    fn new(table: &'t TableDto, rule: &TableScriptRule) -> Result<Self, SqlMetaError> {
        let kind = rule.kind;
        let include = |c: &ColumnDescriptor, default: bool| {
            rule.column_rule(&c.name).include.unwrap_or(default)
        };

        let keys = if kind.uses_filter_columns() {
            let names = rule
                .filter_columns
                .as_deref()
                .filter(|names| !names.is_empty())
                .ok_or_else(|| SqlMetaError::MissingFilterColumns {
                    table: table.full_name(),
                    kind: kind.to_string(),
                })?;
            names
                .iter()
                .map(|name| {
                    table.column(name).ok_or_else(|| SqlMetaError::UnknownColumn {
                        table: table.full_name(),
                        kind: kind.to_string(),
                        column: name.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else if kind.requires_primary_key() {
            let keys: Vec<&ColumnDescriptor> = table
                .primary_key_columns
                .iter()
                .filter_map(|k| table.column(&k.name))
                .collect();
            if keys.is_empty() {
                return Err(SqlMetaError::MissingPrimaryKey {
                    table: table.full_name(),
                    kind: kind.to_string(),
                });
            }
            keys
        } else {
            Vec::new()
        };

        let select = table.columns.iter().filter(|c| include(*c, true)).collect();
        let insert = table
            .columns
            .iter()
            .filter(|c| include(*c, !c.is_server_generated()))
            .collect();
        let set = table
            .columns
            .iter()
            .filter(|c| include(*c, !(table.is_primary_key(&c.name) || c.is_server_generated())))
            .collect();
        let output = table
            .columns
            .iter()
            .filter(|c| {
                rule.column_rule(&c.name)
                    .output
                    .unwrap_or(kind.outputs_key_by_default() && table.is_primary_key(&c.name))
            })
            .collect();

        Ok(Self {
            select,
            keys,
            insert,
            set,
            output,
        })
    }
}

/// Hints and staging tables collected while rendering.
#[derive(Default)]
struct ScriptParts {
    hints: Vec<ParameterHint>,
    temp_tables: Vec<TempTable>,
}

impl ScriptParts {
    /// The parameter standing in for `column`, hinted with the column's type.
    fn column_parameter(&mut self, column: &ColumnDescriptor) -> String {
        let name = parameter_name_for_column(&column.name);
        self.hint(&name, column.type_declaration());
        name
    }

    fn hint(&mut self, name: &str, type_declaration: String) {
        let key = parameter_key(name);
        if !self.hints.iter().any(|h| parameter_key(&h.name) == key) {
            self.hints.push(ParameterHint {
                name: name.to_string(),
                type_declaration,
            });
        }
    }

    fn staging_table(&mut self, columns: &[&ColumnDescriptor]) {
        let definitions = columns
            .iter()
            .map(|c| {
                let mut definition = format!("{} {}", quote_name(&c.name), c.type_declaration());
                if let Some(collation) = &c.collation {
                    definition.push_str(" COLLATE ");
                    definition.push_str(collation);
                }
                definition.push_str(if c.is_nullable { " NULL" } else { " NOT NULL" });
                definition
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.temp_tables.push(TempTable {
            name: STAGING_TABLE.to_string(),
            create_statement: format!("CREATE TABLE {} ({})", STAGING_TABLE, definitions),
            columns: Vec::new(),
        });
    }
}

/// Builds the script `rule` requests for `table`.
pub fn synthesize_script(
    table: &TableDto,
    rule: &TableScriptRule,
    table_types: &[TableTypeDescriptor],
) -> Result<Script, SqlMetaError> {
    let kind = rule.kind;
    let plan = ColumnPlan::new(table, rule)?;
    let mut parts = ScriptParts::default();
    let target = table.full_name();

    let require = |columns: &[&ColumnDescriptor], purpose: &str| {
        if columns.is_empty() {
            Err(SqlMetaError::EmptyColumnList {
                table: table.full_name(),
                kind: kind.to_string(),
                purpose: purpose.to_string(),
            })
        } else {
            Ok(())
        }
    };

    let sql = match kind {
        ScriptKind::GetAll => {
            require(&plan.select, "select")?;
            format!("SELECT {} FROM {}", column_list(&plan.select, ""), target)
        }
        ScriptKind::GetById | ScriptKind::GetByColumns => {
            require(&plan.select, "select")?;
            format!(
                "SELECT {} FROM {} WHERE {}",
                column_list(&plan.select, ""),
                target,
                parameter_predicates(&plan.keys, &mut parts)
            )
        }
        ScriptKind::GetByIdBatch | ScriptKind::GetByColumnsBatch => {
            require(&plan.select, "select")?;
            let (table_type, mapping) = select_table_type(
                table,
                kind,
                &plan.keys,
                table_types,
                rule.table_type.as_deref(),
            )?;
            parts.hint(KEYS_PARAMETER, table_type.full_name());
            let join = mapping
                .iter()
                .map(|m| {
                    format!(
                        "t.{} = k.{}",
                        quote_name(&m.table_column),
                        quote_name(&m.table_type_column)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            format!(
                "SELECT {} FROM {} AS t INNER JOIN {} AS k ON {}",
                column_list(&plan.select, "t."),
                target,
                KEYS_PARAMETER,
                join
            )
        }
        ScriptKind::Insert => {
            let output = output_clause(&plan.output, "inserted.");
            if plan.insert.is_empty() {
                format!("INSERT INTO {}{} DEFAULT VALUES", target, output)
            } else {
                let values = plan
                    .insert
                    .iter()
                    .map(|c| parts.column_parameter(c))
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "INSERT INTO {} ({}){} VALUES ({})",
                    target,
                    column_list(&plan.insert, ""),
                    output,
                    values
                )
            }
        }
        ScriptKind::InsertBatch => {
            require(&plan.insert, "insert")?;
            parts.staging_table(&plan.insert);
            format!(
                "INSERT INTO {} ({}){} SELECT {} FROM {}",
                target,
                column_list(&plan.insert, ""),
                output_clause(&plan.output, "inserted."),
                column_list(&plan.insert, ""),
                STAGING_TABLE
            )
        }
        ScriptKind::Update => {
            require(&plan.set, "update")?;
            let assignments = plan
                .set
                .iter()
                .map(|c| format!("{} = {}", quote_name(&c.name), parts.column_parameter(c)))
                .collect::<Vec<_>>()
                .join(",");
            let output = output_clause(&plan.output, "inserted.");
            format!(
                "UPDATE {} SET {}{} WHERE {}",
                target,
                assignments,
                output,
                parameter_predicates(&plan.keys, &mut parts)
            )
        }
        ScriptKind::UpdateBatch => {
            require(&plan.set, "update")?;
            parts.staging_table(&union_in_table_order(table, &[&plan.keys, &plan.set]));
            format!(
                "UPDATE t SET {}{} FROM {} AS t INNER JOIN {} AS a ON {}",
                paired(&plan.set, "t.", "a.", ","),
                output_clause(&plan.output, "inserted."),
                target,
                STAGING_TABLE,
                paired(&plan.keys, "t.", "a.", " AND ")
            )
        }
        ScriptKind::Merge | ScriptKind::MergeBatch => {
            let source_columns = union_in_table_order(table, &[&plan.keys, &plan.insert, &plan.set]);
            let source = if kind == ScriptKind::MergeBatch {
                parts.staging_table(&source_columns);
                STAGING_TABLE.to_string()
            } else {
                let values = source_columns
                    .iter()
                    .map(|c| format!("{} AS {}", parts.column_parameter(c), quote_name(&c.name)))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("(SELECT {})", values)
            };

            let mut sql = format!(
                "MERGE {}{} AS t USING {} AS s ON {}",
                target,
                if rule.holdlock { " WITH (HOLDLOCK)" } else { "" },
                source,
                paired(&plan.keys, "t.", "s.", " AND ")
            );
            if !plan.set.is_empty() {
                sql.push_str(" WHEN MATCHED THEN UPDATE SET ");
                sql.push_str(&paired(&plan.set, "t.", "s.", ","));
            }
            if plan.insert.is_empty() {
                sql.push_str(" WHEN NOT MATCHED THEN INSERT DEFAULT VALUES");
            } else {
                sql.push_str(&format!(
                    " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
                    column_list(&plan.insert, ""),
                    column_list(&plan.insert, "s.")
                ));
            }
            sql.push_str(&output_clause(&plan.output, "inserted."));
            sql.push(';');
            sql
        }
        ScriptKind::Delete => {
            let output = output_clause(&plan.output, "deleted.");
            format!(
                "DELETE FROM {}{} WHERE {}",
                target,
                output,
                parameter_predicates(&plan.keys, &mut parts)
            )
        }
    };

    tracing::debug!(table = %target, kind = %kind, "synthesized script");

    Ok(Script {
        temp_tables: parts.temp_tables,
        parameter_hints: parts.hints,
        is_synthesized: true,
        ..Script::new(rule.identity(&table.schema_name, &table.name), sql)
    })
}

fn column_list(columns: &[&ColumnDescriptor], prefix: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{}{}", prefix, quote_name(&c.name)))
        .collect::<Vec<_>>()
        .join(",")
}

/// `[A] = @a AND [B] = @b`
fn parameter_predicates(columns: &[&ColumnDescriptor], parts: &mut ScriptParts) -> String {
    columns
        .iter()
        .map(|c| format!("{} = {}", quote_name(&c.name), parts.column_parameter(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `t.[A] = s.[A]` for every column, joined with `separator`.
fn paired(columns: &[&ColumnDescriptor], left: &str, right: &str, separator: &str) -> String {
    columns
        .iter()
        .map(|c| {
            let name = quote_name(&c.name);
            format!("{}{} = {}{}", left, name, right, name)
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn output_clause(columns: &[&ColumnDescriptor], prefix: &str) -> String {
    if columns.is_empty() {
        String::new()
    } else {
        format!(" OUTPUT {}", column_list(columns, prefix))
    }
}

/// Columns appearing in any of `sets`, once each, in table column order.
fn union_in_table_order<'t>(
    table: &'t TableDto,
    sets: &[&Vec<&'t ColumnDescriptor>],
) -> Vec<&'t ColumnDescriptor> {
    table
        .columns
        .iter()
        .filter(|c| sets.iter().any(|set| set.iter().any(|s| s.name == c.name)))
        .collect()
}
