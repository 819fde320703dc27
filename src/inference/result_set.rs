//! Result set shapes of executable units
//!
//! Strategies are tried in order and the first that gets a description from
//! the server wins:
//!
//! 1. [`ResultSetStrategy::Catalog`]: `sp_describe_first_result_set`
//! 2. [`ResultSetStrategy::SchemaOnly`]: `SET FMTONLY ON` execution on the same connection
//! 3. [`ResultSetStrategy::IsolatedExecution`]: execution on a dedicated connection,
//!    inside a transaction that is always rolled back
//!
//! A server error moves on to the next strategy. Any other failure (an
//! unsupported column type, a temp table that cannot be created) is final.

use std::fmt;

use anyhow::Result;

use super::{is_known_signature, server_error_guidance, InferenceContext};
use crate::db::{
    with_rolled_back_transaction, DbError, DbRow, ExecutedColumn, SandboxScope, SqlConnection,
    TempTableSandbox,
};
use crate::error::SqlMetaError;
use crate::model::{
    ColumnDescriptor, ExecutableUnit, ParameterDescriptor, ParameterType, SqlTypeDescriptor,
    TempTable,
};
use crate::parser::rewrite_local_temp_tables;
use crate::rules::EffectiveRule;

const DESCRIBE_WITH_PARAMS: &str =
    "EXEC sys.sp_describe_first_result_set @tsql = @P1, @params = @P2";
const DESCRIBE: &str = "EXEC sys.sp_describe_first_result_set @tsql = @P1";

/// How a result set description is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSetStrategy {
    Catalog,
    SchemaOnly,
    IsolatedExecution,
}

impl ResultSetStrategy {
    pub const ORDER: [ResultSetStrategy; 3] = [
        ResultSetStrategy::Catalog,
        ResultSetStrategy::SchemaOnly,
        ResultSetStrategy::IsolatedExecution,
    ];
}

impl fmt::Display for ResultSetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultSetStrategy::Catalog => "catalog description",
            ResultSetStrategy::SchemaOnly => "schema-only execution",
            ResultSetStrategy::IsolatedExecution => "isolated execution",
        })
    }
}

/// Inferred output of one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferredResultSet {
    /// `None` when the unit returns no result set; `Some(empty)` when every
    /// column was skipped
    pub columns: Option<Vec<ColumnDescriptor>>,
    /// Every column name reported, skipped and anonymous ones included
    pub all_column_names: Vec<String>,
    pub strategy: Option<ResultSetStrategy>,
}

/// What the server reported, before typing.
enum Described {
    Catalog(Vec<DbRow>),
    Executed(Vec<ExecutedColumn>),
}

/// The statement text and environment shared by every strategy.
struct Command<'u> {
    /// Text handed to `sp_describe_first_result_set`
    tsql: String,
    /// `@params` argument; empty when the text has no parameters
    params: String,
    /// Text executed by the fallbacks: parameters declared with build values
    executable: String,
    temp_tables: &'u [TempTable],
    scope: SandboxScope,
}

/// Infers the first result set of `unit`, whose parameters must already be known.
pub fn infer_result_set(
    conn: &mut dyn SqlConnection,
    ctx: &InferenceContext<'_>,
    unit: ExecutableUnit<'_>,
    rule: &EffectiveRule,
) -> Result<InferredResultSet> {
    let identity = unit.identity();
    let single_table;
    let command = match unit {
        ExecutableUnit::StoredProcedure(procedure) => {
            let arguments = procedure
                .parameters
                .iter()
                .filter(|p| !p.is_cursor_ref)
                .map(|p| {
                    let output = if p.is_output { " OUTPUT" } else { "" };
                    format!("{0} = {0}{1}", p.name, output)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let mut call = format!("EXEC {}", procedure.full_name());
            if !arguments.is_empty() {
                call.push(' ');
                call.push_str(&arguments);
            }
            Command::new(
                call,
                &procedure.parameters,
                rule,
                &procedure.temp_tables,
                SandboxScope::Procedure,
            )
        }
        ExecutableUnit::Script(script) => Command::new(
            rewrite_local_temp_tables(&script.source_text, ctx.token),
            &script.parameters,
            rule,
            &script.temp_tables,
            SandboxScope::Script,
        ),
        ExecutableUnit::TempTable(table) => {
            single_table = [table.clone()];
            Command::new(
                format!("SELECT * FROM {}", ctx.token.global_temp_table_name(&table.name)),
                &[],
                rule,
                &single_table,
                SandboxScope::Script,
            )
        }
    };

    let mut failures: Vec<(ResultSetStrategy, DbError)> = Vec::new();
    for strategy in ResultSetStrategy::ORDER {
        match command.attempt(strategy, conn, ctx)? {
            Ok(described) => {
                tracing::debug!(unit = %identity, strategy = %strategy, "described result set");
                let mut result = described.into_result_set(&identity, ctx, rule)?;
                result.strategy = Some(strategy);
                return Ok(result);
            }
            Err(error) => {
                tracing::debug!(unit = %identity, strategy = %strategy, error = %error, "result set strategy failed");
                failures.push((strategy, error));
            }
        }
    }

    let (_, source) = failures
        .iter()
        .find(|(_, e)| is_known_signature(e))
        .or_else(|| failures.first())
        .cloned()
        .unwrap_or((ResultSetStrategy::Catalog, DbError::new("no strategy was attempted")));
    Err(SqlMetaError::ResultSetInference {
        unit: identity,
        guidance: server_error_guidance(&source),
        sql: command.executable,
        source,
    }
    .into())
}

impl<'u> Command<'u> {
    fn new(
        tsql: String,
        parameters: &[ParameterDescriptor],
        rule: &EffectiveRule,
        temp_tables: &'u [TempTable],
        scope: SandboxScope,
    ) -> Self {
        let parameters: Vec<&ParameterDescriptor> =
            parameters.iter().filter(|p| !p.is_cursor_ref).collect();
        let params = parameters
            .iter()
            .map(|p| {
                let output = if p.is_output { " OUTPUT" } else { "" };
                format!("{} {}{}", p.name, p.type_declaration(), output)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut executable = String::new();
        for p in &parameters {
            match &p.param_type {
                ParameterType::Table(_) => {
                    executable.push_str(&format!("DECLARE {} {};\n", p.name, p.variable_declaration()))
                }
                ParameterType::Scalar(t) => {
                    let value = rule
                        .parameter(&p.name)
                        .and_then(|r| r.build_value.clone())
                        .unwrap_or_else(|| t.build_value.to_string());
                    executable.push_str(&format!(
                        "DECLARE {} {} = {};\n",
                        p.name,
                        p.variable_declaration(),
                        value
                    ));
                }
            }
        }
        executable.push_str(&tsql);

        Self {
            tsql,
            params,
            executable,
            temp_tables,
            scope,
        }
    }

    /// Outer error: the attempt could not be set up. Inner error: the server
    /// refused to describe the statement.
    fn attempt(
        &self,
        strategy: ResultSetStrategy,
        conn: &mut dyn SqlConnection,
        ctx: &InferenceContext<'_>,
    ) -> Result<Result<Described, DbError>> {
        let sandbox = TempTableSandbox::new(self.temp_tables, self.scope, ctx.token);
        match strategy {
            ResultSetStrategy::Catalog => sandbox.run(conn, |c| {
                let rows = if self.params.is_empty() {
                    c.query(DESCRIBE, &[self.tsql.as_str()])
                } else {
                    c.query(DESCRIBE_WITH_PARAMS, &[self.tsql.as_str(), self.params.as_str()])
                };
                Ok(rows.map(Described::Catalog))
            }),
            ResultSetStrategy::SchemaOnly => sandbox.run(conn, |c| {
                let columns = c.describe_columns(&format!("SET FMTONLY ON;\n{}", self.executable));
                let reset = c.execute("SET FMTONLY OFF");
                Ok(columns.and_then(|cols| reset.map(|_| Described::Executed(cols))))
            }),
            ResultSetStrategy::IsolatedExecution => {
                let Some(factory) = ctx.factory else {
                    return Ok(Err(DbError::new(
                        "no connection factory for isolated execution",
                    )));
                };
                let mut dedicated = match factory.connect() {
                    Ok(dedicated) => dedicated,
                    Err(error) => return Ok(Err(error)),
                };
                with_rolled_back_transaction(dedicated.as_mut(), |c| {
                    sandbox.run(c, |c| {
                        Ok(c
                            .describe_columns(&format!("SET ROWCOUNT 1;\n{}", self.executable))
                            .map(Described::Executed))
                    })
                })
            }
        }
    }
}

impl Described {
    fn into_result_set(
        self,
        unit: &str,
        ctx: &InferenceContext<'_>,
        rule: &EffectiveRule,
    ) -> Result<InferredResultSet, SqlMetaError> {
        match self {
            Described::Catalog(rows) => catalog_result_set(rows, unit, ctx, rule),
            Described::Executed(columns) => executed_result_set(columns, unit, rule),
        }
    }
}

fn unsupported(unit: &str, column: &str, type_name: String) -> SqlMetaError {
    SqlMetaError::UnsupportedType {
        unit: unit.to_string(),
        subject: if column.is_empty() {
            "<unnamed column>".to_string()
        } else {
            format!("column '{}'", column)
        },
        type_name,
    }
}

fn catalog_result_set(
    rows: Vec<DbRow>,
    unit: &str,
    ctx: &InferenceContext<'_>,
    rule: &EffectiveRule,
) -> Result<InferredResultSet, SqlMetaError> {
    let mut visible: Vec<&DbRow> = rows.iter().filter(|r| !r.flag("is_hidden")).collect();
    if visible.is_empty() {
        return Ok(InferredResultSet::default());
    }
    visible.sort_by_key(|r| r.int("column_ordinal").unwrap_or_default());

    let all_column_names: Vec<String> = visible
        .iter()
        .map(|r| r.text("name").unwrap_or_default().to_string())
        .collect();

    let mut columns = Vec::new();
    for row in visible {
        let name = row.text("name").unwrap_or_default();
        if !name.is_empty() && rule.is_column_skipped(name) {
            continue;
        }
        let system_type_id = row.int("system_type_id").unwrap_or_default();
        let sql_type = ctx.types.scalar_type(system_type_id).ok_or_else(|| {
            unsupported(
                unit,
                name,
                row.text("system_type_name")
                    .unwrap_or("unknown")
                    .to_string(),
            )
        })?;

        let mut column = ColumnDescriptor::new(
            name,
            row.int("column_ordinal").unwrap_or_default() as i32,
            sql_type,
        );
        column.is_nullable = row.flag("is_nullable");
        column.is_identity = row.flag("is_identity_column");
        column.is_computed = row.flag("is_computed_column");
        column.size = sql_type.adjust_size(row.int("max_length").unwrap_or_default() as i32);
        column.precision = row.int("precision").unwrap_or_default() as u8;
        column.scale = row.int("scale").unwrap_or_default() as u8;
        column.collation = row.text("collation_name").map(str::to_string);
        columns.push(column);
    }

    Ok(InferredResultSet {
        columns: Some(columns),
        all_column_names,
        strategy: None,
    })
}

fn executed_result_set(
    executed: Vec<ExecutedColumn>,
    unit: &str,
    rule: &EffectiveRule,
) -> Result<InferredResultSet, SqlMetaError> {
    if executed.is_empty() {
        return Ok(InferredResultSet::default());
    }

    let all_column_names = executed.iter().map(|c| c.name.clone()).collect();
    let mut columns = Vec::new();
    for (ordinal, column) in executed.iter().enumerate() {
        if !column.name.is_empty() && rule.is_column_skipped(&column.name) {
            continue;
        }
        let sql_type = SqlTypeDescriptor::for_name(&column.type_name)
            .ok_or_else(|| unsupported(unit, &column.name, column.type_name.clone()))?;
        columns.push(ColumnDescriptor::new(
            column.name.clone(),
            ordinal as i32 + 1,
            sql_type,
        ));
    }

    Ok(InferredResultSet {
        columns: Some(columns),
        all_column_names,
        strategy: None,
    })
}
