//! Input parameters of scripts and procedures
//!
//! Script parameters are the variables a script uses without declaring. The
//! server describes their types; types configured in rules (or hinted by
//! script synthesis) are pinned by declaring the variable up front from a
//! run-prefixed placeholder, which the server then describes instead.

use anyhow::Result;

use super::{check_name_collisions, server_error_guidance, InferenceContext};
use crate::db::{DbRow, SqlConnection};
use crate::error::SqlMetaError;
use crate::model::{
    Diagnostics, ExecutableUnit, ParameterDescriptor, ParameterType, Script, StoredProcedure,
    TableTypeDescriptor,
};
use crate::parser::names::parameter_key;
use crate::parser::{
    procedure_parameter_defaults, rewrite_local_temp_tables, scan_variables, ScriptVariables,
};
use crate::rules::EffectiveRule;
use crate::util::starts_with_ci;

const DESCRIBE_PARAMETERS: &str = "EXEC sys.sp_describe_undeclared_parameters @tsql = @P1";

/// Input parameters of `unit`, in first-use order for scripts and ordinal
/// order for procedures. Temp tables have none.
pub fn infer_parameters(
    conn: &mut dyn SqlConnection,
    ctx: &InferenceContext<'_>,
    unit: ExecutableUnit<'_>,
    rule: &EffectiveRule,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ParameterDescriptor>> {
    match unit {
        ExecutableUnit::Script(script) => {
            infer_script_parameters(conn, ctx, script, rule, diagnostics)
        }
        ExecutableUnit::StoredProcedure(procedure) => {
            Ok(resolve_procedure_parameters(procedure, rule, diagnostics)?)
        }
        ExecutableUnit::TempTable(_) => Ok(Vec::new()),
    }
}

/// A type pinned by configuration or synthesis for one undeclared variable.
enum PinnedType<'t> {
    Scalar(String),
    Table(&'t TableTypeDescriptor),
}

fn pinned_type<'t>(
    ctx: &InferenceContext<'t>,
    script: &Script,
    rule: &EffectiveRule,
    name: &str,
) -> Option<PinnedType<'t>> {
    let key = parameter_key(name);
    let declaration = rule
        .parameter(name)
        .and_then(|p| p.sql_type.clone())
        .or_else(|| {
            script
                .parameter_hints
                .iter()
                .find(|h| parameter_key(&h.name) == key)
                .map(|h| h.type_declaration.clone())
        })?;
    Some(match ctx.types.table_type_by_name(&declaration) {
        Some(table_type) => PinnedType::Table(table_type),
        None => PinnedType::Scalar(declaration),
    })
}

fn infer_script_parameters(
    conn: &mut dyn SqlConnection,
    ctx: &InferenceContext<'_>,
    script: &Script,
    rule: &EffectiveRule,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ParameterDescriptor>> {
    let unit = ExecutableUnit::Script(script).identity();
    let variables =
        scan_variables(&script.source_text).ok_or_else(|| SqlMetaError::UnparsableScript {
            unit: unit.clone(),
        })?;
    let undeclared = variables.undeclared();

    if rule.check_unused_parameters {
        for key in rule.parameters.keys() {
            if variables.reference(key).is_none() {
                diagnostics.warn(
                    unit.as_str(),
                    format!("rule names parameter @{} which the script never uses; ignored", key),
                );
            }
        }
    }
    check_name_collisions(
        &unit,
        &script.temp_tables,
        undeclared.iter().map(|v| v.name.as_str()),
    )?;

    let prefix = ctx.token.parameter_prefix();
    let mut declarations = String::new();
    let mut parameters = Vec::new();
    let mut described = 0;

    for variable in &undeclared {
        match pinned_type(ctx, script, rule, &variable.name) {
            Some(PinnedType::Table(table_type)) => {
                declarations.push_str(&format!(
                    "DECLARE {} {};\n",
                    variable.name,
                    table_type.full_name()
                ));
                parameters.push(table_parameter(
                    &unit,
                    &variable.name,
                    variable.first_offset as i64,
                    table_type,
                    rule,
                    diagnostics,
                ));
            }
            Some(PinnedType::Scalar(declaration)) => {
                declarations.push_str(&format!(
                    "DECLARE {} {} = {}{};\n",
                    variable.name,
                    declaration,
                    prefix,
                    variable.name.trim_start_matches('@')
                ));
                described += 1;
            }
            None => described += 1,
        }
    }

    if described > 0 {
        let sql = rewrite_local_temp_tables(
            &format!("{}{}", declarations, script.source_text),
            ctx.token,
        );
        let rows = conn.query(DESCRIBE_PARAMETERS, &[sql.as_str()]).map_err(|source| {
            SqlMetaError::ParameterInference {
                unit: unit.clone(),
                guidance: server_error_guidance(&source),
                sql: sql.clone(),
                source,
            }
        })?;
        for row in &rows {
            parameters.push(described_parameter(
                ctx,
                &unit,
                row,
                &prefix,
                &variables,
                rule,
                diagnostics,
            )?);
        }
    }

    parameters.sort_by_key(|p| p.sort_key);
    tracing::debug!(unit = %unit, count = parameters.len(), "inferred script parameters");
    Ok(parameters)
}

/// Builds a parameter from a `sp_describe_undeclared_parameters` row.
fn described_parameter(
    ctx: &InferenceContext<'_>,
    unit: &str,
    row: &DbRow,
    prefix: &str,
    variables: &ScriptVariables,
    rule: &EffectiveRule,
    diagnostics: &mut Diagnostics,
) -> Result<ParameterDescriptor, SqlMetaError> {
    let reported = row.text("name").unwrap_or_default();
    let name = if starts_with_ci(reported, prefix) {
        format!("@{}", &reported[prefix.len()..])
    } else {
        reported.to_string()
    };
    let sort_key = variables
        .reference(&name)
        .map(|v| v.first_offset as i64)
        .unwrap_or(i64::MAX);

    if let Some(table_type) = row
        .int("suggested_user_type_id")
        .and_then(|id| ctx.types.table_type_by_id(id))
    {
        return Ok(table_parameter(
            unit,
            &name,
            sort_key,
            table_type,
            rule,
            diagnostics,
        ));
    }

    let system_type_id = row.int("suggested_system_type_id").unwrap_or_default();
    let sql_type = ctx
        .types
        .scalar_type(system_type_id)
        .ok_or_else(|| SqlMetaError::UnsupportedType {
            unit: unit.to_string(),
            subject: format!("parameter {}", name),
            type_name: row
                .text("suggested_system_type_name")
                .map(str::to_string)
                .or_else(|| ctx.types.system_type_name(system_type_id).map(str::to_string))
                .unwrap_or_else(|| format!("system type {}", system_type_id)),
        })?;

    Ok(ParameterDescriptor {
        is_nullable: rule.parameter_nullable(&name).unwrap_or(false),
        size: sql_type.adjust_size(row.int("suggested_max_length").unwrap_or_default() as i32),
        precision: row.int("suggested_precision").unwrap_or_default() as u8,
        scale: row.int("suggested_scale").unwrap_or_default() as u8,
        is_output: row.flag("suggested_is_output"),
        is_cursor_ref: false,
        param_type: ParameterType::Scalar(sql_type),
        default_value: None,
        sort_key,
        name,
    })
}

/// A table-valued parameter: never output and never nullable.
fn table_parameter(
    unit: &str,
    name: &str,
    sort_key: i64,
    table_type: &TableTypeDescriptor,
    rule: &EffectiveRule,
    diagnostics: &mut Diagnostics,
) -> ParameterDescriptor {
    if rule.parameter_nullable(name) == Some(true) {
        diagnostics.warn(
            unit,
            format!(
                "table-valued parameter {} cannot be nullable; the nullable rule is ignored",
                name
            ),
        );
    }
    ParameterDescriptor {
        name: name.to_string(),
        sort_key,
        size: 0,
        precision: 0,
        scale: 0,
        is_output: false,
        is_cursor_ref: false,
        is_nullable: false,
        param_type: ParameterType::Table(table_type.clone()),
        default_value: None,
    }
}

/// Catalog parameters of `procedure` with defaults read from its definition
/// and nullability from `rule`.
///
/// An explicitly nullable parameter without a default gets `NULL`; an
/// explicitly non-nullable one loses its default.
pub fn resolve_procedure_parameters(
    procedure: &StoredProcedure,
    rule: &EffectiveRule,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ParameterDescriptor>, SqlMetaError> {
    let unit = ExecutableUnit::StoredProcedure(procedure).identity();
    let defaults = procedure_parameter_defaults(&procedure.definition);

    if rule.check_unused_parameters {
        for key in rule.parameters.keys() {
            if !procedure
                .parameters
                .iter()
                .any(|p| parameter_key(&p.name) == *key)
            {
                diagnostics.warn(
                    unit.as_str(),
                    format!("rule names parameter @{} which the procedure does not declare; ignored", key),
                );
            }
        }
    }
    check_name_collisions(
        &unit,
        &procedure.temp_tables,
        procedure.parameters.iter().map(|p| p.name.as_str()),
    )?;

    let mut parameters: Vec<ParameterDescriptor> = procedure
        .parameters
        .iter()
        .map(|p| {
            if let ParameterType::Table(table_type) = &p.param_type {
                return table_parameter(&unit, &p.name, p.sort_key, table_type, rule, diagnostics);
            }

            let mut parameter = p.clone();
            parameter.default_value = defaults.get(&parameter_key(&p.name)).cloned();
            match rule.parameter_nullable(&p.name) {
                Some(true) => {
                    parameter.is_nullable = true;
                    if parameter.default_value.is_none() {
                        parameter.default_value = Some("NULL".to_string());
                    }
                }
                Some(false) => {
                    parameter.is_nullable = false;
                    parameter.default_value = None;
                }
                None => {
                    parameter.is_nullable = parameter
                        .default_value
                        .as_deref()
                        .is_some_and(|d| d.eq_ignore_ascii_case("NULL"));
                }
            }
            parameter
        })
        .collect();

    parameters.sort_by_key(|p| p.sort_key);
    Ok(parameters)
}
