//! Metadata assembly
//!
//! Loads the catalogs, synthesizes table scripts, runs inference over every
//! script and procedure, drops units whose shape cannot be represented and
//! checks the rule configuration against what was found.

mod validation;

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use rayon::prelude::*;

use crate::catalog::{load_procedures, load_tables, TypeCatalog};
use crate::db::{ConnectionFactory, SqlConnection};
use crate::error::SqlMetaError;
use crate::inference::{infer_parameters, infer_result_set, InferenceContext};
use crate::model::{
    ColumnDescriptor, Diagnostics, ExecutableUnit, ParameterDescriptor, ResolvedModel, Script,
    StoredProcedure, TableTypeDescriptor, TempTable,
};
use crate::parser::{create_table_names, RunToken};
use crate::rules::{EffectiveRule, RuleSet, UnitKey};
use crate::synth::synthesize_table_scripts;

pub use validation::{validate_rule_coverage, UnitFacts};

/// Minimum number of units to benefit from parallel inference.
/// Below this, opening worker connections costs more than it saves.
pub const PARALLEL_THRESHOLD: usize = 8;

/// Options for one inference run
#[derive(Debug, Clone)]
pub struct InferOptions {
    /// Worker connections used for per-unit inference; `1` runs sequentially
    /// on the primary connection
    pub parallelism: usize,
    /// Prefix for temp tables and placeholder variables created by this run
    pub run_token: RunToken,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            run_token: RunToken::generate(),
        }
    }
}

/// A procedure or script awaiting inference.
#[derive(Debug, Clone)]
enum PendingUnit {
    Procedure(StoredProcedure),
    Script(Script),
}

impl PendingUnit {
    fn key(&self) -> UnitKey {
        match self {
            PendingUnit::Procedure(p) => UnitKey::Procedure {
                schema: p.schema_name.clone(),
                name: p.name.clone(),
            },
            PendingUnit::Script(s) => UnitKey::Script(s.identity.clone()),
        }
    }

    fn executable(&self) -> ExecutableUnit<'_> {
        match self {
            PendingUnit::Procedure(p) => ExecutableUnit::StoredProcedure(p),
            PendingUnit::Script(s) => ExecutableUnit::Script(s),
        }
    }

    fn temp_tables_mut(&mut self) -> &mut Vec<TempTable> {
        match self {
            PendingUnit::Procedure(p) => &mut p.temp_tables,
            PendingUnit::Script(s) => &mut s.temp_tables,
        }
    }

    fn set_parameters(&mut self, parameters: Vec<ParameterDescriptor>) {
        match self {
            PendingUnit::Procedure(p) => p.parameters = parameters,
            PendingUnit::Script(s) => s.parameters = parameters,
        }
    }

    fn set_result_set(&mut self, columns: Option<Vec<ColumnDescriptor>>, all_names: Vec<String>) {
        match self {
            PendingUnit::Procedure(p) => {
                p.result_set = columns;
                p.all_result_column_names = all_names;
            }
            PendingUnit::Script(s) => {
                s.result_set = columns;
                s.all_result_column_names = all_names;
            }
        }
    }
}

/// Outcome of inference for one unit.
struct UnitOutcome {
    /// `None` when the unit was dropped
    unit: Option<PendingUnit>,
    facts: UnitFacts,
    diagnostics: Diagnostics,
}

/// Builds the fully resolved model.
///
/// `conn` is the primary connection used for catalog reads and sequential
/// inference. `factory`, when given, opens the dedicated connections of the
/// isolated execution fallback and the per-worker connections of parallel
/// inference.
pub fn assemble(
    conn: &mut dyn SqlConnection,
    factory: Option<&dyn ConnectionFactory>,
    rules: &dyn RuleSet,
    user_scripts: Vec<Script>,
    options: &InferOptions,
) -> Result<ResolvedModel> {
    let mut diagnostics = Diagnostics::new();

    // Step 1: Catalogs
    let types = TypeCatalog::load(conn, &mut diagnostics)?;
    let tables = load_tables(conn, &types, rules, &mut diagnostics)?;
    let procedures = load_procedures(conn, &types, rules)?;

    // Step 2: Table DTOs and generated scripts, built from the columns left after skipping
    let mut table_dtos = Vec::new();
    let mut scripts = Vec::new();
    for table in &tables {
        let dto = table.without_columns(|c| {
            rules.is_table_column_skipped(&table.schema_name, &table.name, &c.name)
        });
        let script_rules = rules.table_script_rules_for(&table.schema_name, &table.name);
        if !script_rules.is_empty() {
            scripts.extend(synthesize_table_scripts(&dto, &script_rules, types.table_types())?);
        }
        if rules.should_include_table(&table.schema_name, &table.name) {
            table_dtos.push(dto);
        }
    }
    let synthesized = scripts.len();

    // Step 3: User scripts replace generated ones with the same identity
    for script in user_scripts {
        if let Some(existing) = scripts
            .iter_mut()
            .find(|s| s.identity.eq_ignore_ascii_case(&script.identity))
        {
            diagnostics.warn(
                format!("script '{}'", script.identity),
                "a script file replaces the generated script with the same identity",
            );
            *existing = script;
        } else {
            scripts.push(script);
        }
    }
    tracing::debug!(
        tables = tables.len(),
        procedures = procedures.procedures.len(),
        scripts = scripts.len(),
        synthesized,
        "catalog loaded"
    );

    let script_identities: Vec<String> = scripts.iter().map(|s| s.identity.clone()).collect();
    let units: Vec<PendingUnit> = procedures
        .procedures
        .into_iter()
        .map(PendingUnit::Procedure)
        .chain(scripts.into_iter().map(PendingUnit::Script))
        .collect();

    // Step 4: Per-unit inference
    let ctx = InferenceContext {
        types: &types,
        token: &options.run_token,
        factory,
    };
    let outcomes = match factory {
        Some(factory) if options.parallelism > 1 && units.len() >= PARALLEL_THRESHOLD => {
            resolve_parallel(factory, &ctx, rules, units, options.parallelism)?
        }
        _ => units
            .into_iter()
            .enumerate()
            .map(|(ordinal, unit)| resolve_unit(&mut *conn, &ctx, rules, ordinal, unit))
            .collect::<Result<Vec<_>>>()?,
    };

    // Step 5: Collect survivors
    let mut model = ResolvedModel::default();
    let mut facts = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        diagnostics.extend(outcome.diagnostics);
        facts.push(outcome.facts);
        match outcome.unit {
            Some(PendingUnit::Procedure(p)) => model.stored_procedures.push(p),
            Some(PendingUnit::Script(s)) => model.scripts.push(s),
            None => {}
        }
    }

    model.table_types = referenced_table_types(&model);
    model.table_dtos = table_dtos;
    model
        .table_dtos
        .sort_by(|a, b| (&a.schema_name, &a.name).cmp(&(&b.schema_name, &b.name)));
    model
        .stored_procedures
        .sort_by(|a, b| (&a.schema_name, &a.name).cmp(&(&b.schema_name, &b.name)));
    model.scripts.sort_by(|a, b| a.identity.cmp(&b.identity));

    // Step 6: Dead configuration
    validate_rule_coverage(
        &rules.declared_rules(),
        &procedures.all_names,
        &tables,
        &script_identities,
        &facts,
        &mut diagnostics,
    );

    tracing::debug!(
        table_dtos = model.table_dtos.len(),
        table_types = model.table_types.len(),
        procedures = model.stored_procedures.len(),
        scripts = model.scripts.len(),
        warnings = diagnostics.warnings().len(),
        "model resolved"
    );
    model.warnings = diagnostics.into_warnings();
    Ok(model)
}

/// Infers units on a pool of `parallelism` threads, each with its own
/// connection opened up front.
fn resolve_parallel(
    factory: &dyn ConnectionFactory,
    ctx: &InferenceContext<'_>,
    rules: &dyn RuleSet,
    units: Vec<PendingUnit>,
    parallelism: usize,
) -> Result<Vec<UnitOutcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .build()?;
    let connections = (0..pool.current_num_threads())
        .map(|_| factory.connect().map(Mutex::new))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| SqlMetaError::Database {
            context: "opening a worker connection".to_string(),
            source,
        })?;
    tracing::debug!(workers = connections.len(), units = units.len(), "inferring in parallel");

    let results: Vec<Result<UnitOutcome>> = pool.install(|| {
        units
            .into_par_iter()
            .enumerate()
            .map(|(ordinal, unit)| {
                let worker = rayon::current_thread_index().unwrap_or(0) % connections.len();
                let mut conn = connections[worker]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                resolve_unit(&mut **conn, ctx, rules, ordinal, unit)
            })
            .collect()
    });

    // Propagate the first error in unit order
    results.into_iter().collect()
}

/// Runs parameter and result set inference for one unit.
fn resolve_unit(
    conn: &mut dyn SqlConnection,
    ctx: &InferenceContext<'_>,
    rules: &dyn RuleSet,
    ordinal: usize,
    mut unit: PendingUnit,
) -> Result<UnitOutcome> {
    // Temp tables of units inferred side by side must not share global names
    let token = ctx.token.for_unit(ordinal);
    let ctx = &InferenceContext {
        token: &token,
        ..*ctx
    };
    let key = unit.key();
    let rule = rules.effective_rule_for(&key);
    let identity = unit.executable().identity();
    let mut diagnostics = Diagnostics::new();

    attach_rule_temp_tables(&mut unit, &identity, &rule)?;

    let parameters = infer_parameters(conn, ctx, unit.executable(), &rule, &mut diagnostics)?;
    let mut facts = UnitFacts {
        key,
        parameter_names: parameters.iter().map(|p| p.name.clone()).collect(),
        column_names: Vec::new(),
    };
    unit.set_parameters(parameters);

    if let Some(reason) = unsupported_parameters(&unit) {
        diagnostics.warn(identity.as_str(), format!("{}; the unit is ignored", reason));
        return Ok(UnitOutcome {
            unit: None,
            facts,
            diagnostics,
        });
    }

    let mut temp_tables = std::mem::take(unit.temp_tables_mut());
    for table in &mut temp_tables {
        let shape = infer_result_set(
            conn,
            ctx,
            ExecutableUnit::TempTable(table),
            &EffectiveRule::default(),
        )?;
        table.columns = shape.columns.unwrap_or_default();
    }
    *unit.temp_tables_mut() = temp_tables;

    let result = infer_result_set(conn, ctx, unit.executable(), &rule)?;
    facts.column_names = result.all_column_names.clone();

    if let Some(reason) = result.columns.as_deref().and_then(unsupported_columns) {
        diagnostics.warn(identity.as_str(), format!("{}; the unit is ignored", reason));
        return Ok(UnitOutcome {
            unit: None,
            facts,
            diagnostics,
        });
    }

    unit.set_result_set(result.columns, result.all_column_names);
    Ok(UnitOutcome {
        unit: Some(unit),
        facts,
        diagnostics,
    })
}

/// Adds the temp tables configured for a unit after the ones it already has.
fn attach_rule_temp_tables(
    unit: &mut PendingUnit,
    identity: &str,
    rule: &EffectiveRule,
) -> Result<(), SqlMetaError> {
    let temp_tables = unit.temp_tables_mut();
    for statement in &rule.temp_tables {
        let names = create_table_names(statement).unwrap_or_default();
        let [name] = names.as_slice() else {
            return Err(SqlMetaError::MalformedTempTable {
                unit: identity.to_string(),
                count: names.len(),
                sql: statement.clone(),
            });
        };
        if temp_tables
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(name))
        {
            return Err(SqlMetaError::DuplicateTempTable {
                unit: identity.to_string(),
                name: name.clone(),
            });
        }
        temp_tables.push(TempTable {
            name: name.clone(),
            create_statement: statement.clone(),
            columns: Vec::new(),
        });
    }
    Ok(())
}

/// Why a unit's parameters cannot be represented, if they cannot.
fn unsupported_parameters(unit: &PendingUnit) -> Option<String> {
    let parameters = match unit {
        PendingUnit::Procedure(p) => &p.parameters,
        PendingUnit::Script(s) => {
            if let Some(p) = s.parameters.iter().find(|p| p.is_output) {
                return Some(format!("script parameter {} is an output parameter", p.name));
            }
            &s.parameters
        }
    };
    parameters
        .iter()
        .find(|p| p.is_cursor_ref)
        .map(|p| format!("parameter {} is a cursor reference", p.name))
}

/// Why a result set cannot be represented, if it cannot.
fn unsupported_columns(columns: &[ColumnDescriptor]) -> Option<String> {
    if columns.len() > 1 && columns.iter().any(|c| c.name.is_empty()) {
        return Some("the result set has an unnamed column among several".to_string());
    }
    for (i, column) in columns.iter().enumerate() {
        if columns[..i]
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&column.name))
        {
            return Some(format!(
                "the result set has more than one column named '{}'",
                column.name
            ));
        }
    }
    None
}

/// Table types referenced by a parameter of a surviving unit, by (schema, name).
fn referenced_table_types(model: &ResolvedModel) -> Vec<TableTypeDescriptor> {
    let mut types: Vec<TableTypeDescriptor> = Vec::new();
    let parameters = model
        .stored_procedures
        .iter()
        .flat_map(|p| &p.parameters)
        .chain(model.scripts.iter().flat_map(|s| &s.parameters));
    for table_type in parameters.filter_map(ParameterDescriptor::table_type) {
        if !types.iter().any(|t| t.user_type_id == table_type.user_type_id) {
            types.push(table_type.clone());
        }
    }
    types.sort_by(|a, b| (&a.schema_name, &a.name).cmp(&(&b.schema_name, &b.name)));
    types
}
