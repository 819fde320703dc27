//! Parameter and result set inference for executable units

mod parameters;
mod result_set;

pub use parameters::{infer_parameters, resolve_procedure_parameters};
pub use result_set::{infer_result_set, InferredResultSet, ResultSetStrategy};

use crate::catalog::TypeCatalog;
use crate::db::{ConnectionFactory, DbError};
use crate::error::SqlMetaError;
use crate::model::TempTable;
use crate::parser::RunToken;
use crate::util::contains_ci;

/// Shared, read-only inputs of every inference call in a run.
#[derive(Clone, Copy)]
pub struct InferenceContext<'a> {
    pub types: &'a TypeCatalog,
    pub token: &'a RunToken,
    /// Opens the dedicated connection used by the execution fallback
    pub factory: Option<&'a dyn ConnectionFactory>,
}

/// Rewrites known server failures into advice on fixing configuration.
pub(crate) fn server_error_guidance(error: &DbError) -> String {
    if error.number == Some(8144) || contains_ci(&error.message, "too many arguments") {
        "a procedure is executed with arguments whose types cannot be inferred; \
         declare those parameters with explicit types in configuration"
            .to_string()
    } else if contains_ci(&error.message, "invalid object name '#") {
        "a temp table used by the statement does not exist at build time; \
         declare its CREATE TABLE statement in configuration"
            .to_string()
    } else if contains_ci(&error.message, "used more than once in the batch") {
        "a parameter is used more than once; declare its type explicitly in configuration"
            .to_string()
    } else {
        format!("the server rejected the statement ({})", error)
    }
}

/// Whether `error` is one of the signatures [`server_error_guidance`] explains.
pub(crate) fn is_known_signature(error: &DbError) -> bool {
    error.number == Some(8144)
        || contains_ci(&error.message, "too many arguments")
        || contains_ci(&error.message, "invalid object name '#")
        || contains_ci(&error.message, "used more than once in the batch")
}

/// Fails if a temp table and a parameter share a name, ignoring sigils and case.
pub(crate) fn check_name_collisions<'n>(
    unit: &str,
    temp_tables: &[TempTable],
    parameter_names: impl IntoIterator<Item = &'n str>,
) -> Result<(), SqlMetaError> {
    let parameter_names: Vec<String> = parameter_names
        .into_iter()
        .map(|n| n.trim_start_matches('@').to_lowercase())
        .collect();
    for table in temp_tables {
        let bare = table.name.trim_start_matches('#').to_lowercase();
        if parameter_names.contains(&bare) {
            return Err(SqlMetaError::TempTableParameterCollision {
                unit: unit.to_string(),
                name: bare,
            });
        }
    }
    Ok(())
}
