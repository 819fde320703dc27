//! rust-sqlmeta: SQL Server metadata inference for database-first code generation
//!
//! This library asks a live SQL Server for the parameter and result-set
//! shapes of stored procedures, hand-written scripts and scripts it
//! synthesizes from table definitions, and returns a fully typed model that
//! code generators can consume without further database access.

pub mod assembler;
pub mod catalog;
pub mod db;
pub mod error;
pub mod inference;
pub mod model;
pub mod parser;
pub mod project;
pub mod rules;
pub mod synth;
pub mod util;

use std::path::Path;

use anyhow::Result;

pub use assembler::{assemble, InferOptions, PARALLEL_THRESHOLD};
pub use error::SqlMetaError;
pub use model::ResolvedModel;

use db::ConnectionFactory;
use rules::RuleSet;

/// Infer the metadata of a database
///
/// Opens a primary connection from `factory`, loads the `.sql` scripts
/// under `scripts_dir` (if any) and resolves every procedure, script and
/// table the rule set selects.
pub fn infer_metadata(
    factory: &dyn ConnectionFactory,
    rules: &dyn RuleSet,
    scripts_dir: Option<&Path>,
    options: &InferOptions,
) -> Result<ResolvedModel> {
    // Step 1: Load user-authored scripts
    let scripts = match scripts_dir {
        Some(dir) => project::load_scripts(dir)?,
        None => Vec::new(),
    };

    // Step 2: Connect
    let mut conn = factory
        .connect()
        .map_err(|source| SqlMetaError::Database {
            context: "opening the primary connection".to_string(),
            source,
        })?;
    tracing::debug!(token = %options.run_token, "connected");

    // Step 3: Resolve
    assemble(conn.as_mut(), Some(factory), rules, scripts, options)
}
