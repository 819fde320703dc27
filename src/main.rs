use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rust_sqlmeta::db::{ConnectionSettings, TdsConnectionFactory};
use rust_sqlmeta::model::ResolvedModel;
use rust_sqlmeta::parser::RunToken;
use rust_sqlmeta::rules::{GlobRuleSet, ObjectRule, RuleScope, TableScriptRule};
use rust_sqlmeta::synth::ScriptKind;
use rust_sqlmeta::{infer_metadata, InferOptions};

#[derive(Parser)]
#[command(name = "rust-sqlmeta")]
#[command(author, version, about = "Infer SQL Server script and procedure metadata for code generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve parameters and result sets against a live database
    Infer {
        /// Directory of .sql scripts to analyse
        #[arg(short, long)]
        scripts: Option<PathBuf>,

        /// Procedures to include, as `schema.name` globs (e.g. `dbo.*`)
        #[arg(long = "procedures", value_name = "GLOB")]
        procedures: Vec<String>,

        /// Tables and views to publish, as `schema.name` globs
        #[arg(long = "tables", value_name = "GLOB")]
        tables: Vec<String>,

        /// Generated script kinds for the selected tables (e.g. getById, insertBatch)
        #[arg(long = "table-script", value_name = "KIND")]
        table_scripts: Vec<ScriptKind>,

        /// ADO.NET connection string; SQL_SERVER_* environment variables are used when absent
        #[arg(short, long)]
        connection: Option<String>,

        /// Worker connections for inference
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Fixed run token instead of a random one
        #[arg(long)]
        token: Option<String>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_rules(
    procedures: &[String],
    tables: &[String],
    table_scripts: &[ScriptKind],
) -> Result<GlobRuleSet> {
    let mut rules = GlobRuleSet::new();
    for pattern in procedures {
        rules.push(ObjectRule::new(RuleScope::Procedures, pattern)?.include(true));
    }
    for pattern in tables {
        let mut rule = ObjectRule::new(RuleScope::Tables, pattern)?.include(true);
        for kind in table_scripts {
            rule = rule.table_script(TableScriptRule::new(*kind));
        }
        rules.push(rule);
    }
    Ok(rules)
}

fn print_summary(model: &ResolvedModel) {
    println!(
        "Resolved {} table(s), {} table type(s), {} procedure(s), {} script(s)",
        model.table_dtos.len(),
        model.table_types.len(),
        model.stored_procedures.len(),
        model.scripts.len()
    );
    for procedure in &model.stored_procedures {
        println!(
            "  procedure {} ({} parameter(s), {} column(s))",
            procedure.full_name(),
            procedure.parameters.len(),
            procedure.result_set.as_ref().map_or(0, Vec::len)
        );
    }
    for script in &model.scripts {
        println!(
            "  script {} ({} parameter(s), {} column(s))",
            script.identity,
            script.parameters.len(),
            script.result_set.as_ref().map_or(0, Vec::len)
        );
    }
    if !model.warnings.is_empty() {
        println!("{} warning(s):", model.warnings.len());
        for warning in &model.warnings {
            println!("  {}", warning);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Infer {
            scripts,
            procedures,
            tables,
            table_scripts,
            connection,
            jobs,
            token,
            verbose,
        } => {
            init_logging(verbose);

            let factory = match connection {
                Some(connection_string) => TdsConnectionFactory::from_ado_string(&connection_string)?,
                None => TdsConnectionFactory::from_settings(&ConnectionSettings::from_env()),
            };
            let rules = build_rules(&procedures, &tables, &table_scripts)?;
            let options = InferOptions {
                parallelism: jobs.max(1),
                run_token: token
                    .as_deref()
                    .map(RunToken::new)
                    .unwrap_or_else(RunToken::generate),
            };

            let model = infer_metadata(&factory, &rules, scripts.as_deref(), &options)?;
            print_summary(&model);
        }
    }

    Ok(())
}
