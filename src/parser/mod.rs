//! T-SQL text analysis

pub mod names;
mod procedure_header;
mod temp_table;
mod token_cursor;
mod variable_scanner;

pub use procedure_header::{
    parse_procedure_header, procedure_parameter_defaults, HeaderParameter, ProcedureHeader,
};
pub use temp_table::{create_table_names, rewrite_local_temp_tables, RunToken};
pub use variable_scanner::{scan_variables, ScriptVariables, VariableReference};
