//! Rule configuration seam
//!
//! The rule language itself (matching, include/except, cascading) belongs to
//! the caller. The pipeline only asks the questions in [`RuleSet`]; every
//! answer is already fully cascaded for the object it is asked about.

mod glob_rules;

use std::collections::BTreeMap;
use std::fmt;

use crate::parser::names::parameter_key;
use crate::synth::ScriptKind;

pub use glob_rules::{GlobRuleSet, ObjectRule};

/// Override for one parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterRule {
    /// Explicit type, scalar (`nvarchar(50)`) or table type name (`dbo.IdList`)
    pub sql_type: Option<String>,
    pub nullable: Option<bool>,
    /// Literal used when the unit must be executed at build time
    pub build_value: Option<String>,
}

impl ParameterRule {
    /// Field-wise override: values set in `other` win.
    pub fn merge(&mut self, other: &ParameterRule) {
        if other.sql_type.is_some() {
            self.sql_type = other.sql_type.clone();
        }
        if other.nullable.is_some() {
            self.nullable = other.nullable;
        }
        if other.build_value.is_some() {
            self.build_value = other.build_value.clone();
        }
    }
}

/// Override for one column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnRule {
    pub skip: Option<bool>,
    /// For generated table scripts: force a column in (`Some(true)`) or out (`Some(false)`)
    pub include: Option<bool>,
    /// For generated table scripts: return the column from the statement
    pub output: Option<bool>,
}

impl ColumnRule {
    pub fn merge(&mut self, other: &ColumnRule) {
        if other.skip.is_some() {
            self.skip = other.skip;
        }
        if other.include.is_some() {
            self.include = other.include;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.unwrap_or(false)
    }
}

/// The cascaded rule applying to one procedure or script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRule {
    /// Keyed by lower-cased name without `@`
    pub parameters: BTreeMap<String, ParameterRule>,
    /// Keyed by lower-cased column name
    pub columns: BTreeMap<String, ColumnRule>,
    /// `CREATE TABLE #...` statements that must exist while the unit is analysed
    pub temp_tables: Vec<String>,
    /// Warn about parameter rules naming parameters the unit never uses
    pub check_unused_parameters: bool,
}

impl Default for EffectiveRule {
    fn default() -> Self {
        Self {
            parameters: BTreeMap::new(),
            columns: BTreeMap::new(),
            temp_tables: Vec::new(),
            check_unused_parameters: true,
        }
    }
}

impl EffectiveRule {
    pub fn parameter(&self, name: &str) -> Option<&ParameterRule> {
        self.parameters.get(&parameter_key(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnRule> {
        self.columns.get(&name.to_lowercase())
    }

    pub fn is_column_skipped(&self, name: &str) -> bool {
        self.column(name).is_some_and(ColumnRule::is_skipped)
    }

    /// Explicit nullability requested for a parameter.
    pub fn parameter_nullable(&self, name: &str) -> Option<bool> {
        self.parameter(name).and_then(|p| p.nullable)
    }

    pub fn with_parameter(mut self, name: &str, rule: ParameterRule) -> Self {
        self.parameters
            .entry(parameter_key(name))
            .or_default()
            .merge(&rule);
        self
    }

    pub fn with_column(mut self, name: &str, rule: ColumnRule) -> Self {
        self.columns
            .entry(name.to_lowercase())
            .or_default()
            .merge(&rule);
        self
    }

    pub fn with_temp_table(mut self, create_statement: &str) -> Self {
        self.temp_tables.push(create_statement.to_string());
        self
    }
}

/// One requested generated script for a table or view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScriptRule {
    pub kind: ScriptKind,
    /// Identity of the generated script; defaults to `<schema>/<table>/<kind>`
    pub output_path: Option<String>,
    /// Filter columns for the get-by-columns kinds
    pub filter_columns: Option<Vec<String>>,
    /// Table type backing a table-valued parameter, chosen automatically when absent
    pub table_type: Option<String>,
    /// Take a range lock for merge kinds
    pub holdlock: bool,
    /// Keyed by lower-cased column name
    pub column_rules: BTreeMap<String, ColumnRule>,
}

impl TableScriptRule {
    pub fn new(kind: ScriptKind) -> Self {
        Self {
            kind,
            output_path: None,
            filter_columns: None,
            table_type: None,
            holdlock: false,
            column_rules: BTreeMap::new(),
        }
    }

    pub fn column_rule(&self, column: &str) -> ColumnRule {
        self.column_rules
            .get(&column.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// Identity of the script generated for `schema.table`.
    pub fn identity(&self, schema: &str, table: &str) -> String {
        self.output_path
            .clone()
            .unwrap_or_else(|| format!("{}/{}/{}", schema, table, self.kind))
    }
}

/// The kind of object a unit key or declared rule addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleScope {
    Procedures,
    Scripts,
    Tables,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleScope::Procedures => "procedure",
            RuleScope::Scripts => "script",
            RuleScope::Tables => "table",
        })
    }
}

/// Identity of a procedure or script as seen by the rule set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitKey {
    Procedure { schema: String, name: String },
    Script(String),
}

impl UnitKey {
    pub fn scope(&self) -> RuleScope {
        match self {
            UnitKey::Procedure { .. } => RuleScope::Procedures,
            UnitKey::Script(_) => RuleScope::Scripts,
        }
    }

    /// Name rule patterns are matched against: `schema.name` or the script identity.
    pub fn match_name(&self) -> String {
        match self {
            UnitKey::Procedure { schema, name } => format!("{}.{}", schema, name),
            UnitKey::Script(identity) => identity.clone(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.scope(), self.match_name())
    }
}

/// A rule as written in configuration, reported back so the pipeline can
/// detect dead configuration.
#[derive(Debug, Clone)]
pub struct DeclaredRule {
    /// How the rule is shown in warnings
    pub description: String,
    pub scope: RuleScope,
    pub pattern: glob::Pattern,
    pub except: Vec<glob::Pattern>,
    /// Parameter names the rule configures
    pub parameter_names: Vec<String>,
    /// Column names the rule configures
    pub column_names: Vec<String>,
}

impl DeclaredRule {
    /// Whether the rule applies to an object called `name` (`schema.name` or identity).
    pub fn matches(&self, name: &str) -> bool {
        pattern_matches(&self.pattern, &self.except, name)
    }
}

/// Case-insensitive glob match of `name` against `pattern` minus `except`.
pub(crate) fn pattern_matches(
    pattern: &glob::Pattern,
    except: &[glob::Pattern],
    name: &str,
) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    pattern.matches_with(name, options) && !except.iter().any(|e| e.matches_with(name, options))
}

/// Decisions the pipeline asks of the rule configuration.
pub trait RuleSet: Sync {
    /// Cascaded rule for a procedure or script.
    fn effective_rule_for(&self, unit: &UnitKey) -> EffectiveRule;

    fn should_include_procedure(&self, schema: &str, name: &str) -> bool;

    /// Whether a table or view is published as a DTO.
    fn should_include_table(&self, schema: &str, name: &str) -> bool;

    /// Whether a column is left out of a table's DTO.
    fn is_table_column_skipped(&self, schema: &str, table: &str, column: &str) -> bool;

    /// Generated scripts requested for a table or view, in order.
    fn table_script_rules_for(&self, schema: &str, table: &str) -> Vec<TableScriptRule>;

    /// Every rule as configured, for coverage checks.
    fn declared_rules(&self) -> Vec<DeclaredRule>;
}
