//! Dead configuration detection
//!
//! A rule that matches nothing, or names a parameter or column that no
//! matching object has, is almost always a typo. Each one becomes a warning.

use crate::model::{Diagnostics, TableDto};
use crate::parser::names::parameter_key;
use crate::rules::{DeclaredRule, RuleScope, UnitKey};

/// What inference found for one procedure or script, dropped or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFacts {
    pub key: UnitKey,
    pub parameter_names: Vec<String>,
    /// Every result column name, skipped ones included
    pub column_names: Vec<String>,
}

/// Warns about rules that match no candidate object, and about parameter or
/// column names a rule configures that none of its matches have.
///
/// Candidates are every procedure (included or not), every table and view,
/// and every script identity. Parameter and column names are checked only
/// against matches that went through inference.
pub fn validate_rule_coverage(
    rules: &[DeclaredRule],
    procedure_names: &[String],
    tables: &[TableDto],
    script_identities: &[String],
    facts: &[UnitFacts],
    diagnostics: &mut Diagnostics,
) {
    for rule in rules {
        match rule.scope {
            RuleScope::Tables => check_table_rule(rule, tables, diagnostics),
            RuleScope::Procedures => {
                check_unit_rule(rule, procedure_names, facts, diagnostics)
            }
            RuleScope::Scripts => check_unit_rule(rule, script_identities, facts, diagnostics),
        }
    }
}

fn check_table_rule(rule: &DeclaredRule, tables: &[TableDto], diagnostics: &mut Diagnostics) {
    let matched: Vec<&TableDto> = tables
        .iter()
        .filter(|t| rule.matches(&format!("{}.{}", t.schema_name, t.name)))
        .collect();
    if matched.is_empty() {
        diagnostics.warn(rule.description.as_str(), "matches no table or view");
        return;
    }
    for column in &rule.column_names {
        if !matched.iter().any(|t| t.column(column).is_some()) {
            diagnostics.warn(
                rule.description.as_str(),
                format!("names column '{}' which no matching table or view has", column),
            );
        }
    }
}

fn check_unit_rule(
    rule: &DeclaredRule,
    candidates: &[String],
    facts: &[UnitFacts],
    diagnostics: &mut Diagnostics,
) {
    if !candidates.iter().any(|name| rule.matches(name)) {
        diagnostics.warn(
            rule.description.as_str(),
            format!("matches no {}", rule.scope),
        );
        return;
    }

    let matched: Vec<&UnitFacts> = facts
        .iter()
        .filter(|f| f.key.scope() == rule.scope && rule.matches(&f.key.match_name()))
        .collect();
    if matched.is_empty() {
        return;
    }

    for parameter in &rule.parameter_names {
        let key = parameter_key(parameter);
        if !matched
            .iter()
            .any(|f| f.parameter_names.iter().any(|p| parameter_key(p) == key))
        {
            diagnostics.warn(
                rule.description.as_str(),
                format!("names parameter @{} which no matching {} has", key, rule.scope),
            );
        }
    }
    for column in &rule.column_names {
        if !matched
            .iter()
            .any(|f| f.column_names.iter().any(|c| c.eq_ignore_ascii_case(column)))
        {
            diagnostics.warn(
                rule.description.as_str(),
                format!(
                    "names result column '{}' which no matching {} returns",
                    column, rule.scope
                ),
            );
        }
    }
}
