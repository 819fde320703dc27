//! In-memory rule set matched with glob patterns
//!
//! Rules are applied in declaration order; for every setting the last
//! matching rule that sets it wins.

use std::collections::BTreeMap;

use super::{
    pattern_matches, ColumnRule, DeclaredRule, EffectiveRule, ParameterRule, RuleScope, RuleSet, TableScriptRule,
    UnitKey,
};
use crate::parser::names::parameter_key;

/// One configured rule.
#[derive(Debug, Clone)]
pub struct ObjectRule {
    pub scope: RuleScope,
    /// Matched against `schema.name` (procedures, tables) or the script identity
    pub pattern: glob::Pattern,
    pub except: Vec<glob::Pattern>,
    /// Include (or exclude) matching procedures/tables
    pub include: Option<bool>,
    pub parameters: BTreeMap<String, ParameterRule>,
    pub columns: BTreeMap<String, ColumnRule>,
    pub temp_tables: Vec<String>,
    pub table_scripts: Vec<TableScriptRule>,
    pub check_unused_parameters: Option<bool>,
}

impl ObjectRule {
    /// A rule with no settings. Fails if `pattern` is not a valid glob.
    pub fn new(scope: RuleScope, pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            scope,
            pattern: glob::Pattern::new(pattern)?,
            except: Vec::new(),
            include: None,
            parameters: BTreeMap::new(),
            columns: BTreeMap::new(),
            temp_tables: Vec::new(),
            table_scripts: Vec::new(),
            check_unused_parameters: None,
        })
    }

    pub fn except(mut self, pattern: &str) -> Result<Self, glob::PatternError> {
        self.except.push(glob::Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn include(mut self, include: bool) -> Self {
        self.include = Some(include);
        self
    }

    pub fn parameter(mut self, name: &str, rule: ParameterRule) -> Self {
        self.parameters.insert(parameter_key(name), rule);
        self
    }

    pub fn column(mut self, name: &str, rule: ColumnRule) -> Self {
        self.columns.insert(name.to_lowercase(), rule);
        self
    }

    pub fn temp_table(mut self, create_statement: &str) -> Self {
        self.temp_tables.push(create_statement.to_string());
        self
    }

    pub fn table_script(mut self, rule: TableScriptRule) -> Self {
        self.table_scripts.push(rule);
        self
    }

    pub fn check_unused_parameters(mut self, check: bool) -> Self {
        self.check_unused_parameters = Some(check);
        self
    }

    fn to_declared(&self) -> DeclaredRule {
        DeclaredRule {
            description: format!("{} rule '{}'", self.scope, self.pattern.as_str()),
            scope: self.scope,
            pattern: self.pattern.clone(),
            except: self.except.clone(),
            parameter_names: self
                .parameters
                .keys()
                .map(|k| format!("@{}", k))
                .collect(),
            column_names: self.columns.keys().cloned().collect(),
        }
    }
}

/// Ordered list of [`ObjectRule`]s.
#[derive(Debug, Clone, Default)]
pub struct GlobRuleSet {
    rules: Vec<ObjectRule>,
}

impl GlobRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: ObjectRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: ObjectRule) {
        self.rules.push(rule);
    }

    fn matching<'a>(
        &'a self,
        scope: RuleScope,
        name: &'a str,
    ) -> impl Iterator<Item = &'a ObjectRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.scope == scope && pattern_matches(&r.pattern, &r.except, name))
    }

    fn included(&self, scope: RuleScope, name: &str) -> bool {
        self.matching(scope, name)
            .filter_map(|r| r.include)
            .last()
            .unwrap_or(false)
    }
}

impl RuleSet for GlobRuleSet {
    fn effective_rule_for(&self, unit: &UnitKey) -> EffectiveRule {
        let name = unit.match_name();
        let mut effective = EffectiveRule::default();

        for rule in self.matching(unit.scope(), &name) {
            for (key, parameter) in &rule.parameters {
                effective
                    .parameters
                    .entry(key.clone())
                    .or_default()
                    .merge(parameter);
            }
            for (key, column) in &rule.columns {
                effective.columns.entry(key.clone()).or_default().merge(column);
            }
            effective
                .temp_tables
                .extend(rule.temp_tables.iter().cloned());
            if let Some(check) = rule.check_unused_parameters {
                effective.check_unused_parameters = check;
            }
        }

        effective
    }

    fn should_include_procedure(&self, schema: &str, name: &str) -> bool {
        self.included(RuleScope::Procedures, &format!("{}.{}", schema, name))
    }

    fn should_include_table(&self, schema: &str, name: &str) -> bool {
        self.included(RuleScope::Tables, &format!("{}.{}", schema, name))
    }

    fn is_table_column_skipped(&self, schema: &str, table: &str, column: &str) -> bool {
        let name = format!("{}.{}", schema, table);
        let key = column.to_lowercase();
        let mut merged = ColumnRule::default();
        for rule in self.matching(RuleScope::Tables, &name) {
            if let Some(column_rule) = rule.columns.get(&key) {
                merged.merge(column_rule);
            }
        }
        merged.is_skipped()
    }

    fn table_script_rules_for(&self, schema: &str, table: &str) -> Vec<TableScriptRule> {
        let name = format!("{}.{}", schema, table);
        let mut scripts: Vec<TableScriptRule> = Vec::new();
        for rule in self.matching(RuleScope::Tables, &name) {
            for script in &rule.table_scripts {
                let identity = script.identity(schema, table);
                scripts.retain(|s| s.identity(schema, table) != identity);
                scripts.push(script.clone());
            }
        }
        scripts
    }

    fn declared_rules(&self) -> Vec<DeclaredRule> {
        self.rules.iter().map(ObjectRule::to_declared).collect()
    }
}
