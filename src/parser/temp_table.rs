//! Temp table scoping
//!
//! Introspection procedures may run in a different server session than the
//! one that created a script's `#local` temp tables, so scripts are rewritten
//! to use global temp tables carrying a per-run prefix. The rewrite is purely
//! textual and idempotent: its output never contains a single-hash name.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::Token;

use super::token_cursor::TokenCursor;

/// `#name` / `##name` preceded by something that cannot be part of an identifier.
static TEMP_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<pre>^|[^\w#@$])(?P<hashes>##?)(?P<name>[\p{L}_][\w@#$]*)").unwrap()
});

/// Uniqueness token generated once per run and threaded into every call
/// that needs collision-free temp table or variable names.
///
/// Global temp tables are visible to every session, so units inferred at the
/// same time must not share one. [`for_unit`](Self::for_unit) scopes temp
/// table names to a single unit; placeholder variables are batch-local and
/// keep the run prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunToken {
    run: String,
    unit: Option<usize>,
}

impl RunToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self::new(&format!("rs{}", &uuid[..12]))
    }

    /// A fixed token (tests, reproducible runs). Non-identifier characters are dropped.
    pub fn new(token: &str) -> Self {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        Self {
            run: if cleaned.is_empty() {
                "rs".to_string()
            } else {
                cleaned
            },
            unit: None,
        }
    }

    /// The same run token, with temp table names scoped to the unit at `ordinal`.
    pub fn for_unit(&self, ordinal: usize) -> Self {
        Self {
            run: self.run.clone(),
            unit: Some(ordinal),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.run
    }

    /// Prefix for injected placeholder variables, e.g. `@rs1a2b_`.
    pub fn parameter_prefix(&self) -> String {
        format!("@{}_", self.run)
    }

    /// Prefix of rewritten temp table names: `run` or `run_<unit>`.
    pub fn temp_table_prefix(&self) -> String {
        match self.unit {
            Some(ordinal) => format!("{}_{}", self.run, ordinal),
            None => self.run.clone(),
        }
    }

    /// Global temp table name standing in for a local one.
    pub fn global_temp_table_name(&self, local_name: &str) -> String {
        rewrite_local_temp_tables(local_name, self)
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.run)
    }
}

/// Rewrite every session-local temp table reference (`#name`) into a global,
/// run-prefixed one (`##<token>_name`). Names that already start with `##`
/// are left as they are, so rewriting twice is the same as rewriting once.
pub fn rewrite_local_temp_tables(sql: &str, token: &RunToken) -> String {
    let prefix = token.temp_table_prefix();
    TEMP_TABLE_RE
        .replace_all(sql, |caps: &Captures| {
            let pre = &caps["pre"];
            let name = &caps["name"];
            if &caps["hashes"] == "##" {
                format!("{}##{}", pre, name)
            } else {
                format!("{}##{}_{}", pre, prefix, name)
            }
        })
        .into_owned()
}

/// Names of all tables created by `CREATE TABLE` statements in `sql`.
///
/// A temp table definition is well formed when this yields exactly one name.
/// Returns `None` if the text cannot be tokenized.
pub fn create_table_names(sql: &str) -> Option<Vec<String>> {
    let mut cursor = TokenCursor::new(sql)?;
    let mut names = Vec::new();

    while !cursor.is_done() {
        if !cursor.eat_keyword(Keyword::CREATE) {
            cursor.bump();
            continue;
        }
        if !cursor.eat_keyword(Keyword::TABLE) {
            continue;
        }
        let mut hashes = String::new();
        while cursor.at(&Token::Sharp) {
            hashes.push('#');
            cursor.bump();
        }
        names.push(format!("{}{}", hashes, cursor.take_word().unwrap_or_default()));
    }

    Some(names)
}
