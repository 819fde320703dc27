//! Variable usage scanning for ad hoc T-SQL scripts
//!
//! Finds every `@variable` a script references (with the character offset of
//! its first use) and every variable it declares with `DECLARE`. Whatever is
//! referenced but never declared is a parameter the caller must supply.

use std::collections::BTreeSet;

use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::Token;

use super::names::parameter_key;
use super::token_cursor::TokenCursor;

/// A variable referenced by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReference {
    /// Name with `@`, spelled as at its first use
    pub name: String,
    /// Character offset of the first use
    pub first_offset: usize,
}

/// Variables referenced and declared by one script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptVariables {
    /// Ordered by first use
    pub references: Vec<VariableReference>,
    /// Lower-cased names (without `@`) that carry a local declaration
    pub declared: BTreeSet<String>,
}

impl ScriptVariables {
    /// Referenced variables without a local declaration, ordered by first use.
    pub fn undeclared(&self) -> Vec<&VariableReference> {
        self.references
            .iter()
            .filter(|r| !self.declared.contains(&parameter_key(&r.name)))
            .collect()
    }

    pub fn reference(&self, name: &str) -> Option<&VariableReference> {
        let key = parameter_key(name);
        self.references
            .iter()
            .find(|r| parameter_key(&r.name) == key)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(&parameter_key(name))
    }
}

/// Keywords that start a new statement and so end a `DECLARE` or `EXEC` list.
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "SET", "IF", "WHILE", "BEGIN", "RETURN",
    "WITH", "CREATE", "DROP", "ALTER", "TRUNCATE", "PRINT", "THROW",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Statement,
    /// Inside `DECLARE`; `expect_name` is set right after DECLARE or a top-level comma
    Declare { expect_name: bool },
    /// Inside `EXEC`; named arguments (`@arg = value`) are not variable uses
    Exec { at_start: bool },
}

/// Scan a script for variable references and declarations.
///
/// Returns `None` if the text cannot be tokenized (e.g. an unterminated string).
pub fn scan_variables(sql: &str) -> Option<ScriptVariables> {
    let cursor = TokenCursor::new(sql)?;
    let tokens: Vec<_> = cursor
        .tokens()
        .iter()
        .filter(|t| !matches!(t.token, Token::Whitespace(_)))
        .collect();

    let mut result = ScriptVariables::default();
    let mut context = Context::Statement;
    let mut depth = 0i32;

    for (i, token) in tokens.iter().enumerate() {
        match &token.token {
            Token::Word(w) if is_variable(&w.value) => {
                let next_is_eq = matches!(tokens.get(i + 1).map(|t| &t.token), Some(Token::Eq));
                let is_argument_name = matches!(context, Context::Exec { at_start: false })
                    && depth == 0
                    && next_is_eq;

                if let Context::Declare { expect_name: true } = context {
                    if depth == 0 {
                        result.declared.insert(parameter_key(&w.value));
                        context = Context::Declare { expect_name: false };
                    }
                }
                if let Context::Exec { at_start: true } = context {
                    context = Context::Exec { at_start: false };
                }

                if !is_argument_name {
                    record_reference(&mut result, &w.value, cursor.offset_of(token.span.start));
                }
            }
            Token::Word(w) if w.keyword == Keyword::DECLARE => {
                context = Context::Declare { expect_name: true };
                depth = 0;
            }
            Token::Word(w) if w.keyword == Keyword::EXEC || w.keyword == Keyword::EXECUTE => {
                context = Context::Exec { at_start: true };
                depth = 0;
            }
            Token::Word(w)
                if depth == 0
                    && w.quote_style.is_none()
                    && STATEMENT_KEYWORDS
                        .iter()
                        .any(|k| w.value.eq_ignore_ascii_case(k)) =>
            {
                context = Context::Statement;
            }
            Token::Word(_) => {
                if let Context::Exec { at_start: true } = context {
                    context = Context::Exec { at_start: false };
                }
            }
            Token::LParen => depth += 1,
            Token::RParen => depth = (depth - 1).max(0),
            Token::Comma if depth == 0 => {
                if let Context::Declare { .. } = context {
                    context = Context::Declare { expect_name: true };
                }
            }
            Token::SemiColon => {
                context = Context::Statement;
                depth = 0;
            }
            _ => {}
        }
    }

    result.references.sort_by_key(|r| r.first_offset);
    Some(result)
}

/// `@name` but not a `@@system` function.
fn is_variable(word: &str) -> bool {
    word.len() > 1 && word.starts_with('@') && !word.starts_with("@@")
}

fn record_reference(result: &mut ScriptVariables, name: &str, offset: usize) {
    let key = parameter_key(name);
    match result
        .references
        .iter_mut()
        .find(|r| parameter_key(&r.name) == key)
    {
        Some(existing) => {
            if offset < existing.first_offset {
                existing.first_offset = offset;
            }
        }
        None => result.references.push(VariableReference {
            name: name.to_string(),
            first_offset: offset,
        }),
    }
}
