//! Procedure header reading
//!
//! `sys.parameters` has no usable default values for T-SQL procedures, so
//! defaults are read back from the definition text:
//!
//! ```sql
//! CREATE PROCEDURE [sales].[Search] @name NVARCHAR(50) = N'x', @total INT = 0 OUTPUT AS ...
//! CREATE OR ALTER PROC dbo.Load (@items [dbo].[IdList] READONLY) AS ...
//! ```

use std::collections::BTreeMap;

use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::Token;

use super::names::parameter_key;
use super::token_cursor::{render_token, TokenCursor};

/// Name and parameter list of a `CREATE`/`ALTER PROCEDURE` statement
#[derive(Debug, Clone, Default)]
pub struct ProcedureHeader {
    pub schema: String,
    pub name: String,
    pub parameters: Vec<HeaderParameter>,
}

#[derive(Debug, Clone)]
pub struct HeaderParameter {
    /// Without the `@`
    pub name: String,
    /// `INT`, `DECIMAL(18,2)`, `[dbo].[IdList]`
    pub data_type: String,
    pub is_output: bool,
    pub is_readonly: bool,
    pub default_value: Option<String>,
}

/// Words that end a parameter's type or default value.
const MODIFIERS: [&str; 3] = ["READONLY", "OUTPUT", "OUT"];

fn is_modifier_or_body(token: &Token) -> bool {
    match token {
        Token::Word(w) => {
            matches!(w.keyword, Keyword::AS | Keyword::WITH | Keyword::BEGIN | Keyword::FOR)
                || MODIFIERS.iter().any(|m| w.value.eq_ignore_ascii_case(m))
        }
        _ => false,
    }
}

/// Reads the header of a procedure definition. `None` when the text does not
/// start with `CREATE [OR ALTER] PROC[EDURE]` or `ALTER PROC[EDURE]`.
pub fn parse_procedure_header(sql: &str) -> Option<ProcedureHeader> {
    let mut cursor = TokenCursor::new(sql)?;
    cursor.skip_trivia();

    if cursor.eat_keyword(Keyword::CREATE) {
        if cursor.eat_keyword(Keyword::OR) && !cursor.eat_keyword(Keyword::ALTER) {
            return None;
        }
    } else if !cursor.eat_keyword(Keyword::ALTER) {
        return None;
    }
    if !cursor.eat_keyword(Keyword::PROCEDURE) && !cursor.eat_word(&["PROC"]) {
        return None;
    }

    let (schema, name) = cursor.take_object_name()?;
    cursor.skip_trivia();
    let parameters = read_parameter_list(&mut cursor);
    Some(ProcedureHeader {
        schema,
        name,
        parameters,
    })
}

/// Parameters run until `AS` (or `WITH RECOMPILE`, `WITH EXECUTE AS`), and
/// may be wrapped in parentheses.
fn read_parameter_list(cursor: &mut TokenCursor) -> Vec<HeaderParameter> {
    let parenthesized = cursor.eat(&Token::LParen);
    let mut parameters = Vec::new();

    while !cursor.is_done()
        && !cursor.at_keyword(Keyword::AS)
        && !cursor.at_keyword(Keyword::WITH)
    {
        if parenthesized && cursor.eat(&Token::RParen) {
            break;
        }
        match read_parameter(cursor) {
            Some(parameter) => parameters.push(parameter),
            None => cursor.bump(),
        }
        cursor.skip_trivia();
        cursor.eat(&Token::Comma);
    }
    parameters
}

/// `@name [AS] type [VARYING] [= default] [READONLY] [OUT|OUTPUT]`, modifiers
/// in any order.
fn read_parameter(cursor: &mut TokenCursor) -> Option<HeaderParameter> {
    let name = match cursor.peek()? {
        Token::Word(w) if w.value.starts_with('@') => w.value[1..].to_string(),
        _ => return None,
    };
    cursor.bump();
    cursor.skip_trivia();
    cursor.eat_keyword(Keyword::AS);

    let data_type = read_data_type(cursor)?;
    cursor.skip_trivia();

    let mut parameter = HeaderParameter {
        name,
        data_type,
        is_output: false,
        is_readonly: false,
        default_value: None,
    };
    loop {
        if cursor.eat(&Token::Eq) {
            parameter.default_value = Some(read_default_value(cursor));
            cursor.skip_trivia();
        } else if cursor.eat_word(&["READONLY"]) {
            parameter.is_readonly = true;
        } else if cursor.eat_word(&["OUTPUT", "OUT"]) {
            parameter.is_output = true;
        } else if !cursor.eat_word(&["VARYING"]) {
            return Some(parameter);
        }
    }
}

/// Built-in types come back upper-cased with their facets; user types come
/// back bracketed as `[schema].[name]`.
fn read_data_type(cursor: &mut TokenCursor) -> Option<String> {
    let first = read_type_part(cursor)?;
    cursor.skip_trivia();
    let mut data_type = if cursor.eat(&Token::Period) {
        match read_type_part(cursor) {
            Some(second) => format!("[{}].[{}]", first, second),
            None => first,
        }
    } else {
        first.to_uppercase()
    };
    cursor.skip_trivia();

    if cursor.at(&Token::LParen) {
        cursor.bump();
        let mut facets = String::new();
        let mut depth = 1usize;
        while let Some(token) = cursor.peek() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => depth -= 1,
                _ => {}
            }
            if depth == 0 {
                cursor.bump();
                break;
            }
            if !matches!(token, Token::Whitespace(_)) {
                facets.push_str(&render_token(token));
            }
            cursor.bump();
        }
        data_type = format!("{}({})", data_type, facets);
    }
    Some(data_type)
}

fn read_type_part(cursor: &mut TokenCursor) -> Option<String> {
    if cursor.peek().is_some_and(is_modifier_or_body) {
        return None;
    }
    cursor.take_word()
}

/// Literal text up to the next top-level comma, closing parenthesis or
/// modifier. Whitespace runs collapse to one space.
fn read_default_value(cursor: &mut TokenCursor) -> String {
    let mut text = String::new();
    let mut depth = 0usize;
    while let Some(token) = cursor.peek() {
        match token {
            Token::RParen | Token::Comma if depth == 0 => break,
            Token::Word(_) if depth == 0 && is_modifier_or_body(token) => break,
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            _ => {}
        }
        match token {
            Token::Whitespace(_) => {
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
            other => text.push_str(&render_token(other)),
        }
        cursor.bump();
    }
    text.trim_end().to_string()
}

/// Default literals of a procedure's parameters keyed by [`parameter_key`].
/// Parameters without a default are absent.
pub fn procedure_parameter_defaults(definition: &str) -> BTreeMap<String, String> {
    parse_procedure_header(definition)
        .map(|header| header.parameters)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| Some((parameter_key(&p.name), p.default_value?)))
        .collect()
}
