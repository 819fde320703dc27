//! Object and parameter names
//!
//! ```ignore
//! assert_eq!(quote_name("My]Table"), "[My]]Table]");
//! assert_eq!(split_qualified_name("[sales].[Order]", "dbo"), ("sales".into(), "Order".into()));
//! assert_eq!(parameter_name_for_column("OrderId"), "@orderId");
//! ```

/// Strips surrounding whitespace, brackets and double quotes.
pub fn normalize_identifier(ident: &str) -> String {
    ident
        .trim()
        .trim_start_matches(['[', '"'])
        .trim_end_matches([']', '"'])
        .to_string()
}

/// Brackets a bare identifier the way `QUOTENAME` does.
pub fn quote_name(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// Splits `schema.name` at the first dot outside brackets or quotes; either
/// part may be bracketed. A name without a dot gets `default_schema`.
pub fn split_qualified_name(name: &str, default_schema: &str) -> (String, String) {
    let trimmed = name.trim();
    let mut closing: Option<char> = None;
    for (i, ch) in trimmed.char_indices() {
        match (closing, ch) {
            (None, '[') => closing = Some(']'),
            (None, '"') => closing = Some('"'),
            (Some(end), _) if ch == end => closing = None,
            (None, '.') => {
                return (
                    normalize_identifier(&trimmed[..i]),
                    normalize_identifier(&trimmed[i + 1..]),
                )
            }
            _ => {}
        }
    }
    (default_schema.to_string(), normalize_identifier(trimmed))
}

/// `@` plus the column name with its first character lower-cased. Characters
/// a variable name cannot hold are dropped; a column with none left maps to `@p`.
pub fn parameter_name_for_column(column: &str) -> String {
    let mut chars = column.chars().filter(|c| c.is_alphanumeric() || *c == '_');
    match chars.next() {
        Some(first) => std::iter::once('@')
            .chain(first.to_lowercase())
            .chain(chars)
            .collect(),
        None => "@p".to_string(),
    }
}

/// Lower-cased name without the `@`, for case-insensitive lookups.
pub fn parameter_key(name: &str) -> String {
    name.trim_start_matches('@').to_lowercase()
}
