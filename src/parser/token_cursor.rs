//! A cursor over MsSql-dialect tokens
//!
//! The header reader, the variable scanner and the temp-table reader all walk
//! the same token stream; they share this cursor instead of each re-implementing
//! lookahead and whitespace skipping.

use sqlparser::dialect::MsSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

pub struct TokenCursor {
    tokens: Vec<TokenWithSpan>,
    pos: usize,
    /// Char offset where each line starts; locations are 1-based (line, column)
    line_starts: Vec<usize>,
}

impl TokenCursor {
    /// Tokenizes `sql`; `None` when the text cannot be tokenized at all
    /// (an unterminated string or comment, typically).
    pub fn new(sql: &str) -> Option<Self> {
        let tokens = Tokenizer::new(&MsSqlDialect {}, sql)
            .tokenize_with_location()
            .ok()?;
        let line_starts = std::iter::once(0)
            .chain(
                sql.chars()
                    .enumerate()
                    .filter(|(_, ch)| *ch == '\n')
                    .map(|(offset, _)| offset + 1),
            )
            .collect();
        Some(Self {
            tokens,
            pos: 0,
            line_starts,
        })
    }

    pub fn tokens(&self) -> &[TokenWithSpan] {
        &self.tokens
    }

    /// Char offset of `location` within the tokenized text.
    pub fn offset_of(&self, location: Location) -> usize {
        let line = (location.line as usize).saturating_sub(1);
        let start = self.line_starts.get(line).copied().unwrap_or(0);
        start + (location.column as usize).saturating_sub(1)
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    pub fn bump(&mut self) {
        self.pos = (self.pos + 1).min(self.tokens.len());
    }

    /// Moves past whitespace and comments.
    pub fn skip_trivia(&mut self) {
        while matches!(self.peek(), Some(Token::Whitespace(_))) {
            self.bump();
        }
    }

    pub fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.keyword == keyword)
    }

    /// Matches a bare word regardless of case. sqlparser has no keyword for
    /// several T-SQL words (`PROC`, `READONLY`, `OUT`).
    pub fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.value.eq_ignore_ascii_case(word))
    }

    /// Matches on the token kind only, ignoring any payload.
    pub fn at(&self, kind: &Token) -> bool {
        self.peek()
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(kind))
    }

    /// Consumes `keyword` and trailing trivia when it is next.
    pub fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        let found = self.at_keyword(keyword);
        if found {
            self.bump();
            self.skip_trivia();
        }
        found
    }

    /// Consumes any of `words` and trailing trivia when one is next.
    pub fn eat_word(&mut self, words: &[&str]) -> bool {
        let found = words.iter().any(|w| self.at_word(w));
        if found {
            self.bump();
            self.skip_trivia();
        }
        found
    }

    /// Consumes a token of `kind` and trailing trivia when it is next.
    pub fn eat(&mut self, kind: &Token) -> bool {
        let found = self.at(kind);
        if found {
            self.bump();
            self.skip_trivia();
        }
        found
    }

    /// Consumes a word token, returning its unquoted value.
    pub fn take_word(&mut self) -> Option<String> {
        let Some(Token::Word(w)) = self.peek() else {
            return None;
        };
        let value = w.value.clone();
        self.bump();
        Some(value)
    }

    /// Reads `name`, `schema.name` or their bracketed forms. A missing schema
    /// is `dbo`.
    pub fn take_object_name(&mut self) -> Option<(String, String)> {
        let first = self.take_word()?;
        self.skip_trivia();
        if self.eat(&Token::Period) {
            Some((first, self.take_word()?))
        } else {
            Some(("dbo".to_string(), first))
        }
    }
}

/// T-SQL text of a single token. String literals get their quotes doubled
/// back; sqlparser's own rendering leaves them unescaped.
pub fn render_token(token: &Token) -> String {
    match token {
        Token::SingleQuotedString(s) => format!("'{}'", s.replace('\'', "''")),
        Token::NationalStringLiteral(s) => format!("N'{}'", s.replace('\'', "''")),
        Token::HexStringLiteral(s) => format!("0x{}", s),
        other => other.to_string(),
    }
}
