//! Hand-written tokenizer for schema DDL.
//!
//! The [`Lexer`] turns SQL text into a stream of [`Spanned`] tokens. Spans
//! are byte ranges into the input, so the parser can cut out verbatim text
//! such as a trigger body or a view's `SELECT`. Keywords are
//! case-insensitive; SQLite lets most of them double as identifiers, which
//! the parser handles by reading the span text back.

use std::ops::Range;

use crate::error::{HorizonError, Result};

/// Keywords the DDL grammar cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Abort,
    Action,
    After,
    Always,
    As,
    Asc,
    Autoincrement,
    Before,
    Begin,
    Cascade,
    Check,
    Collate,
    Conflict,
    Constraint,
    Create,
    Default,
    Deferrable,
    Delete,
    Desc,
    Drop,
    Each,
    End,
    Exists,
    Fail,
    For,
    Foreign,
    Generated,
    If,
    Ignore,
    Immediate,
    Index,
    Initially,
    Insert,
    Instead,
    Key,
    Match,
    No,
    Not,
    Null,
    Of,
    On,
    Primary,
    References,
    Replace,
    Restrict,
    Rollback,
    Row,
    Rowid,
    Set,
    Stored,
    Table,
    Temp,
    Temporary,
    Trigger,
    Unique,
    Update,
    Using,
    View,
    Virtual,
    When,
    Without,
}

/// A single token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // -----------------------------------------------------------------------
    // Words
    // -----------------------------------------------------------------------
    Keyword(Keyword),
    Identifier(String),

    // -----------------------------------------------------------------------
    // Literals
    // -----------------------------------------------------------------------
    IntegerLiteral(i64),
    RealLiteral(f64),
    StringLiteral(String),
    BlobLiteral(Vec<u8>),
    /// `?`, `?NNN`, `:name`, `@name` or `$name`, kept as written.
    Variable(String),

    // -----------------------------------------------------------------------
    // Operators & punctuation
    // -----------------------------------------------------------------------
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Dot,
    Pipe,
    PipePipe,
    Ampersand,
    Tilde,
    ShiftLeft,
    ShiftRight,

    /// End-of-input sentinel.
    Eof,
}

/// A token with the byte range it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

// ---------------------------------------------------------------------------
// Keyword lookup
// ---------------------------------------------------------------------------

fn keyword_token(word: &str) -> Option<Keyword> {
    // The input `word` is already uppercased by the caller.
    let kw = match word {
        "ABORT" => Keyword::Abort,
        "ACTION" => Keyword::Action,
        "AFTER" => Keyword::After,
        "ALWAYS" => Keyword::Always,
        "AS" => Keyword::As,
        "ASC" => Keyword::Asc,
        "AUTOINCREMENT" => Keyword::Autoincrement,
        "BEFORE" => Keyword::Before,
        "BEGIN" => Keyword::Begin,
        "CASCADE" => Keyword::Cascade,
        "CHECK" => Keyword::Check,
        "COLLATE" => Keyword::Collate,
        "CONFLICT" => Keyword::Conflict,
        "CONSTRAINT" => Keyword::Constraint,
        "CREATE" => Keyword::Create,
        "DEFAULT" => Keyword::Default,
        "DEFERRABLE" => Keyword::Deferrable,
        "DELETE" => Keyword::Delete,
        "DESC" => Keyword::Desc,
        "DROP" => Keyword::Drop,
        "EACH" => Keyword::Each,
        "END" => Keyword::End,
        "EXISTS" => Keyword::Exists,
        "FAIL" => Keyword::Fail,
        "FOR" => Keyword::For,
        "FOREIGN" => Keyword::Foreign,
        "GENERATED" => Keyword::Generated,
        "IF" => Keyword::If,
        "IGNORE" => Keyword::Ignore,
        "IMMEDIATE" => Keyword::Immediate,
        "INDEX" => Keyword::Index,
        "INITIALLY" => Keyword::Initially,
        "INSERT" => Keyword::Insert,
        "INSTEAD" => Keyword::Instead,
        "KEY" => Keyword::Key,
        "MATCH" => Keyword::Match,
        "NO" => Keyword::No,
        "NOT" => Keyword::Not,
        "NULL" => Keyword::Null,
        "OF" => Keyword::Of,
        "ON" => Keyword::On,
        "PRIMARY" => Keyword::Primary,
        "REFERENCES" => Keyword::References,
        "REPLACE" => Keyword::Replace,
        "RESTRICT" => Keyword::Restrict,
        "ROLLBACK" => Keyword::Rollback,
        "ROW" => Keyword::Row,
        "ROWID" => Keyword::Rowid,
        "SET" => Keyword::Set,
        "STORED" => Keyword::Stored,
        "TABLE" => Keyword::Table,
        "TEMP" => Keyword::Temp,
        "TEMPORARY" => Keyword::Temporary,
        "TRIGGER" => Keyword::Trigger,
        "UNIQUE" => Keyword::Unique,
        "UPDATE" => Keyword::Update,
        "USING" => Keyword::Using,
        "VIEW" => Keyword::View,
        "VIRTUAL" => Keyword::Virtual,
        "WHEN" => Keyword::When,
        "WITHOUT" => Keyword::Without,
        _ => return None,
    };
    Some(kw)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// A hand-written SQL tokenizer.
///
/// Create one with [`Lexer::new`], then call [`Lexer::tokenize`] to obtain
/// the full token stream (terminated by [`Token::Eof`]).
pub struct Lexer<'a> {
    src: &'a str,
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            src: input,
            input: input.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the entire input. The result always ends with
    /// [`Token::Eof`], whose span is the empty range at the end.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let start = self.pos;
            let token = self.next_token()?;
            let is_eof = token == Token::Eof;
            tokens.push(Spanned {
                token,
                span: start..self.pos,
            });
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    // -- helpers ------------------------------------------------------------

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.input.get(self.pos).copied()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }

    /// Skip `-- line comments` and `/* block comments */`, returning `true`
    /// if a comment was consumed.
    fn skip_comment(&mut self) -> Result<bool> {
        if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
            self.pos += 2;
            self.skip_while(|c| c != b'\n');
            return Ok(true);
        }
        if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'*') {
            self.pos += 2;
            loop {
                match self.peek() {
                    None => {
                        return Err(HorizonError::InvalidSql("unterminated block comment".into()));
                    }
                    Some(b'*') if self.peek_at(1) == Some(b'/') => {
                        self.pos += 2;
                        break;
                    }
                    _ => self.pos += 1,
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            self.skip_while(|c| c.is_ascii_whitespace());
            if !self.skip_comment()? {
                return Ok(());
            }
        }
    }

    // -- main scanner -------------------------------------------------------

    fn next_token(&mut self) -> Result<Token> {
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            b'\'' => self.read_quoted(b'\'').map(Token::StringLiteral),
            b'"' | b'`' => self.read_quoted(ch).map(Token::Identifier),
            b'[' => self.read_bracketed(),
            b'x' | b'X' if self.peek_at(1) == Some(b'\'') => self.read_blob_literal(),
            b'0'..=b'9' => self.read_number(),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            b'?' | b':' | b'@' | b'$' => self.read_variable(),
            c if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 => {
                Ok(self.read_identifier_or_keyword())
            }
            _ => self.read_operator(),
        }
    }

    // -- literal readers ----------------------------------------------------

    /// Read text between `quote` characters, where a doubled quote stands
    /// for itself.
    fn read_quoted(&mut self, quote: u8) -> Result<String> {
        self.advance();
        let mut out = String::new();
        let mut chunk_start = self.pos;
        loop {
            match self.advance() {
                None => {
                    return Err(HorizonError::InvalidSql(format!(
                        "unterminated {} literal",
                        if quote == b'\'' { "string" } else { "quoted identifier" }
                    )));
                }
                Some(c) if c == quote => {
                    out.push_str(&self.src[chunk_start..self.pos - 1]);
                    if self.peek() == Some(quote) {
                        self.advance();
                        out.push(quote as char);
                        chunk_start = self.pos;
                    } else {
                        return Ok(out);
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn read_bracketed(&mut self) -> Result<Token> {
        self.advance();
        let start = self.pos;
        self.skip_while(|c| c != b']');
        if self.advance().is_none() {
            return Err(HorizonError::InvalidSql("unterminated [identifier]".into()));
        }
        Ok(Token::Identifier(self.src[start..self.pos - 1].to_string()))
    }

    fn read_blob_literal(&mut self) -> Result<Token> {
        self.pos += 2; // X'
        let start = self.pos;
        self.skip_while(|c| c != b'\'');
        let hex = &self.input[start..self.pos];
        if self.advance().is_none() {
            return Err(HorizonError::InvalidSql("unterminated blob literal".into()));
        }
        if hex.len() % 2 != 0 || !hex.iter().all(u8::is_ascii_hexdigit) {
            return Err(HorizonError::InvalidSql(format!(
                "malformed blob literal X'{}'",
                String::from_utf8_lossy(hex)
            )));
        }
        let bytes = hex
            .chunks(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect();
        Ok(Token::BlobLiteral(bytes))
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.pos;
        let mut is_real = false;

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits = self.pos;
            self.skip_while(|c| c.is_ascii_hexdigit());
            let text = &self.src[digits..self.pos];
            return u64::from_str_radix(text, 16)
                .map(|v| Token::IntegerLiteral(v as i64))
                .map_err(|_| HorizonError::InvalidSql(format!("invalid hex literal 0x{text}")));
        }

        self.skip_while(|c| c.is_ascii_digit());
        if self.peek() == Some(b'.') {
            is_real = true;
            self.advance();
            self.skip_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_real = true;
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(HorizonError::InvalidSql(
                    "invalid numeric literal: expected digit after exponent".into(),
                ));
            }
            self.skip_while(|c| c.is_ascii_digit());
        }

        let text = &self.src[start..self.pos];
        if !is_real {
            if let Ok(v) = text.parse::<i64>() {
                return Ok(Token::IntegerLiteral(v));
            }
        }
        // Integers too large for i64 become reals, as in SQLite.
        text.parse::<f64>()
            .map(Token::RealLiteral)
            .map_err(|_| HorizonError::InvalidSql(format!("invalid numeric literal: {text}")))
    }

    fn read_identifier_or_keyword(&mut self) -> Token {
        let start = self.pos;
        self.skip_while(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80);
        let word = &self.src[start..self.pos];
        match keyword_token(&word.to_ascii_uppercase()) {
            Some(kw) => Token::Keyword(kw),
            None => Token::Identifier(word.to_string()),
        }
    }

    fn read_variable(&mut self) -> Result<Token> {
        let start = self.pos;
        let sigil = self.advance();
        self.skip_while(|c| c.is_ascii_alphanumeric() || c == b'_');
        if sigil != Some(b'?') && self.pos == start + 1 {
            return Err(HorizonError::InvalidSql("variable name expected".into()));
        }
        Ok(Token::Variable(self.src[start..self.pos].to_string()))
    }

    fn read_operator(&mut self) -> Result<Token> {
        let Some(ch) = self.advance() else {
            return Ok(Token::Eof);
        };
        let token = match ch {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'(' => Token::LeftParen,
            b')' => Token::RightParen,
            b',' => Token::Comma,
            b';' => Token::Semicolon,
            b'.' => Token::Dot,
            b'&' => Token::Ampersand,
            b'~' => Token::Tilde,
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                }
                Token::Eq
            }
            b'!' if self.peek() == Some(b'=') => {
                self.advance();
                Token::NotEq
            }
            b'<' => match self.peek() {
                Some(b'=') => {
                    self.advance();
                    Token::LtEq
                }
                Some(b'>') => {
                    self.advance();
                    Token::NotEq
                }
                Some(b'<') => {
                    self.advance();
                    Token::ShiftLeft
                }
                _ => Token::Lt,
            },
            b'>' => match self.peek() {
                Some(b'=') => {
                    self.advance();
                    Token::GtEq
                }
                Some(b'>') => {
                    self.advance();
                    Token::ShiftRight
                }
                _ => Token::Gt,
            },
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.advance();
                    Token::PipePipe
                } else {
                    Token::Pipe
                }
            }
            _ => {
                return Err(HorizonError::InvalidSql(format!(
                    "unrecognized token: \"{}\"",
                    ch as char
                )))
            }
        };
        Ok(token)
    }
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            lex("create Table iNdEx"),
            vec![
                Token::Keyword(Keyword::Create),
                Token::Keyword(Keyword::Table),
                Token::Keyword(Keyword::Index),
                Token::Eof
            ]
        );
    }

    #[test]
    fn quoted_identifiers_never_become_keywords() {
        assert_eq!(
            lex(r#""table" `index` [drop]"#),
            vec![
                Token::Identifier("table".into()),
                Token::Identifier("index".into()),
                Token::Identifier("drop".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn string_literal_with_escape_and_unicode() {
        assert_eq!(
            lex("'it''s ünïcode'"),
            vec![Token::StringLiteral("it's ünïcode".into()), Token::Eof]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex("42 3.5 1e3 0x1F 99999999999999999999"),
            vec![
                Token::IntegerLiteral(42),
                Token::RealLiteral(3.5),
                Token::RealLiteral(1000.0),
                Token::IntegerLiteral(31),
                Token::RealLiteral(99999999999999999999.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn blob_literal() {
        assert_eq!(
            lex("x'CAfe'"),
            vec![Token::BlobLiteral(vec![0xCA, 0xFE]), Token::Eof]
        );
        assert!(Lexer::new("x'abc'").tokenize().is_err());
    }

    #[test]
    fn spans_cover_the_source_text() {
        let sql = "CREATE  TRIGGER t -- note\n BEGIN x; END";
        let tokens = Lexer::new(sql).tokenize().unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| &sql[t.span.clone()]).collect();
        assert_eq!(texts, vec!["CREATE", "TRIGGER", "t", "BEGIN", "x", ";", "END", ""]);
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex("<> != <= >= == || << >>"),
            vec![
                Token::NotEq,
                Token::NotEq,
                Token::LtEq,
                Token::GtEq,
                Token::Eq,
                Token::PipePipe,
                Token::ShiftLeft,
                Token::ShiftRight,
                Token::Eof
            ]
        );
    }

    #[test]
    fn variables() {
        assert_eq!(
            lex("? ?3 :name"),
            vec![
                Token::Variable("?".into()),
                Token::Variable("?3".into()),
                Token::Variable(":name".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn unterminated_input_is_an_error() {
        assert!(Lexer::new("'abc").tokenize().is_err());
        assert!(Lexer::new("/* abc").tokenize().is_err());
        assert!(Lexer::new("\"abc").tokenize().is_err());
        assert!(Lexer::new("#").tokenize().is_err());
    }
}
