//! Recursive-descent parser for schema DDL.
//!
//! Only the statements that can appear in the schema table (and their
//! `DROP` counterparts) are understood. Expressions are never evaluated:
//! `CHECK` constraints, non-literal defaults, `WHEN` clauses, trigger bodies
//! and view queries are kept as source text.

use std::ops::Range;

use crate::error::{HorizonError, Result};
use crate::types::Value;

use super::lexer::{Keyword, Lexer, Spanned, Token};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// A possibly schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    CreateView(CreateView),
    CreateTrigger(CreateTrigger),
    CreateVirtualTable(CreateVirtualTable),
    Drop(DropStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: QualifiedName,
    pub temp: bool,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    pub without_rowid: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type exactly as written, words joined by single spaces.
    pub type_name: String,
    pub primary_key: bool,
    pub pk_desc: bool,
    pub autoincrement: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub references: Option<ForeignKeyClause>,
}

/// A column default.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Literal(Value),
    /// Anything that would need evaluation, kept as source text.
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    PrimaryKey { columns: Vec<String> },
    Unique { columns: Vec<String> },
    ForeignKey { columns: Vec<String>, clause: ForeignKeyClause },
    Check,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyClause {
    pub table: String,
    /// Empty when the parent's primary key is meant.
    pub columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// Action taken on child rows when a parent row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: QualifiedName,
    pub unique: bool,
    pub if_not_exists: bool,
    pub table: String,
    pub columns: Vec<IndexedColumn>,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumn {
    pub name: String,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateView {
    pub name: QualifiedName,
    pub temp: bool,
    pub if_not_exists: bool,
    pub columns: Vec<String>,
    pub select: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    Delete,
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTrigger {
    pub name: QualifiedName,
    pub temp: bool,
    pub if_not_exists: bool,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub update_of: Vec<String>,
    pub table: String,
    pub when: Option<String>,
    pub body: String,
    /// Columns named as `OLD.col` in the `WHEN` clause or the body, in
    /// order of first appearance.
    pub old_columns: Vec<String>,
    /// Whether `OLD.*` appears.
    pub old_star: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVirtualTable {
    pub name: QualifiedName,
    pub if_not_exists: bool,
    pub module: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropKind {
    Table,
    View,
    Index,
    Trigger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropStatement {
    pub kind: DropKind,
    pub if_exists: bool,
    pub name: QualifiedName,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse one DDL statement. A trailing semicolon is allowed.
pub fn parse_ddl(sql: &str) -> Result<DdlStatement> {
    let tokens = Lexer::new(sql).tokenize()?;
    let mut parser = Parser {
        src: sql,
        tokens,
        pos: 0,
    };
    let stmt = parser.statement()?;
    parser.eat(&Token::Semicolon);
    if !parser.at_eof() {
        return Err(parser.error("unexpected text after statement"));
    }
    Ok(stmt)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

static EOF: Token = Token::Eof;

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    // -- token helpers ------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map_or(&EOF, |t| &t.token)
    }

    fn span(&self) -> Range<usize> {
        self.tokens
            .get(self.pos)
            .map_or(self.src.len()..self.src.len(), |t| t.span.clone())
    }

    fn at_eof(&self) -> bool {
        *self.peek() == Token::Eof
    }

    fn bump(&mut self) {
        if !self.at_eof() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&Token::Keyword(kw))
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", format!("{kw:?}").to_ascii_uppercase())))
        }
    }

    /// Whether the current token is the bare word `word`, keyword or not.
    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Keyword(_) | Token::Identifier(_))
            && self.src[self.span()].eq_ignore_ascii_case(word)
    }

    fn error(&self, msg: &str) -> HorizonError {
        let near = &self.src[self.span()];
        if near.is_empty() {
            HorizonError::InvalidSql(format!("{msg} at end of input"))
        } else {
            HorizonError::InvalidSql(format!("{msg} near \"{near}\""))
        }
    }

    /// An identifier. Keywords and string literals are accepted as names,
    /// as SQLite does outside of ambiguous positions.
    fn name(&mut self) -> Result<String> {
        let name = match self.peek() {
            Token::Identifier(s) | Token::StringLiteral(s) => s.clone(),
            Token::Keyword(_) => self.src[self.span()].to_string(),
            _ => return Err(self.error("expected a name")),
        };
        self.bump();
        Ok(name)
    }

    fn qualified_name(&mut self) -> Result<QualifiedName> {
        let first = self.name()?;
        if self.eat(&Token::Dot) {
            Ok(QualifiedName {
                schema: Some(first),
                name: self.name()?,
            })
        } else {
            Ok(QualifiedName {
                schema: None,
                name: first,
            })
        }
    }

    fn if_not_exists(&mut self) -> Result<bool> {
        if self.eat_kw(Keyword::If) {
            self.expect_kw(Keyword::Not)?;
            self.expect_kw(Keyword::Exists)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn name_list(&mut self) -> Result<Vec<String>> {
        self.expect(&Token::LeftParen, "(")?;
        let mut names = vec![self.name()?];
        while self.eat(&Token::Comma) {
            names.push(self.name()?);
        }
        self.expect(&Token::RightParen, ")")?;
        Ok(names)
    }

    /// Skip a parenthesised group, the opening parenthesis being current,
    /// and return the text between the parentheses.
    fn balanced(&mut self) -> Result<String> {
        let open = self.span();
        self.expect(&Token::LeftParen, "(")?;
        let mut depth = 1usize;
        loop {
            match self.peek() {
                Token::Eof => return Err(self.error("unbalanced parentheses")),
                Token::LeftParen => depth += 1,
                Token::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        let close = self.span();
                        self.bump();
                        return Ok(self.src[open.end..close.start].trim().to_string());
                    }
                }
                _ => {}
            }
            self.bump();
        }
    }

    /// Source text from the current token up to (not including) the first
    /// top-level token matching `stop`, or the end of input.
    fn text_until(&mut self, stop: impl Fn(&Token) -> bool) -> Result<String> {
        let start = self.span().start;
        let mut end = start;
        let mut depth = 0usize;
        loop {
            let tok = self.peek();
            if *tok == Token::Eof || (depth == 0 && stop(tok)) {
                break;
            }
            match tok {
                Token::LeftParen => depth += 1,
                Token::RightParen => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.error("unbalanced parentheses"))?;
                }
                _ => {}
            }
            end = self.span().end;
            self.bump();
        }
        Ok(self.src[start..end].trim().to_string())
    }

    // -- statements ---------------------------------------------------------

    fn statement(&mut self) -> Result<DdlStatement> {
        if self.eat_kw(Keyword::Create) {
            let temp = self.eat_kw(Keyword::Temp) || self.eat_kw(Keyword::Temporary);
            if self.eat_kw(Keyword::Table) {
                return self.create_table(temp).map(DdlStatement::CreateTable);
            }
            if self.eat_kw(Keyword::Unique) {
                self.expect_kw(Keyword::Index)?;
                return self.create_index(true).map(DdlStatement::CreateIndex);
            }
            if self.eat_kw(Keyword::Index) {
                return self.create_index(false).map(DdlStatement::CreateIndex);
            }
            if self.eat_kw(Keyword::View) {
                return self.create_view(temp).map(DdlStatement::CreateView);
            }
            if self.eat_kw(Keyword::Trigger) {
                return self.create_trigger(temp).map(DdlStatement::CreateTrigger);
            }
            if !temp && self.eat_kw(Keyword::Virtual) {
                self.expect_kw(Keyword::Table)?;
                return self
                    .create_virtual_table()
                    .map(DdlStatement::CreateVirtualTable);
            }
            return Err(self.error("expected TABLE, INDEX, VIEW, TRIGGER or VIRTUAL TABLE"));
        }
        if self.eat_kw(Keyword::Drop) {
            return self.drop().map(DdlStatement::Drop);
        }
        Err(self.error("expected CREATE or DROP"))
    }

    fn drop(&mut self) -> Result<DropStatement> {
        let kind = if self.eat_kw(Keyword::Table) {
            DropKind::Table
        } else if self.eat_kw(Keyword::View) {
            DropKind::View
        } else if self.eat_kw(Keyword::Index) {
            DropKind::Index
        } else if self.eat_kw(Keyword::Trigger) {
            DropKind::Trigger
        } else {
            return Err(self.error("expected TABLE, VIEW, INDEX or TRIGGER"));
        };
        let if_exists = if self.eat_kw(Keyword::If) {
            self.expect_kw(Keyword::Exists)?;
            true
        } else {
            false
        };
        Ok(DropStatement {
            kind,
            if_exists,
            name: self.qualified_name()?,
        })
    }

    // -- CREATE TABLE -------------------------------------------------------

    fn create_table(&mut self, temp: bool) -> Result<CreateTable> {
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;
        if self.eat_kw(Keyword::As) {
            return Err(HorizonError::InvalidSql(
                "CREATE TABLE ... AS SELECT is not supported".into(),
            ));
        }
        self.expect(&Token::LeftParen, "(")?;

        let mut columns = Vec::new();
        let mut constraints = Vec::new();
        loop {
            if self.at_table_constraint() {
                constraints.push(self.table_constraint()?);
            } else if constraints.is_empty() {
                columns.push(self.column_def()?);
            } else {
                return Err(self.error("column definitions must precede table constraints"));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RightParen, ")")?;
        if columns.is_empty() {
            return Err(self.error("a table needs at least one column"));
        }

        let mut without_rowid = false;
        if self.eat_kw(Keyword::Without) {
            self.expect_kw(Keyword::Rowid)?;
            without_rowid = true;
        }

        Ok(CreateTable {
            name,
            temp,
            if_not_exists,
            columns,
            constraints,
            without_rowid,
        })
    }

    fn at_table_constraint(&self) -> bool {
        matches!(
            self.peek(),
            Token::Keyword(
                Keyword::Constraint
                    | Keyword::Primary
                    | Keyword::Unique
                    | Keyword::Check
                    | Keyword::Foreign
            )
        )
    }

    fn column_def(&mut self) -> Result<ColumnDef> {
        let name = self.name()?;
        let mut words = Vec::new();
        while let Token::Identifier(word) = self.peek() {
            words.push(word.clone());
            self.bump();
        }
        let mut type_name = words.join(" ");
        if *self.peek() == Token::LeftParen {
            let size = self.balanced()?;
            type_name = format!("{type_name}({size})");
        }

        let mut col = ColumnDef {
            name,
            type_name,
            primary_key: false,
            pk_desc: false,
            autoincrement: false,
            not_null: false,
            unique: false,
            default: None,
            references: None,
        };

        loop {
            if self.eat_kw(Keyword::Constraint) {
                self.name()?;
            }
            match self.peek() {
                Token::Keyword(Keyword::Primary) => {
                    self.bump();
                    self.expect_kw(Keyword::Key)?;
                    if self.eat_kw(Keyword::Desc) {
                        col.pk_desc = true;
                    } else {
                        self.eat_kw(Keyword::Asc);
                    }
                    self.conflict_clause()?;
                    col.autoincrement = self.eat_kw(Keyword::Autoincrement);
                    col.primary_key = true;
                }
                Token::Keyword(Keyword::Not) => {
                    self.bump();
                    self.expect_kw(Keyword::Null)?;
                    self.conflict_clause()?;
                    col.not_null = true;
                }
                Token::Keyword(Keyword::Null) => self.bump(),
                Token::Keyword(Keyword::Unique) => {
                    self.bump();
                    self.conflict_clause()?;
                    col.unique = true;
                }
                Token::Keyword(Keyword::Check) => {
                    self.bump();
                    self.balanced()?;
                }
                Token::Keyword(Keyword::Default) => {
                    self.bump();
                    col.default = Some(self.default_value()?);
                }
                Token::Keyword(Keyword::Collate) => {
                    self.bump();
                    self.name()?;
                }
                Token::Keyword(Keyword::References) => {
                    col.references = Some(self.foreign_key_clause()?);
                }
                Token::Keyword(Keyword::Generated | Keyword::As) => {
                    if self.eat_kw(Keyword::Generated) {
                        self.expect_kw(Keyword::Always)?;
                    }
                    self.expect_kw(Keyword::As)?;
                    self.balanced()?;
                    if !self.eat_kw(Keyword::Stored) {
                        self.eat_kw(Keyword::Virtual);
                    }
                }
                _ => return Ok(col),
            }
        }
    }

    fn conflict_clause(&mut self) -> Result<()> {
        if *self.peek() == Token::Keyword(Keyword::On) && *self.peek_at(1) == Token::Keyword(Keyword::Conflict) {
            self.bump();
            self.bump();
            match self.peek() {
                Token::Keyword(
                    Keyword::Rollback | Keyword::Abort | Keyword::Fail | Keyword::Ignore | Keyword::Replace,
                ) => self.bump(),
                _ => return Err(self.error("expected a conflict resolution")),
            }
        }
        Ok(())
    }

    fn default_value(&mut self) -> Result<DefaultValue> {
        if *self.peek() == Token::LeftParen {
            return self.balanced().map(DefaultValue::Expr);
        }
        let negate = if self.eat(&Token::Minus) {
            true
        } else {
            self.eat(&Token::Plus);
            false
        };
        let value = match self.peek().clone() {
            Token::IntegerLiteral(v) => Value::Integer(if negate { v.wrapping_neg() } else { v }),
            Token::RealLiteral(v) => Value::Real(if negate { -v } else { v }),
            Token::StringLiteral(s) if !negate => Value::Text(s),
            Token::BlobLiteral(b) if !negate => Value::Blob(b),
            Token::Keyword(Keyword::Null) if !negate => Value::Null,
            Token::Identifier(_) | Token::Keyword(_) if !negate => {
                let text = self.src[self.span()].to_string();
                self.bump();
                return Ok(DefaultValue::Expr(text));
            }
            _ => return Err(self.error("expected a default value")),
        };
        self.bump();
        Ok(DefaultValue::Literal(value))
    }

    fn table_constraint(&mut self) -> Result<TableConstraint> {
        if self.eat_kw(Keyword::Constraint) {
            self.name()?;
        }
        if self.eat_kw(Keyword::Primary) {
            self.expect_kw(Keyword::Key)?;
            let columns = self.indexed_columns()?.into_iter().map(|c| c.name).collect();
            self.conflict_clause()?;
            return Ok(TableConstraint::PrimaryKey { columns });
        }
        if self.eat_kw(Keyword::Unique) {
            let columns = self.indexed_columns()?.into_iter().map(|c| c.name).collect();
            self.conflict_clause()?;
            return Ok(TableConstraint::Unique { columns });
        }
        if self.eat_kw(Keyword::Check) {
            self.balanced()?;
            return Ok(TableConstraint::Check);
        }
        if self.eat_kw(Keyword::Foreign) {
            self.expect_kw(Keyword::Key)?;
            let columns = self.name_list()?;
            let clause = self.foreign_key_clause()?;
            return Ok(TableConstraint::ForeignKey { columns, clause });
        }
        Err(self.error("expected a table constraint"))
    }

    fn foreign_key_clause(&mut self) -> Result<ForeignKeyClause> {
        self.expect_kw(Keyword::References)?;
        let table = self.name()?;
        let columns = if *self.peek() == Token::LeftParen {
            self.name_list()?
        } else {
            Vec::new()
        };
        let mut clause = ForeignKeyClause {
            table,
            columns,
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        };

        loop {
            if self.eat_kw(Keyword::On) {
                let on_delete = if self.eat_kw(Keyword::Delete) {
                    true
                } else {
                    self.expect_kw(Keyword::Update)?;
                    false
                };
                let action = self.fk_action()?;
                if on_delete {
                    clause.on_delete = action;
                } else {
                    clause.on_update = action;
                }
            } else if self.eat_kw(Keyword::Match) {
                self.name()?;
            } else if *self.peek() == Token::Keyword(Keyword::Deferrable)
                || (*self.peek() == Token::Keyword(Keyword::Not)
                    && *self.peek_at(1) == Token::Keyword(Keyword::Deferrable))
            {
                self.eat_kw(Keyword::Not);
                self.bump();
                if self.eat_kw(Keyword::Initially) && !self.eat_kw(Keyword::Immediate) {
                    self.name()?;
                }
            } else {
                return Ok(clause);
            }
        }
    }

    fn fk_action(&mut self) -> Result<FkAction> {
        if self.eat_kw(Keyword::Set) {
            if self.eat_kw(Keyword::Null) {
                return Ok(FkAction::SetNull);
            }
            self.expect_kw(Keyword::Default)?;
            return Ok(FkAction::SetDefault);
        }
        if self.eat_kw(Keyword::Cascade) {
            return Ok(FkAction::Cascade);
        }
        if self.eat_kw(Keyword::Restrict) {
            return Ok(FkAction::Restrict);
        }
        if self.eat_kw(Keyword::No) {
            self.expect_kw(Keyword::Action)?;
            return Ok(FkAction::NoAction);
        }
        Err(self.error("expected a foreign key action"))
    }

    // -- CREATE INDEX -------------------------------------------------------

    fn create_index(&mut self, unique: bool) -> Result<CreateIndex> {
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;
        self.expect_kw(Keyword::On)?;
        let table = self.name()?;
        let columns = self.indexed_columns()?;
        let where_clause = if self.at_word("WHERE") {
            self.bump();
            Some(self.text_until(|t| *t == Token::Semicolon)?)
        } else {
            None
        };
        Ok(CreateIndex {
            name,
            unique,
            if_not_exists,
            table,
            columns,
            where_clause,
        })
    }

    fn indexed_columns(&mut self) -> Result<Vec<IndexedColumn>> {
        self.expect(&Token::LeftParen, "(")?;
        let mut columns = Vec::new();
        loop {
            let name = self.name()?;
            if !matches!(
                self.peek(),
                Token::Comma | Token::RightParen | Token::Keyword(Keyword::Collate | Keyword::Asc | Keyword::Desc)
            ) {
                return Err(self.error("indexes on expressions are not supported"));
            }
            if self.eat_kw(Keyword::Collate) {
                self.name()?;
            }
            let desc = self.eat_kw(Keyword::Desc);
            if !desc {
                self.eat_kw(Keyword::Asc);
            }
            columns.push(IndexedColumn { name, desc });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RightParen, ")")?;
        Ok(columns)
    }

    // -- CREATE VIEW --------------------------------------------------------

    fn create_view(&mut self, temp: bool) -> Result<CreateView> {
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;
        let columns = if *self.peek() == Token::LeftParen {
            self.name_list()?
        } else {
            Vec::new()
        };
        self.expect_kw(Keyword::As)?;
        let select = self.text_until(|t| *t == Token::Semicolon)?;
        if select.is_empty() {
            return Err(self.error("expected a SELECT"));
        }
        Ok(CreateView {
            name,
            temp,
            if_not_exists,
            columns,
            select,
        })
    }

    // -- CREATE TRIGGER -----------------------------------------------------

    fn create_trigger(&mut self, temp: bool) -> Result<CreateTrigger> {
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;

        let timing = if self.eat_kw(Keyword::Before) {
            TriggerTiming::Before
        } else if self.eat_kw(Keyword::After) {
            TriggerTiming::After
        } else if self.eat_kw(Keyword::Instead) {
            self.expect_kw(Keyword::Of)?;
            TriggerTiming::InsteadOf
        } else {
            TriggerTiming::Before
        };

        let mut update_of = Vec::new();
        let event = if self.eat_kw(Keyword::Delete) {
            TriggerEvent::Delete
        } else if self.eat_kw(Keyword::Insert) {
            TriggerEvent::Insert
        } else if self.eat_kw(Keyword::Update) {
            if self.eat_kw(Keyword::Of) {
                update_of.push(self.name()?);
                while self.eat(&Token::Comma) {
                    update_of.push(self.name()?);
                }
            }
            TriggerEvent::Update
        } else {
            return Err(self.error("expected DELETE, INSERT or UPDATE"));
        };

        self.expect_kw(Keyword::On)?;
        let table = self.name()?;
        if self.eat_kw(Keyword::For) {
            self.expect_kw(Keyword::Each)?;
            self.expect_kw(Keyword::Row)?;
        }

        let when_start = self.pos;
        let when = if self.eat_kw(Keyword::When) {
            Some(self.text_until(|t| *t == Token::Keyword(Keyword::Begin))?)
        } else {
            None
        };
        self.expect_kw(Keyword::Begin)?;
        let body_start = self.pos;

        // The body runs to the last END of the statement; CASE ... END may
        // nest inside it.
        let end = self
            .tokens
            .iter()
            .rposition(|t| t.token == Token::Keyword(Keyword::End))
            .filter(|&i| i >= body_start)
            .ok_or_else(|| self.error("trigger body has no END"))?;
        let body_from = self.span().start;
        let body_to = self.tokens[end].span.start;
        let body = self.src[body_from..body_to].trim().to_string();
        if body.is_empty() {
            return Err(self.error("trigger body is empty"));
        }

        let (old_columns, old_star) = self.old_references(when_start..end);
        self.pos = end + 1;

        Ok(CreateTrigger {
            name,
            temp,
            if_not_exists,
            timing,
            event,
            update_of,
            table,
            when,
            body,
            old_columns,
            old_star,
        })
    }

    /// Collect `OLD.col` and `OLD.*` references among tokens `range`.
    fn old_references(&self, range: Range<usize>) -> (Vec<String>, bool) {
        let mut columns: Vec<String> = Vec::new();
        let mut star = false;
        let tokens = &self.tokens[range];
        for window in tokens.windows(3) {
            let is_old = matches!(&window[0].token, Token::Identifier(s) if s.eq_ignore_ascii_case("old"))
                && !self.src[window[0].span.clone()].starts_with(['"', '`', '[']);
            if !is_old || window[1].token != Token::Dot {
                continue;
            }
            match &window[2].token {
                Token::Star => star = true,
                Token::Identifier(name) | Token::StringLiteral(name) => {
                    if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                        columns.push(name.clone());
                    }
                }
                Token::Keyword(_) => {
                    let name = &self.src[window[2].span.clone()];
                    if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                        columns.push(name.to_string());
                    }
                }
                _ => {}
            }
        }
        (columns, star)
    }

    // -- CREATE VIRTUAL TABLE -----------------------------------------------

    fn create_virtual_table(&mut self) -> Result<CreateVirtualTable> {
        let if_not_exists = self.if_not_exists()?;
        let name = self.qualified_name()?;
        self.expect_kw(Keyword::Using)?;
        let module = self.name()?;
        let mut args = Vec::new();
        if self.eat(&Token::LeftParen) {
            loop {
                let arg = self.text_until(|t| matches!(t, Token::Comma | Token::RightParen))?;
                if !arg.is_empty() {
                    args.push(arg);
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RightParen, ")")?;
        }
        Ok(CreateVirtualTable {
            name,
            if_not_exists,
            module,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(sql: &str) -> CreateTable {
        match parse_ddl(sql).unwrap() {
            DdlStatement::CreateTable(t) => t,
            other => panic!("expected CREATE TABLE, got {other:?}"),
        }
    }

    #[test]
    fn create_table_with_column_constraints() {
        let t = table(
            "CREATE TABLE t1(a INTEGER PRIMARY KEY AUTOINCREMENT, b VARCHAR(20) NOT NULL UNIQUE, \
             c REAL DEFAULT -1.5, d TEXT DEFAULT 'x', e DEFAULT CURRENT_TIMESTAMP)",
        );
        assert_eq!(t.name.name, "t1");
        assert_eq!(t.columns.len(), 5);
        assert!(t.columns[0].primary_key && t.columns[0].autoincrement);
        assert_eq!(t.columns[0].type_name, "INTEGER");
        assert_eq!(t.columns[1].type_name, "VARCHAR(20)");
        assert!(t.columns[1].not_null && t.columns[1].unique);
        assert_eq!(t.columns[2].default, Some(DefaultValue::Literal(Value::Real(-1.5))));
        assert_eq!(t.columns[3].default, Some(DefaultValue::Literal(Value::Text("x".into()))));
        assert_eq!(t.columns[4].type_name, "");
        assert_eq!(
            t.columns[4].default,
            Some(DefaultValue::Expr("CURRENT_TIMESTAMP".into()))
        );
    }

    #[test]
    fn create_table_with_table_constraints() {
        let t = table(
            "create temp table if not exists main.child(id, pid, x, \
             CONSTRAINT pk PRIMARY KEY (id, x), UNIQUE(x), CHECK (x > 0), \
             FOREIGN KEY (pid) REFERENCES parent(id) ON DELETE CASCADE ON UPDATE SET NULL \
             DEFERRABLE INITIALLY DEFERRED);",
        );
        assert!(t.temp && t.if_not_exists);
        assert_eq!(t.name.schema.as_deref(), Some("main"));
        assert_eq!(
            t.constraints[0],
            TableConstraint::PrimaryKey {
                columns: vec!["id".into(), "x".into()]
            }
        );
        assert_eq!(t.constraints[2], TableConstraint::Check);
        let TableConstraint::ForeignKey { columns, clause } = &t.constraints[3] else {
            panic!("expected a foreign key");
        };
        assert_eq!(columns, &vec!["pid".to_string()]);
        assert_eq!(clause.table, "parent");
        assert_eq!(clause.on_delete, FkAction::Cascade);
        assert_eq!(clause.on_update, FkAction::SetNull);
    }

    #[test]
    fn column_references_without_parent_columns() {
        let t = table("CREATE TABLE c(a REFERENCES p ON DELETE SET DEFAULT, b)");
        let fk = t.columns[0].references.as_ref().unwrap();
        assert!(fk.columns.is_empty());
        assert_eq!(fk.on_delete, FkAction::SetDefault);
        assert_eq!(t.columns[1].name, "b");
    }

    #[test]
    fn keywords_work_as_names() {
        let t = table("CREATE TABLE \"order\"(key TEXT, action INT, [row] BLOB)");
        assert_eq!(t.name.name, "order");
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["key", "action", "row"]);
    }

    #[test]
    fn create_index_variants() {
        let DdlStatement::CreateIndex(i) =
            parse_ddl("CREATE UNIQUE INDEX IF NOT EXISTS i1 ON t1(a DESC, b COLLATE nocase) WHERE a > 0").unwrap()
        else {
            panic!("expected CREATE INDEX");
        };
        assert!(i.unique && i.if_not_exists);
        assert_eq!(i.table, "t1");
        assert_eq!(
            i.columns,
            vec![
                IndexedColumn { name: "a".into(), desc: true },
                IndexedColumn { name: "b".into(), desc: false }
            ]
        );
        assert_eq!(i.where_clause.as_deref(), Some("a > 0"));

        assert!(parse_ddl("CREATE INDEX i2 ON t1(a + 1)").is_err());
    }

    #[test]
    fn create_view_keeps_select_text() {
        let DdlStatement::CreateView(v) = parse_ddl("CREATE VIEW v(x) AS SELECT a FROM t WHERE (a) > 1;").unwrap() else {
            panic!("expected CREATE VIEW");
        };
        assert_eq!(v.columns, vec!["x".to_string()]);
        assert_eq!(v.select, "SELECT a FROM t WHERE (a) > 1");
    }

    #[test]
    fn create_trigger_collects_old_references() {
        let sql = "CREATE TRIGGER tr AFTER DELETE ON t1 FOR EACH ROW WHEN old.a > 0 BEGIN \
                   INSERT INTO log VALUES (OLD.b, CASE WHEN OLD.a THEN 1 ELSE 0 END); END";
        let DdlStatement::CreateTrigger(tr) = parse_ddl(sql).unwrap() else {
            panic!("expected CREATE TRIGGER");
        };
        assert_eq!(tr.timing, TriggerTiming::After);
        assert_eq!(tr.event, TriggerEvent::Delete);
        assert_eq!(tr.table, "t1");
        assert_eq!(tr.when.as_deref(), Some("old.a > 0"));
        assert_eq!(
            tr.body,
            "INSERT INTO log VALUES (OLD.b, CASE WHEN OLD.a THEN 1 ELSE 0 END);"
        );
        assert_eq!(tr.old_columns, vec!["a".to_string(), "b".to_string()]);
        assert!(!tr.old_star);
    }

    #[test]
    fn trigger_defaults_to_before() {
        let DdlStatement::CreateTrigger(tr) =
            parse_ddl("CREATE TRIGGER tr UPDATE OF a, b ON t BEGIN SELECT OLD.*; END").unwrap()
        else {
            panic!("expected CREATE TRIGGER");
        };
        assert_eq!(tr.timing, TriggerTiming::Before);
        assert_eq!(tr.update_of, vec!["a".to_string(), "b".to_string()]);
        assert!(tr.old_star);
    }

    #[test]
    fn create_virtual_table_splits_arguments() {
        let DdlStatement::CreateVirtualTable(v) =
            parse_ddl("CREATE VIRTUAL TABLE docs USING fts5(title, body, tokenize = 'porter')").unwrap()
        else {
            panic!("expected CREATE VIRTUAL TABLE");
        };
        assert_eq!(v.module, "fts5");
        assert_eq!(v.args, vec!["title", "body", "tokenize = 'porter'"]);
    }

    #[test]
    fn drop_statements() {
        assert_eq!(
            parse_ddl("DROP INDEX IF EXISTS aux.i1").unwrap(),
            DdlStatement::Drop(DropStatement {
                kind: DropKind::Index,
                if_exists: true,
                name: QualifiedName {
                    schema: Some("aux".into()),
                    name: "i1".into()
                },
            })
        );
        assert!(matches!(
            parse_ddl("drop view v").unwrap(),
            DdlStatement::Drop(DropStatement { kind: DropKind::View, if_exists: false, .. })
        ));
    }

    #[test]
    fn garbage_is_rejected_with_position() {
        let err = parse_ddl("CREATE TABLE t(a,").unwrap_err();
        assert!(matches!(err, HorizonError::InvalidSql(ref m) if m.contains("end of input")));
        assert!(parse_ddl("SELECT 1").is_err());
        assert!(parse_ddl("CREATE TABLE t(a) garbage").is_err());
    }
}
