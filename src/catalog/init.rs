//! Schema replay.
//!
//! Opening a database reads every row of its schema table and hands it to
//! [`SchemaLoader::on_row`], which rebuilds the in-memory descriptors. The
//! callback never fails: problems are recorded in [`InitData`] and replay
//! goes on, so one pass reports the first corruption while still loading
//! everything else. [`SchemaLoader::finish`] turns the aggregate into the
//! result of the open.
//!
//! | Row                              | Action                                  |
//! |----------------------------------|-----------------------------------------|
//! | no columns                       | ignored                                 |
//! | connection out of memory         | corrupt, stop                           |
//! | `rootpage` missing               | corrupt                                 |
//! | `sql` starts with `CR`           | parse, build descriptor                 |
//! | empty `sql`                      | assign root page of an autoindex        |
//! | anything else                    | corrupt                                 |

use std::ops::ControlFlow;

use tracing::{debug, warn};

use super::{Catalog, IndexDef, TableDef, TriggerDef};
use crate::error::{ErrorCode, HorizonError, Result};
use crate::pager::PageId;
use crate::sql::ddl::{
    parse_ddl, CreateIndex, CreateTable, CreateTrigger, CreateView, CreateVirtualTable, DdlStatement,
};

/// The statement behind one schema row, as returned by a
/// [`SchemaObjectParser`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedObject {
    Table(CreateTable),
    Index(CreateIndex),
    View(CreateView),
    Trigger(CreateTrigger),
    VirtualTable(CreateVirtualTable),
}

/// Turns stored `CREATE` text into a [`ParsedObject`].
pub trait SchemaObjectParser {
    fn parse_schema_object(&self, sql: &str, root: PageId) -> Result<ParsedObject>;
}

/// The default parser, backed by [`parse_ddl`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlParser;

impl SchemaObjectParser for DdlParser {
    fn parse_schema_object(&self, sql: &str, _root: PageId) -> Result<ParsedObject> {
        match parse_ddl(sql)? {
            DdlStatement::CreateTable(t) => Ok(ParsedObject::Table(t)),
            DdlStatement::CreateIndex(i) => Ok(ParsedObject::Index(i)),
            DdlStatement::CreateView(v) => Ok(ParsedObject::View(v)),
            DdlStatement::CreateTrigger(t) => Ok(ParsedObject::Trigger(t)),
            DdlStatement::CreateVirtualTable(v) => Ok(ParsedObject::VirtualTable(v)),
            DdlStatement::Drop(_) => Err(HorizonError::InvalidSql(
                "schema row does not hold a CREATE statement".into(),
            )),
        }
    }
}

/// Accumulated state of one replay pass.
#[derive(Debug, Clone, PartialEq)]
pub struct InitData {
    /// Database being loaded.
    pub db: usize,
    /// Largest valid page number; `0` disables the upper bound.
    pub mx_page: u32,
    pub extra_checks: bool,
    pub writable_schema: bool,
    /// Worst outcome so far.
    pub rc: ErrorCode,
    pub corrupt: bool,
    /// First corruption message. Later ones are dropped.
    pub first_error: Option<String>,
    /// Rows seen, including rejected ones.
    pub rows: usize,
}

impl InitData {
    pub fn new(db: usize, mx_page: u32) -> Self {
        InitData {
            db,
            mx_page,
            extra_checks: true,
            writable_schema: false,
            rc: ErrorCode::Ok,
            corrupt: false,
            first_error: None,
            rows: 0,
        }
    }
}

/// Column positions of a schema row.
const NAME: usize = 1;
const TBL_NAME: usize = 2;
const ROOTPAGE: usize = 3;
const SQL: usize = 4;

/// Strict unsigned 32-bit parse: decimal digits only.
fn parse_root(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Replays schema rows into one database of a [`Catalog`].
pub struct SchemaLoader<'a> {
    catalog: &'a mut Catalog,
    parser: &'a dyn SchemaObjectParser,
    /// The connection-wide out-of-memory flag.
    oom: &'a mut bool,
    pub init: InitData,
}

impl<'a> SchemaLoader<'a> {
    pub fn new(
        catalog: &'a mut Catalog,
        parser: &'a dyn SchemaObjectParser,
        oom: &'a mut bool,
        init: InitData,
    ) -> Self {
        SchemaLoader {
            catalog,
            parser,
            oom,
            init,
        }
    }

    /// Process one schema row: `[type, name, tbl_name, rootpage, sql]`.
    ///
    /// Missing trailing columns read as `None`.
    pub fn on_row(&mut self, columns: Option<&[Option<&str>]>) -> ControlFlow<()> {
        let Some(columns) = columns else {
            return ControlFlow::Continue(());
        };
        let col = |i: usize| columns.get(i).copied().flatten();

        self.init.rows += 1;
        if *self.oom {
            self.corrupt_schema(col(NAME), None);
            return ControlFlow::Break(());
        }

        let Some(rootpage) = col(ROOTPAGE) else {
            self.corrupt_schema(col(NAME), None);
            return ControlFlow::Continue(());
        };

        match col(SQL) {
            Some(sql) if sql.len() >= 2 && sql.as_bytes()[..2].eq_ignore_ascii_case(b"cr") => {
                self.replay_create(col(NAME), rootpage, sql);
            }
            sql => {
                let name = col(NAME).filter(|n| !n.is_empty());
                match name {
                    Some(name) if sql.map_or(true, str::is_empty) => {
                        self.replay_autoindex(name, col(TBL_NAME), rootpage);
                    }
                    _ => self.corrupt_schema(name, None),
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn replay_create(&mut self, name: Option<&str>, rootpage: &str, sql: &str) {
        let root = match parse_root(rootpage) {
            Some(root) if !(self.init.mx_page > 0 && root > self.init.mx_page) => root,
            parsed => {
                if self.init.extra_checks {
                    self.corrupt_schema(name, Some("invalid rootpage"));
                    return;
                }
                parsed.unwrap_or(0)
            }
        };

        let parsed = match self.parser.parse_schema_object(sql, root) {
            Ok(parsed) => parsed,
            Err(err) => return self.replay_failed(name, err),
        };
        let has_storage = matches!(parsed, ParsedObject::Table(_) | ParsedObject::Index(_));
        if has_storage && !self.init.writable_schema && !self.root_is_free(root) {
            self.corrupt_schema(name, Some("invalid rootpage"));
            return;
        }
        if let Err(err) = self.install(parsed, root, sql) {
            self.replay_failed(name, err);
        }
    }

    /// A table or index root must lie past the schema page and belong to
    /// nobody else.
    fn root_is_free(&self, root: PageId) -> bool {
        root >= 2
            && self
                .catalog
                .schema(self.init.db)
                .map_or(false, |schema| schema.root_owner(root).is_none())
    }

    fn replay_failed(&mut self, name: Option<&str>, err: HorizonError) {
        match err {
            HorizonError::OutOfMemory => {
                self.raise(ErrorCode::NoMem);
                *self.oom = true;
            }
            err @ (HorizonError::Interrupted | HorizonError::Locked(_)) => {
                debug!(error = %err, "schema replay skipped a row");
                self.raise(err.code());
            }
            err => {
                let text = err.to_string();
                self.corrupt_schema(name, Some(&text));
            }
        }
    }

    /// Add the descriptor for a parsed `CREATE` to the catalog.
    fn install(&mut self, parsed: ParsedObject, root: PageId, sql: &str) -> Result<()> {
        let db = self.init.db;
        match parsed {
            ParsedObject::Table(stmt) => {
                let (table, autoindexes) = TableDef::from_create(db, root, &stmt, sql)?;
                let schema = self.catalog.schema_mut(db)?;
                schema.add_table(table)?;
                for index in autoindexes {
                    schema.add_index(index)?;
                }
            }
            ParsedObject::View(stmt) => {
                self.catalog
                    .schema_mut(db)?
                    .add_table(TableDef::from_view(db, &stmt, sql))?;
            }
            ParsedObject::VirtualTable(stmt) => {
                self.catalog
                    .schema_mut(db)?
                    .add_table(TableDef::from_virtual(db, &stmt, sql))?;
            }
            ParsedObject::Index(stmt) => {
                let schema = self.catalog.schema_mut(db)?;
                let table = schema
                    .table(&stmt.table)
                    .ok_or_else(|| HorizonError::NoSuchObject(format!("no such table: {}", stmt.table)))?;
                let index = IndexDef::from_create(db, root, &stmt, table, sql)?;
                schema.add_index(index)?;
            }
            ParsedObject::Trigger(stmt) => {
                let table_known = self.catalog.find_table(&stmt.table, Some(db)).is_some()
                    || self.catalog.find_table(&stmt.table, None).is_some();
                if !table_known {
                    debug!(trigger = %stmt.name.name, table = %stmt.table, "skipping orphan trigger");
                    return Ok(());
                }
                self.catalog
                    .schema_mut(db)?
                    .add_trigger(TriggerDef::from_create(db, &stmt, sql))?;
            }
        }
        Ok(())
    }

    /// A row with empty `sql` gives the root page of an autoindex created
    /// with its table.
    fn replay_autoindex(&mut self, name: &str, tbl_name: Option<&str>, rootpage: &str) {
        let db = self.init.db;
        let mx_page = self.init.mx_page;
        let (owned, valid) = match self.catalog.schema(db) {
            Ok(schema) => {
                let owned = matches!(
                    (schema.index(name), tbl_name),
                    (Some(index), Some(tbl)) if index.table.eq_ignore_ascii_case(tbl)
                );
                let valid = parse_root(rootpage).filter(|&root| {
                    root >= 2
                        && !(mx_page > 0 && root > mx_page)
                        && schema
                            .root_owner(root)
                            .map_or(true, |owner| owner.eq_ignore_ascii_case(name))
                });
                (owned, valid)
            }
            Err(_) => (false, None),
        };

        if !owned {
            self.corrupt_schema(Some(name), Some("orphan index"));
            return;
        }
        match valid {
            Some(root) => {
                if let Some(index) = self.catalog.schema_mut(db).ok().and_then(|s| s.index_mut(name)) {
                    index.root = root;
                }
            }
            None if !self.init.writable_schema => {
                self.corrupt_schema(Some(name), Some("invalid rootpage"));
            }
            None => {}
        }
    }

    fn raise(&mut self, code: ErrorCode) {
        if self.init.rc != ErrorCode::NoMem {
            self.init.rc = code;
        }
    }

    /// Record a corrupt row. Out of memory wins over corruption, and only
    /// the first message is kept.
    fn corrupt_schema(&mut self, name: Option<&str>, extra: Option<&str>) {
        self.init.corrupt = true;
        if *self.oom {
            self.init.rc = ErrorCode::NoMem;
            return;
        }
        let mut msg = format!("malformed database schema ({})", name.unwrap_or("?"));
        if let Some(extra) = extra {
            msg.push_str(" - ");
            msg.push_str(extra);
        }
        warn!(db = self.init.db, %msg, "schema row rejected");
        if self.init.first_error.is_none() {
            self.init.first_error = Some(msg);
            self.raise(ErrorCode::Corrupt);
        }
    }

    /// The outcome of the whole pass.
    pub fn finish(self) -> Result<InitData> {
        debug!(
            db = self.init.db,
            rows = self.init.rows,
            corrupt = self.init.corrupt,
            "schema replay finished"
        );
        if *self.oom || self.init.rc == ErrorCode::NoMem {
            return Err(HorizonError::OutOfMemory);
        }
        if self.init.corrupt {
            let msg = self
                .init
                .first_error
                .clone()
                .unwrap_or_else(|| "malformed database schema".into());
            return Err(HorizonError::Corrupt(msg));
        }
        match self.init.rc {
            ErrorCode::Interrupt => Err(HorizonError::Interrupted),
            ErrorCode::Locked => Err(HorizonError::Locked("schema replay".into())),
            _ => Ok(self.init),
        }
    }
}
