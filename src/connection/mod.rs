//! Connections and their per-connection state.
//!
//! A [`Connection`] owns a mutex around a [`ConnectionContext`]. Every
//! operation that touches storage or the catalog is a method on the
//! context, so it can only run while [`Connection::lock`]'s guard is held.
//!
//! ```no_run
//! use horizon_storage::{Config, Connection, Value, MAIN_DB};
//!
//! # fn main() -> horizon_storage::Result<()> {
//! let conn = Connection::open("app.hdb", Config::default())?;
//! let mut ctx = conn.lock()?;
//! ctx.execute_ddl("CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT UNIQUE)")?;
//! ctx.insert_row(MAIN_DB, "users", None, vec![Value::Null, Value::Text("ada".into())])?;
//! ctx.drop_table("users", None, false, false)?;
//! # Ok(())
//! # }
//! ```

mod ddl;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::btree::Btree;
use crate::catalog::auth::{AuthAction, AuthDecision, Authorizer};
use crate::catalog::init::{DdlParser, InitData, SchemaLoader};
use crate::catalog::schema_table::read_raw_rows;
use crate::catalog::{name_key, Catalog, ObjectStats, TableKind, MAIN_DB, TEMP_DB};
use crate::error::{HorizonError, Result};
use crate::pager::{Pager, DEFAULT_MAX_PAGE_COUNT};
use crate::trigger::TriggerProgram;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Open every file database read-only.
    pub read_only: bool,
    /// Initial page-cache hint for each database. Negative values are
    /// KiB, positive values pages.
    pub cache_size: i32,
    /// Page ceiling for each database.
    pub max_page_count: u32,
    /// Bound-check root pages while replaying the schema.
    pub extra_schema_checks: bool,
    /// Tolerate bad autoindex root pages while replaying the schema.
    pub writable_schema: bool,
    pub foreign_keys: bool,
    /// Count deleted rows in [`ConnectionContext::changes`].
    pub count_changes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_only: false,
            cache_size: -2000,
            max_page_count: DEFAULT_MAX_PAGE_COUNT,
            extra_schema_checks: true,
            writable_schema: false,
            foreign_keys: true,
            count_changes: true,
        }
    }
}

impl Config {
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_cache_size(mut self, cache_size: i32) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_max_page_count(mut self, max_page_count: u32) -> Self {
        self.max_page_count = max_page_count;
        self
    }

    pub fn with_extra_schema_checks(mut self, on: bool) -> Self {
        self.extra_schema_checks = on;
        self
    }

    pub fn with_writable_schema(mut self, on: bool) -> Self {
        self.writable_schema = on;
        self
    }

    pub fn with_foreign_keys(mut self, on: bool) -> Self {
        self.foreign_keys = on;
        self
    }

    pub fn with_count_changes(mut self, on: bool) -> Self {
        self.count_changes = on;
        self
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A database connection. Thread-safe via internal locking.
#[derive(Debug)]
pub struct Connection {
    inner: Mutex<ConnectionContext>,
}

impl Connection {
    /// Open or create the database file at `path` as `main`.
    ///
    /// The schema is replayed before this returns; a corrupt schema
    /// refuses the open.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let pager = Pager::open(path, config.read_only)?;
        let ctx = ConnectionContext::new(pager, Some(path.to_path_buf()), config)?;
        info!(path = %path.display(), "opened database");
        Ok(Connection {
            inner: Mutex::new(ctx),
        })
    }

    /// Open a fresh in-memory `main` database.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let ctx = ConnectionContext::new(Pager::in_memory()?, None, config)?;
        Ok(Connection {
            inner: Mutex::new(ctx),
        })
    }

    /// Acquire the connection for one top-level operation.
    pub fn lock(&self) -> Result<ConnectionGuard<'_>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| HorizonError::Internal("mutex poisoned".into()))?;
        Ok(ConnectionGuard { guard })
    }

    /// Flush every database and close the connection.
    pub fn close(self) -> Result<()> {
        let mut ctx = self
            .inner
            .into_inner()
            .map_err(|_| HorizonError::Internal("mutex poisoned".into()))?;
        ctx.flush_all()
    }
}

/// Exclusive access to a connection's state.
pub struct ConnectionGuard<'a> {
    guard: MutexGuard<'a, ConnectionContext>,
}

impl Deref for ConnectionGuard<'_> {
    type Target = ConnectionContext;

    fn deref(&self) -> &ConnectionContext {
        &self.guard
    }
}

impl DerefMut for ConnectionGuard<'_> {
    fn deref_mut(&mut self) -> &mut ConnectionContext {
        &mut self.guard
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// One open database file (or in-memory database).
struct DbHandle {
    path: Option<PathBuf>,
    btree: Btree,
}

impl DbHandle {
    fn open(pager: Pager, path: Option<PathBuf>, config: &Config) -> Result<Self> {
        let mut btree = Btree::open(pager, config.cache_size)?;
        btree.set_max_page_count(config.max_page_count);
        Ok(DbHandle { path, btree })
    }
}

/// Everything a connection owns: its databases, the catalog and the hooks.
pub struct ConnectionContext {
    pub(crate) config: Config,
    dbs: Vec<DbHandle>,
    pub(crate) catalog: Catalog,
    authorizer: Option<Box<dyn Authorizer>>,
    pub(crate) trigger_programs: HashMap<String, TriggerProgram>,
    /// Triggers currently running, innermost last.
    pub(crate) firing: Vec<String>,
    pub(crate) oom: bool,
    pub(crate) changes: u64,
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("config", &self.config)
            .field("databases", &self.dbs.len())
            .field("oom", &self.oom)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

impl ConnectionContext {
    fn new(main: Pager, path: Option<PathBuf>, config: Config) -> Result<Self> {
        let main = DbHandle::open(main, path, &config)?;
        let temp = DbHandle::open(Pager::in_memory()?, None, &config)?;
        let mut ctx = ConnectionContext {
            config,
            dbs: vec![main, temp],
            catalog: Catalog::new(),
            authorizer: None,
            trigger_programs: HashMap::new(),
            firing: Vec::new(),
            oom: false,
            changes: 0,
        };
        ctx.load_schema(MAIN_DB)?;
        Ok(ctx)
    }

    /// Replay the schema table of database `db` into the catalog.
    fn load_schema(&mut self, db: usize) -> Result<InitData> {
        let btree = self.btree(db)?;
        let rows = read_raw_rows(btree)?;
        let mut init = InitData::new(db, btree.page_count().saturating_sub(1));
        init.extra_checks = self.config.extra_schema_checks;
        init.writable_schema = self.config.writable_schema;

        let parser = DdlParser;
        let mut loader = SchemaLoader::new(&mut self.catalog, &parser, &mut self.oom, init);
        for row in &rows {
            let columns: Vec<Option<&str>> = row.iter().map(Option::as_deref).collect();
            if loader.on_row(Some(columns.as_slice())).is_break() {
                break;
            }
        }
        loader.finish()
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The B-tree layer of database `db`.
    pub fn btree(&mut self, db: usize) -> Result<&mut Btree> {
        self.dbs
            .get_mut(db)
            .map(|d| &mut d.btree)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such database: {db}")))
    }

    /// File backing database `db`, `None` for in-memory databases.
    pub fn db_path(&self, db: usize) -> Option<&Path> {
        self.dbs.get(db).and_then(|d| d.path.as_deref())
    }

    /// Index of the database called `name`.
    pub fn resolve_db(&self, name: &str) -> Result<usize> {
        self.catalog
            .db_index(name)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("unknown database {name}")))
    }

    /// Rows deleted through this connection while change counting is on.
    pub fn changes(&self) -> u64 {
        self.changes
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.oom
    }

    /// Put the connection into (or take it out of) the out-of-memory
    /// state. While set, DDL fails with [`HorizonError::OutOfMemory`].
    pub fn set_out_of_memory(&mut self, oom: bool) {
        self.oom = oom;
    }

    pub fn set_authorizer(&mut self, authorizer: Option<Box<dyn Authorizer>>) {
        self.authorizer = authorizer;
    }

    /// Register the program run when the trigger `name` fires.
    pub fn register_trigger_program(&mut self, name: &str, program: TriggerProgram) {
        self.trigger_programs.insert(name_key(name), program);
    }

    /// Ask the authorizer. `Ok(false)` means skip silently.
    pub(crate) fn authorize(
        &self,
        action: AuthAction,
        arg1: &str,
        arg2: Option<&str>,
        db_name: &str,
    ) -> Result<bool> {
        let Some(auth) = &self.authorizer else {
            return Ok(true);
        };
        match auth.check(action, arg1, arg2, db_name) {
            AuthDecision::Allow => Ok(true),
            AuthDecision::Ignore => {
                debug!(%action, arg1, "authorizer ignored operation");
                Ok(false)
            }
            AuthDecision::Deny => Err(HorizonError::AuthDenied(format!("{action} {arg1}"))),
        }
    }

    // ---------------------------------------------------------------------
    // Databases
    // ---------------------------------------------------------------------

    /// Attach a database under `name`: the file at `path`, or a fresh
    /// in-memory database. Returns its index.
    #[tracing::instrument(skip_all, fields(name = %name), level = "debug")]
    pub fn attach(&mut self, name: &str, path: Option<&Path>) -> Result<usize> {
        if self.oom {
            return Err(HorizonError::OutOfMemory);
        }
        if self.catalog.db_index(name).is_some() {
            return Err(HorizonError::InvalidSql(format!("database {name} is already in use")));
        }
        let pager = match path {
            Some(p) => Pager::open(p, self.config.read_only)?,
            None => Pager::in_memory()?,
        };
        let handle = DbHandle::open(pager, path.map(Path::to_path_buf), &self.config)?;
        let db = self.catalog.push_schema(name);
        self.dbs.push(handle);
        if let Err(e) = self.load_schema(db) {
            self.dbs.pop();
            self.catalog.remove_schema(db)?;
            return Err(e);
        }
        debug!(db, "attached database");
        Ok(db)
    }

    /// Detach a previously attached database.
    pub fn detach(&mut self, name: &str) -> Result<()> {
        let db = self
            .catalog
            .db_index(name)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such database: {name}")))?;
        if db <= TEMP_DB {
            return Err(HorizonError::InvalidSql(format!("cannot detach database {name}")));
        }
        self.btree(db)?.flush()?;
        self.catalog.remove_schema(db)?;
        self.dbs.remove(db);
        debug!(name, "detached database");
        Ok(())
    }

    /// Forward a cache-size hint for database `db` to its page cache.
    pub fn set_cache_size(&mut self, db: usize, mx_page: i32) -> Result<()> {
        self.btree(db)?.set_cache_size(mx_page)
    }

    pub fn cache_size(&mut self, db: usize) -> Result<i32> {
        Ok(self.btree(db)?.cache_size())
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Count the rows of every ordinary table in `db` (or only `table`)
    /// and the entries of their indexes, storing the counts as statistics.
    pub fn analyze(&mut self, db: usize, table: Option<&str>) -> Result<()> {
        let schema = self.catalog.schema(db)?;
        let tables: Vec<_> = match table {
            Some(name) => vec![schema
                .table(name)
                .cloned()
                .ok_or_else(|| HorizonError::NoSuchObject(format!("no such table: {name}")))?],
            None => schema
                .tables()
                .filter(|t| t.kind == TableKind::Ordinary)
                .cloned()
                .collect(),
        };
        let mut targets: Vec<(String, u32)> = Vec::new();
        for t in tables.iter().filter(|t| t.kind == TableKind::Ordinary) {
            targets.push((t.name.clone(), t.storage_root()?));
            for index in schema.indexes_of(&t.name) {
                targets.push((index.name.clone(), index.storage_root()?));
            }
        }

        let btree = self.btree(db)?;
        let mut counted = Vec::with_capacity(targets.len());
        for (name, root) in targets {
            let entries = btree.count_entries(root)?;
            counted.push((name, ObjectStats { entries }));
        }
        let schema = self.catalog.schema_mut(db)?;
        for (name, stats) in counted {
            schema.set_stats(&name, stats);
        }
        Ok(())
    }

    /// Check database `db`: the structure of every tree, and that each
    /// index holds exactly one entry per table row. Returns the problems
    /// found; an empty list means the database is sound.
    pub fn integrity_check(&mut self, db: usize) -> Result<Vec<String>> {
        let schema = self.catalog.schema(db)?.clone();
        let mut roots = vec![crate::pager::SCHEMA_ROOT];
        for t in schema.tables().filter(|t| t.kind == TableKind::Ordinary) {
            roots.push(t.root);
        }
        roots.extend(schema.indexes().map(|i| i.root));
        let mut problems = self.btree(db)?.integrity_check(&roots)?;
        if !problems.is_empty() {
            return Ok(problems);
        }

        for table in schema.tables().filter(|t| t.kind == TableKind::Ordinary) {
            let rows = self.scan_rows(db, &table.name)?;
            for index in schema.indexes_of(&table.name) {
                let entries = self.index_entries(db, &index.name)?;
                if entries.len() != rows.len() {
                    problems.push(format!(
                        "wrong # of entries in index {}: {} for {} rows",
                        index.name,
                        entries.len(),
                        rows.len()
                    ));
                }
                let keys: std::collections::HashSet<Vec<u8>> = entries
                    .iter()
                    .map(|(values, rowid)| crate::record::encode_index_key(values, *rowid))
                    .collect();
                for (rowid, row) in &rows {
                    let key = crate::record::encode_index_key(&crate::dml::index_values(index, row), *rowid);
                    if !keys.contains(&key) {
                        problems.push(format!("row {rowid} missing from index {}", index.name));
                    }
                }
            }
        }
        Ok(problems)
    }

    fn flush_all(&mut self) -> Result<()> {
        for handle in &mut self.dbs {
            handle.btree.flush()?;
        }
        Ok(())
    }

    /// Write every dirty page of every database back to its store.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::TempDir;

    #[test]
    fn cache_hints_pass_through_unchanged() {
        let conn = Connection::open_in_memory(Config::default()).unwrap();
        let mut ctx = conn.lock().unwrap();
        assert_eq!(ctx.cache_size(MAIN_DB).unwrap(), -2000);
        for hint in [0, 1234, -64] {
            ctx.set_cache_size(MAIN_DB, hint).unwrap();
            assert_eq!(ctx.cache_size(MAIN_DB).unwrap(), hint);
        }
        assert!(ctx.set_cache_size(7, 10).is_err());
    }

    #[test]
    fn schema_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.hdb");
        {
            let conn = Connection::open(&path, Config::default()).unwrap();
            {
                let mut ctx = conn.lock().unwrap();
                ctx.execute_ddl("CREATE TABLE t(id INTEGER PRIMARY KEY, a TEXT UNIQUE, b)").unwrap();
                ctx.execute_ddl("CREATE INDEX t_b ON t(b)").unwrap();
                ctx.execute_ddl("CREATE VIEW v AS SELECT a FROM t").unwrap();
                ctx.insert_row(MAIN_DB, "t", None, vec![Value::Null, Value::Text("x".into()), Value::Integer(3)])
                    .unwrap();
            }
            conn.close().unwrap();
        }

        let conn = Connection::open(&path, Config::default()).unwrap();
        let mut ctx = conn.lock().unwrap();
        let before_root = ctx.catalog().find_index("sqlite_autoindex_t_1", None).unwrap().root;
        assert!(before_root >= 2);
        assert!(ctx.catalog().find_table("v", None).unwrap().is_view());
        assert_eq!(ctx.scan_rows(MAIN_DB, "t").unwrap().len(), 1);
        assert!(ctx.integrity_check(MAIN_DB).unwrap().is_empty());
        assert_eq!(ctx.db_path(MAIN_DB), Some(path.as_path()));
    }

    #[test]
    fn attach_and_detach() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aux.hdb");
        let conn = Connection::open_in_memory(Config::default()).unwrap();
        let mut ctx = conn.lock().unwrap();
        let aux = ctx.attach("aux", Some(&path)).unwrap();
        assert_eq!(aux, 2);
        assert!(ctx.attach("AUX", None).is_err());
        assert!(ctx.attach("main", None).is_err());

        ctx.execute_ddl("CREATE TABLE aux.t(a)").unwrap();
        assert_eq!(ctx.catalog().find_table("t", None).unwrap().db, aux);
        ctx.insert_row(aux, "t", None, vec![Value::Integer(1)]).unwrap();

        ctx.detach("aux").unwrap();
        assert!(ctx.catalog().find_table("t", None).is_none());
        assert!(ctx.detach("temp").is_err());
        assert!(ctx.detach("aux").is_err());

        let aux = ctx.attach("again", Some(&path)).unwrap();
        assert_eq!(ctx.scan_rows(aux, "t").unwrap().len(), 1);
    }

    #[test]
    fn analyze_counts_rows_and_index_entries() {
        let conn = Connection::open_in_memory(Config::default()).unwrap();
        let mut ctx = conn.lock().unwrap();
        ctx.execute_ddl("CREATE TABLE t(a UNIQUE)").unwrap();
        for i in 0..25 {
            ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(i)]).unwrap();
        }
        ctx.analyze(MAIN_DB, None).unwrap();
        let schema = ctx.catalog().schema(MAIN_DB).unwrap();
        assert_eq!(schema.stats("t"), Some(ObjectStats { entries: 25 }));
        assert_eq!(schema.stats("sqlite_autoindex_t_1"), Some(ObjectStats { entries: 25 }));
        assert!(ctx.analyze(MAIN_DB, Some("nope")).is_err());
    }

    #[test]
    fn integrity_check_finds_missing_index_entries() {
        let conn = Connection::open_in_memory(Config::default()).unwrap();
        let mut ctx = conn.lock().unwrap();
        ctx.execute_ddl("CREATE TABLE t(a)").unwrap();
        ctx.execute_ddl("CREATE INDEX t_a ON t(a)").unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(1)]).unwrap();
        let root = ctx.catalog().find_index("t_a", None).unwrap().root;
        ctx.btree(MAIN_DB).unwrap().clear_tree(root).unwrap();

        let problems = ctx.integrity_check(MAIN_DB).unwrap();
        assert!(problems.iter().any(|p| p.contains("wrong # of entries in index t_a")));
        assert!(problems.iter().any(|p| p == "row 1 missing from index t_a"));
    }

    #[test]
    fn poisoned_mutex_is_an_error() {
        let conn = std::sync::Arc::new(Connection::open_in_memory(Config::default()).unwrap());
        let c = std::sync::Arc::clone(&conn);
        let _ = std::thread::spawn(move || {
            let _guard = c.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(matches!(conn.lock(), Err(HorizonError::Internal(_))));
    }
}
