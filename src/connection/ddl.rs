//! `CREATE` statements and the DDL entry point.
//!
//! Each `CREATE` validates everything first, then allocates storage,
//! writes the schema rows and bumps the schema cookie. The catalog is
//! updated last.

use std::collections::HashSet;

use tracing::debug;

use super::ConnectionContext;
use crate::btree::{BtreePayload, InsertFlags, TreeKind};
use crate::catalog::schema_table::{append_row, SchemaRow};
use crate::catalog::{IndexDef, TableDef, MAIN_DB, TEMP_DB};
use crate::dml::index_values;
use crate::error::{HorizonError, Result};
use crate::record::{encode_index_key, encode_key_prefix};
use crate::sql::ddl::{
    parse_ddl, CreateIndex, CreateTable, CreateTrigger, CreateView, CreateVirtualTable,
    DdlStatement, DropKind, QualifiedName, TriggerTiming,
};
use crate::types::Value;

fn check_reserved(name: &str) -> Result<()> {
    if name.len() >= 7 && name.as_bytes()[..7].eq_ignore_ascii_case(b"sqlite_") {
        return Err(HorizonError::InvalidSql(format!(
            "object name reserved for internal use: {name}"
        )));
    }
    Ok(())
}

impl ConnectionContext {
    /// Run one `CREATE` or `DROP` statement.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        if self.oom {
            return Err(HorizonError::OutOfMemory);
        }
        let statement = parse_ddl(sql)?;
        let text = sql.trim().trim_end_matches(';').trim_end();
        match statement {
            DdlStatement::CreateTable(stmt) => self.create_table(&stmt, text),
            DdlStatement::CreateIndex(stmt) => self.create_index(&stmt, text),
            DdlStatement::CreateView(stmt) => self.create_view(&stmt, text),
            DdlStatement::CreateTrigger(stmt) => self.create_trigger(&stmt, text),
            DdlStatement::CreateVirtualTable(stmt) => self.create_virtual_table(&stmt, text),
            DdlStatement::Drop(stmt) => {
                let qualifier = stmt.name.schema.as_deref();
                let name = &stmt.name.name;
                match stmt.kind {
                    DropKind::Table => self.drop_table(name, qualifier, false, stmt.if_exists),
                    DropKind::View => self.drop_table(name, qualifier, true, stmt.if_exists),
                    DropKind::Index => self.drop_index(name, qualifier, stmt.if_exists),
                    DropKind::Trigger => self.drop_trigger(name, qualifier, stmt.if_exists),
                }
            }
        }
    }

    /// Database a new object goes to.
    fn create_target(&self, name: &QualifiedName, temp: bool) -> Result<usize> {
        match (&name.schema, temp) {
            (Some(db), true) if !db.eq_ignore_ascii_case("temp") => Err(HorizonError::InvalidSql(
                "temporary table name must be unqualified".into(),
            )),
            (_, true) => Ok(TEMP_DB),
            (Some(db), false) => self.resolve_db(db),
            (None, false) => Ok(MAIN_DB),
        }
    }

    /// `Ok(true)` when the name is free, `Ok(false)` when it is taken and
    /// `IF NOT EXISTS` was given.
    fn name_available(&self, db: usize, name: &str, if_not_exists: bool) -> Result<bool> {
        match self.catalog.schema(db)?.name_in_use(name) {
            None => Ok(true),
            Some(_) if if_not_exists => Ok(false),
            Some(kind) => Err(HorizonError::AlreadyExists(format!("{kind} {name}"))),
        }
    }

    fn read_only_check(&mut self, db: usize) -> Result<()> {
        if self.btree(db)?.is_read_only() {
            return Err(HorizonError::ReadOnly(format!(
                "database {} is read-only",
                self.catalog.db_name(db)
            )));
        }
        Ok(())
    }

    fn create_table(&mut self, stmt: &CreateTable, sql: &str) -> Result<()> {
        let db = self.create_target(&stmt.name, stmt.temp)?;
        let name = &stmt.name.name;
        check_reserved(name)?;
        if !self.name_available(db, name, stmt.if_not_exists)? {
            return Ok(());
        }
        let (mut table, mut autoindexes) = TableDef::from_create(db, 0, stmt, sql)?;
        self.read_only_check(db)?;

        let btree = self.btree(db)?;
        table.root = btree.create_tree(TreeKind::Table)?;
        for index in &mut autoindexes {
            index.root = btree.create_tree(TreeKind::Index)?;
        }
        append_row(btree, &SchemaRow::new("table", name, name, table.root, Some(sql)))?;
        for index in &autoindexes {
            append_row(btree, &SchemaRow::new("index", &index.name, name, index.root, None))?;
        }
        btree.bump_schema_cookie()?;

        let schema = self.catalog.schema_mut(db)?;
        schema.add_table(table)?;
        for index in autoindexes {
            schema.add_index(index)?;
        }
        debug!(db, table = %name, "created table");
        Ok(())
    }

    fn create_index(&mut self, stmt: &CreateIndex, sql: &str) -> Result<()> {
        let db = match &stmt.name.schema {
            Some(q) => self.resolve_db(q)?,
            None => self.catalog.find_table(&stmt.table, None).map_or(MAIN_DB, |t| t.db),
        };
        let name = &stmt.name.name;
        check_reserved(name)?;
        let table = self
            .catalog
            .schema(db)?
            .table(&stmt.table)
            .cloned()
            .ok_or_else(|| {
                HorizonError::NoSuchObject(format!(
                    "no such table: {}.{}",
                    self.catalog.db_name(db),
                    stmt.table
                ))
            })?;
        if !self.name_available(db, name, stmt.if_not_exists)? {
            return Ok(());
        }
        let mut index = IndexDef::from_create(db, 0, stmt, &table, sql)?;
        self.read_only_check(db)?;

        // Build the entries from the existing rows first so a UNIQUE
        // violation fails before anything is written.
        let rows = self.scan_rows(db, &table.name)?;
        let entries: Vec<(Vec<Value>, i64)> = rows
            .iter()
            .map(|(rowid, row)| (index_values(&index, row), *rowid))
            .collect();
        if index.unique {
            let mut seen = HashSet::new();
            for (values, _) in entries.iter().filter(|(v, _)| !v.iter().any(Value::is_null)) {
                if !seen.insert(encode_key_prefix(values)) {
                    return Err(HorizonError::ConstraintViolation(format!(
                        "UNIQUE constraint failed: {}",
                        index.describe_columns(&table)
                    )));
                }
            }
        }

        let btree = self.btree(db)?;
        index.root = btree.create_tree(TreeKind::Index)?;
        btree.with_cursor(index.root, TreeKind::Index, true, |bt, cur| {
            for (values, rowid) in &entries {
                let key = encode_index_key(values, *rowid);
                bt.insert(cur, &BtreePayload::index(key), InsertFlags::NONE, 0)?;
            }
            Ok(())
        })?;
        append_row(btree, &SchemaRow::new("index", name, &table.name, index.root, Some(sql)))?;
        btree.bump_schema_cookie()?;

        self.catalog.schema_mut(db)?.add_index(index)?;
        debug!(db, index = %name, entries = entries.len(), "created index");
        Ok(())
    }

    fn create_view(&mut self, stmt: &CreateView, sql: &str) -> Result<()> {
        let db = self.create_target(&stmt.name, stmt.temp)?;
        let name = &stmt.name.name;
        check_reserved(name)?;
        if !self.name_available(db, name, stmt.if_not_exists)? {
            return Ok(());
        }
        let view = TableDef::from_view(db, stmt, sql);
        self.read_only_check(db)?;

        let btree = self.btree(db)?;
        append_row(btree, &SchemaRow::new("view", name, name, 0, Some(sql)))?;
        btree.bump_schema_cookie()?;
        self.catalog.schema_mut(db)?.add_table(view)?;
        debug!(db, view = %name, "created view");
        Ok(())
    }

    fn create_trigger(&mut self, stmt: &CreateTrigger, sql: &str) -> Result<()> {
        let db = self.create_target(&stmt.name, stmt.temp)?;
        let name = &stmt.name.name;
        check_reserved(name)?;
        let lookup = if db == TEMP_DB { None } else { Some(db) };
        let table = self
            .catalog
            .find_table(&stmt.table, lookup)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such table: {}", stmt.table)))?;
        match (table.is_view(), stmt.timing) {
            (true, TriggerTiming::Before | TriggerTiming::After) => {
                return Err(HorizonError::InvalidSql(format!(
                    "cannot create {} trigger on view: {}",
                    if stmt.timing == TriggerTiming::Before { "BEFORE" } else { "AFTER" },
                    table.name
                )))
            }
            (false, TriggerTiming::InsteadOf) => {
                return Err(HorizonError::InvalidSql(format!(
                    "cannot create INSTEAD OF trigger on table: {}",
                    table.name
                )))
            }
            _ => {}
        }
        if self.catalog.schema(db)?.trigger(name).is_some() {
            if stmt.if_not_exists {
                return Ok(());
            }
            return Err(HorizonError::AlreadyExists(format!("trigger {name}")));
        }
        let trigger = crate::catalog::TriggerDef::from_create(db, stmt, sql);
        self.read_only_check(db)?;

        let btree = self.btree(db)?;
        append_row(btree, &SchemaRow::new("trigger", name, &trigger.table, 0, Some(sql)))?;
        btree.bump_schema_cookie()?;
        self.catalog.schema_mut(db)?.add_trigger(trigger)?;
        debug!(db, trigger = %name, "created trigger");
        Ok(())
    }

    fn create_virtual_table(&mut self, stmt: &CreateVirtualTable, sql: &str) -> Result<()> {
        let db = self.create_target(&stmt.name, false)?;
        let name = &stmt.name.name;
        check_reserved(name)?;
        if !self.name_available(db, name, stmt.if_not_exists)? {
            return Ok(());
        }
        let vtab = TableDef::from_virtual(db, stmt, sql);
        self.read_only_check(db)?;

        let btree = self.btree(db)?;
        append_row(btree, &SchemaRow::new("table", name, name, 0, Some(sql)))?;
        btree.bump_schema_cookie()?;
        self.catalog.schema_mut(db)?.add_table(vtab)?;
        debug!(db, table = %name, module = %stmt.module, "created virtual table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema_table::read_rows;
    use crate::connection::{Config, Connection};

    fn conn() -> Connection {
        Connection::open_in_memory(Config::default()).unwrap()
    }

    #[test]
    fn create_table_writes_schema_rows_and_autoindexes() {
        let conn = conn();
        let mut ctx = conn.lock().unwrap();
        let cookie = ctx.btree(MAIN_DB).unwrap().schema_cookie();
        ctx.execute_ddl("CREATE TABLE t(a TEXT PRIMARY KEY, b UNIQUE);").unwrap();
        assert_eq!(ctx.btree(MAIN_DB).unwrap().schema_cookie(), cookie + 1);

        let rows = read_rows(ctx.btree(MAIN_DB).unwrap()).unwrap();
        let summary: Vec<(&str, &str, bool)> = rows
            .iter()
            .map(|r| (r.kind.as_str(), r.name.as_str(), r.sql.is_some()))
            .collect();
        assert_eq!(
            summary,
            [
                ("table", "t", true),
                ("index", "sqlite_autoindex_t_1", false),
                ("index", "sqlite_autoindex_t_2", false),
            ]
        );
        assert_eq!(rows[0].sql.as_deref(), Some("CREATE TABLE t(a TEXT PRIMARY KEY, b UNIQUE)"));
        let index = ctx.catalog().find_index("sqlite_autoindex_t_1", None).unwrap();
        assert_eq!(i64::from(index.root), rows[1].rootpage);
    }

    #[test]
    fn names_are_checked() {
        let conn = conn();
        let mut ctx = conn.lock().unwrap();
        ctx.execute_ddl("CREATE TABLE t(a)").unwrap();
        let err = ctx.execute_ddl("CREATE TABLE T(b)").unwrap_err();
        assert_eq!(err.to_string(), "table T already exists");
        ctx.execute_ddl("CREATE TABLE IF NOT EXISTS t(b)").unwrap();
        assert!(matches!(ctx.execute_ddl("CREATE VIEW t AS SELECT 1"), Err(HorizonError::AlreadyExists(_))));
        assert!(matches!(ctx.execute_ddl("CREATE TABLE sqlite_x(a)"), Err(HorizonError::InvalidSql(_))));
        assert!(matches!(ctx.execute_ddl("CREATE TABLE nope.x(a)"), Err(HorizonError::NoSuchObject(_))));
    }

    #[test]
    fn unique_index_over_duplicates_fails_cleanly() {
        let conn = conn();
        let mut ctx = conn.lock().unwrap();
        ctx.execute_ddl("CREATE TABLE t(a)").unwrap();
        for v in [1, 2, 2] {
            ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(v)]).unwrap();
        }
        let catalog = ctx.catalog().clone();
        let pages = ctx.btree(MAIN_DB).unwrap().page_count();
        let err = ctx.execute_ddl("CREATE UNIQUE INDEX t_a ON t(a)").unwrap_err();
        assert_eq!(err.to_string(), "constraint failed: UNIQUE constraint failed: t.a");
        assert_eq!(*ctx.catalog(), catalog);
        assert_eq!(ctx.btree(MAIN_DB).unwrap().page_count(), pages);

        ctx.execute_ddl("CREATE INDEX t_a ON t(a)").unwrap();
        assert_eq!(ctx.index_entries(MAIN_DB, "t_a").unwrap().len(), 3);
    }

    #[test]
    fn trigger_targets_are_checked() {
        let conn = conn();
        let mut ctx = conn.lock().unwrap();
        ctx.execute_ddl("CREATE TABLE t(a)").unwrap();
        ctx.execute_ddl("CREATE VIEW v AS SELECT a FROM t").unwrap();
        assert!(ctx.execute_ddl("CREATE TRIGGER x BEFORE DELETE ON v BEGIN SELECT 1; END").is_err());
        assert!(ctx.execute_ddl("CREATE TRIGGER x INSTEAD OF DELETE ON t BEGIN SELECT 1; END").is_err());
        assert!(ctx.execute_ddl("CREATE TRIGGER x AFTER DELETE ON missing BEGIN SELECT 1; END").is_err());
        ctx.execute_ddl("CREATE TRIGGER x INSTEAD OF DELETE ON v BEGIN SELECT 1; END").unwrap();
        assert!(matches!(
            ctx.execute_ddl("CREATE TRIGGER x AFTER DELETE ON t BEGIN SELECT 1; END"),
            Err(HorizonError::AlreadyExists(_))
        ));
    }

    #[test]
    fn virtual_tables_have_no_storage() {
        let conn = conn();
        let mut ctx = conn.lock().unwrap();
        ctx.execute_ddl("CREATE VIRTUAL TABLE docs USING fts5(body)").unwrap();
        let docs = ctx.catalog().find_table("docs", None).unwrap();
        assert_eq!(docs.root, 0);
        assert_eq!(docs.module.as_deref(), Some("fts5"));
        ctx.execute_ddl("DROP TABLE docs").unwrap();
        assert!(ctx.catalog().find_table("docs", None).is_none());
    }

    #[test]
    fn read_only_databases_refuse_ddl() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ro.hdb");
        Connection::open(&path, Config::default()).unwrap().close().unwrap();
        let conn = Connection::open(&path, Config::default().with_read_only(true)).unwrap();
        let mut ctx = conn.lock().unwrap();
        assert!(matches!(ctx.execute_ddl("CREATE TABLE t(a)"), Err(HorizonError::ReadOnly(_))));
        assert!(ctx.catalog().find_table("t", None).is_none());
    }
}
