//! Schema catalog.
//!
//! The catalog is the in-memory mirror of every database's schema table.
//! One [`Schema`] exists per database handle on the connection:
//!
//! | Index | Database                         |
//! |-------|----------------------------------|
//! | `0`   | `main`                           |
//! | `1`   | `temp`                           |
//! | `2..` | attached databases, in order     |
//!
//! Inside a schema, tables and views share one namespace, indexes and
//! triggers have their own. All keys are lower-cased names; the
//! descriptors keep the names as written.
//!
//! Descriptors are built from parsed `CREATE` statements, either while
//! replaying the schema table at open time ([`init`]) or when DDL runs.
//! They are removed by the `DROP` state machines in [`drop`].
//!
//! # Key types
//!
//! - [`Catalog`]: every schema on the connection.
//! - [`TableDef`]: a table, view or virtual table.
//! - [`IndexDef`]: an index, application-defined or created for a
//!   constraint.
//! - [`TriggerDef`]: a trigger.
//! - [`SchemaObject`]: the result of a name lookup across all three.

pub mod auth;
pub mod drop;
pub mod init;
pub mod schema_table;

use std::collections::HashMap;

use crate::error::{HorizonError, Result};
use crate::pager::PageId;
use crate::sql::ddl::{
    CreateIndex, CreateTable, CreateTrigger, CreateView, CreateVirtualTable, DefaultValue,
    FkAction, TableConstraint, TriggerEvent, TriggerTiming,
};
use crate::types::{determine_affinity, DataType, Value};

/// Index of the `main` database.
pub const MAIN_DB: usize = 0;
/// Index of the `temp` database.
pub const TEMP_DB: usize = 1;

/// Lower-cased lookup key for an object name.
pub(crate) fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Name of the schema table of database `db`.
pub fn schema_table_name(db: usize) -> &'static str {
    if db == TEMP_DB {
        "sqlite_temp_schema"
    } else {
        "sqlite_schema"
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// One column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Declared type name as written, possibly empty.
    pub type_name: String,
    pub affinity: DataType,
    pub not_null: bool,
    pub default: Option<DefaultValue>,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl Column {
    /// The default as a value. Defaults that need evaluation read as NULL.
    pub fn default_value(&self) -> Value {
        match &self.default {
            Some(DefaultValue::Literal(v)) => v.clone(),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// A rowid table with its own B-tree.
    Ordinary,
    View,
    /// A virtual table. It has no storage in this engine.
    Virtual,
}

/// A foreign key owned by the child table.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Child column positions.
    pub columns: Vec<usize>,
    /// Parent table name.
    pub parent: String,
    /// Parent column names. Empty means the parent's primary key.
    pub parent_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// A table, view or virtual table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    /// Owning database index.
    pub db: usize,
    /// Root page of the table B-tree; `0` for views and virtual tables.
    pub root: PageId,
    pub columns: Vec<Column>,
    /// The `INTEGER PRIMARY KEY` column, stored as the rowid.
    pub rowid_alias: Option<usize>,
    pub kind: TableKind,
    pub foreign_keys: Vec<ForeignKey>,
    /// Virtual table module name.
    pub module: Option<String>,
    pub sql: String,
}

impl TableDef {
    /// Build a table descriptor and the autoindexes its constraints need.
    ///
    /// Autoindexes are numbered in declaration order and start with root
    /// page `0`; the caller assigns their storage.
    pub fn from_create(
        db: usize,
        root: PageId,
        stmt: &CreateTable,
        sql: &str,
    ) -> Result<(TableDef, Vec<IndexDef>)> {
        let name = &stmt.name.name;
        if stmt.without_rowid {
            return Err(HorizonError::InvalidSql(format!(
                "WITHOUT ROWID table {name} is not supported"
            )));
        }
        if stmt.columns.is_empty() {
            return Err(HorizonError::InvalidSql(format!(
                "table {name} has no columns"
            )));
        }

        let mut columns: Vec<Column> = Vec::with_capacity(stmt.columns.len());
        for col in &stmt.columns {
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(&col.name)) {
                return Err(HorizonError::InvalidSql(format!(
                    "duplicate column name: {}",
                    col.name
                )));
            }
            columns.push(Column {
                name: col.name.clone(),
                type_name: col.type_name.clone(),
                affinity: determine_affinity(&col.type_name),
                not_null: col.not_null,
                default: col.default.clone(),
                primary_key: false,
            });
        }

        let position = |col: &str| -> Result<usize> {
            columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(col))
                .ok_or_else(|| HorizonError::InvalidSql(format!("no such column: {col}")))
        };

        // Constraint keys in declaration order: column constraints first,
        // then table constraints.
        let mut keys: Vec<(IndexOrigin, Vec<usize>, bool)> = Vec::new();
        let mut foreign_keys = Vec::new();
        for (i, col) in stmt.columns.iter().enumerate() {
            if col.primary_key {
                keys.push((IndexOrigin::PrimaryKey, vec![i], col.pk_desc));
            }
            if col.unique {
                keys.push((IndexOrigin::Unique, vec![i], false));
            }
            if let Some(clause) = &col.references {
                foreign_keys.push(ForeignKey {
                    columns: vec![i],
                    parent: clause.table.clone(),
                    parent_columns: clause.columns.clone(),
                    on_delete: clause.on_delete,
                    on_update: clause.on_update,
                });
            }
        }
        for constraint in &stmt.constraints {
            match constraint {
                TableConstraint::PrimaryKey { columns: cols } => {
                    let cols = cols.iter().map(|c| position(c)).collect::<Result<Vec<_>>>()?;
                    keys.push((IndexOrigin::PrimaryKey, cols, false));
                }
                TableConstraint::Unique { columns: cols } => {
                    let cols = cols.iter().map(|c| position(c)).collect::<Result<Vec<_>>>()?;
                    keys.push((IndexOrigin::Unique, cols, false));
                }
                TableConstraint::ForeignKey { columns: cols, clause } => {
                    let cols = cols
                        .iter()
                        .map(|c| {
                            position(c).map_err(|_| {
                                HorizonError::InvalidSql(format!(
                                    "unknown column \"{c}\" in foreign key definition"
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    if !clause.columns.is_empty() && clause.columns.len() != cols.len() {
                        return Err(HorizonError::InvalidSql(format!(
                            "number of columns in foreign key does not match the number of columns in the referenced table {}",
                            clause.table
                        )));
                    }
                    foreign_keys.push(ForeignKey {
                        columns: cols,
                        parent: clause.table.clone(),
                        parent_columns: clause.columns.clone(),
                        on_delete: clause.on_delete,
                        on_update: clause.on_update,
                    });
                }
                TableConstraint::Check => {}
            }
        }

        if keys.iter().filter(|(o, _, _)| *o == IndexOrigin::PrimaryKey).count() > 1 {
            return Err(HorizonError::InvalidSql(format!(
                "table \"{name}\" has more than one primary key"
            )));
        }

        let mut rowid_alias = None;
        let mut autoindexes: Vec<IndexDef> = Vec::new();
        for (origin, cols, desc) in keys {
            if origin == IndexOrigin::PrimaryKey {
                for &c in &cols {
                    columns[c].primary_key = true;
                }
                if cols.len() == 1 && !desc && columns[cols[0]].type_name.eq_ignore_ascii_case("INTEGER") {
                    rowid_alias = Some(cols[0]);
                    continue;
                }
            }
            // A constraint over the same columns as an earlier one shares
            // its index.
            if autoindexes.iter().any(|ix| ix.columns == cols) {
                continue;
            }
            autoindexes.push(IndexDef {
                name: format!("sqlite_autoindex_{}_{}", name, autoindexes.len() + 1),
                table: name.clone(),
                db,
                columns: cols,
                unique: true,
                origin,
                root: 0,
                sql: None,
            });
        }

        let table = TableDef {
            name: name.clone(),
            db,
            root,
            columns,
            rowid_alias,
            kind: TableKind::Ordinary,
            foreign_keys,
            module: None,
            sql: sql.to_string(),
        };
        Ok((table, autoindexes))
    }

    pub fn from_view(db: usize, stmt: &CreateView, sql: &str) -> TableDef {
        let columns = stmt
            .columns
            .iter()
            .map(|c| Column {
                name: c.clone(),
                type_name: String::new(),
                affinity: DataType::Blob,
                not_null: false,
                default: None,
                primary_key: false,
            })
            .collect();
        TableDef {
            name: stmt.name.name.clone(),
            db,
            root: 0,
            columns,
            rowid_alias: None,
            kind: TableKind::View,
            foreign_keys: Vec::new(),
            module: None,
            sql: sql.to_string(),
        }
    }

    pub fn from_virtual(db: usize, stmt: &CreateVirtualTable, sql: &str) -> TableDef {
        TableDef {
            name: stmt.name.name.clone(),
            db,
            root: 0,
            columns: Vec::new(),
            rowid_alias: None,
            kind: TableKind::Virtual,
            foreign_keys: Vec::new(),
            module: Some(stmt.module.clone()),
            sql: sql.to_string(),
        }
    }

    pub fn is_view(&self) -> bool {
        self.kind == TableKind::View
    }

    /// Position of a column by name (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Root page of the table's B-tree.
    ///
    /// Views, virtual tables and tables whose root was never assigned have
    /// no storage.
    pub fn storage_root(&self) -> Result<PageId> {
        match self.kind {
            TableKind::Ordinary if self.root >= 2 => Ok(self.root),
            TableKind::Ordinary => Err(HorizonError::Corrupt(format!(
                "table {} has invalid root page {}",
                self.name, self.root
            ))),
            _ => Err(HorizonError::Misuse(format!(
                "cannot modify {} because it is a {}",
                self.name,
                if self.is_view() { "view" } else { "virtual table" }
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

/// How an index came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOrigin {
    /// `CREATE INDEX`. Only these may be dropped directly.
    AppDefined,
    /// Implements a `UNIQUE` constraint.
    Unique,
    /// Implements a non-rowid `PRIMARY KEY`.
    PrimaryKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    /// Owning table name.
    pub table: String,
    pub db: usize,
    /// Indexed column positions in the owning table.
    pub columns: Vec<usize>,
    pub unique: bool,
    pub origin: IndexOrigin,
    /// Root page; `0` for an autoindex whose schema row has not been
    /// replayed yet.
    pub root: PageId,
    /// `CREATE INDEX` text; `None` for autoindexes.
    pub sql: Option<String>,
}

impl IndexDef {
    pub fn from_create(
        db: usize,
        root: PageId,
        stmt: &CreateIndex,
        table: &TableDef,
        sql: &str,
    ) -> Result<IndexDef> {
        match table.kind {
            TableKind::Ordinary => {}
            TableKind::View => {
                return Err(HorizonError::InvalidSql("views may not be indexed".into()))
            }
            TableKind::Virtual => {
                return Err(HorizonError::InvalidSql(
                    "virtual tables may not be indexed".into(),
                ))
            }
        }
        if stmt.where_clause.is_some() {
            return Err(HorizonError::InvalidSql(format!(
                "partial index {} is not supported",
                stmt.name.name
            )));
        }
        let columns = stmt
            .columns
            .iter()
            .map(|c| {
                table
                    .column_index(&c.name)
                    .ok_or_else(|| HorizonError::InvalidSql(format!("no such column: {}", c.name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(IndexDef {
            name: stmt.name.name.clone(),
            table: table.name.clone(),
            db,
            columns,
            unique: stmt.unique,
            origin: IndexOrigin::AppDefined,
            root,
            sql: Some(sql.to_string()),
        })
    }

    pub fn storage_root(&self) -> Result<PageId> {
        if self.root < 2 {
            return Err(HorizonError::Corrupt(format!(
                "index {} has invalid root page {}",
                self.name, self.root
            )));
        }
        Ok(self.root)
    }

    /// `t.a, t.b`, as used in constraint messages.
    pub fn describe_columns(&self, table: &TableDef) -> String {
        self.columns
            .iter()
            .map(|&c| {
                let col = table.columns.get(c).map(|c| c.name.as_str()).unwrap_or("?");
                format!("{}.{}", table.name, col)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDef {
    pub name: String,
    pub table: String,
    pub db: usize,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub update_of: Vec<String>,
    /// Columns read as `OLD.col`.
    pub old_columns: Vec<String>,
    /// Whether the trigger reads `OLD.*`.
    pub old_star: bool,
    pub when: Option<String>,
    pub body: String,
    pub sql: String,
}

impl TriggerDef {
    pub fn from_create(db: usize, stmt: &CreateTrigger, sql: &str) -> TriggerDef {
        TriggerDef {
            name: stmt.name.name.clone(),
            table: stmt.table.clone(),
            db,
            timing: stmt.timing,
            event: stmt.event,
            update_of: stmt.update_of.clone(),
            old_columns: stmt.old_columns.clone(),
            old_star: stmt.old_star,
            when: stmt.when.clone(),
            body: stmt.body.clone(),
            sql: sql.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup results and statistics
// ---------------------------------------------------------------------------

/// Any named schema object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaObject<'a> {
    Table(&'a TableDef),
    Index(&'a IndexDef),
    View(&'a TableDef),
    Trigger(&'a TriggerDef),
}

impl SchemaObject<'_> {
    pub fn name(&self) -> &str {
        match self {
            SchemaObject::Table(t) | SchemaObject::View(t) => &t.name,
            SchemaObject::Index(i) => &i.name,
            SchemaObject::Trigger(t) => &t.name,
        }
    }

    pub fn db(&self) -> usize {
        match self {
            SchemaObject::Table(t) | SchemaObject::View(t) => t.db,
            SchemaObject::Index(i) => i.db,
            SchemaObject::Trigger(t) => t.db,
        }
    }
}

/// Cached statistics for one table or index, filled by `analyze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectStats {
    /// Rows in a table, entries in an index.
    pub entries: u64,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// The objects of one database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    /// `main`, `temp`, or the attach alias.
    pub name: String,
    tables: HashMap<String, TableDef>,
    indexes: HashMap<String, IndexDef>,
    triggers: HashMap<String, TriggerDef>,
    stats: HashMap<String, ObjectStats>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Schema {
            name: name.to_string(),
            ..Schema::default()
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(&name_key(name))
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.get(&name_key(name))
    }

    pub(crate) fn index_mut(&mut self, name: &str) -> Option<&mut IndexDef> {
        self.indexes.get_mut(&name_key(name))
    }

    pub fn trigger(&self, name: &str) -> Option<&TriggerDef> {
        self.triggers.get(&name_key(name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.values()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &TriggerDef> {
        self.triggers.values()
    }

    /// Indexes on `table`, ordered by name.
    pub fn indexes_of(&self, table: &str) -> Vec<&IndexDef> {
        let mut out: Vec<&IndexDef> = self
            .indexes
            .values()
            .filter(|ix| ix.table.eq_ignore_ascii_case(table))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.indexes.is_empty() && self.triggers.is_empty()
    }

    /// Name of the table or index whose storage starts at `root`.
    pub fn root_owner(&self, root: PageId) -> Option<&str> {
        self.tables
            .values()
            .filter(|t| t.root == root)
            .map(|t| t.name.as_str())
            .chain(self.indexes.values().filter(|i| i.root == root).map(|i| i.name.as_str()))
            .next()
    }

    /// Whether `name` is taken in the table/view or index namespace.
    pub fn name_in_use(&self, name: &str) -> Option<&'static str> {
        let key = name_key(name);
        match (self.tables.get(&key), self.indexes.contains_key(&key)) {
            (Some(t), _) if t.is_view() => Some("view"),
            (Some(_), _) => Some("table"),
            (None, true) => Some("index"),
            (None, false) => None,
        }
    }

    pub fn add_table(&mut self, table: TableDef) -> Result<()> {
        if let Some(kind) = self.name_in_use(&table.name) {
            return Err(HorizonError::AlreadyExists(format!("{kind} {}", table.name)));
        }
        self.tables.insert(name_key(&table.name), table);
        Ok(())
    }

    pub fn add_index(&mut self, index: IndexDef) -> Result<()> {
        if let Some(kind) = self.name_in_use(&index.name) {
            return Err(HorizonError::AlreadyExists(format!("{kind} {}", index.name)));
        }
        self.indexes.insert(name_key(&index.name), index);
        Ok(())
    }

    pub fn add_trigger(&mut self, trigger: TriggerDef) -> Result<()> {
        let key = name_key(&trigger.name);
        if self.triggers.contains_key(&key) {
            return Err(HorizonError::AlreadyExists(format!("trigger {}", trigger.name)));
        }
        self.triggers.insert(key, trigger);
        Ok(())
    }

    pub fn remove_index(&mut self, name: &str) -> Option<IndexDef> {
        let key = name_key(name);
        self.stats.remove(&key);
        self.indexes.remove(&key)
    }

    pub fn remove_trigger(&mut self, name: &str) -> Option<TriggerDef> {
        self.triggers.remove(&name_key(name))
    }

    /// Remove a table with its indexes, its triggers and their statistics.
    pub fn remove_table(&mut self, name: &str) -> Option<TableDef> {
        let key = name_key(name);
        let table = self.tables.remove(&key)?;
        self.stats.remove(&key);
        let indexes: Vec<String> = self
            .indexes
            .iter()
            .filter(|(_, ix)| ix.table.eq_ignore_ascii_case(name))
            .map(|(k, _)| k.clone())
            .collect();
        for k in indexes {
            self.indexes.remove(&k);
            self.stats.remove(&k);
        }
        self.remove_triggers_on(name);
        Some(table)
    }

    /// Remove every trigger attached to `table`; returns their names.
    pub fn remove_triggers_on(&mut self, table: &str) -> Vec<String> {
        let doomed: Vec<String> = self
            .triggers
            .iter()
            .filter(|(_, t)| t.table.eq_ignore_ascii_case(table))
            .map(|(k, _)| k.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| self.triggers.remove(&k))
            .map(|t| t.name)
            .collect()
    }

    pub fn stats(&self, name: &str) -> Option<ObjectStats> {
        self.stats.get(&name_key(name)).copied()
    }

    pub fn set_stats(&mut self, name: &str, stats: ObjectStats) {
        self.stats.insert(name_key(name), stats);
    }

    pub fn clear_stats(&mut self, name: &str) {
        self.stats.remove(&name_key(name));
    }

    fn renumber(&mut self, db: usize) {
        self.tables.values_mut().for_each(|t| t.db = db);
        self.indexes.values_mut().for_each(|i| i.db = db);
        self.triggers.values_mut().for_each(|t| t.db = db);
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Every schema on one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    schemas: Vec<Schema>,
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new()
    }
}

impl Catalog {
    /// A catalog holding empty `main` and `temp` schemas.
    pub fn new() -> Self {
        Catalog {
            schemas: vec![Schema::new("main"), Schema::new("temp")],
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn schema(&self, db: usize) -> Result<&Schema> {
        self.schemas
            .get(db)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such database: {db}")))
    }

    pub fn schema_mut(&mut self, db: usize) -> Result<&mut Schema> {
        self.schemas
            .get_mut(db)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such database: {db}")))
    }

    /// Database index of a schema name (case-insensitive).
    pub fn db_index(&self, name: &str) -> Option<usize> {
        self.schemas.iter().position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn db_name(&self, db: usize) -> &str {
        self.schemas.get(db).map(|s| s.name.as_str()).unwrap_or("?")
    }

    /// Add an empty schema for a newly attached database.
    pub(crate) fn push_schema(&mut self, name: &str) -> usize {
        self.schemas.push(Schema::new(name));
        self.schemas.len() - 1
    }

    /// Remove an attached schema; later databases move down one slot.
    pub(crate) fn remove_schema(&mut self, db: usize) -> Result<Schema> {
        if db <= TEMP_DB || db >= self.schemas.len() {
            return Err(HorizonError::Misuse(format!("cannot remove schema {db}")));
        }
        let removed = self.schemas.remove(db);
        for (i, schema) in self.schemas.iter_mut().enumerate().skip(db) {
            schema.renumber(i);
        }
        Ok(removed)
    }

    /// The databases an unqualified name is searched in: temp, main,
    /// then attached databases in attach order.
    fn search_order(&self, db: Option<usize>) -> Vec<usize> {
        match db {
            Some(db) => vec![db],
            None => {
                let mut order = vec![TEMP_DB, MAIN_DB];
                order.extend(2..self.schemas.len());
                order
            }
        }
    }

    /// Find a table or view, in `db` or along the default search order.
    pub fn find_table(&self, name: &str, db: Option<usize>) -> Option<&TableDef> {
        self.search_order(db)
            .into_iter()
            .filter_map(|d| self.schemas.get(d))
            .find_map(|s| s.table(name))
    }

    pub fn find_index(&self, name: &str, db: Option<usize>) -> Option<&IndexDef> {
        self.search_order(db)
            .into_iter()
            .filter_map(|d| self.schemas.get(d))
            .find_map(|s| s.index(name))
    }

    pub fn find_trigger(&self, name: &str, db: Option<usize>) -> Option<&TriggerDef> {
        self.search_order(db)
            .into_iter()
            .filter_map(|d| self.schemas.get(d))
            .find_map(|s| s.trigger(name))
    }

    /// Find any object by name. Within one database, tables and views
    /// win over indexes, and indexes over triggers.
    pub fn lookup(&self, name: &str, db: Option<usize>) -> Option<SchemaObject<'_>> {
        self.search_order(db)
            .into_iter()
            .filter_map(|d| self.schemas.get(d))
            .find_map(|s| {
                if let Some(t) = s.table(name) {
                    Some(if t.is_view() {
                        SchemaObject::View(t)
                    } else {
                        SchemaObject::Table(t)
                    })
                } else if let Some(i) = s.index(name) {
                    Some(SchemaObject::Index(i))
                } else {
                    s.trigger(name).map(SchemaObject::Trigger)
                }
            })
    }

    /// Triggers that fire for `table` in database `db`. Temp triggers may
    /// attach to a table of another database when temp has no table of
    /// that name.
    pub fn triggers_for(&self, db: usize, table: &str) -> Vec<&TriggerDef> {
        let mut out: Vec<&TriggerDef> = Vec::new();
        if let Some(schema) = self.schemas.get(db) {
            out.extend(schema.triggers().filter(|t| t.table.eq_ignore_ascii_case(table)));
        }
        if db != TEMP_DB {
            if let Some(temp) = self.schemas.get(TEMP_DB) {
                if temp.table(table).is_none() {
                    out.extend(temp.triggers().filter(|t| t.table.eq_ignore_ascii_case(table)));
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Foreign keys in database `db` whose parent is `parent`, with their
    /// child tables.
    pub fn fk_children(&self, db: usize, parent: &str) -> Vec<(&TableDef, &ForeignKey)> {
        let Some(schema) = self.schemas.get(db) else {
            return Vec::new();
        };
        let mut out: Vec<(&TableDef, &ForeignKey)> = schema
            .tables()
            .flat_map(|t| t.foreign_keys.iter().map(move |fk| (t, fk)))
            .filter(|(_, fk)| fk.parent.eq_ignore_ascii_case(parent))
            .collect();
        out.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ddl::{parse_ddl, DdlStatement};

    fn create_table(db: usize, root: PageId, sql: &str) -> Result<(TableDef, Vec<IndexDef>)> {
        match parse_ddl(sql)? {
            DdlStatement::CreateTable(stmt) => TableDef::from_create(db, root, &stmt, sql),
            other => panic!("not a CREATE TABLE: {other:?}"),
        }
    }

    #[test]
    fn integer_primary_key_is_rowid_alias() {
        let (t, ix) = create_table(0, 2, "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        assert_eq!(t.rowid_alias, Some(0));
        assert!(t.columns[0].primary_key);
        assert_eq!(t.columns[1].affinity, DataType::Text);
        assert!(ix.is_empty());
    }

    #[test]
    fn constraints_create_numbered_autoindexes() {
        let (_, ix) = create_table(
            0,
            2,
            "CREATE TABLE t(a TEXT PRIMARY KEY, b INT UNIQUE, c, UNIQUE(b, c), UNIQUE(b))",
        )
        .unwrap();
        let names: Vec<&str> = ix.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            ["sqlite_autoindex_t_1", "sqlite_autoindex_t_2", "sqlite_autoindex_t_3"]
        );
        assert_eq!(ix[0].origin, IndexOrigin::PrimaryKey);
        assert_eq!(ix[1].origin, IndexOrigin::Unique);
        assert_eq!(ix[2].columns, vec![1, 2]);
        assert!(ix.iter().all(|i| i.root == 0 && i.unique && i.sql.is_none()));
    }

    #[test]
    fn int_primary_key_is_not_an_alias() {
        let (t, ix) = create_table(0, 2, "CREATE TABLE t(id INT PRIMARY KEY)").unwrap();
        assert_eq!(t.rowid_alias, None);
        assert_eq!(ix.len(), 1);
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(create_table(0, 2, "CREATE TABLE t(a, A)").is_err());
        assert!(create_table(0, 2, "CREATE TABLE t(a PRIMARY KEY, b, PRIMARY KEY(b))").is_err());
        assert!(create_table(0, 2, "CREATE TABLE t(a, FOREIGN KEY(x) REFERENCES p)").is_err());
        assert!(create_table(0, 2, "CREATE TABLE t(a PRIMARY KEY) WITHOUT ROWID").is_err());
    }

    #[test]
    fn foreign_keys_resolve_child_columns() {
        let (t, _) = create_table(
            0,
            2,
            "CREATE TABLE c(id INTEGER PRIMARY KEY, pid INT REFERENCES p ON DELETE CASCADE, \
             x, y, FOREIGN KEY(x, y) REFERENCES q(a, b))",
        )
        .unwrap();
        assert_eq!(t.foreign_keys.len(), 2);
        assert_eq!(t.foreign_keys[0].columns, vec![1]);
        assert_eq!(t.foreign_keys[0].on_delete, FkAction::Cascade);
        assert_eq!(t.foreign_keys[1].columns, vec![2, 3]);
        assert_eq!(t.foreign_keys[1].parent_columns, vec!["a", "b"]);
    }

    #[test]
    fn lookup_is_case_insensitive_and_temp_first() {
        let mut catalog = Catalog::new();
        let (main_t, _) = create_table(MAIN_DB, 2, "CREATE TABLE Users(a)").unwrap();
        let (temp_t, _) = create_table(TEMP_DB, 2, "CREATE TABLE users(b)").unwrap();
        catalog.schema_mut(MAIN_DB).unwrap().add_table(main_t).unwrap();
        catalog.schema_mut(TEMP_DB).unwrap().add_table(temp_t).unwrap();

        assert_eq!(catalog.find_table("USERS", None).unwrap().db, TEMP_DB);
        assert_eq!(catalog.find_table("users", Some(MAIN_DB)).unwrap().name, "Users");
        assert!(matches!(
            catalog.lookup("users", Some(MAIN_DB)),
            Some(SchemaObject::Table(_))
        ));
        assert!(catalog.lookup("nothing", None).is_none());
    }

    #[test]
    fn tables_and_indexes_share_a_namespace() {
        let mut schema = Schema::new("main");
        let (t, ix) = create_table(MAIN_DB, 2, "CREATE TABLE t(a UNIQUE)").unwrap();
        schema.add_table(t.clone()).unwrap();
        schema.add_index(ix[0].clone()).unwrap();
        assert!(matches!(schema.add_table(t), Err(HorizonError::AlreadyExists(_))));

        let mut clash = ix[0].clone();
        clash.name = "T".into();
        assert!(matches!(schema.add_index(clash), Err(HorizonError::AlreadyExists(_))));
    }

    #[test]
    fn remove_table_takes_indexes_triggers_and_stats() {
        let mut schema = Schema::new("main");
        let (t, ix) = create_table(MAIN_DB, 2, "CREATE TABLE t(a UNIQUE)").unwrap();
        schema.add_table(t).unwrap();
        schema.add_index(ix[0].clone()).unwrap();
        schema.set_stats("t", ObjectStats { entries: 3 });
        schema.set_stats(&ix[0].name, ObjectStats { entries: 3 });
        let trig = match parse_ddl("CREATE TRIGGER tr AFTER DELETE ON t BEGIN SELECT 1; END").unwrap() {
            DdlStatement::CreateTrigger(stmt) => TriggerDef::from_create(MAIN_DB, &stmt, ""),
            _ => unreachable!(),
        };
        schema.add_trigger(trig).unwrap();

        assert!(schema.remove_table("T").is_some());
        assert!(schema.is_empty());
        assert_eq!(schema.stats("t"), None);
        assert_eq!(schema.stats(&ix[0].name), None);
    }

    #[test]
    fn detach_renumbers_later_schemas() {
        let mut catalog = Catalog::new();
        let a = catalog.push_schema("a");
        let b = catalog.push_schema("b");
        let (t, _) = create_table(b, 2, "CREATE TABLE t(x)").unwrap();
        catalog.schema_mut(b).unwrap().add_table(t).unwrap();

        catalog.remove_schema(a).unwrap();
        assert_eq!(catalog.db_index("b"), Some(2));
        assert_eq!(catalog.find_table("t", None).unwrap().db, 2);
        assert!(catalog.remove_schema(TEMP_DB).is_err());
    }

    #[test]
    fn fk_children_and_root_owner() {
        let mut schema_catalog = Catalog::new();
        let (p, _) = create_table(MAIN_DB, 2, "CREATE TABLE p(id INTEGER PRIMARY KEY)").unwrap();
        let (c, _) = create_table(MAIN_DB, 3, "CREATE TABLE c(pid REFERENCES P)").unwrap();
        let main = schema_catalog.schema_mut(MAIN_DB).unwrap();
        main.add_table(p).unwrap();
        main.add_table(c).unwrap();

        let children = schema_catalog.fk_children(MAIN_DB, "p");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0.name, "c");
        assert_eq!(schema_catalog.schema(MAIN_DB).unwrap().root_owner(3), Some("c"));
        assert_eq!(schema_catalog.schema(MAIN_DB).unwrap().root_owner(9), None);
    }
}
