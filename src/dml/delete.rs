//! The row-delete generator.
//!
//! [`generate_row_delete`] removes one row together with its index
//! entries while cooperating with the trigger and foreign-key subsystems.
//! The old row is captured once into a register range before any trigger
//! runs. BEFORE triggers, the FK check, FK actions and AFTER triggers all
//! read that same range, so `OLD.*` cannot drift even when a BEFORE
//! trigger rewrites the row or moves the cursor.
//!
//! A view has no storage. Deleting from it runs its INSTEAD OF triggers
//! against a row the caller supplies and removes nothing.

use tracing::{debug, trace, warn};

use crate::btree::{CursorId, DeleteFlags, TreeKind};
use crate::catalog::{IndexDef, TableDef};
use crate::connection::ConnectionContext;
use crate::error::{HorizonError, Result};
use crate::fkey::{CatalogForeignKeys, ForeignKeyHooks};
use crate::record::encode_index_key;
use crate::sql::ddl::{TriggerEvent, TriggerTiming};
use crate::trigger::{CatalogTriggers, TriggerHooks};
use crate::types::Value;

use super::{column_in_mask, decode_row, index_values, row_column, RegisterFile};

/// How the caller positioned the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// The cursor is not positioned; seek the rowid first.
    Direct,
    /// The cursor already sits on the row; exactly one row is deleted.
    OnePassSingle,
    /// The cursor sits on the row and the caller keeps stepping it
    /// afterwards, so the delete saves its position.
    OnePassMulti,
}

/// Where the old row comes from.
#[derive(Debug, Clone, Copy)]
pub enum RowSource<'a> {
    /// A writable cursor on the table's tree.
    Cursor(CursorId),
    /// The row of a view, as produced by the view's query.
    View(&'a [Value]),
}

/// The row to delete.
#[derive(Debug, Clone, Copy)]
pub struct RowDeleteTarget<'a> {
    pub db: usize,
    pub table: &'a str,
    pub source: RowSource<'a>,
    pub rowid: i64,
}

/// The subsystems a row delete reports to.
#[derive(Clone, Copy)]
pub struct RowHooks<'a> {
    pub triggers: &'a dyn TriggerHooks,
    pub foreign_keys: &'a dyn ForeignKeyHooks,
}

impl RowHooks<'static> {
    /// Triggers and foreign keys as declared in the catalog.
    pub fn catalog() -> Self {
        RowHooks {
            triggers: &CatalogTriggers,
            foreign_keys: &CatalogForeignKeys,
        }
    }
}

impl std::fmt::Debug for RowHooks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowHooks").finish_non_exhaustive()
    }
}

/// Delete one row of an ordinary table, or one row of a view.
///
/// Returns `Ok(false)` without touching anything when the row does not
/// exist, or when a BEFORE trigger removed it. An error raised before the
/// cell is removed leaves the row in place. For a view the result is
/// whether an INSTEAD OF program ran.
#[tracing::instrument(skip_all, fields(table = target.table, rowid = target.rowid), level = "trace")]
pub fn generate_row_delete(
    ctx: &mut ConnectionContext,
    hooks: &RowHooks<'_>,
    target: &RowDeleteTarget<'_>,
    mode: DeleteMode,
    count: bool,
) -> Result<bool> {
    let cur = match target.source {
        RowSource::Cursor(cur) => cur,
        RowSource::View(values) => return delete_view_row(ctx, hooks, target, values),
    };
    let table = ctx.row_table(target.db, target.table)?;
    let (db, rowid) = (target.db, target.rowid);

    if mode == DeleteMode::Direct && ctx.btree(db)?.seek_rowid(cur, rowid)? != 0 {
        trace!("row not found");
        return Ok(false);
    }

    // Capture the old row.
    let n_col = table.columns.len();
    let mut regs = RegisterFile::new();
    let old_base = if hooks.triggers.has_triggers(ctx, &table, TriggerEvent::Delete)
        || hooks.foreign_keys.requires_old_row(ctx, &table)
    {
        let mask = hooks
            .triggers
            .column_mask(ctx, &table, TriggerEvent::Delete, TriggerTiming::Before)
            | hooks
                .triggers
                .column_mask(ctx, &table, TriggerEvent::Delete, TriggerTiming::After)
            | hooks.foreign_keys.old_mask(ctx, &table);
        let base = regs.alloc(1 + n_col);
        regs.set(base, Value::Integer(rowid));
        if (0..n_col).any(|i| column_in_mask(mask, i)) {
            let record = ctx.btree(db)?.payload(cur)?;
            for i in (0..n_col).filter(|&i| column_in_mask(mask, i)) {
                regs.set(base + 1 + i, row_column(&table, rowid, &record, i)?);
            }
        }
        Some(base)
    } else {
        None
    };

    if let Some(base) = old_base {
        let old = regs.old_row(base, n_col);
        let ran = hooks
            .triggers
            .fire(ctx, &table, TriggerEvent::Delete, TriggerTiming::Before, &old)?;
        if ran && ctx.btree(db)?.seek_rowid(cur, rowid)? != 0 {
            debug!("row removed by a BEFORE trigger");
            return Ok(false);
        }
        hooks.foreign_keys.check(ctx, &table, &old)?;
    }

    delete_index_entries(ctx, &table, cur, rowid)?;
    let flags = if mode == DeleteMode::OnePassMulti {
        DeleteFlags::SAVE_POSITION
    } else {
        DeleteFlags::NONE
    };
    ctx.btree(db)?.delete(cur, flags)?;
    if count {
        ctx.changes += 1;
    }

    if let Some(base) = old_base {
        let old = regs.old_row(base, n_col);
        hooks.foreign_keys.cascade(ctx, &table, &old)?;
        hooks
            .triggers
            .fire(ctx, &table, TriggerEvent::Delete, TriggerTiming::After, &old)?;
    }
    Ok(true)
}

/// Fire the INSTEAD OF DELETE triggers of a view for one row.
fn delete_view_row(
    ctx: &mut ConnectionContext,
    hooks: &RowHooks<'_>,
    target: &RowDeleteTarget<'_>,
    values: &[Value],
) -> Result<bool> {
    let view = ctx.table_def(target.db, target.table)?.clone();
    if !view.is_view() {
        return Err(HorizonError::Misuse(format!("{} is not a view", view.name)));
    }
    if !hooks.triggers.has_triggers(ctx, &view, TriggerEvent::Delete) {
        return Err(HorizonError::InvalidSql(format!(
            "cannot modify {} because it is a view",
            view.name
        )));
    }

    let n_col = values.len();
    let mut regs = RegisterFile::new();
    let base = regs.alloc(1 + n_col);
    regs.set(base, Value::Integer(target.rowid));
    for (i, value) in values.iter().enumerate() {
        regs.set(base + 1 + i, value.clone());
    }
    let old = regs.old_row(base, n_col);
    hooks
        .triggers
        .fire(ctx, &view, TriggerEvent::Delete, TriggerTiming::InsteadOf, &old)
}

/// Remove every index entry of the row under `cur`, computing the keys
/// from the row as it currently reads.
fn delete_index_entries(ctx: &mut ConnectionContext, table: &TableDef, cur: CursorId, rowid: i64) -> Result<()> {
    let indexes: Vec<IndexDef> = ctx
        .catalog
        .schema(table.db)?
        .indexes_of(&table.name)
        .into_iter()
        .cloned()
        .collect();
    if indexes.is_empty() {
        return Ok(());
    }
    let btree = ctx.btree(table.db)?;
    let row = decode_row(table, rowid, &btree.payload(cur)?)?;
    for index in &indexes {
        let key = encode_index_key(&index_values(index, &row), rowid);
        let found = btree.with_cursor(index.storage_root()?, TreeKind::Index, true, |bt, ic| {
            if bt.seek_key(ic, &key)? != 0 {
                return Ok(false);
            }
            bt.delete(ic, DeleteFlags::NONE)?;
            Ok(true)
        })?;
        if !found {
            warn!(index = %index.name, rowid, "index entry missing for deleted row");
        }
    }
    Ok(())
}

impl ConnectionContext {
    /// Delete the row with `rowid`, firing triggers and applying foreign
    /// keys. Returns whether a row was deleted.
    pub fn delete_row(&mut self, db: usize, table: &str, rowid: i64) -> Result<bool> {
        let root = self.row_table(db, table)?.storage_root()?;
        let cur = self.btree(db)?.open_cursor(root, TreeKind::Table, true)?;
        let target = RowDeleteTarget {
            db,
            table,
            source: RowSource::Cursor(cur),
            rowid,
        };
        let count = self.config.count_changes;
        let out = generate_row_delete(self, &RowHooks::catalog(), &target, DeleteMode::Direct, count);
        if let Ok(btree) = self.btree(db) {
            btree.close_cursor(cur);
        }
        out
    }

    /// Delete row `rowid` of a view by running its INSTEAD OF DELETE
    /// triggers with `old` as the old row. Returns whether a program ran.
    pub fn delete_view_row(&mut self, db: usize, view: &str, rowid: i64, old: &[Value]) -> Result<bool> {
        let target = RowDeleteTarget {
            db,
            table: view,
            source: RowSource::View(old),
            rowid,
        };
        generate_row_delete(self, &RowHooks::catalog(), &target, DeleteMode::Direct, false)
    }

    /// Delete every row of `table` for which `pred` holds, in one pass over
    /// the table. Returns the number of rows deleted.
    pub fn delete_where(
        &mut self,
        db: usize,
        table: &str,
        mut pred: impl FnMut(i64, &[Value]) -> bool,
    ) -> Result<u64> {
        let def = self.row_table(db, table)?;
        let root = def.storage_root()?;
        let cur = self.btree(db)?.open_cursor(root, TreeKind::Table, true)?;
        let out = self.delete_pass(&def, cur, &mut pred);
        if let Ok(btree) = self.btree(db) {
            btree.close_cursor(cur);
        }
        out
    }

    fn delete_pass(
        &mut self,
        table: &TableDef,
        cur: CursorId,
        pred: &mut impl FnMut(i64, &[Value]) -> bool,
    ) -> Result<u64> {
        let db = table.db;
        let mut deleted = 0;
        let mut more = self.btree(db)?.first(cur)?;
        while more {
            let btree = self.btree(db)?;
            let rowid = btree.rowid(cur)?;
            let row = decode_row(table, rowid, &btree.payload(cur)?)?;
            if pred(rowid, &row[..]) {
                let target = RowDeleteTarget {
                    db,
                    table: &table.name,
                    source: RowSource::Cursor(cur),
                    rowid,
                };
                let count = self.config.count_changes;
                if generate_row_delete(self, &RowHooks::catalog(), &target, DeleteMode::OnePassMulti, count)? {
                    deleted += 1;
                } else if self.btree(db)?.seek_rowid(cur, rowid)? > 0 {
                    // A trigger removed the row; the cursor already sits on
                    // its successor.
                    continue;
                }
            }
            more = self.btree(db)?.next(cur)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{TriggerDef, MAIN_DB};
    use crate::error::HorizonError;
    use crate::connection::{Config, Connection};
    use crate::dml::OldRow;
    use std::sync::{Arc, Mutex};

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    fn setup(ddl: &[&str]) -> Connection {
        let conn = Connection::open_in_memory(Config::default()).unwrap();
        {
            let mut ctx = conn.lock().unwrap();
            for sql in ddl {
                ctx.execute_ddl(sql).unwrap();
            }
        }
        conn
    }

    #[test]
    fn direct_delete_of_a_missing_row_is_a_no_op() {
        let conn = setup(&["CREATE TABLE t(a TEXT UNIQUE)"]);
        let mut ctx = conn.lock().unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![text("x")]).unwrap();
        assert!(!ctx.delete_row(MAIN_DB, "t", 9).unwrap());
        assert_eq!(ctx.changes(), 0);
        assert!(ctx.delete_row(MAIN_DB, "t", 1).unwrap());
        assert_eq!(ctx.changes(), 1);
        assert!(ctx.index_entries(MAIN_DB, "sqlite_autoindex_t_1").unwrap().is_empty());
    }

    #[test]
    fn old_values_are_stable_across_the_reseek() {
        let conn = setup(&[
            "CREATE TABLE t(id INTEGER PRIMARY KEY, a TEXT, b TEXT)",
            "CREATE INDEX t_a ON t(a)",
            "CREATE TRIGGER rewrite BEFORE DELETE ON t BEGIN SELECT OLD.a; END",
            "CREATE TRIGGER audit AFTER DELETE ON t BEGIN SELECT OLD.*; END",
        ]);
        let mut ctx = conn.lock().unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![Value::Null, text("a1"), text("b1")]).unwrap();

        let seen: Arc<Mutex<Vec<Vec<Value>>>> = Arc::default();
        let before = Arc::clone(&seen);
        ctx.register_trigger_program(
            "rewrite",
            Arc::new(move |ctx: &mut ConnectionContext, _: &TriggerDef, old: &OldRow<'_>| -> Result<()> {
                before.lock().unwrap().push(old.columns().to_vec());
                // Rewrite the row under the cursor; the AFTER trigger must
                // still see the values captured before this ran.
                ctx.update_row(MAIN_DB, "t", old.rowid(), vec![Value::Null, text("a2"), text("b2")])?;
                Ok(())
            }),
        );
        let after = Arc::clone(&seen);
        ctx.register_trigger_program(
            "audit",
            Arc::new(move |_: &mut ConnectionContext, _: &TriggerDef, old: &OldRow<'_>| -> Result<()> {
                after.lock().unwrap().push(old.columns().to_vec());
                Ok(())
            }),
        );

        assert!(ctx.delete_row(MAIN_DB, "t", 1).unwrap());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[0], vec![Value::Integer(1), text("a1"), text("b1")]);

        // The index entry removed is the one for the rewritten row.
        assert!(ctx.index_entries(MAIN_DB, "t_a").unwrap().is_empty());
        assert!(ctx.integrity_check(MAIN_DB).unwrap().is_empty());
    }

    #[test]
    fn before_trigger_that_deletes_the_row_stops_the_delete() {
        let conn = setup(&[
            "CREATE TABLE t(a)",
            "CREATE TRIGGER gone BEFORE DELETE ON t BEGIN DELETE FROM t; END",
            "CREATE TRIGGER late AFTER DELETE ON t BEGIN SELECT 1; END",
        ]);
        let mut ctx = conn.lock().unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(1)]).unwrap();

        let late_calls = Arc::new(Mutex::new(0));
        let late = Arc::clone(&late_calls);
        ctx.register_trigger_program(
            "gone",
            Arc::new(|ctx: &mut ConnectionContext, _: &TriggerDef, old: &OldRow<'_>| -> Result<()> {
                ctx.delete_where(MAIN_DB, "t", |rowid, _| rowid == old.rowid())?;
                Ok(())
            }),
        );
        ctx.register_trigger_program(
            "late",
            Arc::new(move |_: &mut ConnectionContext, _: &TriggerDef, _: &OldRow<'_>| -> Result<()> {
                *late.lock().unwrap() += 1;
                Ok(())
            }),
        );

        // The nested delete fires `late` once; the outer delete stops.
        assert!(!ctx.delete_row(MAIN_DB, "t", 1).unwrap());
        assert_eq!(*late_calls.lock().unwrap(), 1);
        assert!(ctx.scan_rows(MAIN_DB, "t").unwrap().is_empty());
    }

    #[test]
    fn failing_before_trigger_leaves_the_row() {
        let conn = setup(&[
            "CREATE TABLE t(a)",
            "CREATE TRIGGER veto BEFORE DELETE ON t BEGIN SELECT RAISE(ABORT, 'no'); END",
        ]);
        let mut ctx = conn.lock().unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(1)]).unwrap();
        ctx.register_trigger_program(
            "veto",
            Arc::new(|_: &mut ConnectionContext, _: &TriggerDef, _: &OldRow<'_>| -> Result<()> {
                Err(HorizonError::ConstraintViolation("no".into()))
            }),
        );
        assert!(ctx.delete_row(MAIN_DB, "t", 1).is_err());
        assert_eq!(ctx.read_row(MAIN_DB, "t", 1).unwrap(), Some(vec![Value::Integer(1)]));
    }

    #[test]
    fn one_pass_multi_keeps_stepping() {
        let conn = setup(&["CREATE TABLE t(n INTEGER)", "CREATE INDEX t_n ON t(n)"]);
        let mut ctx = conn.lock().unwrap();
        for n in 0..500 {
            ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(n)]).unwrap();
        }
        let deleted = ctx
            .delete_where(MAIN_DB, "t", |_, row| row[0].as_integer().is_some_and(|n| n % 3 != 0))
            .unwrap();
        assert_eq!(deleted, 333);
        let rows = ctx.scan_rows(MAIN_DB, "t").unwrap();
        assert_eq!(rows.len(), 167);
        assert!(rows.iter().all(|(_, r)| r[0].as_integer().is_some_and(|n| n % 3 == 0)));
        assert_eq!(ctx.index_entries(MAIN_DB, "t_n").unwrap().len(), 167);
        assert!(ctx.integrity_check(MAIN_DB).unwrap().is_empty());
    }

    #[test]
    fn view_delete_runs_instead_of_triggers_only() {
        let conn = setup(&[
            "CREATE TABLE t(id INTEGER PRIMARY KEY, a TEXT)",
            "CREATE VIEW v(id, a) AS SELECT id, a FROM t",
            "CREATE TRIGGER v_del INSTEAD OF DELETE ON v BEGIN DELETE FROM t WHERE id = OLD.id; END",
        ]);
        let mut ctx = conn.lock().unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![Value::Null, text("a1")]).unwrap();
        ctx.insert_row(MAIN_DB, "t", None, vec![Value::Null, text("a2")]).unwrap();

        let seen: Arc<Mutex<Vec<Vec<Value>>>> = Arc::default();
        let log = Arc::clone(&seen);
        ctx.register_trigger_program(
            "v_del",
            Arc::new(move |ctx: &mut ConnectionContext, _: &TriggerDef, old: &OldRow<'_>| -> Result<()> {
                log.lock().unwrap().push(old.columns().to_vec());
                let id = old.column(0).as_integer().unwrap_or(0);
                ctx.delete_row(MAIN_DB, "t", id)?;
                Ok(())
            }),
        );

        let before = ctx.changes();
        assert!(ctx.delete_view_row(MAIN_DB, "v", 2, &[Value::Integer(2), text("a2")]).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![vec![Value::Integer(2), text("a2")]]);
        // The nested table delete counts; the view row itself does not.
        assert_eq!(ctx.changes(), before + 1);
        assert_eq!(ctx.scan_rows(MAIN_DB, "t").unwrap(), vec![(1, vec![Value::Integer(1), text("a1")])]);

        // A view has no rows to seek.
        assert!(matches!(ctx.delete_row(MAIN_DB, "v", 1), Err(HorizonError::Misuse(_))));
        // A table is not a view.
        assert!(matches!(
            ctx.delete_view_row(MAIN_DB, "t", 1, &[Value::Integer(1)]),
            Err(HorizonError::Misuse(_))
        ));
    }

    #[test]
    fn view_without_instead_of_trigger_cannot_be_deleted_from() {
        let conn = setup(&["CREATE VIEW v AS SELECT 1"]);
        let mut ctx = conn.lock().unwrap();
        let err = ctx.delete_view_row(MAIN_DB, "v", 1, &[Value::Integer(1)]).unwrap_err();
        assert_eq!(err.to_string(), "invalid SQL: cannot modify v because it is a view");
    }
}
