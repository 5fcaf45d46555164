//! Foreign-key hooks used by row deletes and `DROP TABLE`.
//!
//! Only the parent side of a delete is enforced: removing a parent row
//! that child rows still reference either fails (`NO ACTION`, `RESTRICT`)
//! or rewrites the children (`CASCADE`, `SET NULL`, `SET DEFAULT`).
//! Violations are reported immediately rather than at statement end.

use tracing::debug;

use crate::catalog::{ForeignKey, TableDef};
use crate::connection::ConnectionContext;
use crate::dml::{mask_bit, OldRow};
use crate::error::{HorizonError, Result};
use crate::sql::ddl::FkAction;
use crate::types::Value;

/// The foreign-key subsystem as seen by row operations.
pub trait ForeignKeyHooks {
    /// Whether deleting from `table` needs the old row.
    fn requires_old_row(&self, ctx: &ConnectionContext, table: &TableDef) -> bool;

    /// Columns of the old row the checks and actions read.
    fn old_mask(&self, ctx: &ConnectionContext, table: &TableDef) -> u32;

    /// Fail if a child row references `old` under a restricting action.
    fn check(&self, ctx: &mut ConnectionContext, table: &TableDef, old: &OldRow<'_>) -> Result<()>;

    /// Apply `CASCADE`, `SET NULL` and `SET DEFAULT` for the deleted row.
    fn cascade(&self, ctx: &mut ConnectionContext, table: &TableDef, old: &OldRow<'_>) -> Result<()>;

    /// Check, then cascade, every row of a table about to be dropped.
    fn drop_table(&self, ctx: &mut ConnectionContext, table: &TableDef) -> Result<()>;
}

/// Foreign keys declared with `REFERENCES` in the catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogForeignKeys;

/// Parent key columns of `fk`. `None` stands for the rowid.
fn parent_key_columns(parent: &TableDef, fk: &ForeignKey) -> Option<Vec<Option<usize>>> {
    let columns: Vec<Option<usize>> = if fk.parent_columns.is_empty() {
        let pk: Vec<usize> = (0..parent.columns.len())
            .filter(|&i| parent.columns[i].primary_key)
            .collect();
        if pk.is_empty() {
            vec![None]
        } else {
            pk.into_iter().map(Some).collect()
        }
    } else {
        fk.parent_columns
            .iter()
            .map(|name| parent.column_index(name).map(Some))
            .collect::<Option<Vec<_>>>()?
    };
    if columns.len() != fk.columns.len() {
        return None;
    }
    Some(
        columns
            .into_iter()
            .map(|c| if c.is_some() && c == parent.rowid_alias { None } else { c })
            .collect(),
    )
}

fn parent_key(parent: &TableDef, fk: &ForeignKey, old: &OldRow<'_>) -> Option<Vec<Value>> {
    let key: Vec<Value> = parent_key_columns(parent, fk)?
        .into_iter()
        .map(|c| match c {
            None => Value::Integer(old.rowid()),
            Some(i) => old.column(i).clone(),
        })
        .collect();
    if key.iter().any(Value::is_null) {
        return None;
    }
    Some(key)
}

/// Child rows whose FK columns equal `key`, skipping `exclude`.
fn referencing_rows(
    ctx: &mut ConnectionContext,
    child: &TableDef,
    fk: &ForeignKey,
    key: &[Value],
    exclude: Option<i64>,
) -> Result<Vec<(i64, Vec<Value>)>> {
    let rows = ctx.scan_rows(child.db, &child.name)?;
    Ok(rows
        .into_iter()
        .filter(|(rowid, _)| Some(*rowid) != exclude)
        .filter(|(_, values)| {
            fk.columns
                .iter()
                .zip(key)
                .all(|(&c, k)| values.get(c).is_some_and(|v| !v.is_null() && v == k))
        })
        .collect())
}

fn violation() -> HorizonError {
    HorizonError::ConstraintViolation("FOREIGN KEY constraint failed".into())
}

/// Children of `table` with their keys, cloned out of the catalog.
fn children(ctx: &ConnectionContext, table: &TableDef) -> Vec<(TableDef, ForeignKey)> {
    ctx.catalog
        .fk_children(table.db, &table.name)
        .into_iter()
        .map(|(t, fk)| (t.clone(), fk.clone()))
        .collect()
}

impl CatalogForeignKeys {
    fn check_children(
        &self,
        ctx: &mut ConnectionContext,
        table: &TableDef,
        old: &OldRow<'_>,
        skip_self: bool,
    ) -> Result<()> {
        for (child, fk) in children(ctx, table) {
            if !matches!(fk.on_delete, FkAction::NoAction | FkAction::Restrict) {
                continue;
            }
            let same_table = child.name.eq_ignore_ascii_case(&table.name);
            if skip_self && same_table {
                continue;
            }
            let Some(key) = parent_key(table, &fk, old) else {
                continue;
            };
            let exclude = same_table.then(|| old.rowid());
            if !referencing_rows(ctx, &child, &fk, &key, exclude)?.is_empty() {
                debug!(parent = %table.name, child = %child.name, "foreign key violation");
                return Err(violation());
            }
        }
        Ok(())
    }

    fn apply_actions(
        &self,
        ctx: &mut ConnectionContext,
        table: &TableDef,
        old: &OldRow<'_>,
        skip_self: bool,
    ) -> Result<()> {
        for (child, fk) in children(ctx, table) {
            if matches!(fk.on_delete, FkAction::NoAction | FkAction::Restrict) {
                continue;
            }
            let same_table = child.name.eq_ignore_ascii_case(&table.name);
            if skip_self && same_table {
                continue;
            }
            let Some(key) = parent_key(table, &fk, old) else {
                continue;
            };
            let exclude = same_table.then(|| old.rowid());
            for (rowid, mut values) in referencing_rows(ctx, &child, &fk, &key, exclude)? {
                match fk.on_delete {
                    FkAction::Cascade => {
                        ctx.delete_row(child.db, &child.name, rowid)?;
                    }
                    FkAction::SetNull | FkAction::SetDefault => {
                        for &c in &fk.columns {
                            values[c] = if fk.on_delete == FkAction::SetNull {
                                Value::Null
                            } else {
                                child.columns[c].default_value()
                            };
                        }
                        ctx.update_row(child.db, &child.name, rowid, values)?;
                    }
                    FkAction::NoAction | FkAction::Restrict => {}
                }
            }
        }
        Ok(())
    }
}

impl ForeignKeyHooks for CatalogForeignKeys {
    fn requires_old_row(&self, ctx: &ConnectionContext, table: &TableDef) -> bool {
        ctx.config.foreign_keys
            && (!table.foreign_keys.is_empty() || !ctx.catalog.fk_children(table.db, &table.name).is_empty())
    }

    fn old_mask(&self, ctx: &ConnectionContext, table: &TableDef) -> u32 {
        if !ctx.config.foreign_keys {
            return 0;
        }
        let mut mask = 0u32;
        for fk in &table.foreign_keys {
            for &c in &fk.columns {
                mask |= mask_bit(c);
            }
        }
        for (_, fk) in ctx.catalog.fk_children(table.db, &table.name) {
            for column in parent_key_columns(table, fk).unwrap_or_default().into_iter().flatten() {
                mask |= mask_bit(column);
            }
        }
        mask
    }

    fn check(&self, ctx: &mut ConnectionContext, table: &TableDef, old: &OldRow<'_>) -> Result<()> {
        if !ctx.config.foreign_keys {
            return Ok(());
        }
        self.check_children(ctx, table, old, false)
    }

    fn cascade(&self, ctx: &mut ConnectionContext, table: &TableDef, old: &OldRow<'_>) -> Result<()> {
        if !ctx.config.foreign_keys {
            return Ok(());
        }
        self.apply_actions(ctx, table, old, false)
    }

    /// Rows of the dropped table that reference each other are ignored;
    /// they disappear together.
    fn drop_table(&self, ctx: &mut ConnectionContext, table: &TableDef) -> Result<()> {
        if !ctx.config.foreign_keys || ctx.catalog.fk_children(table.db, &table.name).is_empty() {
            return Ok(());
        }
        let rows = ctx.scan_rows(table.db, &table.name)?;
        let registers: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|(rowid, values)| {
                let mut regs = Vec::with_capacity(values.len() + 1);
                regs.push(Value::Integer(rowid));
                regs.extend(values);
                regs
            })
            .collect();
        for regs in &registers {
            self.check_children(ctx, table, &OldRow::new(regs), true)?;
        }
        for regs in &registers {
            self.apply_actions(ctx, table, &OldRow::new(regs), true)?;
        }
        Ok(())
    }
}
