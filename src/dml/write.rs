use tracing::trace;

use crate::btree::{Btree, BtreePayload, DeleteFlags, InsertFlags, TreeKind};
use crate::catalog::{IndexDef, TableDef};
use crate::connection::ConnectionContext;
use crate::error::{HorizonError, Result};
use crate::record::{encode_index_key, encode_key_prefix, encode_record, index_key_rowid};
use crate::types::Value;

use super::{decode_row, index_values, stored_values};

/// Fail if a UNIQUE index already holds the key of `row` under a rowid
/// other than `rowid`. Keys containing NULL never collide.
fn check_unique(btree: &mut Btree, table: &TableDef, index: &IndexDef, row: &[Value], rowid: i64) -> Result<()> {
    let values = index_values(index, row);
    if values.iter().any(Value::is_null) {
        return Ok(());
    }
    let prefix = encode_key_prefix(&values);
    let conflict = btree.with_cursor(index.storage_root()?, TreeKind::Index, false, |bt, cur| {
        let mut more = bt.seek_key(cur, &prefix)? >= 0 || bt.next(cur)?;
        while more {
            let key = bt.payload(cur)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if index_key_rowid(&key)? != rowid {
                return Ok(true);
            }
            more = bt.next(cur)?;
        }
        Ok(false)
    })?;
    if conflict {
        return Err(HorizonError::ConstraintViolation(format!(
            "UNIQUE constraint failed: {}",
            index.describe_columns(table)
        )));
    }
    Ok(())
}

fn rowid_conflict(table: &TableDef) -> HorizonError {
    let column = table
        .rowid_alias
        .and_then(|i| table.columns.get(i))
        .map_or("rowid", |c| c.name.as_str());
    HorizonError::ConstraintViolation(format!("UNIQUE constraint failed: {}.{}", table.name, column))
}

/// Apply column affinities and check arity and NOT NULL.
fn prepare_values(table: &TableDef, values: &[Value]) -> Result<Vec<Value>> {
    if values.len() != table.columns.len() {
        return Err(HorizonError::InvalidSql(format!(
            "table {} has {} columns but {} values were supplied",
            table.name,
            table.columns.len(),
            values.len()
        )));
    }
    let row: Vec<Value> = values
        .iter()
        .zip(&table.columns)
        .map(|(v, c)| v.apply_affinity(c.affinity))
        .collect();
    for (i, (value, col)) in row.iter().zip(&table.columns).enumerate() {
        if col.not_null && value.is_null() && table.rowid_alias != Some(i) {
            return Err(HorizonError::ConstraintViolation(format!(
                "NOT NULL constraint failed: {}.{}",
                table.name, col.name
            )));
        }
    }
    Ok(row)
}

fn insert_index_entry(btree: &mut Btree, index: &IndexDef, row: &[Value], rowid: i64) -> Result<()> {
    let key = encode_index_key(&index_values(index, row), rowid);
    btree.with_cursor(index.storage_root()?, TreeKind::Index, true, |bt, cur| {
        bt.insert(cur, &BtreePayload::index(key), InsertFlags::NONE, 0)
    })
}

fn delete_index_entry(btree: &mut Btree, index: &IndexDef, row: &[Value], rowid: i64) -> Result<bool> {
    let key = encode_index_key(&index_values(index, row), rowid);
    btree.with_cursor(index.storage_root()?, TreeKind::Index, true, |bt, cur| {
        if bt.seek_key(cur, &key)? != 0 {
            return Ok(false);
        }
        bt.delete(cur, DeleteFlags::NONE)?;
        Ok(true)
    })
}

impl ConnectionContext {
    fn indexes_of(&self, db: usize, table: &str) -> Result<Vec<IndexDef>> {
        Ok(self
            .catalog
            .schema(db)?
            .indexes_of(table)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Insert a row and its index entries; returns the rowid used.
    ///
    /// The rowid comes from the INTEGER PRIMARY KEY value when there is
    /// one, else from `rowid`, else one past the largest rowid in the
    /// table. `values` holds one value per declared column.
    pub fn insert_row(&mut self, db: usize, table: &str, rowid: Option<i64>, values: Vec<Value>) -> Result<i64> {
        let table = self.row_table(db, table)?;
        let mut row = prepare_values(&table, &values)?;
        let root = table.storage_root()?;
        let indexes = self.indexes_of(db, &table.name)?;

        let requested = match table.rowid_alias.map(|i| &row[i]) {
            Some(Value::Integer(i)) => Some(*i),
            Some(Value::Null) | None => rowid,
            Some(other) => {
                return Err(HorizonError::ConstraintViolation(format!(
                    "datatype mismatch: {other:?} is not an integer rowid"
                )))
            }
        };

        let btree = self.btree(db)?;
        let rowid = btree.with_cursor(root, TreeKind::Table, false, |bt, cur| match requested {
            Some(r) if bt.seek_rowid(cur, r)? == 0 => Err(rowid_conflict(&table)),
            Some(r) => Ok(r),
            None if bt.last(cur)? => bt.rowid(cur)?.checked_add(1).ok_or(HorizonError::Full),
            None => Ok(1),
        })?;
        if let Some(alias) = table.rowid_alias {
            row[alias] = Value::Integer(rowid);
        }
        for index in indexes.iter().filter(|ix| ix.unique) {
            check_unique(btree, &table, index, &row, rowid)?;
        }

        let payload = BtreePayload::row(rowid, encode_record(&stored_values(&table, &row)));
        btree.with_cursor(root, TreeKind::Table, true, |bt, cur| {
            if requested.is_none() && bt.last(cur)? {
                bt.insert(cur, &payload, InsertFlags::APPEND, -1)
            } else {
                bt.insert(cur, &payload, InsertFlags::NONE, 0)
            }
        })?;
        for index in &indexes {
            insert_index_entry(btree, index, &row, rowid)?;
        }
        trace!(table = %table.name, rowid, "inserted row");
        Ok(rowid)
    }

    /// Replace the values of an existing row in place, keeping its rowid.
    /// Returns `false` when the row does not exist.
    ///
    /// Index entries are rewritten. Triggers do not fire.
    pub fn update_row(&mut self, db: usize, table: &str, rowid: i64, values: Vec<Value>) -> Result<bool> {
        let table = self.row_table(db, table)?;
        let mut row = prepare_values(&table, &values)?;
        let root = table.storage_root()?;
        if let Some(alias) = table.rowid_alias {
            match &row[alias] {
                Value::Null => {}
                Value::Integer(i) if *i == rowid => {}
                _ => {
                    return Err(HorizonError::Misuse(format!(
                        "update_row cannot change the rowid of {}",
                        table.name
                    )))
                }
            }
            row[alias] = Value::Integer(rowid);
        }
        let indexes = self.indexes_of(db, &table.name)?;

        let btree = self.btree(db)?;
        let old = btree.with_cursor(root, TreeKind::Table, false, |bt, cur| {
            if bt.seek_rowid(cur, rowid)? != 0 {
                return Ok(None);
            }
            decode_row(&table, rowid, &bt.payload(cur)?).map(Some)
        })?;
        let Some(old) = old else {
            return Ok(false);
        };
        for index in indexes.iter().filter(|ix| ix.unique) {
            check_unique(btree, &table, index, &row, rowid)?;
        }

        let payload = BtreePayload::row(rowid, encode_record(&stored_values(&table, &row)));
        btree.with_cursor(root, TreeKind::Table, true, |bt, cur| {
            let res = bt.seek_rowid(cur, rowid)?;
            bt.insert(cur, &payload, InsertFlags::NONE, res)
        })?;
        for index in &indexes {
            if index_values(index, &old) == index_values(index, &row) {
                continue;
            }
            delete_index_entry(btree, index, &old, rowid)?;
            insert_index_entry(btree, index, &row, rowid)?;
        }
        trace!(table = %table.name, rowid, "updated row");
        Ok(true)
    }
}
