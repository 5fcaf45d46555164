//! Row-level operations on ordinary tables, and deletes through views.
//!
//! | Module     | Contents                                                |
//! |------------|---------------------------------------------------------|
//! | [`delete`] | the row-delete generator and its trigger and FK hooks   |
//! | `write`    | `insert_row` and `update_row` with their index entries  |
//! | `read`     | `read_row`, `scan_rows` and `index_entries`             |
//!
//! Stored records keep one slot per declared column. The INTEGER PRIMARY
//! KEY column is stored as NULL and always reads back as the rowid.

pub mod delete;
mod read;
mod write;

pub use delete::{generate_row_delete, DeleteMode, RowDeleteTarget, RowHooks, RowSource};

use crate::catalog::{IndexDef, TableDef, TableKind};
use crate::connection::ConnectionContext;
use crate::error::{HorizonError, Result};
use crate::record::{column_count, decode_column, decode_record};
use crate::types::Value;

static NULL: Value = Value::Null;

// ---------------------------------------------------------------------------
// Registers
// ---------------------------------------------------------------------------

/// Scratch registers for one row operation.
///
/// Ranges are allocated contiguously and live until the file is dropped.
#[derive(Debug, Default)]
pub struct RegisterFile {
    regs: Vec<Value>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `n` NULL registers and return the first one.
    pub fn alloc(&mut self, n: usize) -> usize {
        let base = self.regs.len();
        self.regs.resize(base + n, Value::Null);
        base
    }

    pub fn get(&self, reg: usize) -> &Value {
        self.regs.get(reg).unwrap_or(&NULL)
    }

    pub fn set(&mut self, reg: usize, value: Value) {
        if let Some(slot) = self.regs.get_mut(reg) {
            *slot = value;
        }
    }

    /// The `1 + n_col` registers at `base` viewed as an old row.
    pub fn old_row(&self, base: usize, n_col: usize) -> OldRow<'_> {
        let end = (base + 1 + n_col).min(self.regs.len());
        OldRow {
            regs: self.regs.get(base..end).unwrap_or(&[]),
        }
    }
}

/// The `OLD.*` values of a row: the rowid followed by one register per
/// column. Columns that were not captured read as NULL.
#[derive(Debug, Clone, Copy)]
pub struct OldRow<'a> {
    regs: &'a [Value],
}

impl<'a> OldRow<'a> {
    /// View `regs` as `[rowid, col0, col1, ...]`.
    pub fn new(regs: &'a [Value]) -> Self {
        OldRow { regs }
    }

    pub fn rowid(&self) -> i64 {
        self.regs.first().and_then(Value::as_integer).unwrap_or(0)
    }

    pub fn column(&self, i: usize) -> &'a Value {
        self.regs.get(i + 1).unwrap_or(&NULL)
    }

    pub fn columns(&self) -> &'a [Value] {
        self.regs.get(1..).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Column masks
// ---------------------------------------------------------------------------

/// Mask bit for column `i`. Columns past 30 share the top bit, so any of
/// them selects every column.
pub fn mask_bit(i: usize) -> u32 {
    if i >= 31 {
        u32::MAX
    } else {
        1 << i
    }
}

/// Whether column `i` must be captured under `mask`.
pub fn column_in_mask(mask: u32, i: usize) -> bool {
    mask == u32::MAX || (i < 31 && mask & (1 << i) != 0) || (i >= 31 && mask & (1 << 31) != 0)
}

// ---------------------------------------------------------------------------
// Record helpers
// ---------------------------------------------------------------------------

/// Decode a stored record into one value per column of `table`.
///
/// The rowid alias reads as the rowid; columns missing from a short record
/// take their defaults.
pub(crate) fn decode_row(table: &TableDef, rowid: i64, record: &[u8]) -> Result<Vec<Value>> {
    let stored = decode_record(record)?;
    Ok(table
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            if table.rowid_alias == Some(i) {
                Value::Integer(rowid)
            } else {
                stored.get(i).cloned().unwrap_or_else(|| col.default_value())
            }
        })
        .collect())
}

/// Decode column `i` only.
pub(crate) fn row_column(table: &TableDef, rowid: i64, record: &[u8], i: usize) -> Result<Value> {
    if table.rowid_alias == Some(i) {
        return Ok(Value::Integer(rowid));
    }
    if i >= column_count(record)? {
        return Ok(table.columns.get(i).map(|c| c.default_value()).unwrap_or(Value::Null));
    }
    decode_column(record, i)
}

/// Values as stored: the rowid alias slot is NULL.
pub(crate) fn stored_values(table: &TableDef, values: &[Value]) -> Vec<Value> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| if table.rowid_alias == Some(i) { Value::Null } else { v.clone() })
        .collect()
}

/// The indexed columns of `row`, in index order.
pub(crate) fn index_values(index: &IndexDef, row: &[Value]) -> Vec<Value> {
    index
        .columns
        .iter()
        .map(|&c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

impl ConnectionContext {
    /// Descriptor of an ordinary table, for row access.
    pub(crate) fn row_table(&self, db: usize, name: &str) -> Result<TableDef> {
        let table = self.table_def(db, name)?;
        if table.kind != TableKind::Ordinary {
            table.storage_root()?;
        }
        Ok(table.clone())
    }

    pub(crate) fn table_def(&self, db: usize, name: &str) -> Result<&TableDef> {
        self.catalog
            .schema(db)?
            .table(name)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such table: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_rules() {
        assert!(column_in_mask(mask_bit(3), 3));
        assert!(!column_in_mask(mask_bit(3), 4));
        assert!(column_in_mask(u32::MAX, 40));
        assert!(column_in_mask(1 << 31, 31));
        assert!(column_in_mask(1 << 31, 64));
        assert!(!column_in_mask(1 << 31, 30));
        assert_eq!(mask_bit(31), u32::MAX);
    }

    #[test]
    fn old_row_reads_null_past_the_end() {
        let mut regs = RegisterFile::new();
        let _scratch = regs.alloc(2);
        let base = regs.alloc(3);
        regs.set(base, Value::Integer(7));
        regs.set(base + 2, Value::Text("b".into()));
        let old = regs.old_row(base, 2);
        assert_eq!(old.rowid(), 7);
        assert_eq!(old.column(0), &Value::Null);
        assert_eq!(old.column(1), &Value::Text("b".into()));
        assert_eq!(old.column(9), &Value::Null);
        assert_eq!(old.columns().len(), 2);
    }
}
