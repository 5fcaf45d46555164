use crate::btree::TreeKind;
use crate::connection::ConnectionContext;
use crate::error::{HorizonError, Result};
use crate::record::decode_index_key;
use crate::types::Value;

use super::decode_row;

impl ConnectionContext {
    /// The row with `rowid`, one value per declared column.
    pub fn read_row(&mut self, db: usize, table: &str, rowid: i64) -> Result<Option<Vec<Value>>> {
        let table = self.row_table(db, table)?;
        let root = table.storage_root()?;
        self.btree(db)?
            .with_cursor(root, TreeKind::Table, false, |bt, cur| {
                if bt.seek_rowid(cur, rowid)? != 0 {
                    return Ok(None);
                }
                decode_row(&table, rowid, &bt.payload(cur)?).map(Some)
            })
    }

    /// Every row of `table` in rowid order.
    pub fn scan_rows(&mut self, db: usize, table: &str) -> Result<Vec<(i64, Vec<Value>)>> {
        let table = self.row_table(db, table)?;
        let root = table.storage_root()?;
        self.btree(db)?
            .with_cursor(root, TreeKind::Table, false, |bt, cur| {
                let mut rows = Vec::new();
                let mut more = bt.first(cur)?;
                while more {
                    let rowid = bt.rowid(cur)?;
                    rows.push((rowid, decode_row(&table, rowid, &bt.payload(cur)?)?));
                    more = bt.next(cur)?;
                }
                Ok(rows)
            })
    }

    /// Every entry of an index in key order, decoded into its column values
    /// and rowid.
    pub fn index_entries(&mut self, db: usize, index: &str) -> Result<Vec<(Vec<Value>, i64)>> {
        let root = self
            .catalog
            .schema(db)?
            .index(index)
            .ok_or_else(|| HorizonError::NoSuchObject(format!("no such index: {index}")))?
            .storage_root()?;
        self.btree(db)?
            .with_cursor(root, TreeKind::Index, false, |bt, cur| {
                let mut entries = Vec::new();
                let mut more = bt.first(cur)?;
                while more {
                    entries.push(decode_index_key(&bt.payload(cur)?)?);
                    more = bt.next(cur)?;
                }
                Ok(entries)
            })
    }
}
