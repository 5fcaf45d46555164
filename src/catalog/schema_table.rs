//! The persistent schema table.
//!
//! Every database keeps one row per schema object in the table B-tree at
//! [`SCHEMA_ROOT`]. Each row is a five-column record:
//!
//! | Column     | Type    | Contents                                     |
//! |------------|---------|----------------------------------------------|
//! | `type`     | TEXT    | `table`, `index`, `view` or `trigger`        |
//! | `name`     | TEXT    | object name                                  |
//! | `tbl_name` | TEXT    | owning table (the object itself for tables)  |
//! | `rootpage` | INTEGER | B-tree root, `0` for objects without storage |
//! | `sql`      | TEXT    | `CREATE` text, NULL for autoindexes          |

use crate::btree::{Btree, BtreePayload, DeleteFlags, InsertFlags, TreeKind};
use crate::error::{HorizonError, Result};
use crate::pager::SCHEMA_ROOT;
use crate::record::{decode_record, encode_record};
use crate::types::Value;

/// One row of the schema table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRow {
    pub kind: String,
    pub name: String,
    pub tbl_name: String,
    pub rootpage: i64,
    pub sql: Option<String>,
}

impl SchemaRow {
    pub fn new(kind: &str, name: &str, tbl_name: &str, rootpage: u32, sql: Option<&str>) -> Self {
        SchemaRow {
            kind: kind.to_string(),
            name: name.to_string(),
            tbl_name: tbl_name.to_string(),
            rootpage: i64::from(rootpage),
            sql: sql.map(str::to_string),
        }
    }

    pub fn to_record(&self) -> Vec<u8> {
        encode_record(&[
            Value::Text(self.kind.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.tbl_name.clone()),
            Value::Integer(self.rootpage),
            self.sql.clone().map_or(Value::Null, Value::Text),
        ])
    }
}

/// Render one stored column the way the replay callback receives it.
fn column_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Every schema row as text columns, in rowid order.
///
/// Rows with fewer than five columns are padded with `None`.
pub fn read_raw_rows(btree: &mut Btree) -> Result<Vec<[Option<String>; 5]>> {
    btree.with_cursor(SCHEMA_ROOT, TreeKind::Table, false, |btree, cur| {
        let mut rows = Vec::new();
        let mut more = btree.first(cur)?;
        while more {
            let values = decode_record(&btree.payload(cur)?)?;
            let mut row: [Option<String>; 5] = Default::default();
            for (slot, value) in row.iter_mut().zip(&values) {
                *slot = column_text(value);
            }
            rows.push(row);
            more = btree.next(cur)?;
        }
        Ok(rows)
    })
}

fn decode_row(payload: &[u8]) -> Result<SchemaRow> {
    let values = decode_record(payload)?;
    let text = |i: usize| -> String {
        values.get(i).and_then(column_text).unwrap_or_default()
    };
    Ok(SchemaRow {
        kind: text(0),
        name: text(1),
        tbl_name: text(2),
        rootpage: values.get(3).and_then(Value::as_integer).unwrap_or(0),
        sql: values.get(4).and_then(column_text),
    })
}

/// Append a row after the current last rowid; returns the new rowid.
pub fn append_row(btree: &mut Btree, row: &SchemaRow) -> Result<i64> {
    btree.with_cursor(SCHEMA_ROOT, TreeKind::Table, true, |btree, cur| {
        let rowid = if btree.last(cur)? {
            btree
                .rowid(cur)?
                .checked_add(1)
                .ok_or(HorizonError::Full)?
        } else {
            1
        };
        let payload = BtreePayload::row(rowid, row.to_record());
        btree.insert(cur, &payload, InsertFlags::APPEND, -1)?;
        Ok(rowid)
    })
}

/// Delete every row matching `pred`; returns how many went.
pub fn delete_rows(btree: &mut Btree, pred: impl Fn(&SchemaRow) -> bool) -> Result<usize> {
    btree.with_cursor(SCHEMA_ROOT, TreeKind::Table, true, |btree, cur| {
        let mut removed = 0;
        let mut more = btree.first(cur)?;
        while more {
            let row = decode_row(&btree.payload(cur)?)?;
            if pred(&row) {
                btree.delete(cur, DeleteFlags::SAVE_POSITION)?;
                removed += 1;
            }
            more = btree.next(cur)?;
        }
        Ok(removed)
    })
}

/// Every schema row, decoded.
pub fn read_rows(btree: &mut Btree) -> Result<Vec<SchemaRow>> {
    btree.with_cursor(SCHEMA_ROOT, TreeKind::Table, false, |btree, cur| {
        let mut rows = Vec::new();
        let mut more = btree.first(cur)?;
        while more {
            rows.push(decode_row(&btree.payload(cur)?)?);
            more = btree.next(cur)?;
        }
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tests::test_btree;

    #[test]
    fn append_read_and_delete() {
        let (_dir, mut btree) = test_btree();
        append_row(&mut btree, &SchemaRow::new("table", "t", "t", 2, Some("CREATE TABLE t(a UNIQUE)"))).unwrap();
        append_row(&mut btree, &SchemaRow::new("index", "sqlite_autoindex_t_1", "t", 3, None)).unwrap();
        let last = append_row(&mut btree, &SchemaRow::new("table", "u", "u", 4, Some("CREATE TABLE u(b)"))).unwrap();
        assert_eq!(last, 3);

        let raw = read_raw_rows(&mut btree).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1][3].as_deref(), Some("3"));
        assert_eq!(raw[1][4], None);

        let removed = delete_rows(&mut btree, |r| r.tbl_name == "t").unwrap();
        assert_eq!(removed, 2);
        let rows = read_rows(&mut btree).unwrap();
        assert_eq!(rows, vec![SchemaRow::new("table", "u", "u", 4, Some("CREATE TABLE u(b)"))]);
    }

    #[test]
    fn short_records_pad_with_none() {
        let (_dir, mut btree) = test_btree();
        btree
            .with_cursor(SCHEMA_ROOT, TreeKind::Table, true, |btree, cur| {
                let record = encode_record(&[Value::Text("index".into()), Value::Text("i".into())]);
                btree.insert(cur, &BtreePayload::row(1, record), InsertFlags::NONE, 0)
            })
            .unwrap();
        let raw = read_raw_rows(&mut btree).unwrap();
        assert_eq!(raw[0][1].as_deref(), Some("i"));
        assert!(raw[0][2..].iter().all(Option::is_none));
    }
}
