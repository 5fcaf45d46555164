//! Record and index-key encodings.
//!
//! Two byte formats are defined here:
//!
//! * **Records** hold table rows. A record is a varint header of serial
//!   types followed by the column bodies, so any single column can be read
//!   without decoding the ones after it:
//!
//!   ```text
//!   [header_len varint][serial_type varint]* [body]*
//!   ```
//!
//!   | Serial type | Meaning                     | Body size |
//!   |-------------|-----------------------------|-----------|
//!   | 0           | NULL                        | 0         |
//!   | 1..=6       | big-endian signed integer   | 1,2,3,4,6,8 |
//!   | 7           | IEEE 754 double             | 8         |
//!   | 8 / 9       | the integers 0 / 1          | 0         |
//!   | N >= 12, even | BLOB                      | (N-12)/2  |
//!   | N >= 13, odd  | TEXT (UTF-8)              | (N-13)/2  |
//!
//! * **Index keys** are memcomparable: comparing two encoded keys with
//!   `<[u8]>::cmp` gives the same order as comparing the value tuples with
//!   [`Value::cmp`], with the rowid as the final tie-breaker. Index B-trees
//!   therefore never need to decode a key to navigate.

use std::cmp::Ordering;

use crate::error::{HorizonError, Result};
use crate::types::Value;

// ---------------------------------------------------------------------------
// Varints
// ---------------------------------------------------------------------------

/// Longest possible varint encoding.
pub const MAX_VARINT_LEN: usize = 9;

/// Number of bytes needed to encode `value` as a varint.
pub const fn varint_len(value: u64) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else if value <= 0x1F_FFFF {
        3
    } else if value <= 0x0FFF_FFFF {
        4
    } else if value <= 0x07_FFFF_FFFF {
        5
    } else if value <= 0x03FF_FFFF_FFFF {
        6
    } else if value <= 0x01_FFFF_FFFF_FFFF {
        7
    } else if value <= 0xFF_FFFF_FFFF_FFFF {
        8
    } else {
        9
    }
}

/// Append the varint encoding of `value` to `out` and return its length.
///
/// The first eight bytes carry seven bits each with the high bit as a
/// continuation flag; a ninth byte, when present, carries a full eight bits.
pub fn put_varint(out: &mut Vec<u8>, value: u64) -> usize {
    let len = varint_len(value);
    if len == 9 {
        let mut v = value >> 8;
        let mut head = [0u8; 8];
        for slot in head.iter_mut().rev() {
            *slot = (v as u8 & 0x7F) | 0x80;
            v >>= 7;
        }
        out.extend_from_slice(&head);
        out.push(value as u8);
    } else {
        let start = out.len();
        out.resize(start + len, 0);
        let mut v = value;
        for i in (0..len).rev() {
            let mut byte = v as u8 & 0x7F;
            if i != len - 1 {
                byte |= 0x80;
            }
            out[start + i] = byte;
            v >>= 7;
        }
    }
    len
}

/// Decode a varint from the front of `buf`, returning `(value, consumed)`.
///
/// Returns `None` if `buf` ends before the varint does.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(8) {
        if byte & 0x80 == 0 {
            return Some(((value << 7) | u64::from(byte), i + 1));
        }
        value = (value << 7) | u64::from(byte & 0x7F);
    }
    let last = *buf.get(8)?;
    Some(((value << 8) | u64::from(last), 9))
}

fn read_varint_at(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    buf.get(offset..)
        .and_then(read_varint)
        .ok_or_else(|| HorizonError::Corrupt("truncated varint in record".into()))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Serial type for `value` under the record format.
pub fn serial_type(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Integer(0) => 8,
        Value::Integer(1) => 9,
        Value::Integer(i) => {
            let i = *i;
            if (-128..=127).contains(&i) {
                1
            } else if (-32_768..=32_767).contains(&i) {
                2
            } else if (-8_388_608..=8_388_607).contains(&i) {
                3
            } else if (-2_147_483_648..=2_147_483_647).contains(&i) {
                4
            } else if (-140_737_488_355_328..=140_737_488_355_327).contains(&i) {
                5
            } else {
                6
            }
        }
        Value::Real(_) => 7,
        Value::Blob(b) => 12 + 2 * b.len() as u64,
        Value::Text(s) => 13 + 2 * s.len() as u64,
    }
}

/// Body size in bytes for a serial type.
pub fn serial_type_len(serial: u64) -> usize {
    match serial {
        0 | 8 | 9 | 10 | 11 => 0,
        1 => 1,
        2 => 2,
        3 => 3,
        4 => 4,
        5 => 6,
        6 | 7 => 8,
        n => ((n - 12) / 2) as usize,
    }
}

/// Serialize a row of values into a record.
pub fn encode_record(values: &[Value]) -> Vec<u8> {
    let serials: Vec<u64> = values.iter().map(serial_type).collect();
    let types_len: usize = serials.iter().map(|&s| varint_len(s)).sum();

    // The header length counts its own varint.
    let mut header_len = types_len + 1;
    while types_len + varint_len(header_len as u64) != header_len {
        header_len = types_len + varint_len(header_len as u64);
    }

    let body_len: usize = serials.iter().map(|&s| serial_type_len(s)).sum();
    let mut out = Vec::with_capacity(header_len + body_len);
    put_varint(&mut out, header_len as u64);
    for &serial in &serials {
        put_varint(&mut out, serial);
    }

    for (value, &serial) in values.iter().zip(&serials) {
        match value {
            Value::Null => {}
            Value::Integer(i) => {
                let n = serial_type_len(serial);
                out.extend_from_slice(&i.to_be_bytes()[8 - n..]);
            }
            Value::Real(r) => out.extend_from_slice(&r.to_bits().to_be_bytes()),
            Value::Text(s) => out.extend_from_slice(s.as_bytes()),
            Value::Blob(b) => out.extend_from_slice(b),
        }
    }
    out
}

/// Parse the serial types of a record header.
///
/// Returns the serial types and the offset at which the body starts.
fn record_header(buf: &[u8]) -> Result<(Vec<u64>, usize)> {
    let (header_len, mut offset) = read_varint_at(buf, 0)?;
    let header_len = header_len as usize;
    if header_len > buf.len() || header_len < offset {
        return Err(HorizonError::Corrupt(format!(
            "record header length {header_len} exceeds record size {}",
            buf.len()
        )));
    }
    let mut serials = Vec::new();
    while offset < header_len {
        let (serial, n) = read_varint_at(buf, offset)?;
        serials.push(serial);
        offset += n;
    }
    Ok((serials, header_len))
}

fn decode_body(serial: u64, body: &[u8]) -> Result<Value> {
    let value = match serial {
        0 => Value::Null,
        1..=6 => {
            let n = body.len();
            let fill = if body[0] & 0x80 != 0 { 0xFF } else { 0x00 };
            let mut bytes = [fill; 8];
            bytes[8 - n..].copy_from_slice(body);
            Value::Integer(i64::from_be_bytes(bytes))
        }
        7 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(body);
            Value::Real(f64::from_bits(u64::from_be_bytes(bytes)))
        }
        8 => Value::Integer(0),
        9 => Value::Integer(1),
        10 | 11 => {
            return Err(HorizonError::Corrupt(format!(
                "reserved serial type {serial}"
            )))
        }
        n if n % 2 == 0 => Value::Blob(body.to_vec()),
        _ => Value::Text(
            String::from_utf8(body.to_vec())
                .map_err(|_| HorizonError::Corrupt("invalid UTF-8 in text column".into()))?,
        ),
    };
    Ok(value)
}

fn body_slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    buf.get(offset..offset + len).ok_or_else(|| {
        HorizonError::Corrupt(format!(
            "record body overruns record ({} + {len} > {})",
            offset,
            buf.len()
        ))
    })
}

/// Decode every column of a record.
pub fn decode_record(buf: &[u8]) -> Result<Vec<Value>> {
    let (serials, mut offset) = record_header(buf)?;
    let mut values = Vec::with_capacity(serials.len());
    for serial in serials {
        let len = serial_type_len(serial);
        values.push(decode_body(serial, body_slice(buf, offset, len)?)?);
        offset += len;
    }
    Ok(values)
}

/// Decode only column `index` of a record.
///
/// Columns past the end of the record read as NULL, which is how rows
/// written before an `ALTER TABLE ... ADD COLUMN` present themselves.
pub fn decode_column(buf: &[u8], index: usize) -> Result<Value> {
    let (serials, mut offset) = record_header(buf)?;
    let Some(&serial) = serials.get(index) else {
        return Ok(Value::Null);
    };
    offset += serials[..index]
        .iter()
        .map(|&s| serial_type_len(s))
        .sum::<usize>();
    decode_body(serial, body_slice(buf, offset, serial_type_len(serial))?)
}

/// Number of columns stored in a record.
pub fn column_count(buf: &[u8]) -> Result<usize> {
    Ok(record_header(buf)?.0.len())
}

// ---------------------------------------------------------------------------
// Index keys
// ---------------------------------------------------------------------------

const TAG_NULL: u8 = 0x05;
const TAG_NUMERIC: u8 = 0x15;
const TAG_TEXT: u8 = 0x25;
const TAG_BLOB: u8 = 0x35;

const SIGN_BIT: u64 = 1 << 63;

fn ordered_f64(f: f64) -> u64 {
    // -0.0 and 0.0 compare equal and must encode equal.
    let f = if f == 0.0 { 0.0 } else { f };
    let bits = f.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    }
}

fn unordered_f64(bits: u64) -> f64 {
    if bits & SIGN_BIT != 0 {
        f64::from_bits(bits ^ SIGN_BIT)
    } else {
        f64::from_bits(!bits)
    }
}

fn ordered_i64(i: i64) -> u64 {
    (i as u64) ^ SIGN_BIT
}

fn unordered_i64(bits: u64) -> i64 {
    (bits ^ SIGN_BIT) as i64
}

fn put_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == 0 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

fn put_key_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Integer(i) => {
            out.push(TAG_NUMERIC);
            out.extend_from_slice(&ordered_f64(*i as f64).to_be_bytes());
            out.extend_from_slice(&ordered_i64(*i).to_be_bytes());
            out.push(0);
        }
        Value::Real(r) => {
            out.push(TAG_NUMERIC);
            out.extend_from_slice(&ordered_f64(*r).to_be_bytes());
            // Saturating truncation orders reals against integers that
            // round to the same double. The trailing byte marks reals the
            // truncation could not represent.
            out.extend_from_slice(&ordered_i64(*r as i64).to_be_bytes());
            out.push(u8::from(*r >= i64::MAX as f64));
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            put_escaped(out, s.as_bytes());
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            put_escaped(out, b);
        }
    }
}

/// Encode the value columns of an index entry without the rowid suffix.
///
/// Two entries collide on a UNIQUE index exactly when their prefixes are
/// equal and contain no NULL.
pub fn encode_key_prefix(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        put_key_value(&mut out, value);
    }
    out
}

/// Encode a complete index key: the value columns followed by the rowid.
pub fn encode_index_key(values: &[Value], rowid: i64) -> Vec<u8> {
    let mut out = encode_key_prefix(values);
    out.extend_from_slice(&ordered_i64(rowid).to_be_bytes());
    out
}

/// Extract the rowid suffix of an index key.
pub fn index_key_rowid(key: &[u8]) -> Result<i64> {
    if key.len() < 8 {
        return Err(HorizonError::Corrupt("index key shorter than a rowid".into()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[key.len() - 8..]);
    Ok(unordered_i64(u64::from_be_bytes(bytes)))
}

fn take_escaped(key: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = *key
            .get(*pos)
            .ok_or_else(|| HorizonError::Corrupt("unterminated index key string".into()))?;
        *pos += 1;
        if b != 0 {
            out.push(b);
            continue;
        }
        match key.get(*pos) {
            Some(0xFF) => {
                out.push(0);
                *pos += 1;
            }
            Some(0x00) => {
                *pos += 1;
                return Ok(out);
            }
            _ => return Err(HorizonError::Corrupt("bad escape in index key".into())),
        }
    }
}

fn take_u64(key: &[u8], pos: &mut usize) -> Result<u64> {
    let slice = key
        .get(*pos..*pos + 8)
        .ok_or_else(|| HorizonError::Corrupt("truncated numeric index key".into()))?;
    *pos += 8;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(slice);
    Ok(u64::from_be_bytes(bytes))
}

/// Decode an index key back into its value columns and rowid.
///
/// Integral numerics decode as integers; the storage class of an indexed
/// REAL with an integral value is not preserved.
pub fn decode_index_key(key: &[u8]) -> Result<(Vec<Value>, i64)> {
    let rowid = index_key_rowid(key)?;
    let body = &key[..key.len() - 8];
    let mut pos = 0;
    let mut values = Vec::new();
    while pos < body.len() {
        let tag = body[pos];
        pos += 1;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_NUMERIC => {
                let f = unordered_f64(take_u64(body, &mut pos)?);
                let i = unordered_i64(take_u64(body, &mut pos)?);
                let saturated = *body
                    .get(pos)
                    .ok_or_else(|| HorizonError::Corrupt("truncated numeric index key".into()))?;
                pos += 1;
                if saturated == 0 && i as f64 == f {
                    Value::Integer(i)
                } else {
                    Value::Real(f)
                }
            }
            TAG_TEXT => Value::Text(
                String::from_utf8(take_escaped(body, &mut pos)?)
                    .map_err(|_| HorizonError::Corrupt("invalid UTF-8 in index key".into()))?,
            ),
            TAG_BLOB => Value::Blob(take_escaped(body, &mut pos)?),
            other => {
                return Err(HorizonError::Corrupt(format!(
                    "unknown index key tag {other:#04x}"
                )))
            }
        };
        values.push(value);
    }
    Ok((values, rowid))
}

/// Compare two value tuples the way their encoded keys would compare.
pub fn compare_tuples(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.cmp(y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for &v in &[
            0u64,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            0x1F_FFFF,
            0x0FFF_FFFF,
            0xFF_FFFF_FFFF_FFFF,
            0x0100_0000_0000_0000,
            u64::MAX,
        ] {
            let mut buf = Vec::new();
            let n = put_varint(&mut buf, v);
            assert_eq!(n, varint_len(v));
            assert_eq!(buf.len(), n);
            assert_eq!(read_varint(&buf), Some((v, n)), "value {v:#x}");
        }
    }

    #[test]
    fn truncated_varint_is_none() {
        assert_eq!(read_varint(&[]), None);
        assert_eq!(read_varint(&[0x81]), None);
        assert_eq!(read_varint(&[0xFF; 8]), None);
    }

    #[test]
    fn integer_serial_types_pick_the_smallest_width() {
        assert_eq!(serial_type(&Value::Integer(0)), 8);
        assert_eq!(serial_type(&Value::Integer(1)), 9);
        assert_eq!(serial_type(&Value::Integer(-1)), 1);
        assert_eq!(serial_type(&Value::Integer(300)), 2);
        assert_eq!(serial_type(&Value::Integer(1 << 40)), 5);
        assert_eq!(serial_type(&Value::Integer(i64::MIN)), 6);
        assert_eq!(serial_type(&Value::Text("abc".into())), 19);
        assert_eq!(serial_type(&Value::Blob(vec![1, 2])), 16);
    }

    #[test]
    fn record_preserves_every_storage_class() {
        let row = vec![
            Value::Null,
            Value::Integer(-70_000),
            Value::Integer(1),
            Value::Real(2.5),
            Value::Text("héllo".into()),
            Value::Blob(vec![0, 1, 2, 255]),
            Value::Integer(i64::MAX),
        ];
        let rec = encode_record(&row);
        assert_eq!(decode_record(&rec).unwrap(), row);
        assert_eq!(column_count(&rec).unwrap(), row.len());
    }

    #[test]
    fn single_column_decode_skips_earlier_columns() {
        let row = vec![
            Value::Text("x".repeat(500)),
            Value::Integer(42),
            Value::Real(-0.5),
        ];
        let rec = encode_record(&row);
        assert_eq!(decode_column(&rec, 1).unwrap(), Value::Integer(42));
        assert_eq!(decode_column(&rec, 2).unwrap(), Value::Real(-0.5));
        assert_eq!(decode_column(&rec, 7).unwrap(), Value::Null);
    }

    #[test]
    fn wide_record_header_length_is_self_consistent() {
        let row: Vec<Value> = (0..200).map(|i| Value::Integer(i * 1000)).collect();
        let rec = encode_record(&row);
        let (header_len, _) = read_varint(&rec).unwrap();
        assert!(header_len > 127);
        assert_eq!(decode_record(&rec).unwrap(), row);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let mut rec = encode_record(&[Value::Text("abcdef".into())]);
        rec.truncate(rec.len() - 2);
        assert!(matches!(decode_record(&rec), Err(HorizonError::Corrupt(_))));
    }

    #[test]
    fn index_key_order_matches_value_order() {
        let values = vec![
            Value::Null,
            Value::Real(-1e300),
            Value::Integer(i64::MIN),
            Value::Integer(-5),
            Value::Real(-0.5),
            Value::Integer(0),
            Value::Real(0.25),
            Value::Integer(1),
            Value::Real(1.5),
            Value::Integer(9_007_199_254_740_993),
            Value::Integer(i64::MAX),
            Value::Real(i64::MAX as f64),
            Value::Real(1e300),
            Value::Text(String::new()),
            Value::Text("a".into()),
            Value::Text("a\0".into()),
            Value::Text("ab".into()),
            Value::Text("b".into()),
            Value::Blob(vec![]),
            Value::Blob(vec![0]),
            Value::Blob(vec![0, 0]),
            Value::Blob(vec![1]),
        ];
        for a in &values {
            for b in &values {
                let ka = encode_index_key(std::slice::from_ref(a), 7);
                let kb = encode_index_key(std::slice::from_ref(b), 7);
                assert_eq!(ka.cmp(&kb), a.cmp(b), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn equal_numerics_share_a_key_prefix() {
        assert_eq!(
            encode_key_prefix(&[Value::Integer(3)]),
            encode_key_prefix(&[Value::Real(3.0)])
        );
        assert_eq!(
            encode_key_prefix(&[Value::Real(0.0)]),
            encode_key_prefix(&[Value::Real(-0.0)])
        );
    }

    #[test]
    fn rowid_breaks_ties() {
        let v = [Value::Text("same".into())];
        let k1 = encode_index_key(&v, -3);
        let k2 = encode_index_key(&v, 2);
        assert!(k1 < k2);
        assert_eq!(index_key_rowid(&k1).unwrap(), -3);
    }

    #[test]
    fn index_key_decodes() {
        let cols = vec![
            Value::Integer(-12),
            Value::Real(2.75),
            Value::Null,
            Value::Text("with\0nul".into()),
            Value::Blob(vec![0, 0xFF, 0]),
        ];
        let key = encode_index_key(&cols, 99);
        let (decoded, rowid) = decode_index_key(&key).unwrap();
        assert_eq!(decoded, cols);
        assert_eq!(rowid, 99);
    }

    #[test]
    fn tuple_comparison_is_lexicographic() {
        let a = [Value::Integer(1), Value::Text("b".into())];
        let b = [Value::Integer(1), Value::Text("c".into())];
        assert_eq!(compare_tuples(&a, &b), Ordering::Less);
        assert_eq!(compare_tuples(&a[..1], &a), Ordering::Less);
    }
}
