//! Runtime values and column affinity.
//!
//! Rows are stored as records of [`Value`]s, one of the five SQLite storage
//! classes. Columns carry a [`DataType`] affinity derived from their
//! declared type name; the affinity is applied to values on insert.
//!
//! The on-disk encoding of values lives in [`crate::record`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

// ---------------------------------------------------------------------------
// DataType (column affinity)
// ---------------------------------------------------------------------------

/// Type affinity of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Real,
    Text,
    /// No type preference (also used when no type is declared).
    Blob,
    Numeric,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Numeric => "NUMERIC",
        };
        f.write_str(name)
    }
}

/// Determines the affinity of a declared column type.
///
/// Rules, in priority order:
///
/// | Declared type contains        | Affinity  |
/// |-------------------------------|-----------|
/// | `INT`                         | Integer   |
/// | `CHAR`, `CLOB`, `TEXT`        | Text      |
/// | `BLOB`, or empty              | Blob      |
/// | `REAL`, `FLOA`, `DOUB`        | Real      |
/// | anything else                 | Numeric   |
pub fn determine_affinity(type_name: &str) -> DataType {
    let upper = type_name.to_ascii_uppercase();

    if upper.contains("INT") {
        DataType::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        DataType::Text
    } else if upper.contains("BLOB") || upper.trim().is_empty() {
        DataType::Blob
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        DataType::Real
    } else {
        DataType::Numeric
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically-typed value.
///
/// Ordering follows SQLite: NULL < INTEGER/REAL (compared numerically) <
/// TEXT < BLOB. Two NaN reals compare equal.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the storage class of this value, or `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Real(_) => Some(DataType::Real),
            Value::Text(_) => Some(DataType::Text),
            Value::Blob(_) => Some(DataType::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Coerces this value toward a column affinity.
    ///
    /// NULL is never coerced, and Blob affinity never converts anything.
    pub fn apply_affinity(&self, affinity: DataType) -> Value {
        match (affinity, self) {
            (_, Value::Null) | (DataType::Blob, _) => self.clone(),
            (DataType::Text, Value::Integer(i)) => Value::Text(i.to_string()),
            (DataType::Text, Value::Real(r)) => Value::Text(format!("{r}")),
            (DataType::Real, Value::Integer(i)) => Value::Real(*i as f64),
            (DataType::Real, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(r) => Value::Real(r),
                Err(_) => self.clone(),
            },
            (DataType::Integer | DataType::Numeric, Value::Text(s)) => {
                parse_numeric(s.trim()).unwrap_or_else(|| self.clone())
            }
            (DataType::Integer, Value::Real(r)) => real_as_integer(*r).unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }
}

fn real_as_integer(r: f64) -> Option<Value> {
    let truncated = r.trunc();
    if r == truncated && truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
        Some(Value::Integer(truncated as i64))
    } else {
        None
    }
}

fn parse_numeric(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    let r = text.parse::<f64>().ok()?;
    Some(real_as_integer(r).unwrap_or(Value::Real(r)))
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            // Integers and integral reals compare equal, so they must hash
            // the same way.
            Value::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Value::Real(r) => match real_as_integer(*r) {
                Some(Value::Integer(i)) => {
                    1u8.hash(state);
                    i.hash(state);
                }
                _ => {
                    2u8.hash(state);
                    if r.is_nan() {
                        u64::MAX.hash(state);
                    } else {
                        r.to_bits().hash(state);
                    }
                }
            },
            Value::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Blob(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,

            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => compare_f64(*a, *b),
            (Value::Integer(i), Value::Real(r)) => compare_int_real(*i, *r),
            (Value::Real(r), Value::Integer(i)) => compare_int_real(*i, *r).reverse(),

            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),

            (Value::Integer(_) | Value::Real(_), _) => Ordering::Less,
            (_, Value::Integer(_) | Value::Real(_)) => Ordering::Greater,
            (Value::Text(_), Value::Blob(_)) => Ordering::Less,
            (Value::Blob(_), Value::Text(_)) => Ordering::Greater,
        }
    }
}

/// Total order on `f64`: NaN equals NaN and sorts above everything else.
fn compare_f64(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ord) => ord,
        None => a.is_nan().cmp(&b.is_nan()),
    }
}

/// Integer/real comparison that stays exact beyond 2^53.
fn compare_int_real(i: i64, r: f64) -> Ordering {
    if r.is_nan() {
        return Ordering::Less;
    }
    if r >= i64::MAX as f64 {
        return Ordering::Less;
    }
    if r < i64::MIN as f64 {
        return Ordering::Greater;
    }
    let truncated = r.trunc() as i64;
    match i.cmp(&truncated) {
        Ordering::Equal => compare_f64(0.0, r - r.trunc()),
        ord => ord,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) if r.fract() == 0.0 && r.is_finite() => write!(f, "{r:.1}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => {
                write!(f, "X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                write!(f, "'")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_rules_follow_declared_type() {
        assert_eq!(determine_affinity("BIGINT"), DataType::Integer);
        assert_eq!(determine_affinity("VARCHAR(255)"), DataType::Text);
        assert_eq!(determine_affinity(""), DataType::Blob);
        assert_eq!(determine_affinity("DOUBLE PRECISION"), DataType::Real);
        assert_eq!(determine_affinity("DECIMAL(10,5)"), DataType::Numeric);
        assert_eq!(determine_affinity("integer"), DataType::Integer);
    }

    #[test]
    fn apply_affinity_converts_text_numbers() {
        let v = Value::Text("42".into());
        assert_eq!(v.apply_affinity(DataType::Integer), Value::Integer(42));
        assert!(matches!(
            Value::Text("3.0".into()).apply_affinity(DataType::Numeric),
            Value::Integer(3)
        ));
        assert!(matches!(
            Value::Integer(7).apply_affinity(DataType::Text),
            Value::Text(ref s) if s == "7"
        ));
        assert!(Value::Null.apply_affinity(DataType::Integer).is_null());
        assert!(matches!(
            Value::Text("abc".into()).apply_affinity(DataType::Integer),
            Value::Text(_)
        ));
    }

    #[test]
    fn ordering_across_storage_classes() {
        let mut values = vec![
            Value::Blob(vec![0]),
            Value::Text("a".into()),
            Value::Real(1.5),
            Value::Integer(1),
            Value::Null,
        ];
        values.sort();
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Integer(1));
        assert_eq!(values[2], Value::Real(1.5));
        assert!(matches!(values[3], Value::Text(_)));
        assert!(matches!(values[4], Value::Blob(_)));
    }

    #[test]
    fn integer_and_real_compare_numerically() {
        assert_eq!(Value::Integer(2), Value::Real(2.0));
        assert!(Value::Integer(2) < Value::Real(2.5));
        assert!(Value::Real(-0.5) < Value::Integer(0));
        assert!(Value::Integer(i64::MAX) < Value::Real(1e19));
        assert!(Value::Integer((1 << 53) + 1) > Value::Real((1u64 << 53) as f64));
    }

    #[test]
    fn equal_values_hash_equally() {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of(v: &Value) -> u64 {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        }

        assert_eq!(hash_of(&Value::Integer(3)), hash_of(&Value::Real(3.0)));
        assert_eq!(hash_of(&Value::Real(f64::NAN)), hash_of(&Value::Real(f64::NAN)));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Real(2.0).to_string(), "2.0");
        assert_eq!(Value::Blob(vec![0xCA, 0xFE]).to_string(), "X'CAFE'");
    }
}
