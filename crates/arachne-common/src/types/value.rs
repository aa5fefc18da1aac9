//! The dynamic property value stored on vertices and edges.
//!
//! [`Value`] follows the openCypher type system: nulls, booleans, 64-bit
//! integers and floats, strings, and arbitrarily (but acyclically) nested
//! lists and maps. Cheap to clone - strings, lists and maps are
//! reference-counted.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A dynamically-typed property value.
///
/// # Ordering
///
/// Index iteration and range filters need a *total* order across types,
/// so [`total_cmp`](Self::total_cmp) defines one:
///
/// `Null < Bool < numbers < String < List < Map`
///
/// Integers and floats compare by numeric value (`10 == 10.0`), nulls
/// compare equal to nulls, and `NaN` sorts above every other number so
/// that sorting stays total.
#[derive(Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Null/missing value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// 64-bit signed integer.
    Int64(i64),

    /// 64-bit floating point.
    Float64(f64),

    /// UTF-8 string (ArcStr for cheap cloning).
    String(ArcStr),

    /// Ordered list of values.
    List(Arc<[Value]>),

    /// Key-value map (BTreeMap for deterministic ordering).
    Map(Arc<BTreeMap<ArcStr, Value>>),
}

/// Rank of a value's type in the cross-type total order.
const fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int64(_) | Value::Float64(_) => 2,
        Value::String(_) => 3,
        Value::List(_) => 4,
        Value::Map(_) => 5,
    }
}

/// Total order over f64 with NaN greater than everything else.
fn float_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl Value {
    /// Returns `true` if this value is null.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean value if this is a Bool, otherwise None.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value if this is an Int64, otherwise None.
    #[inline]
    #[must_use]
    pub const fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value if this is a Float64, otherwise None.
    #[inline]
    #[must_use]
    pub const fn as_float64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string value if this is a String, otherwise None.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list value if this is a List, otherwise None.
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the map value if this is a Map, otherwise None.
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<ArcStr, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the type name of this value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int64(_) => "INT64",
            Value::Float64(_) => "FLOAT64",
            Value::String(_) => "STRING",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
        }
    }

    /// Compares two values under the cross-type total order.
    ///
    /// This is the order label+property indexes iterate in, and the order
    /// range filters use for their bounds.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        let rank = type_rank(self).cmp(&type_rank(other));
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => float_cmp(*a, *b),
            (Value::Int64(a), Value::Float64(b)) => float_cmp(*a as f64, *b),
            (Value::Float64(a), Value::Int64(b)) => float_cmp(*a, *b as f64),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let key = ka.cmp(kb);
                    if key != Ordering::Equal {
                        return key;
                    }
                    let val = va.total_cmp(vb);
                    if val != Ordering::Equal {
                        return val;
                    }
                }
                a.len().cmp(&b.len())
            }
            // Different ranks were handled above.
            _ => unreachable!("values of equal rank"),
        }
    }

    /// Serializes this value to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .expect("Value serialization should not fail")
    }

    /// Deserializes a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not represent a valid Value.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int64(i) => write!(f, "Int64({i})"),
            Value::Float64(fl) => write!(f, "Float64({fl})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(l) => write!(f, "List({l:?})"),
            Value::Map(m) => write!(f, "Map({m:?})"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(42i64).as_int64(), Some(42));
        assert_eq!(Value::from(2.5).as_float64(), Some(2.5));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(42i64).as_str(), None);
    }

    #[test]
    fn cross_type_rank_order() {
        let ordered = [
            Value::Null,
            Value::Bool(false),
            Value::Int64(i64::MAX),
            Value::from("a"),
            Value::from(vec![Value::Null]),
            Value::Map(Arc::new(BTreeMap::new())),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                pair[0].total_cmp(&pair[1]),
                Ordering::Less,
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn numeric_cross_type_equality() {
        assert_eq!(Value::Int64(10).total_cmp(&Value::Float64(10.0)), Ordering::Equal);
        assert_eq!(Value::Float64(9.5).total_cmp(&Value::Int64(10)), Ordering::Less);
        assert_eq!(Value::Int64(11).total_cmp(&Value::Float64(10.5)), Ordering::Greater);
    }

    #[test]
    fn null_equals_null() {
        assert_eq!(Value::Null.total_cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn nan_sorts_above_numbers() {
        assert_eq!(
            Value::Float64(f64::NAN).total_cmp(&Value::Int64(i64::MAX)),
            Ordering::Greater
        );
        assert_eq!(
            Value::Float64(f64::NAN).total_cmp(&Value::Float64(f64::NAN)),
            Ordering::Equal
        );
        // But still below strings.
        assert_eq!(
            Value::Float64(f64::NAN).total_cmp(&Value::from("")),
            Ordering::Less
        );
    }

    #[test]
    fn list_order_is_lexicographic() {
        let short = Value::from(vec![Value::Int64(1)]);
        let long = Value::from(vec![Value::Int64(1), Value::Int64(2)]);
        let bigger = Value::from(vec![Value::Int64(2)]);
        assert_eq!(short.total_cmp(&long), Ordering::Less);
        assert_eq!(long.total_cmp(&bigger), Ordering::Less);
    }

    #[test]
    fn serde_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert(ArcStr::from("k"), Value::from(vec![Value::Null, Value::from(1i64)]));
        let value = Value::Map(Arc::new(map));
        let bytes = value.to_bytes();
        let back = Value::from_bytes(&bytes).unwrap();
        assert_eq!(value, back);
    }
}
