// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key and row value objects.
//!
//! A [`Row`] is an immutable, ordered tuple of [`Value`]s matching the full
//! projected field list. A [`Key`] is the ordered tuple of key-field values.
//! Both compare and hash structurally, so two keys built from equal values
//! always address the same cache entry.
//!
//! # Example
//!
//! ```
//! use lookup_cache::{Key, Row, Value};
//!
//! let row = Row::new(vec![Value::Int(7), Value::from("alice"), Value::Null]);
//! let key = row.project(&[0]);
//!
//! assert_eq!(key, Key::new(vec![Value::Int(7)]));
//! assert_eq!(row.len(), 3);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A single scalar (or null) column value.
///
/// Floats compare and hash by bit pattern so `Value` can be used inside
/// hash keys. `-0.0` and `0.0` are distinct keys; all NaNs with the same
/// payload are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn discriminant(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
            Self::Bytes(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Text(s) => s.hash(state),
            Self::Bytes(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Lookup key: the ordered values of the declared key fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(Vec<Value>);

impl Key {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// An immutable result row.
///
/// Cloning is an `Arc` bump, so rows can be handed to collectors and kept
/// in cache entries without copying column data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row(Arc<[Value]>);

impl Row {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into())
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build the key for this row from the given field positions.
    ///
    /// Positions past the end of the row project to `Value::Null`.
    #[must_use]
    pub fn project(&self, indices: &[usize]) -> Key {
        Key(indices
            .iter()
            .map(|&i| self.0.get(i).cloned().unwrap_or(Value::Null))
            .collect())
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_is_structural() {
        let a = Key::new(vec![Value::Int(1), Value::from("x")]);
        let b = Key::new(vec![Value::Int(1), Value::from("x".to_string())]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_distinct_variants_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::Text(String::new()));
        assert_ne!(Value::Text("a".into()), Value::Bytes(b"a".to_vec()));
    }

    #[test]
    fn test_float_keys_hash_by_bits() {
        let mut set = HashSet::new();
        set.insert(Key::new(vec![Value::Float(f64::NAN)]));
        assert!(set.contains(&Key::new(vec![Value::Float(f64::NAN)])));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn test_project_builds_key_in_index_order() {
        let row = Row::new(vec![Value::Int(1), Value::from("b"), Value::Bool(true)]);
        let key = row.project(&[2, 0]);
        assert_eq!(key.values(), &[Value::Bool(true), Value::Int(1)]);
    }

    #[test]
    fn test_project_out_of_range_is_null() {
        let row = Row::new(vec![Value::Int(1)]);
        assert_eq!(row.project(&[3]).values(), &[Value::Null]);
    }

    #[test]
    fn test_option_into_value() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some(5i64)), Value::Int(5));
    }

    #[test]
    fn test_key_display() {
        let key = Key::new(vec![Value::Int(3), Value::from("x"), Value::Null]);
        assert_eq!(key.to_string(), "(3, 'x', NULL)");
    }

    #[test]
    fn test_row_serde_roundtrip_preserves_order() {
        let row = Row::new(vec![Value::Int(1), Value::from("two"), Value::Null]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"[1,"two",null]"#);
    }
}
