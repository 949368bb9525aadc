//! Dynamic cell values and batch keys.
//!
//! Loaders operate on dynamic rows, so cells are a closed scalar enum
//! ([`Value`]) rather than typed struct fields. Batch keys are the hashable
//! subset of those scalars ([`Key`]): grouping and deduplication need `Eq` and
//! `Hash`, which rules out floats, nulls and JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A dynamic cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// UUID value.
    Uuid(Uuid),
    /// String value.
    String(String),
    /// JSON value.
    Json(serde_json::Value),
}

impl Value {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert this cell into a batch key, if its type can act as one.
    ///
    /// Nulls, booleans, floats and JSON values are not usable as grouping
    /// keys and return `None`.
    pub fn as_key(&self) -> Option<Key> {
        match self {
            Self::Int(v) => Some(Key::Int(*v)),
            Self::Uuid(v) => Some(Key::Uuid(*v)),
            Self::String(v) => Some(Key::String(v.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Uuid(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// A batch key: the hashable subset of [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer key.
    Int(i64),
    /// UUID key.
    Uuid(Uuid),
    /// String key.
    String(String),
}

impl Key {
    /// Convert this key into a query parameter value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(v) => Value::Int(*v),
            Self::Uuid(v) => Value::Uuid(*v),
            Self::String(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Uuid(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Uuid> for Key {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        k.to_value()
    }
}
