//! Dynamic result rows.
//!
//! Relation loaders do not know the shape of the tables they query, so results
//! are dynamic column→value maps. Column order is preserved (insertion order)
//! to keep projections and test assertions deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{Key, Value};

/// A single result row: an ordered map of column name to cell value.
///
/// # Example
///
/// ```rust
/// use rowbatch::{Row, Value};
///
/// let row = Row::from_pairs([("id", Value::from(1)), ("name", Value::from("ada"))]);
/// assert_eq!(row.get("name"), Some(&Value::from("ada")));
/// assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: IndexMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs, preserving pair order.
    pub fn from_pairs<C, V>(pairs: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<Value>,
    {
        Self {
            cells: pairs
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        }
    }

    /// Get a cell by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    /// Insert or replace a cell.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Read a cell as a batch key, if present and key-typed.
    ///
    /// This is how strategies partition result rows back onto input keys:
    /// a missing column, a null, or a non-key-typed cell matches no key.
    pub fn key_of(&self, column: &str) -> Option<Key> {
        self.cells.get(column).and_then(Value::as_key)
    }

    /// Column names in row order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Iterate cells in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Check whether the row has a column.
    pub fn contains_column(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<C: Into<String>, V: Into<Value>> FromIterator<(C, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (C, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_preserves_order() {
        let row = Row::from_pairs([("b", 2), ("a", 1), ("c", 3)]);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_get_and_insert() {
        let mut row = Row::new();
        assert!(row.is_empty());
        row.insert("id", 5);
        assert_eq!(row.get("id"), Some(&Value::Int(5)));
        assert!(row.contains_column("id"));
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_key_of() {
        let row = Row::from_pairs([
            ("id", Value::Int(9)),
            ("rate", Value::Float(0.5)),
            ("gone", Value::Null),
        ]);
        assert_eq!(row.key_of("id"), Some(Key::Int(9)));
        assert_eq!(row.key_of("rate"), None);
        assert_eq!(row.key_of("gone"), None);
        assert_eq!(row.key_of("missing"), None);
    }

    #[test]
    fn test_row_from_json() {
        let row: Row = serde_json::from_str(r#"{"id": 1, "title": "first"}"#).unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("title"), Some(&Value::String("first".into())));
    }
}
