//! In-memory tables
//!
//! A `Table` is an ordered list of column names plus row-major cells. It is the
//! execution substrate for cleaning and for query plans: every operation takes
//! `&Table` and returns a new table, nothing is mutated in place.

pub mod csv;
pub mod value;

pub use value::Value;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Table errors
#[derive(Error, Debug)]
pub enum TableError {
    /// Row width does not match the header
    #[error("Row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// CSV decoding/encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TableResult<T> = Result<T, TableError>;

/// Inferred type of a column, used when describing the schema to a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    Mixed,
    Empty,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Mixed => "mixed",
            ColumnType::Empty => "empty",
        };
        write!(f, "{}", name)
    }
}

/// Column name and inferred type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Canonical form of a column name for lookups: `Join Date` == `join_date`.
fn fold_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

impl Table {
    /// Create an empty table with the given header
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from a header and rows, checking row widths
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> TableResult<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> TableResult<()> {
        if row.len() != self.columns.len() {
            return Err(TableError::RaggedRow {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolve a field name against the header.
    ///
    /// An exact match wins; otherwise names are compared case-insensitively with
    /// spaces, dashes and underscores treated alike.
    pub fn resolve_column(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.columns.iter().position(|c| c == name) {
            return Some(idx);
        }
        let folded = fold_name(name);
        self.columns.iter().position(|c| fold_name(c) == folded)
    }

    /// Resolve the first of several candidate names
    pub fn resolve_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.resolve_column(n))
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Replace a cell. Out-of-range coordinates are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: Value) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = value;
        }
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().filter_map(move |r| r.get(col))
    }

    /// Infer a column's type from its non-null cells
    pub fn column_type(&self, col: usize) -> ColumnType {
        let mut seen: Option<ColumnType> = None;
        for value in self.column_values(col) {
            let dtype = match value {
                Value::Null => continue,
                Value::Integer(_) => ColumnType::Integer,
                Value::Float(_) => ColumnType::Float,
                Value::String(_) => ColumnType::String,
                Value::Boolean(_) => ColumnType::Boolean,
                Value::Date(_) => ColumnType::Date,
            };
            seen = match seen {
                None => Some(dtype),
                Some(prev) if prev == dtype => Some(prev),
                Some(ColumnType::Integer) if dtype == ColumnType::Float => Some(ColumnType::Float),
                Some(ColumnType::Float) if dtype == ColumnType::Integer => Some(ColumnType::Float),
                Some(_) => Some(ColumnType::Mixed),
            };
        }
        seen.unwrap_or(ColumnType::Empty)
    }

    pub fn schema(&self) -> Vec<ColumnSchema> {
        (0..self.columns.len())
            .map(|idx| ColumnSchema {
                name: self.columns[idx].clone(),
                dtype: self.column_type(idx),
            })
            .collect()
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Keep rows for which `predicate` holds
    pub fn filter<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(&[Value]) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Keep only the given column indices, in the given order
    pub fn project(&self, cols: &[usize]) -> Table {
        Table {
            columns: cols.iter().map(|&c| self.columns[c].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| cols.iter().map(|&c| r[c].clone()).collect())
                .collect(),
        }
    }

    /// Rows as JSON objects keyed by column name, in column order
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (name, value) in self.columns.iter().zip(row) {
                    obj.insert(name.clone(), value.to_json());
                }
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

impl Serialize for Table {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Table", 2)?;
        s.serialize_field("columns", &self.columns)?;
        s.serialize_field("rows", &self.to_json_rows())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Table {
        Table::from_rows(
            ["Name", "Join Date", "age"],
            vec![
                vec!["A".into(), Value::Null, Value::Integer(30)],
                vec!["B".into(), "2024-01-01".into(), Value::Float(41.5)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_column_folds_names() {
        let table = people();
        assert_eq!(table.resolve_column("Name"), Some(0));
        assert_eq!(table.resolve_column("name"), Some(0));
        assert_eq!(table.resolve_column("join_date"), Some(1));
        assert_eq!(table.resolve_column("salary"), None);
        assert_eq!(table.resolve_any(&["salary", "AGE"]), Some(2));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let mut table = Table::new(["a", "b"]);
        let err = table.push_row(vec![Value::Null]).unwrap_err();
        assert!(matches!(err, TableError::RaggedRow { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_column_types() {
        let table = people();
        assert_eq!(table.column_type(0), ColumnType::String);
        assert_eq!(table.column_type(1), ColumnType::String);
        assert_eq!(table.column_type(2), ColumnType::Float);
        assert_eq!(Table::new(["x"]).column_type(0), ColumnType::Empty);
    }

    #[test]
    fn test_filter_and_project() {
        let table = people();
        let older = table.filter(|r| r[2].as_f64().map(|a| a > 35.0).unwrap_or(false));
        assert_eq!(older.len(), 1);
        let names = older.project(&[0]);
        assert_eq!(names.columns(), &["Name".to_string()]);
        assert_eq!(names.to_json_rows(), vec![serde_json::json!({"Name": "B"})]);
    }
}
