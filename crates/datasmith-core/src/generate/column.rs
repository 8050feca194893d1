//! # Columnar Data Model
//!
//! Tables are held as one typed vector per column. Generators produce an
//! entire column at once and modifiers transform columns in place; this is
//! part of the RNG contract (a scalar-per-row path would reorder draws and
//! break determinism), not an optimization.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;

use crate::spec::LogicalType;

/// A single cell value, used for keys, dictionaries, samples, and the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String form for grouping and uniqueness tracking. Distinct values
    /// must map to distinct keys within a column.
    pub fn to_key(&self) -> String {
        match self {
            Value::Null => "__NULL__".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:.10}", f),
            Value::Str(s) => s.clone(),
            Value::DateTime(ts) => ts.to_rfc3339(),
            Value::Date(d) => d.to_string(),
        }
    }

    /// CSV cell rendering; null is the empty string.
    pub fn to_csv_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::DateTime(ts) => ts.to_rfc3339(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Interpret a JSON scalar from the specification (choice lists, enum
    /// constraints) as a typed value.
    pub fn from_json(json: &serde_json::Value, ty: LogicalType) -> Option<Value> {
        match (json, ty) {
            (serde_json::Value::Null, _) => Some(Value::Null),
            (serde_json::Value::Bool(b), LogicalType::Boolean) => Some(Value::Bool(*b)),
            (serde_json::Value::Number(n), LogicalType::Integer) => {
                n.as_i64().map(Value::Int).or_else(|| {
                    n.as_f64().map(|f| Value::Int(f.round() as i64))
                })
            }
            (serde_json::Value::Number(n), LogicalType::Floating) => {
                n.as_f64().map(Value::Float)
            }
            (serde_json::Value::String(s), LogicalType::String) => Some(Value::Str(s.clone())),
            (serde_json::Value::String(s), LogicalType::Datetime) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| Value::DateTime(ts.with_timezone(&Utc))),
            (serde_json::Value::String(s), LogicalType::Date) => {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Value::Date)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::DateTime(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Date(d) => write!(f, "{}", d),
        }
    }
}

/// One typed column. `None` entries are nulls.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    DateTime(Vec<Option<DateTime<Utc>>>),
    Date(Vec<Option<NaiveDate>>),
}

impl ColumnData {
    /// An empty column of the storage type for a logical type.
    pub fn empty(ty: LogicalType) -> Self {
        Self::with_capacity(ty, 0)
    }

    pub fn with_capacity(ty: LogicalType, n: usize) -> Self {
        match ty {
            LogicalType::Integer => ColumnData::Integer(Vec::with_capacity(n)),
            LogicalType::Floating => ColumnData::Float(Vec::with_capacity(n)),
            LogicalType::Boolean => ColumnData::Boolean(Vec::with_capacity(n)),
            LogicalType::String => ColumnData::Text(Vec::with_capacity(n)),
            LogicalType::Datetime => ColumnData::DateTime(Vec::with_capacity(n)),
            LogicalType::Date => ColumnData::Date(Vec::with_capacity(n)),
        }
    }

    pub fn logical_type(&self) -> LogicalType {
        match self {
            ColumnData::Integer(_) => LogicalType::Integer,
            ColumnData::Float(_) => LogicalType::Floating,
            ColumnData::Boolean(_) => LogicalType::Boolean,
            ColumnData::Text(_) => LogicalType::String,
            ColumnData::DateTime(_) => LogicalType::Datetime,
            ColumnData::Date(_) => LogicalType::Date,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::DateTime(v) => v.len(),
            ColumnData::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_at(&self, i: usize) -> Value {
        match self {
            ColumnData::Integer(v) => v[i].map(Value::Int).unwrap_or(Value::Null),
            ColumnData::Float(v) => v[i].map(Value::Float).unwrap_or(Value::Null),
            ColumnData::Boolean(v) => v[i].map(Value::Bool).unwrap_or(Value::Null),
            ColumnData::Text(v) => v[i]
                .as_ref()
                .map(|s| Value::Str(s.clone()))
                .unwrap_or(Value::Null),
            ColumnData::DateTime(v) => v[i].map(Value::DateTime).unwrap_or(Value::Null),
            ColumnData::Date(v) => v[i].map(Value::Date).unwrap_or(Value::Null),
        }
    }

    pub fn is_null_at(&self, i: usize) -> bool {
        match self {
            ColumnData::Integer(v) => v[i].is_none(),
            ColumnData::Float(v) => v[i].is_none(),
            ColumnData::Boolean(v) => v[i].is_none(),
            ColumnData::Text(v) => v[i].is_none(),
            ColumnData::DateTime(v) => v[i].is_none(),
            ColumnData::Date(v) => v[i].is_none(),
        }
    }

    /// Append a scalar. The value must match the column's storage type
    /// (or be null); mismatches indicate an executor bug and panic.
    pub fn push(&mut self, value: Value) {
        match (self, value) {
            (ColumnData::Integer(v), Value::Int(x)) => v.push(Some(x)),
            (ColumnData::Integer(v), Value::Float(x)) => v.push(Some(x.round() as i64)),
            (ColumnData::Integer(v), Value::Null) => v.push(None),
            (ColumnData::Float(v), Value::Float(x)) => v.push(Some(x)),
            (ColumnData::Float(v), Value::Int(x)) => v.push(Some(x as f64)),
            (ColumnData::Float(v), Value::Null) => v.push(None),
            (ColumnData::Boolean(v), Value::Bool(x)) => v.push(Some(x)),
            (ColumnData::Boolean(v), Value::Null) => v.push(None),
            (ColumnData::Text(v), Value::Str(x)) => v.push(Some(x)),
            (ColumnData::Text(v), Value::Null) => v.push(None),
            (ColumnData::DateTime(v), Value::DateTime(x)) => v.push(Some(x)),
            (ColumnData::DateTime(v), Value::Null) => v.push(None),
            (ColumnData::Date(v), Value::Date(x)) => v.push(Some(x)),
            (ColumnData::Date(v), Value::Null) => v.push(None),
            (col, value) => panic!(
                "type mismatch pushing {:?} into {} column",
                value,
                col.logical_type()
            ),
        }
    }

    /// Numeric view of an integer or float column.
    pub fn numeric_f64(&self) -> Option<Vec<Option<f64>>> {
        match self {
            ColumnData::Integer(v) => Some(v.iter().map(|x| x.map(|i| i as f64)).collect()),
            ColumnData::Float(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Build a numeric column from an f64 buffer, rounding for integers.
    pub fn from_f64(values: Vec<Option<f64>>, ty: LogicalType) -> ColumnData {
        match ty {
            LogicalType::Integer => {
                ColumnData::Integer(values.into_iter().map(|x| x.map(|f| f.round() as i64)).collect())
            }
            _ => ColumnData::Float(values),
        }
    }

    /// Timestamps of a datetime column; dates are midnight UTC.
    pub fn timestamps(&self) -> Option<Vec<Option<DateTime<Utc>>>> {
        match self {
            ColumnData::DateTime(v) => Some(v.clone()),
            ColumnData::Date(v) => Some(
                v.iter()
                    .map(|d| d.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn set(&mut self, i: usize, value: Value) {
        match (self, value) {
            (ColumnData::Integer(v), Value::Int(x)) => v[i] = Some(x),
            (ColumnData::Integer(v), Value::Null) => v[i] = None,
            (ColumnData::Float(v), Value::Float(x)) => v[i] = Some(x),
            (ColumnData::Float(v), Value::Int(x)) => v[i] = Some(x as f64),
            (ColumnData::Float(v), Value::Null) => v[i] = None,
            (ColumnData::Boolean(v), Value::Bool(x)) => v[i] = Some(x),
            (ColumnData::Boolean(v), Value::Null) => v[i] = None,
            (ColumnData::Text(v), Value::Str(x)) => v[i] = Some(x),
            (ColumnData::Text(v), Value::Null) => v[i] = None,
            (ColumnData::DateTime(v), Value::DateTime(x)) => v[i] = Some(x),
            (ColumnData::DateTime(v), Value::Null) => v[i] = None,
            (ColumnData::Date(v), Value::Date(x)) => v[i] = Some(x),
            (ColumnData::Date(v), Value::Null) => v[i] = None,
            (col, value) => panic!(
                "type mismatch writing {:?} into {} column",
                value,
                col.logical_type()
            ),
        }
    }

    /// Non-null values as scalars.
    pub fn values(&self) -> Vec<Value> {
        (0..self.len())
            .map(|i| self.value_at(i))
            .filter(|v| !v.is_null())
            .collect()
    }
}

/// A fully materialized table.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub primary_key: String,
    /// Columns in declaration order.
    pub columns: IndexMap<String, ColumnData>,
}

impl Table {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: IndexMap::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.columns.values().next().map(|c| c.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.get(name)
    }
}

/// The complete generated dataset: tables in specification node order.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub version: String,
    pub master_seed: u64,
    pub tables: IndexMap<String, Table>,
}

impl Dataset {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_back() {
        let mut col = ColumnData::empty(LogicalType::Integer);
        col.push(Value::Int(7));
        col.push(Value::Null);
        assert_eq!(col.len(), 2);
        assert_eq!(col.value_at(0), Value::Int(7));
        assert!(col.is_null_at(1));
    }

    #[test]
    fn test_from_f64_rounds_for_integers() {
        let col = ColumnData::from_f64(vec![Some(2.6), None], LogicalType::Integer);
        assert_eq!(col.value_at(0), Value::Int(3));
        assert!(col.is_null_at(1));
    }

    #[test]
    fn test_numeric_view_covers_integers() {
        let col = ColumnData::Integer(vec![Some(1), Some(2), None]);
        let nums = col.numeric_f64().unwrap();
        assert_eq!(nums, vec![Some(1.0), Some(2.0), None]);
        assert!(ColumnData::Text(vec![]).numeric_f64().is_none());
    }

    #[test]
    fn test_value_keys_distinguish_types() {
        assert_ne!(Value::Int(1).to_key(), Value::Null.to_key());
        assert_eq!(Value::Str("a".into()).to_key(), "a");
    }

    #[test]
    fn test_json_scalar_conversion() {
        let v = Value::from_json(&serde_json::json!("pro"), LogicalType::String).unwrap();
        assert_eq!(v, Value::Str("pro".into()));
        let v = Value::from_json(&serde_json::json!(3), LogicalType::Integer).unwrap();
        assert_eq!(v, Value::Int(3));
        assert!(Value::from_json(&serde_json::json!("x"), LogicalType::Integer).is_none());
    }
}
