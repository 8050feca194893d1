//! # Effect Tables
//!
//! An effect table is a materialized node holding time-windowed
//! multipliers or deltas, joined onto another node by key columns. The
//! snapshot built here is consulted per row at column scope (value
//! rewrites) or per parent at table scope (fanout scaling).

use chrono::{DateTime, Utc};

use crate::generate::column::Table;
use crate::spec::EffectSpec;

/// One joinable effect entry.
#[derive(Debug, Clone)]
struct EffectEntry {
    /// Key values in declared key order, as comparison keys.
    key: Vec<String>,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    value: f64,
}

/// A snapshot of an effect table, ready for row-by-row joining.
#[derive(Debug, Clone)]
pub struct EffectJoin {
    entries: Vec<EffectEntry>,
}

impl EffectJoin {
    /// Build the join snapshot from a materialized effect table.
    pub fn build(spec: &EffectSpec, table: &Table) -> Result<EffectJoin, String> {
        let key_columns: Vec<&crate::generate::column::ColumnData> = spec
            .keys
            .values()
            .map(|effect_col| {
                table.column(effect_col).ok_or_else(|| {
                    format!(
                        "effect table '{}' has no key column '{}'",
                        table.name, effect_col
                    )
                })
            })
            .collect::<Result<_, _>>()?;

        let value_column = table.column(&spec.value_column).ok_or_else(|| {
            format!(
                "effect table '{}' has no value column '{}'",
                table.name, spec.value_column
            )
        })?;

        let window_columns = match &spec.window {
            Some([start_col, end_col]) => {
                let start = table
                    .column(start_col)
                    .and_then(|c| c.timestamps())
                    .ok_or_else(|| {
                        format!(
                            "effect table '{}' window start '{}' is not a datetime column",
                            table.name, start_col
                        )
                    })?;
                let end = table
                    .column(end_col)
                    .and_then(|c| c.timestamps())
                    .ok_or_else(|| {
                        format!(
                            "effect table '{}' window end '{}' is not a datetime column",
                            table.name, end_col
                        )
                    })?;
                Some((start, end))
            }
            None => None,
        };

        let mut entries = Vec::with_capacity(table.row_count());
        for row in 0..table.row_count() {
            let key: Vec<String> = key_columns
                .iter()
                .map(|c| c.value_at(row).to_key())
                .collect();
            let value = match value_column.value_at(row).as_f64() {
                Some(v) => v,
                None => continue,
            };
            let window = match &window_columns {
                Some((starts, ends)) => match (starts[row], ends[row]) {
                    (Some(s), Some(e)) => Some((s, e)),
                    _ => continue,
                },
                None => None,
            };
            entries.push(EffectEntry { key, window, value });
        }

        Ok(EffectJoin { entries })
    }

    /// The first matching entry's value: keys equal and, when a window is
    /// declared, `start <= at < end`. `None` means no window matched.
    pub fn lookup(&self, key: &[String], at: Option<DateTime<Utc>>) -> Option<f64> {
        self.entries.iter().find_map(|entry| {
            if entry.key != key {
                return None;
            }
            match (entry.window, at) {
                (Some((start, end)), Some(ts)) => {
                    if ts >= start && ts < end {
                        Some(entry.value)
                    } else {
                        None
                    }
                }
                (Some(_), None) => None,
                (None, _) => Some(entry.value),
            }
        })
    }

    /// Key-only lookup used at table scope (fanout scaling).
    pub fn lookup_keys(&self, key: &[String]) -> Option<f64> {
        self.entries
            .iter()
            .find_map(|entry| (entry.key == key).then_some(entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::column::{ColumnData, Value};
    use crate::spec::{EffectOp, EffectSpec};
    use indexmap::IndexMap;

    fn promo_table() -> Table {
        let mut table = Table::new("promo", "promo_id");
        table.columns.insert(
            "promo_id".into(),
            ColumnData::Integer(vec![Some(1), Some(2)]),
        );
        table.columns.insert(
            "store_id".into(),
            ColumnData::Integer(vec![Some(10), Some(20)]),
        );
        table.columns.insert(
            "starts_at".into(),
            ColumnData::DateTime(vec![
                Some("2024-01-01T00:00:00Z".parse().unwrap()),
                Some("2024-06-01T00:00:00Z".parse().unwrap()),
            ]),
        );
        table.columns.insert(
            "ends_at".into(),
            ColumnData::DateTime(vec![
                Some("2024-02-01T00:00:00Z".parse().unwrap()),
                Some("2024-07-01T00:00:00Z".parse().unwrap()),
            ]),
        );
        table.columns.insert(
            "multiplier".into(),
            ColumnData::Float(vec![Some(1.5), Some(0.8)]),
        );
        table
    }

    fn effect_spec() -> EffectSpec {
        let mut keys = IndexMap::new();
        keys.insert("store_id".to_string(), "store_id".to_string());
        EffectSpec {
            table: "promo".into(),
            keys,
            time_column: Some("ts".into()),
            window: Some(["starts_at".into(), "ends_at".into()]),
            op: EffectOp::Mul,
            value_column: "multiplier".into(),
        }
    }

    #[test]
    fn test_lookup_matches_key_and_window() {
        let join = EffectJoin::build(&effect_spec(), &promo_table()).unwrap();
        let in_window = "2024-01-15T12:00:00Z".parse().unwrap();
        let key = vec![Value::Int(10).to_key()];
        assert_eq!(join.lookup(&key, Some(in_window)), Some(1.5));

        let out_of_window = "2024-03-01T00:00:00Z".parse().unwrap();
        assert_eq!(join.lookup(&key, Some(out_of_window)), None);

        let other_key = vec![Value::Int(99).to_key()];
        assert_eq!(join.lookup(&other_key, Some(in_window)), None);
    }

    #[test]
    fn test_key_only_lookup_ignores_window() {
        let join = EffectJoin::build(&effect_spec(), &promo_table()).unwrap();
        assert_eq!(join.lookup_keys(&[Value::Int(20).to_key()]), Some(0.8));
    }

    #[test]
    fn test_missing_value_column_is_an_error() {
        let mut spec = effect_spec();
        spec.value_column = "nope".into();
        assert!(EffectJoin::build(&spec, &promo_table()).is_err());
    }
}
