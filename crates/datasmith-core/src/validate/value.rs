//! Value checks: ranges, row-wise inequalities, enum membership, and
//! regex patterns. Nulls are ignored throughout.

use std::collections::HashSet;

use regex::Regex;

use crate::generate::column::{ColumnData, Dataset, Value};
use crate::spec::Specification;
use crate::validate::{CheckFamily, CheckResult, SAMPLE_LIMIT};

pub fn run(spec: &Specification, dataset: &Dataset) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    for range in &spec.constraints.ranges {
        let name = format!("range:{}", range.column);
        let Some(column) = resolve(dataset, &range.column) else {
            continue;
        };
        let lo = range.min.unwrap_or(f64::NEG_INFINITY);
        let hi = range.max.unwrap_or(f64::INFINITY);
        let mut violations = 0usize;
        let mut samples = Vec::new();
        if let Some(values) = column.numeric_f64() {
            for v in values.into_iter().flatten() {
                if v < lo || v > hi {
                    violations += 1;
                    if samples.len() < SAMPLE_LIMIT {
                        samples.push(v.to_string());
                    }
                }
            }
        }
        checks.push(counted(
            name,
            &range.column.table,
            &range.column.column,
            violations,
            format!("values outside [{}, {}]", lo, hi),
            samples,
        ));
    }

    for inequality in &spec.constraints.inequalities {
        let name = format!(
            "inequality:{} {} {}",
            inequality.left, inequality.op, inequality.right
        );
        let left = resolve(dataset, &inequality.left);
        let right = resolve(dataset, &inequality.right);
        let (Some(left), Some(right)) = (left, right) else {
            continue;
        };
        let (lhs, rhs) = (comparable(left), comparable(right));
        let mut violations = 0usize;
        let mut samples = Vec::new();
        for i in 0..lhs.len().min(rhs.len()) {
            let (Some(l), Some(r)) = (lhs[i], rhs[i]) else {
                continue;
            };
            if !inequality.op.holds(l, r) {
                violations += 1;
                if samples.len() < SAMPLE_LIMIT {
                    samples.push(format!("row {}: {} vs {}", i, l, r));
                }
            }
        }
        checks.push(counted(
            name,
            &inequality.left.table,
            &inequality.left.column,
            violations,
            format!("rows violating {} {} {}", inequality.left, inequality.op, inequality.right),
            samples,
        ));
    }

    for constraint in &spec.constraints.enums {
        let name = format!("enum:{}", constraint.column);
        let Some(column) = resolve(dataset, &constraint.column) else {
            continue;
        };
        let column_spec = spec.column(&constraint.column);
        let members: HashSet<String> = constraint
            .values
            .iter()
            .filter_map(|json| {
                column_spec
                    .and_then(|c| Value::from_json(json, c.logical_type))
                    .map(|v| v.to_key())
            })
            .collect();
        let mut violations = 0usize;
        let mut samples = Vec::new();
        for value in column.values() {
            if !members.contains(&value.to_key()) {
                violations += 1;
                if samples.len() < SAMPLE_LIMIT {
                    samples.push(value.to_string());
                }
            }
        }
        checks.push(counted(
            name,
            &constraint.column.table,
            &constraint.column.column,
            violations,
            "values outside the declared enumeration".to_string(),
            samples,
        ));
    }

    for pattern in &spec.constraints.patterns {
        let name = format!("pattern:{}", pattern.column);
        let Some(column) = resolve(dataset, &pattern.column) else {
            continue;
        };
        let Ok(regex) = Regex::new(&pattern.regex) else {
            checks.push(CheckResult::fail(
                name,
                CheckFamily::Value,
                &pattern.column.table,
                format!("regex '{}' failed to compile", pattern.regex),
                vec![],
            ));
            continue;
        };
        let mut violations = 0usize;
        let mut samples = Vec::new();
        if let ColumnData::Text(values) = column {
            for value in values.iter().flatten() {
                if !regex.is_match(value) {
                    violations += 1;
                    if samples.len() < SAMPLE_LIMIT {
                        samples.push(value.clone());
                    }
                }
            }
        }
        checks.push(counted(
            name,
            &pattern.column.table,
            &pattern.column.column,
            violations,
            format!("values not matching /{}/", pattern.regex),
            samples,
        ));
    }

    checks
}

fn resolve<'a>(dataset: &'a Dataset, reference: &crate::spec::ColumnRef) -> Option<&'a ColumnData> {
    dataset.table(&reference.table)?.column(&reference.column)
}

/// Numeric view for comparisons: numbers as-is, timestamps as epoch seconds.
fn comparable(column: &ColumnData) -> Vec<Option<f64>> {
    if let Some(values) = column.numeric_f64() {
        return values;
    }
    match column.timestamps() {
        Some(timestamps) => timestamps
            .into_iter()
            .map(|ts| ts.map(|t| t.timestamp() as f64))
            .collect(),
        None => vec![None; column.len()],
    }
}

fn counted(
    name: String,
    table: &str,
    column: &str,
    violations: usize,
    what: String,
    samples: Vec<String>,
) -> CheckResult {
    if violations == 0 {
        CheckResult::pass(name, CheckFamily::Value, table, format!("no {}", what))
            .with_column(column)
    } else {
        CheckResult::fail(
            name,
            CheckFamily::Value,
            table,
            format!("{} {}", violations, what),
            samples,
        )
        .with_column(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::column::Table;
    use indexmap::IndexMap;

    fn spec_and_dataset(ages: Vec<Option<i64>>) -> (Specification, Dataset) {
        let spec = Specification::from_json(
            r#"{
            "version": "1",
            "metadata": {"name": "t"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "user", "kind": "entity", "rows": 3, "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "age", "type": "integer",
                     "generator": {"distribution": {
                        "distribution": {"normal": {"mean": 30.0, "std": 5.0}},
                        "clamp": [18.0, 80.0]}}},
                    {"name": "plan", "type": "string",
                     "generator": {"choice": {"choices": ["free", "pro"]}}}
                 ]}
            ],
            "constraints": {
                "ranges": [{"column": "user.age", "min": 18.0, "max": 80.0}],
                "enums": [{"column": "user.plan", "values": ["free", "pro"]}],
                "patterns": [{"column": "user.plan", "regex": "^(free|pro)$"}],
                "inequalities": [{"left": "user.id", "op": "<=", "right": "user.age"}]
            }
        }"#,
        )
        .unwrap();

        let n = ages.len();
        let mut user = Table::new("user", "id");
        user.columns.insert(
            "id".into(),
            ColumnData::Integer((1..=n as i64).map(Some).collect()),
        );
        user.columns.insert("age".into(), ColumnData::Integer(ages));
        user.columns.insert(
            "plan".into(),
            ColumnData::Text(vec![Some("free".into()); n]),
        );
        let mut tables = IndexMap::new();
        tables.insert("user".to_string(), user);
        (
            spec,
            Dataset {
                name: "t".into(),
                version: "1".into(),
                master_seed: 0,
                tables,
            },
        )
    }

    #[test]
    fn test_in_range_passes() {
        let (spec, dataset) = spec_and_dataset(vec![Some(20), Some(40), None]);
        let checks = run(&spec, &dataset);
        assert!(checks.iter().all(|c| c.is_pass()), "{:?}", checks);
    }

    #[test]
    fn test_out_of_range_counted() {
        let (spec, dataset) = spec_and_dataset(vec![Some(20), Some(99), Some(12)]);
        let checks = run(&spec, &dataset);
        let range = checks.iter().find(|c| c.name.starts_with("range:")).unwrap();
        assert!(!range.is_pass());
        assert!(range.message.starts_with("2 "));
    }

    #[test]
    fn test_inequality_counts_violations() {
        // id 1..=3 vs age: row with age < id violates
        let (spec, dataset) = spec_and_dataset(vec![Some(20), Some(40), Some(2)]);
        let checks = run(&spec, &dataset);
        let inequality = checks
            .iter()
            .find(|c| c.name.starts_with("inequality:"))
            .unwrap();
        assert!(!inequality.is_pass());
        assert_eq!(inequality.samples.len(), 1);
    }

    #[test]
    fn test_enum_membership() {
        let (spec, mut dataset) = spec_and_dataset(vec![Some(20)]);
        dataset
            .tables
            .get_mut("user")
            .unwrap()
            .columns
            .insert("plan".into(), ColumnData::Text(vec![Some("trial".into())]));
        let checks = run(&spec, &dataset);
        let enum_check = checks.iter().find(|c| c.name.starts_with("enum:")).unwrap();
        assert!(!enum_check.is_pass());
        assert_eq!(enum_check.samples, vec!["trial"]);
        let pattern = checks.iter().find(|c| c.name.starts_with("pattern:")).unwrap();
        assert!(!pattern.is_pass());
    }
}
