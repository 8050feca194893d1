//! Behavioral checks: weekend share, column means, and composite-effect
//! lift scoring against declared multiplier products.

use std::collections::BTreeMap;

use chrono::Datelike;
use indexmap::IndexMap;
use tracing::info;

use crate::generate::column::{ColumnData, Dataset, Table};
use crate::spec::{CompositeEffectTarget, GeneratorSpec, Specification};
use crate::validate::{CheckFamily, CheckResult, ValidationOptions, SAMPLE_LIMIT};

pub fn run(
    spec: &Specification,
    dataset: &Dataset,
    options: &ValidationOptions,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    for target in &spec.targets.weekend_share {
        let name = format!("weekend_share:{}", target.column);
        let Some(timestamps) = dataset
            .table(&target.column.table)
            .and_then(|t| t.column(&target.column.column))
            .and_then(|c| c.timestamps())
        else {
            continue;
        };
        let mut total = 0usize;
        let mut weekend = 0usize;
        for ts in timestamps.into_iter().flatten() {
            total += 1;
            if ts.weekday().num_days_from_monday() >= 5 {
                weekend += 1;
            }
        }
        if total == 0 {
            checks.push(CheckResult::fail(
                name,
                CheckFamily::Behavioral,
                &target.column.table,
                "no timestamps to measure",
                vec![],
            ));
            continue;
        }
        let share = weekend as f64 / total as f64;
        let ok = share >= target.min && share <= target.max;
        let message = format!(
            "weekend share {:.3} vs [{}, {}]",
            share, target.min, target.max
        );
        checks.push(bounded(name, &target.column, ok, message));
    }

    for target in &spec.targets.mean_in_range {
        let name = format!("mean_in_range:{}", target.column);
        let Some(values) = dataset
            .table(&target.column.table)
            .and_then(|t| t.column(&target.column.column))
            .and_then(|c| c.numeric_f64())
        else {
            continue;
        };
        let non_null: Vec<f64> = values.into_iter().flatten().collect();
        if non_null.is_empty() {
            checks.push(CheckResult::fail(
                name,
                CheckFamily::Behavioral,
                &target.column.table,
                "no values to average",
                vec![],
            ));
            continue;
        }
        let mean = non_null.iter().sum::<f64>() / non_null.len() as f64;
        let ok = mean >= target.min && mean <= target.max;
        let message = format!("mean {:.4} vs [{}, {}]", mean, target.min, target.max);
        checks.push(bounded(name, &target.column, ok, message));
    }

    for target in &spec.targets.composite_effects {
        checks.push(composite_effect_check(spec, dataset, target, options));
    }

    checks
}

fn bounded(
    name: String,
    column: &crate::spec::ColumnRef,
    ok: bool,
    message: String,
) -> CheckResult {
    if ok {
        CheckResult::pass(name, CheckFamily::Behavioral, &column.table, message)
            .with_column(&column.column)
    } else {
        CheckResult::fail(name, CheckFamily::Behavioral, &column.table, message, vec![])
            .with_column(&column.column)
    }
}

/// Partition the measure's rows by the cross product of influence values,
/// compare observed mean lift per stratum against the product of declared
/// multipliers, and score with MAE/MAPE over sufficiently populated strata.
fn composite_effect_check(
    spec: &Specification,
    dataset: &Dataset,
    target: &CompositeEffectTarget,
    options: &ValidationOptions,
) -> CheckResult {
    let name = format!("composite_effect:{}", target.measure);
    let tolerance = target.tolerance.unwrap_or(options.default_tolerance);
    info!(
        target = %target.measure,
        mae = tolerance.mae,
        mape = tolerance.mape,
        "composite effect tolerances"
    );

    let fail = |message: String| {
        CheckResult::fail(
            name.clone(),
            CheckFamily::Behavioral,
            &target.measure.table,
            message,
            vec![],
        )
        .with_column(&target.measure.column)
    };

    let Some(fact) = dataset.table(&target.measure.table) else {
        return fail("measure table missing".to_string());
    };
    let Some(measure) = fact.column(&target.measure.column).and_then(|c| c.numeric_f64())
    else {
        return fail("measure column is not numeric".to_string());
    };

    // Per-row label vector per influence.
    let mut influence_labels: Vec<Vec<Option<String>>> = Vec::new();
    for influence in &target.influences {
        match influence_rows(spec, dataset, fact, &influence.column) {
            Some(labels) => influence_labels.push(labels),
            None => {
                return fail(format!(
                    "influence {} cannot be joined to {}",
                    influence.column, target.measure.table
                ))
            }
        }
    }

    // Stratify.
    struct Stratum {
        expected: f64,
        sum: f64,
        count: usize,
    }
    // BTreeMap keeps stratum iteration (and so error accumulation and
    // sample order) deterministic; the validator must be idempotent.
    let mut strata: BTreeMap<String, Stratum> = BTreeMap::new();
    for row in 0..fact.row_count() {
        let Some(value) = measure.get(row).copied().flatten() else {
            continue;
        };
        let mut key_parts = Vec::with_capacity(target.influences.len());
        let mut expected = 1.0;
        let mut complete = true;
        for (influence, labels) in target.influences.iter().zip(&influence_labels) {
            match labels[row].as_deref() {
                Some(label) => {
                    expected *= influence.multipliers.get(label).copied().unwrap_or(1.0);
                    key_parts.push(label.to_string());
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            continue;
        }
        let entry = strata.entry(key_parts.join("|")).or_insert(Stratum {
            expected,
            sum: 0.0,
            count: 0,
        });
        entry.sum += value;
        entry.count += 1;
    }

    let populated: Vec<(&String, &Stratum)> = strata
        .iter()
        .filter(|(_, s)| s.count >= target.min_stratum_rows)
        .collect();
    if populated.is_empty() {
        return fail(format!(
            "no stratum reached {} rows",
            target.min_stratum_rows
        ));
    }

    // Least-squares scale between observed means and expected lifts, so no
    // explicit baseline stratum is needed.
    let mut num = 0.0;
    let mut den = 0.0;
    for (_, stratum) in &populated {
        let mean = stratum.sum / stratum.count as f64;
        num += mean * stratum.expected;
        den += stratum.expected * stratum.expected;
    }
    if den == 0.0 {
        return fail("expected lifts are all zero".to_string());
    }
    let scale = num / den;

    let mut abs_errors = Vec::new();
    let mut rel_errors = Vec::new();
    let mut offenders: Vec<(f64, String)> = Vec::new();
    for (key, stratum) in &populated {
        let observed = (stratum.sum / stratum.count as f64) / scale;
        let error = (observed - stratum.expected).abs();
        abs_errors.push(error);
        if stratum.expected != 0.0 {
            rel_errors.push(error / stratum.expected.abs());
        }
        offenders.push((
            error,
            format!(
                "{}: observed {:.3} vs expected {:.3} ({} rows)",
                key, observed, stratum.expected, stratum.count
            ),
        ));
    }
    let mae = abs_errors.iter().sum::<f64>() / abs_errors.len() as f64;
    let mape = if rel_errors.is_empty() {
        0.0
    } else {
        rel_errors.iter().sum::<f64>() / rel_errors.len() as f64
    };

    let message = format!(
        "MAE {:.4} (tol {}), MAPE {:.4} (tol {}) over {} strata",
        mae,
        tolerance.mae,
        mape,
        tolerance.mape,
        populated.len()
    );
    if mae <= tolerance.mae && mape <= tolerance.mape {
        CheckResult::pass(name, CheckFamily::Behavioral, &target.measure.table, message)
            .with_column(&target.measure.column)
    } else {
        offenders.sort_by(|a, b| b.0.total_cmp(&a.0));
        let samples = offenders
            .into_iter()
            .take(SAMPLE_LIMIT)
            .map(|(_, s)| s)
            .collect();
        CheckResult::fail(
            name,
            CheckFamily::Behavioral,
            &target.measure.table,
            message,
            samples,
        )
        .with_column(&target.measure.column)
    }
}

/// Per-fact-row labels for an influence column: either a column of the
/// measure's own table, or a parent-entity column reached through the
/// fact's parent-key lookup column.
fn influence_rows(
    spec: &Specification,
    dataset: &Dataset,
    fact: &Table,
    influence: &crate::spec::ColumnRef,
) -> Option<Vec<Option<String>>> {
    if influence.table == fact.name {
        return Some(labels_of(fact.column(&influence.column)?, fact.row_count()));
    }

    // Parent influence: find the fact column that looks up the parent's
    // primary key, then map fact rows through it.
    let parent_node = spec.node(&influence.table)?;
    let fact_node = spec.node(&fact.name)?;
    let link_column = fact_node.columns.iter().find_map(|c| match &c.generator {
        GeneratorSpec::Lookup(args)
            if args.from.table == influence.table
                && args.from.column == parent_node.primary_key =>
        {
            Some(c.name.as_str())
        }
        _ => None,
    })?;

    let parent = dataset.table(&influence.table)?;
    let parent_pk = parent.column(&parent.primary_key)?;
    let parent_labels = labels_of(parent.column(&influence.column)?, parent.row_count());
    let by_key: IndexMap<String, Option<String>> = (0..parent.row_count())
        .map(|i| (parent_pk.value_at(i).to_key(), parent_labels[i].clone()))
        .collect();

    let link = fact.column(link_column)?;
    Some(
        (0..fact.row_count())
            .map(|i| {
                let key = link.value_at(i);
                if key.is_null() {
                    None
                } else {
                    by_key.get(&key.to_key()).cloned().flatten()
                }
            })
            .collect(),
    )
}

fn labels_of(column: &ColumnData, n: usize) -> Vec<Option<String>> {
    (0..n)
        .map(|i| {
            let value = column.value_at(i);
            if value.is_null() {
                None
            } else {
                Some(value.to_key())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Specification;

    fn spec_with_target(min: f64, max: f64) -> Specification {
        Specification::from_json(&format!(
            r#"{{
            "version": "1",
            "metadata": {{"name": "t"}},
            "timeframe": {{"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"}},
            "nodes": [
                {{"name": "m", "kind": "entity", "rows": 4, "primary_key": "id",
                 "columns": [
                    {{"name": "id", "type": "integer", "generator": {{"sequence": {{}}}}}},
                    {{"name": "v", "type": "floating",
                     "generator": {{"distribution": {{
                        "distribution": {{"uniform": {{"low": 0.0, "high": 1.0}}}},
                        "clamp": [0.0, 1.0]}}}}}}
                 ]}}
            ],
            "targets": {{"mean_in_range": [{{"column": "m.v", "min": {}, "max": {}}}]}}
        }}"#,
            min, max
        ))
        .unwrap()
    }

    fn dataset_with_values(values: Vec<Option<f64>>) -> Dataset {
        let mut table = Table::new("m", "id");
        let n = values.len();
        table.columns.insert(
            "id".into(),
            ColumnData::Integer((0..n as i64).map(Some).collect()),
        );
        table.columns.insert("v".into(), ColumnData::Float(values));
        let mut tables = IndexMap::new();
        tables.insert("m".to_string(), table);
        Dataset {
            name: "t".into(),
            version: "1".into(),
            master_seed: 0,
            tables,
        }
    }

    #[test]
    fn test_mean_in_range_pass_and_fail() {
        let dataset = dataset_with_values(vec![Some(1.0), Some(3.0), None, Some(2.0)]);
        let options = ValidationOptions::default();

        let ok = run(&spec_with_target(1.5, 2.5), &dataset, &options);
        assert!(ok[0].is_pass(), "{:?}", ok);

        let bad = run(&spec_with_target(3.0, 4.0), &dataset, &options);
        assert!(!bad[0].is_pass());
    }

    #[test]
    fn test_composite_effect_detects_matching_lift() {
        // Fact rows carry their own segment column; vip mean is 2x base.
        let spec = Specification::from_json(
            r#"{
            "version": "1",
            "metadata": {"name": "t"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "order", "kind": "entity", "rows": 4, "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "segment", "type": "string",
                     "generator": {"choice": {"choices": ["vip", "std"]}}},
                    {"name": "amount", "type": "floating",
                     "generator": {"distribution": {
                        "distribution": {"uniform": {"low": 0.0, "high": 1.0}},
                        "clamp": [0.0, 1.0]}}}
                 ]}
            ],
            "targets": {"composite_effects": [{
                "measure": "order.amount",
                "influences": [{"column": "order.segment",
                                "multipliers": {"vip": 2.0, "std": 1.0}}],
                "min_stratum_rows": 2
            }]}
        }"#,
        )
        .unwrap();

        let mut table = Table::new("order", "id");
        let n = 100;
        table.columns.insert(
            "id".into(),
            ColumnData::Integer((0..n as i64).map(Some).collect()),
        );
        table.columns.insert(
            "segment".into(),
            ColumnData::Text(
                (0..n)
                    .map(|i| Some(if i % 2 == 0 { "vip" } else { "std" }.to_string()))
                    .collect(),
            ),
        );
        table.columns.insert(
            "amount".into(),
            ColumnData::Float(
                (0..n)
                    .map(|i| Some(if i % 2 == 0 { 20.0 } else { 10.0 }))
                    .collect(),
            ),
        );
        let mut tables = IndexMap::new();
        tables.insert("order".to_string(), table);
        let dataset = Dataset {
            name: "t".into(),
            version: "1".into(),
            master_seed: 0,
            tables,
        };

        let checks = run(&spec, &dataset, &ValidationOptions::default());
        let composite = checks
            .iter()
            .find(|c| c.name.starts_with("composite_effect:"))
            .unwrap();
        assert!(composite.is_pass(), "{:?}", composite);
    }

    #[test]
    fn test_composite_effect_flags_mismatched_lift() {
        let spec = Specification::from_json(
            r#"{
            "version": "1",
            "metadata": {"name": "t"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "order", "kind": "entity", "rows": 4, "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "segment", "type": "string",
                     "generator": {"choice": {"choices": ["vip", "std"]}}},
                    {"name": "amount", "type": "floating",
                     "generator": {"distribution": {
                        "distribution": {"uniform": {"low": 0.0, "high": 1.0}},
                        "clamp": [0.0, 1.0]}}}
                 ]}
            ],
            "targets": {"composite_effects": [{
                "measure": "order.amount",
                "influences": [{"column": "order.segment",
                                "multipliers": {"vip": 5.0, "std": 1.0}}],
                "min_stratum_rows": 2
            }]}
        }"#,
        )
        .unwrap();

        let mut table = Table::new("order", "id");
        let n = 100;
        table.columns.insert(
            "id".into(),
            ColumnData::Integer((0..n as i64).map(Some).collect()),
        );
        table.columns.insert(
            "segment".into(),
            ColumnData::Text(
                (0..n)
                    .map(|i| Some(if i % 2 == 0 { "vip" } else { "std" }.to_string()))
                    .collect(),
            ),
        );
        // Observed lift is 2x, declared is 5x: should fail with offenders.
        table.columns.insert(
            "amount".into(),
            ColumnData::Float(
                (0..n)
                    .map(|i| Some(if i % 2 == 0 { 20.0 } else { 10.0 }))
                    .collect(),
            ),
        );
        let mut tables = IndexMap::new();
        tables.insert("order".to_string(), table);
        let dataset = Dataset {
            name: "t".into(),
            version: "1".into(),
            master_seed: 0,
            tables,
        };

        let checks = run(&spec, &dataset, &ValidationOptions::default());
        let composite = checks
            .iter()
            .find(|c| c.name.starts_with("composite_effect:"))
            .unwrap();
        assert!(!composite.is_pass());
        assert!(!composite.samples.is_empty());
    }
}
