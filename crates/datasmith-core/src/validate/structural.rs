//! Structural checks: primary keys, declared unique columns, foreign-key
//! closure, column existence, and nullability.

use std::collections::HashSet;

use crate::generate::column::{ColumnData, Dataset};
use crate::spec::Specification;
use crate::validate::{CheckFamily, CheckResult, SAMPLE_LIMIT};

pub fn run(spec: &Specification, dataset: &Dataset) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    for node in &spec.nodes {
        let Some(table) = dataset.table(&node.name) else {
            checks.push(CheckResult::fail(
                format!("table_exists:{}", node.name),
                CheckFamily::Structural,
                &node.name,
                "table missing from dataset",
                vec![],
            ));
            continue;
        };

        // Column existence
        let missing: Vec<String> = node
            .columns
            .iter()
            .filter(|c| table.column(&c.name).is_none())
            .map(|c| c.name.clone())
            .collect();
        if missing.is_empty() {
            checks.push(CheckResult::pass(
                format!("columns:{}", node.name),
                CheckFamily::Structural,
                &node.name,
                format!("all {} declared columns present", node.columns.len()),
            ));
        } else {
            checks.push(CheckResult::fail(
                format!("columns:{}", node.name),
                CheckFamily::Structural,
                &node.name,
                format!("{} declared columns missing", missing.len()),
                missing,
            ));
        }

        // Primary-key uniqueness
        if let Some(pk) = table.column(&node.primary_key) {
            checks.push(uniqueness_check(
                format!("pk_unique:{}.{}", node.name, node.primary_key),
                &node.name,
                &node.primary_key,
                pk,
            ));
        }

        // Nullability
        for column_spec in &node.columns {
            if column_spec.nullable {
                continue;
            }
            let Some(column) = table.column(&column_spec.name) else {
                continue;
            };
            let nulls = (0..column.len()).filter(|&i| column.is_null_at(i)).count();
            let name = format!("not_null:{}.{}", node.name, column_spec.name);
            if nulls == 0 {
                checks.push(
                    CheckResult::pass(name, CheckFamily::Structural, &node.name, "no nulls")
                        .with_column(&column_spec.name),
                );
            } else {
                checks.push(
                    CheckResult::fail(
                        name,
                        CheckFamily::Structural,
                        &node.name,
                        format!("{} nulls in a non-nullable column", nulls),
                        vec![],
                    )
                    .with_column(&column_spec.name),
                );
            }
        }
    }

    // Declared unique columns
    for reference in &spec.constraints.unique {
        let Some(column) = dataset
            .table(&reference.table)
            .and_then(|t| t.column(&reference.column))
        else {
            continue;
        };
        checks.push(uniqueness_check(
            format!("unique:{}", reference),
            &reference.table,
            &reference.column,
            column,
        ));
    }

    // Foreign-key closure (nulls ignored; self-references included)
    for fk in &spec.constraints.foreign_keys {
        let name = format!("fk:{}->{}", fk.child, fk.parent);
        let child = dataset
            .table(&fk.child.table)
            .and_then(|t| t.column(&fk.child.column));
        let parent = dataset
            .table(&fk.parent.table)
            .and_then(|t| t.column(&fk.parent.column));
        let (Some(child), Some(parent)) = (child, parent) else {
            checks.push(CheckResult::fail(
                name,
                CheckFamily::Structural,
                &fk.child.table,
                "foreign key endpoints missing from dataset",
                vec![],
            ));
            continue;
        };
        let parent_keys: HashSet<String> =
            parent.values().iter().map(|v| v.to_key()).collect();
        let mut orphans = Vec::new();
        let mut orphan_count = 0usize;
        for value in child.values() {
            if !parent_keys.contains(&value.to_key()) {
                orphan_count += 1;
                if orphans.len() < SAMPLE_LIMIT {
                    orphans.push(value.to_string());
                }
            }
        }
        if orphan_count == 0 {
            checks.push(
                CheckResult::pass(
                    name,
                    CheckFamily::Structural,
                    &fk.child.table,
                    format!("every value of {} resolves in {}", fk.child, fk.parent),
                )
                .with_column(&fk.child.column),
            );
        } else {
            checks.push(
                CheckResult::fail(
                    name,
                    CheckFamily::Structural,
                    &fk.child.table,
                    format!("{} values missing from {}", orphan_count, fk.parent),
                    orphans,
                )
                .with_column(&fk.child.column),
            );
        }
    }

    checks
}

fn uniqueness_check(
    name: String,
    table: &str,
    column_name: &str,
    column: &ColumnData,
) -> CheckResult {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    let mut duplicate_count = 0usize;
    for i in 0..column.len() {
        let value = column.value_at(i);
        if value.is_null() {
            continue;
        }
        if !seen.insert(value.to_key()) {
            duplicate_count += 1;
            if duplicates.len() < SAMPLE_LIMIT {
                duplicates.push(value.to_string());
            }
        }
    }
    if duplicate_count == 0 {
        CheckResult::pass(
            name,
            CheckFamily::Structural,
            table,
            format!("{} distinct values", seen.len()),
        )
        .with_column(column_name)
    } else {
        CheckResult::fail(
            name,
            CheckFamily::Structural,
            table,
            format!("{} duplicated values", duplicate_count),
            duplicates,
        )
        .with_column(column_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::column::{ColumnData, Table};
    use crate::spec::Specification;
    use indexmap::IndexMap;

    fn spec() -> Specification {
        Specification::from_json(
            r#"{
            "version": "1",
            "metadata": {"name": "t"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "user", "kind": "entity", "rows": 3, "primary_key": "id",
                 "columns": [{"name": "id", "type": "integer",
                              "generator": {"sequence": {}}}]},
                {"name": "event", "kind": "fact", "primary_key": "eid",
                 "parents": ["user"],
                 "fanout": {"distribution": "uniform", "min": 1, "max": 1, "clamp": [0, 2]},
                 "columns": [
                    {"name": "eid", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "user_id", "type": "integer",
                     "generator": {"lookup": {"from": "user.id"}}}]}
            ],
            "constraints": {
                "foreign_keys": [{"child": "event.user_id", "parent": "user.id"}]
            }
        }"#,
        )
        .unwrap()
    }

    fn dataset(user_ids: Vec<Option<i64>>, event_user_ids: Vec<Option<i64>>) -> Dataset {
        let mut user = Table::new("user", "id");
        user.columns
            .insert("id".into(), ColumnData::Integer(user_ids));
        let mut event = Table::new("event", "eid");
        let n = event_user_ids.len();
        event.columns.insert(
            "eid".into(),
            ColumnData::Integer((0..n as i64).map(Some).collect()),
        );
        event
            .columns
            .insert("user_id".into(), ColumnData::Integer(event_user_ids));
        let mut tables = IndexMap::new();
        tables.insert("user".to_string(), user);
        tables.insert("event".to_string(), event);
        Dataset {
            name: "t".into(),
            version: "1".into(),
            master_seed: 0,
            tables,
        }
    }

    #[test]
    fn test_clean_dataset_passes() {
        let checks = run(&spec(), &dataset(vec![Some(1), Some(2), Some(3)], vec![Some(1)]));
        assert!(checks.iter().all(|c| c.is_pass()), "{:?}", checks);
    }

    #[test]
    fn test_duplicate_pk_fails() {
        let checks = run(&spec(), &dataset(vec![Some(1), Some(1), Some(3)], vec![Some(1)]));
        let pk = checks
            .iter()
            .find(|c| c.name.starts_with("pk_unique:user"))
            .unwrap();
        assert!(!pk.is_pass());
        assert!(!pk.samples.is_empty());
    }

    #[test]
    fn test_orphan_fk_fails() {
        let checks = run(&spec(), &dataset(vec![Some(1), Some(2), Some(3)], vec![Some(99)]));
        let fk = checks.iter().find(|c| c.name.starts_with("fk:")).unwrap();
        assert!(!fk.is_pass());
        assert_eq!(fk.samples, vec!["99"]);
    }

    #[test]
    fn test_null_fk_is_ignored() {
        let checks = run(&spec(), &dataset(vec![Some(1), Some(2), Some(3)], vec![None]));
        let fk = checks.iter().find(|c| c.name.starts_with("fk:")).unwrap();
        assert!(fk.is_pass());
    }
}
