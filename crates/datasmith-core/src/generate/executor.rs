//! # Executor
//!
//! Walks the dependency plan generation by generation and materializes one
//! table per node. Nodes within a generation build in parallel; their only
//! inputs are the immutable specification, path-derived RNGs, and the
//! read-only registry of completed tables, so scheduling never changes the
//! output. Results are published into the registry only after the whole
//! generation completes.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{DatasmithError, Result};
use crate::generate::column::{ColumnData, Dataset, Table, Value};
use crate::generate::effects::EffectJoin;
use crate::generate::expr::{eval_column, Expr};
use crate::generate::faker::{self, LocaleSource};
use crate::generate::modifiers;
use crate::generate::primitives;
use crate::generate::stages::{self, StageRow};
use crate::generate::states::{self, age_in_units, StateRow};
use crate::graph;
use crate::seed::rng_for;
use crate::spec::{
    preflight, ColumnSpec, GeneratorSpec, NodeKind, NodeSpec, Specification, DEFAULT_ENTITY_ROWS,
};

/// Passes of whole-column regeneration before a non-sequence primary key
/// collision becomes fatal.
const PK_RETRY_PASSES: usize = 5;

/// Generate the full dataset.
///
/// Runs preflight first: a specification that fails validation never
/// reaches the executor, and a validated one is guaranteed to generate.
pub fn generate(spec: &Specification, master_seed: u64) -> Result<Dataset> {
    preflight::check(spec)?;
    let plan = graph::plan(spec)?;
    info!(
        dataset = %spec.metadata.name,
        generations = plan.generations.len(),
        "starting generation"
    );

    let mut completed: IndexMap<String, Table> = IndexMap::new();
    for (level, generation) in plan.generations.iter().enumerate() {
        debug!(level, nodes = ?generation, "building generation");
        let results: Vec<Result<Table>> = generation
            .par_iter()
            .map(|name| {
                let node = spec
                    .node(name)
                    .expect("planner only emits declared nodes");
                build_node(spec, node, master_seed, &completed)
            })
            .collect();

        // Publish atomically, in specification order within the generation.
        for result in results {
            let table = result?;
            completed.insert(table.name.clone(), table);
        }
    }

    // Dataset tables follow specification node order.
    let mut tables = IndexMap::new();
    for node in &spec.nodes {
        if let Some(table) = completed.shift_remove(&node.name) {
            tables.insert(node.name.clone(), table);
        }
    }

    Ok(Dataset {
        name: spec.metadata.name.clone(),
        version: spec.version.clone(),
        master_seed,
        tables,
    })
}

fn build_node(
    spec: &Specification,
    node: &NodeSpec,
    master: u64,
    completed: &IndexMap<String, Table>,
) -> Result<Table> {
    let builder = NodeBuilder {
        spec,
        node,
        master,
        completed,
    };
    let table = match node.kind {
        NodeKind::Vocab => builder.build_vocab()?,
        NodeKind::Entity => builder.build_entity()?,
        NodeKind::Fact => {
            if node.stage_config.is_some() {
                builder.build_stage_fact()?
            } else if node.state_transition_model.is_some() {
                builder.build_state_fact()?
            } else {
                builder.build_fanout_fact()?
            }
        }
    };
    debug!(node = %node.name, rows = table.row_count(), "node materialized");
    Ok(table)
}

struct NodeBuilder<'a> {
    spec: &'a Specification,
    node: &'a NodeSpec,
    master: u64,
    completed: &'a IndexMap<String, Table>,
}

impl<'a> NodeBuilder<'a> {
    fn fail(&self, column: &str, cause: impl std::fmt::Display) -> DatasmithError {
        DatasmithError::generation(&self.node.name, column, cause)
    }

    // -- vocab ---------------------------------------------------------------

    fn build_vocab(&self) -> Result<Table> {
        let n = self
            .node
            .columns
            .iter()
            .find_map(|c| match &c.generator {
                GeneratorSpec::EnumList(args) => Some(args.values.len()),
                _ => None,
            })
            .unwrap_or(0);

        let mut siblings = IndexMap::new();
        for column in &self.node.columns {
            let data = self.produce_column(column, n, &siblings, None)?;
            siblings.insert(column.name.clone(), data);
        }
        self.finish_table(siblings)
    }

    // -- entity --------------------------------------------------------------

    fn build_entity(&self) -> Result<Table> {
        let n = self.node.rows.unwrap_or(DEFAULT_ENTITY_ROWS);
        let mut siblings: IndexMap<String, ColumnData> = IndexMap::new();
        let mut deferred: Vec<&ColumnSpec> = Vec::new();

        // Pass 1: everything except self-lookups, which see only a
        // placeholder slot that keeps the column order stable.
        for column in &self.node.columns {
            if self.is_self_lookup(column) {
                deferred.push(column);
                siblings.insert(
                    column.name.clone(),
                    ColumnData::empty(column.logical_type),
                );
                continue;
            }
            let data = self.produce_column(column, n, &siblings, None)?;
            siblings.insert(column.name.clone(), data);
        }

        // Pass 2: resolve self-lookups against the cached key snapshot.
        for column in deferred {
            let data = self.produce_self_lookup(column, n, &siblings)?;
            siblings.insert(column.name.clone(), data);
        }

        self.enforce_pk_uniqueness(&mut siblings, n)?;
        self.apply_segment_values(&mut siblings)?;
        self.apply_vintage_growth(&mut siblings)?;
        self.finish_table(siblings)
    }

    // -- fanout facts --------------------------------------------------------

    fn build_fanout_fact(&self) -> Result<Table> {
        let parent_tables = self.parent_tables()?;
        let combos = cartesian_rows(&parent_tables);
        let fanout = self.node.fanout.as_ref().ok_or_else(|| {
            self.fail("<fanout>", "fact node requires a fanout descriptor")
        })?;

        let segment = self.fanout_segment_source(&parent_tables)?;
        let vintage_mean = self.vintage_fanout_multipliers(&parent_tables, &combos)?;
        let table_effects = self.table_effect_joins()?;

        // One fanout draw per parent combination.
        let mut parent_rows_per_fact: Vec<Vec<usize>> = Vec::new();
        for (ci, combo) in combos.iter().enumerate() {
            let mut rng = rng_for(self.master, &[&self.node.name, "fanout", &ci.to_string()]);
            let mut count = primitives::sample_fanout(fanout, &mut rng)
                .map_err(|e| self.fail("<fanout>", e))?;

            if let Some((ref labels, ref behavior)) = segment {
                if let Some(label) = &labels[ci] {
                    if let Some(effect) = behavior.segments.get(label.as_str()) {
                        if let Some(multiplier) = effect.fanout_multiplier {
                            count = scale_clamped(count, multiplier, fanout.clamp);
                        }
                    }
                }
            }
            if let Some(multiplier) = vintage_mean.get(ci).copied().flatten() {
                count = scale_clamped(count, multiplier, fanout.clamp);
            }
            for (effect_spec, join) in &table_effects {
                let key = self
                    .effect_key_from_parents(effect_spec, &parent_tables, combo)
                    .map_err(|e| self.fail("<fanout>", e))?;
                if let Some(multiplier) = join.lookup_keys(&key) {
                    count = scale_clamped(count, multiplier, fanout.clamp);
                }
            }

            for _ in 0..count {
                parent_rows_per_fact.push(combo.clone());
            }
        }

        let n = parent_rows_per_fact.len();
        let mut siblings: IndexMap<String, ColumnData> = IndexMap::new();
        let mut deferred: Vec<&ColumnSpec> = Vec::new();

        for column in &self.node.columns {
            if let Some(data) =
                self.fill_parent_lookup(column, &parent_tables, &parent_rows_per_fact)?
            {
                siblings.insert(column.name.clone(), data);
                continue;
            }
            if self.is_self_lookup(column) {
                deferred.push(column);
                siblings.insert(
                    column.name.clone(),
                    ColumnData::empty(column.logical_type),
                );
                continue;
            }
            let data = self.produce_column(column, n, &siblings, None)?;
            siblings.insert(column.name.clone(), data);
        }
        for column in deferred {
            let data = self.produce_self_lookup(column, n, &siblings)?;
            siblings.insert(column.name.clone(), data);
        }

        self.enforce_pk_uniqueness(&mut siblings, n)?;
        self.apply_fact_segment_values(&mut siblings, &parent_tables, &parent_rows_per_fact)?;
        self.apply_vintage_event_times(&mut siblings, &parent_tables, &parent_rows_per_fact)?;
        self.enforce_temporal_integrity(&mut siblings, &parent_tables, &parent_rows_per_fact)?;
        self.finish_table(siblings)
    }

    // -- staged facts --------------------------------------------------------

    fn build_stage_fact(&self) -> Result<Table> {
        let config = self.node.stage_config.as_ref().expect("checked by caller");
        let parent_tables = self.parent_tables()?;
        let parent = &parent_tables[0];
        let (keys, reference_times) = self.parent_keys_and_reference_times(parent)?;
        let segments =
            self.parent_segment_labels(parent, config.segment_column.as_deref())?;

        let rows = stages::progress_stages(
            config,
            &keys,
            &reference_times,
            segments.as_deref(),
            self.spec.timeframe.end,
            self.master,
            &self.node.name,
        )
        .map_err(|e| self.fail(&config.stage_column, e))?;

        self.materialize_event_rows(
            &parent_tables,
            &rows.iter().map(|r| r.parent_index).collect::<Vec<_>>(),
            |i| {
                let StageRow { stage, at, .. } = &rows[i];
                (stage.clone(), *at)
            },
            &config.stage_column,
            rows.len(),
        )
    }

    // -- state-transition facts ---------------------------------------------

    fn build_state_fact(&self) -> Result<Table> {
        let model = self
            .node
            .state_transition_model
            .as_ref()
            .expect("checked by caller");
        let parent_tables = self.parent_tables()?;
        let parent = &parent_tables[0];
        let (keys, reference_times) = self.parent_keys_and_reference_times(parent)?;
        let segments = self.parent_segment_labels(parent, model.segment_column.as_deref())?;
        let vintage = self
            .parent_node(parent)
            .and_then(|p| p.vintage_behavior.as_ref())
            .and_then(|v| v.activity_decay.as_ref().map(|c| (c, v.unit)));

        let rows = states::run_chains(
            model,
            &keys,
            &reference_times,
            segments.as_deref(),
            vintage,
            self.spec.timeframe.end,
            self.master,
            &self.node.name,
        )
        .map_err(|e| self.fail(&model.state_column, e))?;

        self.materialize_event_rows(
            &parent_tables,
            &rows.iter().map(|r| r.parent_index).collect::<Vec<_>>(),
            |i| {
                let StateRow { state, at, .. } = &rows[i];
                (state.clone(), *at)
            },
            &model.state_column,
            rows.len(),
        )
    }

    /// Shared materialization for stage/state facts: the label column and
    /// every datetime column are driven by the simulated rows; parent
    /// lookups map through `parent_rows`; everything else generates
    /// normally.
    fn materialize_event_rows(
        &self,
        parent_tables: &[&Table],
        parent_rows: &[usize],
        row_info: impl Fn(usize) -> (String, DateTime<Utc>),
        label_column: &str,
        n: usize,
    ) -> Result<Table> {
        let parent_rows_per_fact: Vec<Vec<usize>> =
            parent_rows.iter().map(|&p| vec![p]).collect();

        let mut siblings: IndexMap<String, ColumnData> = IndexMap::new();
        for column in &self.node.columns {
            if column.name == label_column {
                let labels: Vec<Option<String>> =
                    (0..n).map(|i| Some(row_info(i).0)).collect();
                siblings.insert(column.name.clone(), ColumnData::Text(labels));
                continue;
            }
            if column.logical_type.is_temporal() {
                let times: Vec<Option<DateTime<Utc>>> =
                    (0..n).map(|i| Some(row_info(i).1)).collect();
                let data = match column.logical_type {
                    crate::spec::LogicalType::Date => ColumnData::Date(
                        times.iter().map(|t| t.map(|ts| ts.date_naive())).collect(),
                    ),
                    _ => ColumnData::DateTime(times),
                };
                siblings.insert(column.name.clone(), data);
                continue;
            }
            if let Some(data) =
                self.fill_parent_lookup(column, parent_tables, &parent_rows_per_fact)?
            {
                siblings.insert(column.name.clone(), data);
                continue;
            }
            let data = self.produce_column(column, n, &siblings, None)?;
            siblings.insert(column.name.clone(), data);
        }

        self.finish_table(siblings)
    }

    // -- column production ---------------------------------------------------

    fn produce_column(
        &self,
        column: &ColumnSpec,
        n: usize,
        siblings: &IndexMap<String, ColumnData>,
        rng_suffix: Option<&str>,
    ) -> Result<ColumnData> {
        let path: Vec<&str> = match rng_suffix {
            Some(suffix) => vec![&self.node.name, &column.name, suffix],
            None => vec![&self.node.name, &column.name],
        };
        let mut rng = rng_for(self.master, &path);

        let mut data = match &column.generator {
            GeneratorSpec::Sequence(args) => primitives::sequence(args, n),
            GeneratorSpec::Distribution(args) => {
                primitives::distribution(args, column.logical_type, n, &mut rng)
                    .map_err(|e| self.fail(&column.name, e))?
            }
            GeneratorSpec::DatetimeSeries(args) => primitives::datetime_series(
                args,
                &self.spec.timeframe,
                column.logical_type,
                n,
                &mut rng,
            )
            .map_err(|e| self.fail(&column.name, e))?,
            GeneratorSpec::EnumList(args) => {
                let data = primitives::enum_list(&args.values, column.logical_type)
                    .map_err(|e| self.fail(&column.name, e))?;
                if data.len() != n {
                    return Err(self.fail(
                        &column.name,
                        format!("enum_list has {} values but node has {} rows", data.len(), n),
                    ));
                }
                data
            }
            GeneratorSpec::Choice(args) => {
                let dictionary = self.choice_dictionary(column, args)?;
                let weights = args
                    .weights
                    .resolve()
                    .map_err(|e| self.fail(&column.name, e))?;
                primitives::choice(&dictionary, &weights, column.logical_type, n, &mut rng)
                    .map_err(|e| self.fail(&column.name, e))?
            }
            GeneratorSpec::Faker(args) => {
                let locales = self.locale_source(column, args, siblings, n)?;
                let strings = faker::faker_column(args.method, &locales, n, &mut rng);
                ColumnData::Text(strings.into_iter().map(Some).collect())
            }
            GeneratorSpec::Expression(args) => {
                let expr = Expr::parse(&args.expr).map_err(|e| self.fail(&column.name, e))?;
                let mut numeric = IndexMap::new();
                for (name, sibling) in siblings {
                    if let Some(values) = sibling.numeric_f64() {
                        numeric.insert(name.clone(), values);
                    }
                }
                ColumnData::from_f64(eval_column(&expr, &numeric, n), column.logical_type)
            }
            GeneratorSpec::Lookup(args) => {
                // Generic cross-table lookup: replicate the referenced
                // column by uniform sampling. Parent-key and self lookups
                // are intercepted before this point.
                let source = self
                    .completed
                    .get(&args.from.table)
                    .and_then(|t| t.column(&args.from.column))
                    .ok_or_else(|| {
                        self.fail(
                            &column.name,
                            format!("lookup source {} is not materialized", args.from),
                        )
                    })?;
                let pool = source.values();
                if pool.is_empty() {
                    return Err(self.fail(
                        &column.name,
                        format!("lookup source {} has no values", args.from),
                    ));
                }
                let mut data = ColumnData::with_capacity(column.logical_type, n);
                for _ in 0..n {
                    data.push(pool[rng.random_range(0..pool.len())].clone());
                }
                data
            }
        };

        self.apply_null_mask(column, &mut data);
        self.apply_modifiers(column, &mut data, siblings)?;
        self.apply_range_clamp(column, &mut data)?;
        Ok(data)
    }

    fn apply_null_mask(&self, column: &ColumnSpec, data: &mut ColumnData) {
        let rate = column.effective_null_rate();
        if rate <= 0.0 || column.name == self.node.primary_key {
            return;
        }
        let mut rng = rng_for(self.master, &[&self.node.name, &column.name, "null"]);
        for i in 0..data.len() {
            if rng.random::<f64>() < rate {
                data.set(i, Value::Null);
            }
        }
    }

    fn apply_modifiers(
        &self,
        column: &ColumnSpec,
        data: &mut ColumnData,
        siblings: &IndexMap<String, ColumnData>,
    ) -> Result<()> {
        for (index, modifier) in column.modifiers.iter().enumerate() {
            let mut rng = rng_for(
                self.master,
                &[
                    &self.node.name,
                    &column.name,
                    "modifier",
                    &index.to_string(),
                ],
            );
            modifiers::apply(
                modifier,
                data,
                siblings,
                self.completed,
                &self.spec.timeframe,
                &mut rng,
            )
            .map_err(|e| self.fail(&column.name, e))?;
        }
        Ok(())
    }

    /// Final clamp against any declared range constraint, then the column
    /// is already in its declared storage type.
    fn apply_range_clamp(&self, column: &ColumnSpec, data: &mut ColumnData) -> Result<()> {
        let range = self.spec.constraints.ranges.iter().find(|r| {
            r.column.table == self.node.name && r.column.column == column.name
        });
        let Some(range) = range else { return Ok(()) };
        if !column.logical_type.is_numeric() {
            return Ok(());
        }
        let lo = range.min.unwrap_or(f64::NEG_INFINITY);
        let hi = range.max.unwrap_or(f64::INFINITY);
        let ty = data.logical_type();
        if let Some(values) = data.numeric_f64() {
            let clamped: Vec<Option<f64>> = values
                .into_iter()
                .map(|v| v.map(|x| x.clamp(lo, hi)))
                .collect();
            *data = ColumnData::from_f64(clamped, ty);
        }
        Ok(())
    }

    fn choice_dictionary(
        &self,
        column: &ColumnSpec,
        args: &crate::spec::ChoiceArgs,
    ) -> Result<Vec<Value>> {
        if let Some(choices) = &args.choices {
            return choices
                .iter()
                .enumerate()
                .map(|(i, json)| {
                    Value::from_json(json, column.logical_type).ok_or_else(|| {
                        self.fail(
                            &column.name,
                            format!("choice value #{} does not fit type {}", i, column.logical_type),
                        )
                    })
                })
                .collect();
        }
        let reference = args.choices_ref.as_ref().ok_or_else(|| {
            self.fail(&column.name, "choice requires 'choices' or 'choices_ref'")
        })?;
        let source = self
            .completed
            .get(&reference.table)
            .and_then(|t| t.column(&reference.column))
            .ok_or_else(|| {
                self.fail(
                    &column.name,
                    format!("choice dictionary {} is not materialized", reference),
                )
            })?;
        let mut seen = HashSet::new();
        let mut dictionary = Vec::new();
        for value in source.values() {
            if seen.insert(value.to_key()) {
                dictionary.push(value);
            }
        }
        Ok(dictionary)
    }

    fn locale_source(
        &self,
        column: &ColumnSpec,
        args: &crate::spec::FakerArgs,
        siblings: &IndexMap<String, ColumnData>,
        n: usize,
    ) -> Result<LocaleSource> {
        if let Some(source_column) = &args.locale_from {
            let codes = siblings.get(source_column.as_str()).ok_or_else(|| {
                self.fail(
                    &column.name,
                    format!("locale_from column '{}' is not an earlier column", source_column),
                )
            })?;
            let locales = (0..n.min(codes.len()))
                .map(|i| match codes.value_at(i) {
                    Value::Str(code) => faker::locale_for_country(&code),
                    _ => faker::Locale::En,
                })
                .collect();
            return Ok(LocaleSource::PerRow(locales));
        }
        let locale = match &args.locale {
            Some(tag) => faker::locale_for_tag(tag).ok_or_else(|| {
                self.fail(&column.name, format!("unsupported locale '{}'", tag))
            })?,
            None => faker::Locale::En,
        };
        Ok(LocaleSource::Fixed(locale))
    }

    // -- self-lookups ----------------------------------------------------------

    fn is_self_lookup(&self, column: &ColumnSpec) -> bool {
        matches!(&column.generator,
            GeneratorSpec::Lookup(args) if args.from.table == self.node.name)
    }

    fn produce_self_lookup(
        &self,
        column: &ColumnSpec,
        n: usize,
        siblings: &IndexMap<String, ColumnData>,
    ) -> Result<ColumnData> {
        let GeneratorSpec::Lookup(args) = &column.generator else {
            unreachable!("caller checked is_self_lookup");
        };
        let source = siblings.get(&args.from.column).ok_or_else(|| {
            self.fail(
                &column.name,
                format!("self-lookup source column '{}' missing", args.from.column),
            )
        })?;
        let pool = source.values();
        if pool.is_empty() {
            return Err(self.fail(
                &column.name,
                format!("self-lookup source {} has no values", args.from),
            ));
        }
        let mut rng = rng_for(
            self.master,
            &[&self.node.name, &column.name, "self_lookup"],
        );
        let mut data = ColumnData::with_capacity(column.logical_type, n);
        for _ in 0..n {
            data.push(pool[rng.random_range(0..pool.len())].clone());
        }
        self.apply_null_mask(column, &mut data);
        self.apply_modifiers(column, &mut data, siblings)?;
        self.apply_range_clamp(column, &mut data)?;
        Ok(data)
    }

    // -- primary key uniqueness -------------------------------------------------

    fn enforce_pk_uniqueness(
        &self,
        siblings: &mut IndexMap<String, ColumnData>,
        n: usize,
    ) -> Result<()> {
        let pk_name = self.node.primary_key.clone();
        let Some(pk_spec) = self.node.column(&pk_name) else {
            return Ok(());
        };
        // Sequences are unique by construction.
        if matches!(pk_spec.generator, GeneratorSpec::Sequence(_)) {
            return Ok(());
        }

        for pass in 0..PK_RETRY_PASSES {
            let duplicates = duplicate_positions(&siblings[&pk_name]);
            if duplicates.is_empty() {
                return Ok(());
            }
            warn!(
                node = %self.node.name,
                column = %pk_name,
                duplicates = duplicates.len(),
                pass,
                "regenerating duplicate primary keys"
            );
            let suffix = format!("retry{}", pass);
            let fresh = self.produce_column(pk_spec, n, siblings, Some(&suffix))?;
            let column = siblings.get_mut(&pk_name).expect("pk present");
            for &i in &duplicates {
                column.set(i, fresh.value_at(i));
            }
        }

        if duplicate_positions(&siblings[&pk_name]).is_empty() {
            Ok(())
        } else {
            Err(DatasmithError::UniquenessViolated {
                node: self.node.name.clone(),
                column: pk_name,
                attempts: PK_RETRY_PASSES,
            })
        }
    }

    // -- behaviors --------------------------------------------------------------

    /// Entity-local segment value multipliers.
    fn apply_segment_values(&self, siblings: &mut IndexMap<String, ColumnData>) -> Result<()> {
        let Some(behavior) = &self.node.segment_behavior else {
            return Ok(());
        };
        if behavior.column.contains('.') {
            return Ok(()); // parent-qualified: handled on the fact side
        }
        let labels: Vec<Option<String>> = match siblings.get(behavior.column.as_str()) {
            Some(ColumnData::Text(values)) => values.clone(),
            _ => {
                return Err(self.fail(
                    &behavior.column,
                    "segment column must be a string column of this node",
                ))
            }
        };
        for value_column in &behavior.value_columns {
            let Some(data) = siblings.get_mut(value_column.as_str()) else {
                continue;
            };
            scale_by_labels(data, &labels, |label| {
                behavior
                    .segments
                    .get(label)
                    .and_then(|s| s.value_multiplier)
                    .unwrap_or(1.0)
            });
        }
        Ok(())
    }

    /// Vintage value growth on the entity's own columns, by age at the end
    /// of the timeframe.
    fn apply_vintage_growth(&self, siblings: &mut IndexMap<String, ColumnData>) -> Result<()> {
        let Some(vintage) = &self.node.vintage_behavior else {
            return Ok(());
        };
        let Some(curve) = &vintage.value_growth else {
            return Ok(());
        };
        let created = siblings
            .get(vintage.created_at_column.as_str())
            .and_then(|c| c.timestamps())
            .ok_or_else(|| {
                self.fail(
                    &vintage.created_at_column,
                    "vintage created_at_column must be a datetime column of this node",
                )
            })?;
        for value_column in &vintage.value_columns {
            let Some(data) = siblings.get_mut(value_column.as_str()) else {
                continue;
            };
            let ty = data.logical_type();
            if let Some(values) = data.numeric_f64() {
                let scaled: Vec<Option<f64>> = values
                    .into_iter()
                    .zip(created.iter())
                    .map(|(v, born)| match (v, born) {
                        (Some(v), Some(born)) => {
                            let age =
                                age_in_units(*born, self.spec.timeframe.end, vintage.unit);
                            Some(v * curve.value_at(age))
                        }
                        (v, _) => v,
                    })
                    .collect();
                *data = ColumnData::from_f64(scaled, ty);
            }
        }
        Ok(())
    }

    /// Fact-side segment value multipliers driven by a parent's segment.
    fn apply_fact_segment_values(
        &self,
        siblings: &mut IndexMap<String, ColumnData>,
        parent_tables: &[&Table],
        parent_rows_per_fact: &[Vec<usize>],
    ) -> Result<()> {
        let Some(behavior) = &self.node.segment_behavior else {
            return Ok(());
        };
        let Some((parent_slot, segment_column)) =
            self.qualified_parent_column(&behavior.column, parent_tables)
        else {
            return Ok(()); // local segment handled by apply_segment_values
        };
        let labels = parent_labels(
            parent_tables[parent_slot],
            &segment_column,
            parent_rows_per_fact,
            parent_slot,
        );
        for value_column in &behavior.value_columns {
            let Some(data) = siblings.get_mut(value_column.as_str()) else {
                continue;
            };
            scale_by_labels(data, &labels, |label| {
                behavior
                    .segments
                    .get(label)
                    .and_then(|s| s.value_multiplier)
                    .unwrap_or(1.0)
            });
        }
        Ok(())
    }

    /// Re-draw fact event timestamps from the parent's decay-weighted age
    /// periods, so per-age-period event counts track the activity curve.
    fn apply_vintage_event_times(
        &self,
        siblings: &mut IndexMap<String, ColumnData>,
        parent_tables: &[&Table],
        parent_rows_per_fact: &[Vec<usize>],
    ) -> Result<()> {
        let Some((slot, vintage)) = self.first_vintage_parent(parent_tables) else {
            return Ok(());
        };
        let Some(curve) = &vintage.activity_decay else {
            return Ok(());
        };
        let created = parent_tables[slot]
            .column(&vintage.created_at_column)
            .and_then(|c| c.timestamps())
            .ok_or_else(|| {
                self.fail(
                    &vintage.created_at_column,
                    "parent vintage created_at_column is not a datetime column",
                )
            })?;

        let end = self.spec.timeframe.end;
        let unit_days = match vintage.unit {
            crate::spec::AgeUnit::Day => 1.0,
            crate::spec::AgeUnit::Week => 7.0,
            crate::spec::AgeUnit::Month => 30.44,
        };

        for column in &self.node.columns {
            if !matches!(column.generator, GeneratorSpec::DatetimeSeries(_)) {
                continue;
            }
            let mut rng = rng_for(
                self.master,
                &[&self.node.name, &column.name, "vintage"],
            );
            let Some(data) = siblings.get_mut(&column.name) else {
                continue;
            };
            let mut timestamps = match data.timestamps() {
                Some(ts) => ts,
                None => continue,
            };
            for (row, slot_value) in timestamps.iter_mut().enumerate() {
                let parent_row = parent_rows_per_fact[row][slot];
                let Some(born) = created[parent_row] else { continue };
                if born >= end {
                    continue;
                }
                let alive_units = age_in_units(born, end, vintage.unit).max(1e-9);
                let periods = alive_units.ceil() as usize;
                let weights: Vec<f64> =
                    (0..periods).map(|p| curve.value_at(p as f64).max(0.0)).collect();
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    continue;
                }
                let roll: f64 = rng.random::<f64>() * total;
                let mut acc = 0.0;
                let mut period = periods - 1;
                for (p, w) in weights.iter().enumerate() {
                    acc += w;
                    if roll < acc {
                        period = p;
                        break;
                    }
                }
                let period_start = born
                    + Duration::seconds((period as f64 * unit_days * 86_400.0) as i64);
                let period_end = (period_start
                    + Duration::seconds((unit_days * 86_400.0) as i64))
                .min(end);
                let span = (period_end - period_start).num_seconds().max(1);
                if let Some(ts) = slot_value.as_mut() {
                    *ts = period_start + Duration::seconds(rng.random_range(0..span));
                }
            }
            *data = ColumnData::DateTime(timestamps);
        }
        Ok(())
    }

    /// Fact timestamps must fall in [parent creation, timeframe end];
    /// violations are resampled from the valid interval.
    fn enforce_temporal_integrity(
        &self,
        siblings: &mut IndexMap<String, ColumnData>,
        parent_tables: &[&Table],
        parent_rows_per_fact: &[Vec<usize>],
    ) -> Result<()> {
        // Per-fact-row lower bound: the latest creation time over parents
        // that declare one.
        let mut lower_bounds: Vec<Option<DateTime<Utc>>> =
            vec![None; parent_rows_per_fact.len()];
        for (slot, table) in parent_tables.iter().enumerate() {
            let Some(vintage) = self
                .parent_node(table)
                .and_then(|p| p.vintage_behavior.as_ref())
            else {
                continue;
            };
            let Some(created) = table
                .column(&vintage.created_at_column)
                .and_then(|c| c.timestamps())
            else {
                continue;
            };
            for (row, bound) in lower_bounds.iter_mut().enumerate() {
                let parent_row = parent_rows_per_fact[row][slot];
                if let Some(born) = created[parent_row] {
                    *bound = Some(bound.map_or(born, |b: DateTime<Utc>| b.max(born)));
                }
            }
        }
        if lower_bounds.iter().all(|b| b.is_none()) {
            return Ok(());
        }

        let end = self.spec.timeframe.end;
        for column in &self.node.columns {
            if !column.logical_type.is_temporal() {
                continue;
            }
            let Some(data) = siblings.get_mut(&column.name) else {
                continue;
            };
            let ColumnData::DateTime(values) = data else { continue };
            let mut rng = rng_for(
                self.master,
                &[&self.node.name, &column.name, "resample"],
            );
            let mut resampled = 0usize;
            for (row, slot_value) in values.iter_mut().enumerate() {
                let Some(lower) = lower_bounds[row] else { continue };
                let Some(ts) = slot_value.as_mut() else { continue };
                if *ts >= lower && *ts <= end {
                    continue;
                }
                let span = (end - lower).num_seconds().max(1);
                *ts = lower + Duration::seconds(rng.random_range(0..span));
                resampled += 1;
            }
            if resampled > 0 {
                debug!(
                    node = %self.node.name,
                    column = %column.name,
                    resampled,
                    "resampled timestamps outside the parent's lifetime"
                );
            }
        }
        Ok(())
    }

    // -- parent plumbing ---------------------------------------------------------

    fn parent_tables(&self) -> Result<Vec<&'a Table>> {
        self.node
            .parents
            .iter()
            .map(|parent| {
                self.completed.get(parent).ok_or_else(|| {
                    self.fail("<parents>", format!("parent '{}' is not materialized", parent))
                })
            })
            .collect()
    }

    fn parent_node(&self, table: &Table) -> Option<&'a NodeSpec> {
        self.spec.node(&table.name)
    }

    /// Fill a lookup column that targets a parent's column directly.
    fn fill_parent_lookup(
        &self,
        column: &ColumnSpec,
        parent_tables: &[&Table],
        parent_rows_per_fact: &[Vec<usize>],
    ) -> Result<Option<ColumnData>> {
        let GeneratorSpec::Lookup(args) = &column.generator else {
            return Ok(None);
        };
        let Some(slot) = self
            .node
            .parents
            .iter()
            .position(|p| *p == args.from.table)
        else {
            return Ok(None);
        };
        let source = parent_tables[slot].column(&args.from.column).ok_or_else(|| {
            self.fail(
                &column.name,
                format!("parent column {} does not exist", args.from),
            )
        })?;
        let mut data = ColumnData::with_capacity(column.logical_type, parent_rows_per_fact.len());
        for combo in parent_rows_per_fact {
            data.push(source.value_at(combo[slot]));
        }
        self.apply_null_mask(column, &mut data);
        Ok(Some(data))
    }

    fn parent_keys_and_reference_times(
        &self,
        parent: &Table,
    ) -> Result<(Vec<String>, Vec<DateTime<Utc>>)> {
        let pk = parent.column(&parent.primary_key).ok_or_else(|| {
            self.fail(
                "<parents>",
                format!("parent '{}' primary key column missing", parent.name),
            )
        })?;
        let keys: Vec<String> = (0..parent.row_count())
            .map(|i| pk.value_at(i).to_key())
            .collect();

        let created = self
            .parent_node(parent)
            .and_then(|p| p.vintage_behavior.as_ref())
            .and_then(|v| parent.column(&v.created_at_column))
            .and_then(|c| c.timestamps());
        let start = self.spec.timeframe.start;
        let reference_times: Vec<DateTime<Utc>> = match created {
            Some(created) => created.iter().map(|c| c.unwrap_or(start)).collect(),
            None => vec![start; parent.row_count()],
        };
        Ok((keys, reference_times))
    }

    /// Per-parent-row segment labels from a `parent.column` reference.
    fn parent_segment_labels(
        &self,
        parent: &Table,
        reference: Option<&str>,
    ) -> Result<Option<Vec<Option<String>>>> {
        let Some(reference) = reference else {
            return Ok(None);
        };
        let column_name = match reference.split_once('.') {
            Some((table, column)) if table == parent.name => column,
            Some(_) => {
                return Err(self.fail(
                    reference,
                    "segment column must name the fact's parent",
                ))
            }
            None => reference,
        };
        let labels = match parent.column(column_name) {
            Some(ColumnData::Text(values)) => values.clone(),
            _ => {
                return Err(self.fail(
                    reference,
                    "segment column must be a string column of the parent",
                ))
            }
        };
        Ok(Some(labels))
    }

    /// Segment labels per parent combination for fanout scaling.
    #[allow(clippy::type_complexity)]
    fn fanout_segment_source(
        &self,
        parent_tables: &[&Table],
    ) -> Result<Option<(Vec<Option<String>>, &'a crate::spec::SegmentBehavior)>> {
        let Some(behavior) = &self.node.segment_behavior else {
            return Ok(None);
        };
        let Some((slot, column)) = self.qualified_parent_column(&behavior.column, parent_tables)
        else {
            return Ok(None);
        };
        let combos = cartesian_rows(parent_tables);
        let labels = parent_labels(parent_tables[slot], &column, &combos, slot);
        Ok(Some((labels, behavior)))
    }

    /// Resolve `parent.column` against this fact's parents.
    fn qualified_parent_column(
        &self,
        reference: &str,
        _parent_tables: &[&Table],
    ) -> Option<(usize, String)> {
        let (table, column) = reference.split_once('.')?;
        let slot = self.node.parents.iter().position(|p| p == table)?;
        Some((slot, column.to_string()))
    }

    /// Mean activity-decay multiplier per parent combination.
    fn vintage_fanout_multipliers(
        &self,
        parent_tables: &[&Table],
        combos: &[Vec<usize>],
    ) -> Result<Vec<Option<f64>>> {
        let Some((slot, vintage)) = self.first_vintage_parent(parent_tables) else {
            return Ok(vec![None; combos.len()]);
        };
        let Some(curve) = &vintage.activity_decay else {
            return Ok(vec![None; combos.len()]);
        };
        let created = parent_tables[slot]
            .column(&vintage.created_at_column)
            .and_then(|c| c.timestamps())
            .ok_or_else(|| {
                self.fail(
                    &vintage.created_at_column,
                    "parent vintage created_at_column is not a datetime column",
                )
            })?;

        let end = self.spec.timeframe.end;
        Ok(combos
            .iter()
            .map(|combo| {
                let born = created[combo[slot]]?;
                if born >= end {
                    return Some(0.0);
                }
                let alive = age_in_units(born, end, vintage.unit).max(1e-9);
                let periods = alive.ceil() as usize;
                let mean = (0..periods)
                    .map(|p| curve.value_at(p as f64))
                    .sum::<f64>()
                    / periods as f64;
                Some(mean)
            })
            .collect())
    }

    fn first_vintage_parent(
        &self,
        parent_tables: &[&Table],
    ) -> Option<(usize, &'a crate::spec::VintageBehavior)> {
        parent_tables.iter().enumerate().find_map(|(slot, table)| {
            self.parent_node(table)
                .and_then(|p| p.vintage_behavior.as_ref())
                .map(|v| (slot, v))
        })
    }

    fn table_effect_joins(&self) -> Result<Vec<(&'a crate::spec::EffectSpec, EffectJoin)>> {
        self.node
            .effects
            .iter()
            .map(|effect| {
                let table = self.completed.get(&effect.table).ok_or_else(|| {
                    self.fail(
                        "<effects>",
                        format!("effect table '{}' is not materialized", effect.table),
                    )
                })?;
                let join = EffectJoin::build(effect, table)
                    .map_err(|e| self.fail("<effects>", e))?;
                Ok((effect, join))
            })
            .collect()
    }

    /// Table-scope effect keys resolve against parent columns.
    fn effect_key_from_parents(
        &self,
        effect: &crate::spec::EffectSpec,
        parent_tables: &[&Table],
        combo: &[usize],
    ) -> std::result::Result<Vec<String>, String> {
        effect
            .keys
            .keys()
            .map(|local| {
                for (slot, table) in parent_tables.iter().enumerate() {
                    if let Some(column) = table.column(local) {
                        return Ok(column.value_at(combo[slot]).to_key());
                    }
                }
                Err(format!(
                    "table-scope effect key '{}' not found on any parent",
                    local
                ))
            })
            .collect()
    }

    fn finish_table(&self, siblings: IndexMap<String, ColumnData>) -> Result<Table> {
        let mut table = Table::new(&self.node.name, &self.node.primary_key);
        table.columns = siblings;
        let row_counts: HashSet<usize> = table.columns.values().map(|c| c.len()).collect();
        if row_counts.len() > 1 {
            return Err(self.fail(
                "<table>",
                format!("ragged column lengths: {:?}", row_counts),
            ));
        }
        Ok(table)
    }
}

/// Indices of rows whose key duplicates an earlier row's key.
fn duplicate_positions(column: &ColumnData) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for i in 0..column.len() {
        let value = column.value_at(i);
        if value.is_null() {
            continue;
        }
        if !seen.insert(value.to_key()) {
            duplicates.push(i);
        }
    }
    duplicates
}

/// Cartesian product of parent row indices, first parent outermost.
fn cartesian_rows(parent_tables: &[&Table]) -> Vec<Vec<usize>> {
    let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
    for table in parent_tables {
        let mut next = Vec::with_capacity(combos.len() * table.row_count());
        for combo in &combos {
            for row in 0..table.row_count() {
                let mut extended = combo.clone();
                extended.push(row);
                next.push(extended);
            }
        }
        combos = next;
    }
    if parent_tables.is_empty() {
        return Vec::new();
    }
    combos
}

fn scale_clamped(count: i64, multiplier: f64, clamp: [i64; 2]) -> i64 {
    ((count as f64 * multiplier).round() as i64).clamp(clamp[0], clamp[1])
}

/// Per-fact-row labels read from a parent column.
fn parent_labels(
    parent: &Table,
    column: &str,
    parent_rows: &[Vec<usize>],
    slot: usize,
) -> Vec<Option<String>> {
    let data = parent.column(column);
    parent_rows
        .iter()
        .map(|combo| match data.map(|c| c.value_at(combo[slot])) {
            Some(Value::Str(label)) => Some(label),
            _ => None,
        })
        .collect()
}

fn scale_by_labels(
    data: &mut ColumnData,
    labels: &[Option<String>],
    multiplier_for: impl Fn(&str) -> f64,
) {
    let ty = data.logical_type();
    let Some(values) = data.numeric_f64() else { return };
    let scaled: Vec<Option<f64>> = values
        .into_iter()
        .zip(labels.iter())
        .map(|(v, label)| match (v, label) {
            (Some(v), Some(label)) => Some(v * multiplier_for(label)),
            (v, _) => v,
        })
        .collect();
    *data = ColumnData::from_f64(scaled, ty);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_json(json: &str, seed: u64) -> Dataset {
        let spec = Specification::from_json(json).unwrap();
        generate(&spec, seed).unwrap()
    }

    const BASIC: &str = r#"{
        "version": "1",
        "metadata": {"name": "basic"},
        "timeframe": {"start": "2024-01-01T00:00:00Z",
                      "end": "2024-07-01T00:00:00Z", "frequency": "day"},
        "nodes": [
            {"name": "user", "kind": "entity", "rows": 50, "primary_key": "user_id",
             "columns": [
                {"name": "user_id", "type": "integer", "generator": {"sequence": {}}},
                {"name": "age", "type": "integer",
                 "generator": {"distribution": {
                    "distribution": {"normal": {"mean": 35.0, "std": 12.0}},
                    "clamp": [18.0, 80.0]}}}
             ]},
            {"name": "event", "kind": "fact", "primary_key": "event_id",
             "parents": ["user"],
             "fanout": {"distribution": "poisson", "lambda": 3.0, "clamp": [0, 20]},
             "columns": [
                {"name": "event_id", "type": "integer", "generator": {"sequence": {}}},
                {"name": "user_id", "type": "integer",
                 "generator": {"lookup": {"from": "user.user_id"}}},
                {"name": "ts", "type": "datetime",
                 "generator": {"datetime_series": {}}}
             ]}
        ]
    }"#;

    #[test]
    fn test_basic_entity_and_fact() {
        let dataset = generate_json(BASIC, 42);
        let user = dataset.table("user").unwrap();
        assert_eq!(user.row_count(), 50);

        let event = dataset.table("event").unwrap();
        assert!(event.row_count() > 0);

        // FK closure: every event.user_id exists in user.user_id
        let user_ids: HashSet<String> = user
            .column("user_id")
            .unwrap()
            .values()
            .iter()
            .map(|v| v.to_key())
            .collect();
        for v in event.column("user_id").unwrap().values() {
            assert!(user_ids.contains(&v.to_key()));
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate_json(BASIC, 42);
        let b = generate_json(BASIC, 42);
        for (name, table_a) in &a.tables {
            let table_b = b.table(name).unwrap();
            assert_eq!(table_a.row_count(), table_b.row_count());
            for (col, data_a) in &table_a.columns {
                assert_eq!(data_a, table_b.column(col).unwrap(), "{}.{}", name, col);
            }
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate_json(BASIC, 1);
        let b = generate_json(BASIC, 2);
        let ages_a = a.table("user").unwrap().column("age").unwrap().clone();
        let ages_b = b.table("user").unwrap().column("age").unwrap().clone();
        assert_ne!(ages_a, ages_b);
    }

    #[test]
    fn test_self_lookup_two_pass() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "org"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "employee", "kind": "entity", "rows": 100,
                 "primary_key": "employee_id",
                 "columns": [
                    {"name": "employee_id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "manager_id", "type": "integer", "nullable": true,
                     "generator": {"lookup": {"from": "employee.employee_id"}}}
                 ]}
            ],
            "constraints": {
                "foreign_keys": [{"child": "employee.manager_id",
                                  "parent": "employee.employee_id"}]
            }
        }"#;
        let dataset = generate_json(json, 7);
        let employee = dataset.table("employee").unwrap();
        assert_eq!(employee.row_count(), 100);

        let ids: HashSet<String> = employee
            .column("employee_id")
            .unwrap()
            .values()
            .iter()
            .map(|v| v.to_key())
            .collect();
        assert_eq!(ids.len(), 100);
        for manager in employee.column("manager_id").unwrap().values() {
            assert!(ids.contains(&manager.to_key()));
        }
    }

    #[test]
    fn test_vocab_row_count_is_list_length() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "v"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "plan", "kind": "vocab", "primary_key": "plan_name",
                 "columns": [
                    {"name": "plan_name", "type": "string",
                     "generator": {"enum_list": {"values": ["free", "pro", "enterprise"]}}}
                 ]}
            ]
        }"#;
        let dataset = generate_json(json, 1);
        assert_eq!(dataset.table("plan").unwrap().row_count(), 3);
    }

    #[test]
    fn test_zero_fanout_is_legal() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "z"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "user", "kind": "entity", "rows": 10, "primary_key": "id",
                 "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]},
                {"name": "event", "kind": "fact", "primary_key": "eid",
                 "parents": ["user"],
                 "fanout": {"distribution": "uniform", "min": 0, "max": 0, "clamp": [0, 5]},
                 "columns": [
                    {"name": "eid", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "id", "type": "integer",
                     "generator": {"lookup": {"from": "user.id"}}}
                 ]}
            ]
        }"#;
        let dataset = generate_json(json, 3);
        assert_eq!(dataset.table("event").unwrap().row_count(), 0);
    }

    #[test]
    fn test_expression_sees_earlier_columns() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "e"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "order", "kind": "entity", "rows": 20, "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "price", "type": "floating",
                     "generator": {"distribution": {
                        "distribution": {"uniform": {"low": 1.0, "high": 10.0}},
                        "clamp": [1.0, 10.0]}}},
                    {"name": "quantity", "type": "integer",
                     "generator": {"distribution": {
                        "distribution": {"uniform": {"low": 1.0, "high": 5.0}},
                        "clamp": [1.0, 5.0]}}},
                    {"name": "total", "type": "floating",
                     "generator": {"expression": {"expr": "price * quantity"}}}
                 ]}
            ]
        }"#;
        let dataset = generate_json(json, 11);
        let order = dataset.table("order").unwrap();
        let price = order.column("price").unwrap().numeric_f64().unwrap();
        let quantity = order.column("quantity").unwrap().numeric_f64().unwrap();
        let total = order.column("total").unwrap().numeric_f64().unwrap();
        for i in 0..20 {
            let expected = price[i].unwrap() * quantity[i].unwrap();
            assert!((total[i].unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_range_constraint_clamps_output() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "r"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"},
            "nodes": [
                {"name": "m", "kind": "entity", "rows": 100, "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "score", "type": "floating",
                     "generator": {"distribution": {
                        "distribution": {"normal": {"mean": 50.0, "std": 80.0}},
                        "clamp": [-1000.0, 1000.0]}},
                     "modifiers": [{"multiply": {"factor": 3.0}}]}
                 ]}
            ],
            "constraints": {
                "ranges": [{"column": "m.score", "min": 0.0, "max": 100.0}]
            }
        }"#;
        let dataset = generate_json(json, 5);
        let scores = dataset
            .table("m")
            .unwrap()
            .column("score")
            .unwrap()
            .numeric_f64()
            .unwrap();
        for score in scores.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&score));
        }
    }
}
