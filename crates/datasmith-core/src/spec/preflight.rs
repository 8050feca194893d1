//! # Preflight Validation
//!
//! Cross-checks a parsed specification before any generation starts. The
//! contract is "valid specification ⇒ successful generation": anything the
//! executor could trip over — dangling references, impossible parameters,
//! modifier/type mismatches, cycles — is rejected here with the offending
//! path and, where useful, an example of the correct form.

use crate::error::{DatasmithError, Result};
use crate::generate::expr::Expr;
use crate::generate::primitives::Sampler;
use crate::graph;
use crate::spec::{
    ColumnSpec, CurveSpec, EffectOp, EffectSpec, FanoutDistribution, Frequency, GeneratorSpec,
    LogicalType, ModifierSpec, NodeKind, NodeSpec, PatternDimension, Specification, WithinSpec,
};

/// Validate the whole specification. Returns the first failure found.
pub fn check(spec: &Specification) -> Result<()> {
    check_timeframe(spec)?;
    check_node_names(spec)?;
    for node in &spec.nodes {
        check_node_shape(spec, node)?;
        check_columns(spec, node)?;
        check_behaviors(spec, node)?;
    }
    check_constraints(spec)?;
    check_targets(spec)?;
    // Cycle detection shares the planner's edge inference.
    graph::plan(spec)?;
    Ok(())
}

fn fail(path: impl Into<String>, message: impl Into<String>) -> DatasmithError {
    DatasmithError::inconsistent(path, message)
}

fn check_timeframe(spec: &Specification) -> Result<()> {
    if spec.timeframe.start >= spec.timeframe.end {
        return Err(fail(
            "timeframe",
            format!(
                "start {} must precede end {}",
                spec.timeframe.start, spec.timeframe.end
            ),
        ));
    }
    Ok(())
}

fn check_node_names(spec: &Specification) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for node in &spec.nodes {
        if !seen.insert(node.name.as_str()) {
            return Err(fail(&node.name, "duplicate node name"));
        }
    }
    Ok(())
}

fn check_node_shape(spec: &Specification, node: &NodeSpec) -> Result<()> {
    let path = node.name.as_str();

    // Column names unique; primary key present.
    let mut names = std::collections::HashSet::new();
    for column in &node.columns {
        if !names.insert(column.name.as_str()) {
            return Err(fail(
                format!("{}.{}", path, column.name),
                "duplicate column name",
            ));
        }
    }
    let pk = node.column(&node.primary_key).ok_or_else(|| {
        fail(
            path,
            format!("primary_key '{}' is not a declared column", node.primary_key),
        )
    })?;
    if pk.nullable {
        return Err(fail(
            format!("{}.{}", path, pk.name),
            "primary key columns cannot be nullable",
        ));
    }

    match node.kind {
        NodeKind::Entity | NodeKind::Vocab => {
            if !node.parents.is_empty() {
                return Err(fail(path, "parents are permitted only on fact nodes"));
            }
            if node.fanout.is_some() {
                return Err(fail(path, "fanout is permitted only on fact nodes"));
            }
            if node.stage_config.is_some() || node.state_transition_model.is_some() {
                return Err(fail(
                    path,
                    "stage_config and state_transition_model apply only to fact nodes",
                ));
            }
            if !node.effects.is_empty() {
                return Err(fail(path, "table-scope effects apply only to fact nodes"));
            }
        }
        NodeKind::Fact => {
            if node.parents.is_empty() {
                return Err(fail(
                    path,
                    "fact nodes require at least one parent, e.g. \"parents\": [\"user\"]",
                ));
            }
            for parent in &node.parents {
                if parent == &node.name {
                    return Err(fail(path, "a node cannot be its own parent"));
                }
                if spec.node(parent).is_none() {
                    return Err(fail(
                        path,
                        format!("parent '{}' is not a declared node", parent),
                    ));
                }
            }
            let behavioral = node.stage_config.is_some() || node.state_transition_model.is_some();
            if node.stage_config.is_some() && node.state_transition_model.is_some() {
                return Err(fail(
                    path,
                    "a fact may declare stage_config or state_transition_model, not both",
                ));
            }
            if behavioral {
                if node.parents.len() != 1 {
                    return Err(fail(
                        path,
                        "staged and state-transition facts take exactly one parent",
                    ));
                }
            } else if let Some(fanout) = &node.fanout {
                check_fanout(path, fanout)?;
            } else {
                return Err(fail(
                    path,
                    "fact nodes require a fanout descriptor, e.g. \
                     \"fanout\": {\"distribution\": \"poisson\", \"lambda\": 4.0, \"clamp\": [0, 20]}",
                ));
            }
        }
    }

    if node.kind == NodeKind::Vocab {
        let lengths: Vec<usize> = node
            .columns
            .iter()
            .filter_map(|c| match &c.generator {
                GeneratorSpec::EnumList(args) => Some(args.values.len()),
                _ => None,
            })
            .collect();
        if lengths.is_empty() {
            return Err(fail(path, "vocab nodes need at least one enum_list column"));
        }
        if lengths.iter().any(|l| *l != lengths[0]) {
            return Err(fail(path, "all enum_list columns of a vocab must agree in length"));
        }
    }

    Ok(())
}

fn check_fanout(path: &str, fanout: &crate::spec::FanoutSpec) -> Result<()> {
    let fanout_path = format!("{}.fanout", path);
    match fanout.distribution {
        FanoutDistribution::Poisson => {
            let lambda = fanout
                .lambda
                .ok_or_else(|| fail(&fanout_path, "poisson fanout requires 'lambda'"))?;
            if lambda < 0.0 || !lambda.is_finite() {
                return Err(fail(&fanout_path, format!("lambda {} must be >= 0", lambda)));
            }
        }
        FanoutDistribution::Uniform => {
            let min = fanout
                .min
                .ok_or_else(|| fail(&fanout_path, "uniform fanout requires 'min'"))?;
            let max = fanout
                .max
                .ok_or_else(|| fail(&fanout_path, "uniform fanout requires 'max'"))?;
            if min > max {
                return Err(fail(&fanout_path, format!("min {} exceeds max {}", min, max)));
            }
        }
    }
    if fanout.clamp[0] > fanout.clamp[1] {
        return Err(fail(
            &fanout_path,
            format!("clamp window [{}, {}] is inverted", fanout.clamp[0], fanout.clamp[1]),
        ));
    }
    Ok(())
}

fn check_columns(spec: &Specification, node: &NodeSpec) -> Result<()> {
    for (index, column) in node.columns.iter().enumerate() {
        let path = format!("{}.{}", node.name, column.name);
        if let Some(rate) = column.null_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(fail(&path, format!("null_rate {} must be in [0, 1]", rate)));
            }
        }
        check_generator(spec, node, column, index, &path)?;
        for modifier in &column.modifiers {
            check_modifier(spec, node, column, index, modifier, &path)?;
        }
    }
    Ok(())
}

fn earlier_column<'a>(
    node: &'a NodeSpec,
    before: usize,
    name: &str,
) -> Option<&'a ColumnSpec> {
    node.columns[..before].iter().find(|c| c.name == name)
}

fn check_generator(
    spec: &Specification,
    node: &NodeSpec,
    column: &ColumnSpec,
    index: usize,
    path: &str,
) -> Result<()> {
    match &column.generator {
        GeneratorSpec::Sequence(_) => {
            if column.logical_type != LogicalType::Integer {
                return Err(fail(path, "sequence generators produce integer columns"));
            }
        }
        GeneratorSpec::Distribution(args) => {
            if !column.logical_type.is_numeric() {
                return Err(fail(path, "distribution generators require a numeric column"));
            }
            Sampler::new(&args.distribution).map_err(|e| fail(path, e))?;
            if args.clamp[0] > args.clamp[1] {
                return Err(fail(
                    path,
                    format!("clamp [{}, {}] is inverted", args.clamp[0], args.clamp[1]),
                ));
            }
        }
        GeneratorSpec::DatetimeSeries(args) => {
            if !column.logical_type.is_temporal() {
                return Err(fail(path, "datetime_series requires a datetime or date column"));
            }
            match &args.within {
                WithinSpec::Keyword(k) if k == "timeframe" => {}
                WithinSpec::Keyword(k) => {
                    return Err(fail(
                        path,
                        format!("unknown 'within' keyword '{}' (expected \"timeframe\")", k),
                    ))
                }
                WithinSpec::Interval { start, end } => {
                    if start >= end {
                        return Err(fail(path, "within interval start must precede end"));
                    }
                }
            }
            if let Some(pattern) = &args.pattern {
                let expected = pattern.dimension.expected_len();
                if pattern.weights.len() != expected {
                    return Err(fail(
                        path,
                        format!(
                            "{:?} pattern takes {} weights, got {}",
                            pattern.dimension,
                            expected,
                            pattern.weights.len()
                        ),
                    ));
                }
                if pattern.weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
                    return Err(fail(path, "pattern weights must be finite and non-negative"));
                }
                let frequency = args.frequency.unwrap_or(spec.timeframe.frequency);
                let fine_enough = match pattern.dimension {
                    PatternDimension::Hour => frequency == Frequency::Hour,
                    PatternDimension::Dow => {
                        matches!(frequency, Frequency::Hour | Frequency::Day)
                    }
                    PatternDimension::Month => true,
                };
                if !fine_enough {
                    return Err(fail(
                        path,
                        format!(
                            "a {:?} pattern needs a sampling frequency at least as fine \
                             (set \"frequency\" on the generator)",
                            pattern.dimension
                        ),
                    ));
                }
            }
        }
        GeneratorSpec::Faker(args) => {
            if column.logical_type != LogicalType::String {
                return Err(fail(path, "faker generators produce string columns"));
            }
            if let Some(tag) = &args.locale {
                if crate::generate::faker::locale_for_tag(tag).is_none() {
                    return Err(fail(
                        path,
                        format!("unsupported locale '{}' (supported: en, fr, ja, pt, zh, ar)", tag),
                    ));
                }
            }
            if let Some(source) = &args.locale_from {
                let earlier = earlier_column(node, index, source).ok_or_else(|| {
                    fail(
                        path,
                        format!("locale_from '{}' must name an earlier column of this node", source),
                    )
                })?;
                if earlier.logical_type != LogicalType::String {
                    return Err(fail(path, "locale_from requires a string country-code column"));
                }
            }
        }
        GeneratorSpec::Lookup(args) => {
            let target_node = spec.node(&args.from.table).ok_or_else(|| {
                fail(path, format!("lookup source table '{}' does not exist", args.from.table))
            })?;
            let target = target_node.column(&args.from.column).ok_or_else(|| {
                fail(path, format!("lookup source column {} does not exist", args.from))
            })?;
            if target.logical_type != column.logical_type {
                return Err(fail(
                    path,
                    format!(
                        "lookup type mismatch: {} is {}, this column is {}",
                        args.from, target.logical_type, column.logical_type
                    ),
                ));
            }
            if args.from.table == node.name {
                if let GeneratorSpec::Lookup(inner) = &target.generator {
                    if inner.from.table == node.name {
                        return Err(fail(
                            path,
                            "self-lookups must reference a directly generated column",
                        ));
                    }
                }
            }
        }
        GeneratorSpec::Expression(args) => {
            if !column.logical_type.is_numeric() {
                return Err(fail(path, "expression generators require a numeric column"));
            }
            let expr = Expr::parse(&args.expr).map_err(|e| fail(path, e))?;
            for identifier in expr.identifiers() {
                let earlier = earlier_column(node, index, identifier).ok_or_else(|| {
                    fail(
                        path,
                        format!(
                            "expression references '{}', which is not an earlier column of this node",
                            identifier
                        ),
                    )
                })?;
                if !earlier.logical_type.is_numeric() {
                    return Err(fail(
                        path,
                        format!("expression operand '{}' must be numeric", identifier),
                    ));
                }
            }
        }
        GeneratorSpec::EnumList(args) => {
            if args.values.is_empty() {
                return Err(fail(path, "enum_list requires at least one value"));
            }
            for (i, value) in args.values.iter().enumerate() {
                if crate::generate::column::Value::from_json(value, column.logical_type).is_none()
                {
                    return Err(fail(
                        path,
                        format!("enum_list value #{} does not fit type {}", i, column.logical_type),
                    ));
                }
            }
            if node.kind == NodeKind::Entity {
                let rows = node.rows.unwrap_or(crate::spec::DEFAULT_ENTITY_ROWS);
                if args.values.len() != rows {
                    return Err(fail(
                        path,
                        format!(
                            "enum_list length {} must equal the node's {} rows",
                            args.values.len(),
                            rows
                        ),
                    ));
                }
            }
            if node.kind == NodeKind::Fact {
                return Err(fail(path, "enum_list cannot size fact nodes; use choice"));
            }
        }
        GeneratorSpec::Choice(args) => {
            match (&args.choices, &args.choices_ref) {
                (Some(_), Some(_)) => {
                    return Err(fail(path, "choice takes 'choices' or 'choices_ref', not both"))
                }
                (None, None) => {
                    return Err(fail(
                        path,
                        "choice requires 'choices': [..] or 'choices_ref': \"table.column\"",
                    ))
                }
                (Some(choices), None) => {
                    if choices.is_empty() {
                        return Err(fail(path, "choice list must not be empty"));
                    }
                    for (i, value) in choices.iter().enumerate() {
                        if crate::generate::column::Value::from_json(value, column.logical_type)
                            .is_none()
                        {
                            return Err(fail(
                                path,
                                format!(
                                    "choice value #{} does not fit type {}",
                                    i, column.logical_type
                                ),
                            ));
                        }
                    }
                    let resolved = args.weights.resolve().map_err(|e| fail(path, e))?;
                    if let crate::spec::weights::ResolvedWeights::Explicit(w) = &resolved {
                        if w.len() != choices.len() {
                            return Err(fail(
                                path,
                                format!(
                                    "{} weights for {} choices",
                                    w.len(),
                                    choices.len()
                                ),
                            ));
                        }
                    }
                }
                (None, Some(reference)) => {
                    let target_node = spec.node(&reference.table).ok_or_else(|| {
                        fail(
                            path,
                            format!("choices_ref table '{}' does not exist", reference.table),
                        )
                    })?;
                    let target = target_node.column(&reference.column).ok_or_else(|| {
                        fail(path, format!("choices_ref column {} does not exist", reference))
                    })?;
                    if target.logical_type != column.logical_type {
                        return Err(fail(
                            path,
                            format!(
                                "choices_ref type mismatch: {} is {}, this column is {}",
                                reference, target.logical_type, column.logical_type
                            ),
                        ));
                    }
                    args.weights.resolve().map_err(|e| fail(path, e))?;
                }
            }
        }
    }
    Ok(())
}

fn check_modifier(
    spec: &Specification,
    node: &NodeSpec,
    column: &ColumnSpec,
    index: usize,
    modifier: &ModifierSpec,
    path: &str,
) -> Result<()> {
    let requires_numeric = matches!(
        modifier,
        ModifierSpec::Multiply(_)
            | ModifierSpec::Add(_)
            | ModifierSpec::Clamp(_)
            | ModifierSpec::Jitter(_)
            | ModifierSpec::Outliers(_)
            | ModifierSpec::Effect(_)
            | ModifierSpec::Trend(_)
    );
    if requires_numeric && !column.logical_type.is_numeric() {
        return Err(fail(
            path,
            format!(
                "modifier '{}' applies to numeric columns, this column is {}",
                modifier.identifier(),
                column.logical_type
            ),
        ));
    }

    match modifier {
        ModifierSpec::Clamp(args) => {
            if args.min > args.max {
                return Err(fail(path, "clamp min must not exceed max"));
            }
        }
        ModifierSpec::Jitter(args) => {
            Sampler::new(&args.distribution).map_err(|e| fail(path, e))?;
        }
        ModifierSpec::TimeJitter(args) => {
            if column.logical_type != LogicalType::Datetime {
                return Err(fail(path, "time_jitter applies to datetime columns"));
            }
            if args.std_seconds < 0.0 {
                return Err(fail(path, "time_jitter std_seconds must be >= 0"));
            }
        }
        ModifierSpec::MapValues(_) => {
            if column.logical_type != LogicalType::String {
                return Err(fail(path, "map_values applies to string columns"));
            }
        }
        ModifierSpec::Seasonality(args) => {
            let expected = args.dimension.expected_len();
            if args.weights.len() != expected {
                return Err(fail(
                    path,
                    format!(
                        "{:?} seasonality takes {} weights, got {}",
                        args.dimension,
                        expected,
                        args.weights.len()
                    ),
                ));
            }
            if column.logical_type == LogicalType::Datetime {
                // Reweights the column's own timestamp component.
                if args.time_column.is_some() {
                    return Err(fail(
                        path,
                        "seasonality on a datetime column takes no time_column",
                    ));
                }
            } else if column.logical_type.is_numeric() {
                let time_column = args.time_column.as_deref().ok_or_else(|| {
                    fail(path, "seasonality on a numeric column requires 'time_column'")
                })?;
                let time = earlier_column(node, index, time_column).ok_or_else(|| {
                    fail(
                        path,
                        format!(
                            "seasonality time_column '{}' must be an earlier column of this node",
                            time_column
                        ),
                    )
                })?;
                if !time.logical_type.is_temporal() {
                    return Err(fail(path, "seasonality time_column must be a datetime column"));
                }
            } else {
                return Err(fail(
                    path,
                    "seasonality applies to numeric or datetime columns",
                ));
            }
        }
        ModifierSpec::Outliers(args) => {
            if !(0.0..=1.0).contains(&args.rate) {
                return Err(fail(path, format!("outlier rate {} must be in [0, 1]", args.rate)));
            }
            Sampler::new(&args.magnitude).map_err(|e| fail(path, e))?;
        }
        ModifierSpec::Trend(args) => {
            let time = earlier_column(node, index, &args.time_column).ok_or_else(|| {
                fail(
                    path,
                    format!(
                        "trend time_column '{}' must be an earlier column of this node",
                        args.time_column
                    ),
                )
            })?;
            if !time.logical_type.is_temporal() {
                return Err(fail(path, "trend time_column must be a datetime column"));
            }
            match args.curve {
                crate::spec::TrendCurve::Exponential | crate::spec::TrendCurve::Linear => {
                    if args.rate.is_none() {
                        return Err(fail(path, "this trend curve requires 'rate'"));
                    }
                }
                crate::spec::TrendCurve::Logarithmic => {
                    if args.a.is_none() || args.b.is_none() {
                        return Err(fail(path, "logarithmic trend requires 'a' and 'b'"));
                    }
                }
            }
        }
        ModifierSpec::Effect(effect) => {
            check_effect(spec, node, Some((column, index)), effect, path)?;
        }
        _ => {}
    }
    Ok(())
}

/// Shared validation for column-scope and table-scope effect joins.
fn check_effect(
    spec: &Specification,
    node: &NodeSpec,
    column_scope: Option<(&ColumnSpec, usize)>,
    effect: &EffectSpec,
    path: &str,
) -> Result<()> {
    let effect_node = spec.node(&effect.table).ok_or_else(|| {
        fail(path, format!("effect table '{}' is not a declared node", effect.table))
    })?;

    for (local, remote) in &effect.keys {
        if effect_node.column(remote).is_none() {
            return Err(fail(
                path,
                format!("effect table '{}' has no key column '{}'", effect.table, remote),
            ));
        }
        match column_scope {
            Some((_, index)) => {
                if earlier_column(node, index, local).is_none() {
                    return Err(fail(
                        path,
                        format!("effect key '{}' must be an earlier column of this node", local),
                    ));
                }
            }
            None => {
                let on_parent = node.parents.iter().any(|p| {
                    spec.node(p).is_some_and(|parent| parent.column(local).is_some())
                });
                if !on_parent {
                    return Err(fail(
                        path,
                        format!("table-scope effect key '{}' must be a parent column", local),
                    ));
                }
            }
        }
    }

    let value = effect_node.column(&effect.value_column).ok_or_else(|| {
        fail(
            path,
            format!(
                "effect table '{}' has no value column '{}'",
                effect.table, effect.value_column
            ),
        )
    })?;
    if !value.logical_type.is_numeric() {
        return Err(fail(path, "effect value column must be numeric"));
    }

    if let Some([start, end]) = &effect.window {
        for window_column in [start, end] {
            let c = effect_node.column(window_column).ok_or_else(|| {
                fail(
                    path,
                    format!(
                        "effect table '{}' has no window column '{}'",
                        effect.table, window_column
                    ),
                )
            })?;
            if !c.logical_type.is_temporal() {
                return Err(fail(path, "effect window columns must be datetime columns"));
            }
        }
        if column_scope.is_some() && effect.time_column.is_none() {
            return Err(fail(
                path,
                "a windowed column-scope effect needs 'time_column' on the owning node",
            ));
        }
    }
    if let (Some((_, index)), Some(time_column)) = (column_scope, &effect.time_column) {
        let time = earlier_column(node, index, time_column).ok_or_else(|| {
            fail(
                path,
                format!(
                    "effect time_column '{}' must be an earlier column of this node",
                    time_column
                ),
            )
        })?;
        if !time.logical_type.is_temporal() {
            return Err(fail(path, "effect time_column must be a datetime column"));
        }
    }
    if column_scope.is_none() && effect.op != EffectOp::Mul {
        return Err(fail(path, "table-scope effects scale fanout and must use op 'mul'"));
    }
    Ok(())
}

fn check_behaviors(spec: &Specification, node: &NodeSpec) -> Result<()> {
    let path = node.name.as_str();

    for effect in &node.effects {
        check_effect(spec, node, None, effect, &format!("{}.effects", path))?;
    }

    if let Some(behavior) = &node.segment_behavior {
        let segment_path = format!("{}.segment_behavior", path);
        resolve_segment_column(spec, node, &behavior.column, &segment_path)?;
        for value_column in &behavior.value_columns {
            let column = node.column(value_column).ok_or_else(|| {
                fail(&segment_path, format!("value column '{}' does not exist", value_column))
            })?;
            if !column.logical_type.is_numeric() {
                return Err(fail(
                    &segment_path,
                    format!("value column '{}' must be numeric", value_column),
                ));
            }
        }
        for (segment, effect) in &behavior.segments {
            for multiplier in [effect.fanout_multiplier, effect.value_multiplier].into_iter().flatten() {
                if multiplier < 0.0 || !multiplier.is_finite() {
                    return Err(fail(
                        &segment_path,
                        format!("segment '{}' multiplier {} must be >= 0", segment, multiplier),
                    ));
                }
            }
        }
    }

    if let Some(vintage) = &node.vintage_behavior {
        let vintage_path = format!("{}.vintage_behavior", path);
        let created = node.column(&vintage.created_at_column).ok_or_else(|| {
            fail(
                &vintage_path,
                format!("created_at_column '{}' does not exist", vintage.created_at_column),
            )
        })?;
        if !created.logical_type.is_temporal() {
            return Err(fail(&vintage_path, "created_at_column must be a datetime column"));
        }
        for curve in [&vintage.activity_decay, &vintage.value_growth].into_iter().flatten() {
            check_curve(curve, &vintage_path)?;
        }
        for value_column in &vintage.value_columns {
            let column = node.column(value_column).ok_or_else(|| {
                fail(&vintage_path, format!("value column '{}' does not exist", value_column))
            })?;
            if !column.logical_type.is_numeric() {
                return Err(fail(
                    &vintage_path,
                    format!("value column '{}' must be numeric", value_column),
                ));
            }
        }
    }

    if let Some(config) = &node.stage_config {
        let stage_path = format!("{}.stage_config", path);
        let stage_column = node.column(&config.stage_column).ok_or_else(|| {
            fail(&stage_path, format!("stage_column '{}' does not exist", config.stage_column))
        })?;
        if stage_column.logical_type != LogicalType::String {
            return Err(fail(&stage_path, "stage_column must be a string column"));
        }
        if config.stages.is_empty() {
            return Err(fail(&stage_path, "stages must not be empty"));
        }
        for stage in &config.stages {
            if let Some(rate) = stage.transition_rate {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(fail(
                        &stage_path,
                        format!("stage '{}' transition_rate {} must be in [0, 1]", stage.name, rate),
                    ));
                }
            }
        }
        if config.time_between_stages_hours <= 0.0 {
            return Err(fail(&stage_path, "time_between_stages_hours must be positive"));
        }
        if let Some(segment_column) = &config.segment_column {
            check_parent_segment_ref(spec, node, segment_column, &stage_path)?;
        }
    }

    if let Some(model) = &node.state_transition_model {
        let model_path = format!("{}.state_transition_model", path);
        let state_column = node.column(&model.state_column).ok_or_else(|| {
            fail(&model_path, format!("state_column '{}' does not exist", model.state_column))
        })?;
        if state_column.logical_type != LogicalType::String {
            return Err(fail(&model_path, "state_column must be a string column"));
        }
        if !(0.0..=1.0).contains(&model.transition_prob_per_period) {
            return Err(fail(&model_path, "transition_prob_per_period must be in [0, 1]"));
        }
        if !model.states.contains_key(&model.initial_state) {
            return Err(fail(
                &model_path,
                format!("initial_state '{}' is not declared in states", model.initial_state),
            ));
        }
        for (name, state) in &model.states {
            let mut total = 0.0;
            for (next, probability) in &state.next {
                if !model.states.contains_key(next) {
                    return Err(fail(
                        &model_path,
                        format!("state '{}' transitions to undeclared state '{}'", name, next),
                    ));
                }
                if !(0.0..=1.0).contains(probability) {
                    return Err(fail(
                        &model_path,
                        format!("transition {} -> {} probability must be in [0, 1]", name, next),
                    ));
                }
                total += probability;
            }
            if total > 1.0 + 1e-9 {
                return Err(fail(
                    &model_path,
                    format!("state '{}' next probabilities sum to {} (> 1)", name, total),
                ));
            }
            if state.terminal && !state.next.is_empty() {
                return Err(fail(
                    &model_path,
                    format!("terminal state '{}' cannot declare next states", name),
                ));
            }
        }
        if let Some(segment_column) = &model.segment_column {
            check_parent_segment_ref(spec, node, segment_column, &model_path)?;
        }
    }

    Ok(())
}

fn check_curve(curve: &CurveSpec, path: &str) -> Result<()> {
    match curve {
        CurveSpec::Points(points) => {
            if points.is_empty() {
                return Err(fail(path, "curve needs at least one point"));
            }
            if points.iter().any(|p| *p < 0.0 || !p.is_finite()) {
                return Err(fail(path, "curve points must be finite and non-negative"));
            }
        }
        CurveSpec::Parametric { points, .. } => {
            if *points == 0 {
                return Err(fail(path, "parametric curves need points >= 1"));
            }
        }
    }
    Ok(())
}

/// A segment source: local string column, or `parent.column` on a fact.
fn resolve_segment_column(
    spec: &Specification,
    node: &NodeSpec,
    reference: &str,
    path: &str,
) -> Result<()> {
    if let Some((table, column)) = reference.split_once('.') {
        if !node.parents.iter().any(|p| p == table) {
            return Err(fail(
                path,
                format!("segment column '{}' must name one of the node's parents", reference),
            ));
        }
        let parent = spec.node(table).expect("parents already validated");
        let segment = parent.column(column).ok_or_else(|| {
            fail(path, format!("segment column {} does not exist", reference))
        })?;
        if segment.logical_type != LogicalType::String {
            return Err(fail(path, "segment columns must be string columns"));
        }
        return Ok(());
    }
    let segment = node.column(reference).ok_or_else(|| {
        fail(path, format!("segment column '{}' does not exist on this node", reference))
    })?;
    if segment.logical_type != LogicalType::String {
        return Err(fail(path, "segment columns must be string columns"));
    }
    Ok(())
}

fn check_parent_segment_ref(
    spec: &Specification,
    node: &NodeSpec,
    reference: &str,
    path: &str,
) -> Result<()> {
    let (table, column) = reference.split_once('.').ok_or_else(|| {
        fail(
            path,
            format!(
                "segment_column '{}' must be parent-qualified, e.g. \"customer.segment\"",
                reference
            ),
        )
    })?;
    if !node.parents.iter().any(|p| p == table) {
        return Err(fail(
            path,
            format!("segment_column table '{}' is not a parent of this fact", table),
        ));
    }
    let parent = spec.node(table).expect("parents already validated");
    let segment = parent.column(column).ok_or_else(|| {
        fail(path, format!("segment_column {} does not exist", reference))
    })?;
    if segment.logical_type != LogicalType::String {
        return Err(fail(path, "segment_column must be a string column"));
    }
    Ok(())
}

fn check_constraints(spec: &Specification) -> Result<()> {
    let constraints = &spec.constraints;
    for reference in &constraints.unique {
        resolve_ref(spec, reference, "constraints.unique")?;
    }
    for fk in &constraints.foreign_keys {
        resolve_ref(spec, &fk.child, "constraints.foreign_keys")?;
        resolve_ref(spec, &fk.parent, "constraints.foreign_keys")?;
    }
    for range in &constraints.ranges {
        let column = resolve_ref(spec, &range.column, "constraints.ranges")?;
        if !column.logical_type.is_numeric() {
            return Err(fail(
                format!("constraints.ranges.{}", range.column),
                "range constraints apply to numeric columns",
            ));
        }
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(fail(
                    format!("constraints.ranges.{}", range.column),
                    format!("min {} exceeds max {}", min, max),
                ));
            }
        }
    }
    for inequality in &constraints.inequalities {
        let left = resolve_ref(spec, &inequality.left, "constraints.inequalities")?;
        let right = resolve_ref(spec, &inequality.right, "constraints.inequalities")?;
        let compatible = (left.logical_type.is_numeric() && right.logical_type.is_numeric())
            || (left.logical_type.is_temporal() && right.logical_type.is_temporal());
        if !compatible {
            return Err(fail(
                format!(
                    "constraints.inequalities.{} {} {}",
                    inequality.left, inequality.op, inequality.right
                ),
                "both sides must be numeric, or both datetime",
            ));
        }
        if inequality.left.table != inequality.right.table {
            return Err(fail(
                format!(
                    "constraints.inequalities.{} {} {}",
                    inequality.left, inequality.op, inequality.right
                ),
                "inequalities compare columns of the same table row",
            ));
        }
    }
    for constraint in &constraints.enums {
        let column = resolve_ref(spec, &constraint.column, "constraints.enums")?;
        for (i, value) in constraint.values.iter().enumerate() {
            if crate::generate::column::Value::from_json(value, column.logical_type).is_none() {
                return Err(fail(
                    format!("constraints.enums.{}", constraint.column),
                    format!("value #{} does not fit type {}", i, column.logical_type),
                ));
            }
        }
    }
    for pattern in &constraints.patterns {
        let column = resolve_ref(spec, &pattern.column, "constraints.patterns")?;
        if column.logical_type != LogicalType::String {
            return Err(fail(
                format!("constraints.patterns.{}", pattern.column),
                "pattern constraints apply to string columns",
            ));
        }
        regex::Regex::new(&pattern.regex).map_err(|e| {
            fail(
                format!("constraints.patterns.{}", pattern.column),
                format!("invalid regex: {}", e),
            )
        })?;
    }
    Ok(())
}

fn check_targets(spec: &Specification) -> Result<()> {
    for target in &spec.targets.weekend_share {
        let column = resolve_ref(spec, &target.column, "targets.weekend_share")?;
        if !column.logical_type.is_temporal() {
            return Err(fail(
                format!("targets.weekend_share.{}", target.column),
                "weekend_share applies to datetime columns",
            ));
        }
        check_bounds(target.min, target.max, &format!("targets.weekend_share.{}", target.column))?;
    }
    for target in &spec.targets.mean_in_range {
        let column = resolve_ref(spec, &target.column, "targets.mean_in_range")?;
        if !column.logical_type.is_numeric() {
            return Err(fail(
                format!("targets.mean_in_range.{}", target.column),
                "mean_in_range applies to numeric columns",
            ));
        }
        check_bounds(target.min, target.max, &format!("targets.mean_in_range.{}", target.column))?;
    }
    for target in &spec.targets.composite_effects {
        let measure = resolve_ref(spec, &target.measure, "targets.composite_effects")?;
        if !measure.logical_type.is_numeric() {
            return Err(fail(
                format!("targets.composite_effects.{}", target.measure),
                "composite effect measures must be numeric",
            ));
        }
        if target.influences.is_empty() {
            return Err(fail(
                format!("targets.composite_effects.{}", target.measure),
                "composite effects need at least one influence",
            ));
        }
        for influence in &target.influences {
            resolve_ref(spec, &influence.column, "targets.composite_effects")?;
            if influence.multipliers.is_empty() {
                return Err(fail(
                    format!("targets.composite_effects.{}", influence.column),
                    "influences need at least one multiplier",
                ));
            }
        }
    }
    Ok(())
}

fn check_bounds(min: f64, max: f64, path: &str) -> Result<()> {
    if min > max {
        return Err(fail(path, format!("min {} exceeds max {}", min, max)));
    }
    Ok(())
}

fn resolve_ref<'a>(
    spec: &'a Specification,
    reference: &crate::spec::ColumnRef,
    context: &str,
) -> Result<&'a ColumnSpec> {
    spec.column(reference).ok_or_else(|| {
        fail(
            format!("{}.{}", context, reference),
            format!(
                "column {} does not resolve; expected an existing \"table.column\"",
                reference
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_nodes(nodes_json: &str) -> String {
        format!(
            r#"{{
            "version": "1",
            "metadata": {{"name": "t"}},
            "timeframe": {{"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"}},
            "nodes": {}
        }}"#,
            nodes_json
        )
    }

    fn check_json(json: &str) -> Result<()> {
        let spec = Specification::from_json(json).unwrap();
        check(&spec)
    }

    #[test]
    fn test_valid_minimal_spec_passes() {
        let json = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "id",
                 "columns": [{"name": "id", "type": "integer",
                              "generator": {"sequence": {}}}]}]"#,
        );
        assert!(check_json(&json).is_ok());
    }

    #[test]
    fn test_missing_primary_key_column() {
        let json = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "missing",
                 "columns": [{"name": "id", "type": "integer",
                              "generator": {"sequence": {}}}]}]"#,
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("primary_key"));
    }

    #[test]
    fn test_fact_requires_parents_and_fanout() {
        let no_parents = wrap_nodes(
            r#"[{"name": "event", "kind": "fact", "primary_key": "id",
                 "fanout": {"distribution": "poisson", "lambda": 1.0, "clamp": [0, 5]},
                 "columns": [{"name": "id", "type": "integer",
                              "generator": {"sequence": {}}}]}]"#,
        );
        assert!(check_json(&no_parents).is_err());

        let no_fanout = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "id",
                 "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]},
                {"name": "event", "kind": "fact", "primary_key": "id",
                 "parents": ["user"],
                 "columns": [{"name": "id", "type": "integer",
                              "generator": {"sequence": {}}}]}]"#,
        );
        assert!(check_json(&no_fanout).is_err());
    }

    #[test]
    fn test_fanout_on_entity_rejected() {
        let json = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "id",
                 "fanout": {"distribution": "poisson", "lambda": 1.0, "clamp": [0, 5]},
                 "columns": [{"name": "id", "type": "integer",
                              "generator": {"sequence": {}}}]}]"#,
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("fanout"));
    }

    #[test]
    fn test_dangling_lookup_rejected() {
        let json = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "ref", "type": "integer",
                     "generator": {"lookup": {"from": "ghost.id"}}}]}]"#,
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_modifier_type_mismatch_rejected() {
        let json = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "name", "type": "string",
                     "generator": {"faker": {"method": "name"}},
                     "modifiers": [{"multiply": {"factor": 2.0}}]}]}]"#,
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("numeric"));
    }

    #[test]
    fn test_malformed_weights_rejected() {
        let json = wrap_nodes(
            r#"[{"name": "user", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "plan", "type": "string",
                     "generator": {"choice": {"choices": ["a", "b"],
                                              "weights": "head_tail@{2,0}"}}}]}]"#,
        );
        assert!(check_json(&json).is_err());
    }

    #[test]
    fn test_expression_forward_reference_rejected() {
        let json = wrap_nodes(
            r#"[{"name": "order", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "total", "type": "floating",
                     "generator": {"expression": {"expr": "price * 2"}}},
                    {"name": "price", "type": "floating",
                     "generator": {"distribution": {
                        "distribution": {"uniform": {"low": 1.0, "high": 2.0}},
                        "clamp": [1.0, 2.0]}}}]}]"#,
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("earlier column"));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let json = format!(
            r#"{{
            "version": "1",
            "metadata": {{"name": "t"}},
            "timeframe": {{"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"}},
            "nodes": [{{"name": "user", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {{"name": "id", "type": "integer", "generator": {{"sequence": {{}}}}}},
                    {{"name": "code", "type": "string",
                     "generator": {{"faker": {{"method": "word"}}}}}}]}}],
            "constraints": {{"patterns": [{{"column": "user.code", "regex": "["}}]}}
        }}"#
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("regex"));
    }

    #[test]
    fn test_hour_pattern_requires_hour_frequency() {
        let json = wrap_nodes(
            r#"[{"name": "e", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "ts", "type": "datetime",
                     "generator": {"datetime_series": {
                        "pattern": {"dimension": "hour",
                                    "weights": [1,1,1,1,1,1,1,1,1,1,1,1,
                                                1,1,1,1,1,1,1,1,1,1,1,1]}}}}]}]"#,
        );
        // Timeframe frequency is day; hour pattern needs hour sampling.
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("frequency"));

        let json = wrap_nodes(
            r#"[{"name": "e", "kind": "entity", "primary_key": "id",
                 "columns": [
                    {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                    {"name": "ts", "type": "datetime",
                     "generator": {"datetime_series": {
                        "frequency": "hour",
                        "pattern": {"dimension": "hour",
                                    "weights": [1,1,1,1,1,1,1,1,1,1,1,1,
                                                1,1,1,1,1,1,1,1,1,1,1,1]}}}}]}]"#,
        );
        assert!(check_json(&json).is_ok());
    }

    #[test]
    fn test_terminal_state_with_next_rejected() {
        let json = wrap_nodes(
            r#"[
            {"name": "customer", "kind": "entity", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]},
            {"name": "subscription", "kind": "fact", "primary_key": "sid",
             "parents": ["customer"],
             "state_transition_model": {
                "state_column": "state", "initial_state": "active",
                "period": "month", "transition_prob_per_period": 0.05,
                "states": {
                    "active": {"next": {"churned": 1.0}},
                    "churned": {"terminal": true, "next": {"active": 1.0}}
                }},
             "columns": [
                {"name": "sid", "type": "integer", "generator": {"sequence": {}}},
                {"name": "customer_id", "type": "integer",
                 "generator": {"lookup": {"from": "customer.id"}}},
                {"name": "state", "type": "string",
                 "generator": {"choice": {"choices": ["active"]}}}]}
        ]"#,
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn test_inequality_across_tables_rejected() {
        let json = format!(
            r#"{{
            "version": "1",
            "metadata": {{"name": "t"}},
            "timeframe": {{"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"}},
            "nodes": [
                {{"name": "a", "kind": "entity", "primary_key": "id",
                 "columns": [{{"name": "id", "type": "integer", "generator": {{"sequence": {{}}}}}}]}},
                {{"name": "b", "kind": "entity", "primary_key": "id",
                 "columns": [{{"name": "id", "type": "integer", "generator": {{"sequence": {{}}}}}}]}}
            ],
            "constraints": {{"inequalities": [
                {{"left": "a.id", "op": "<", "right": "b.id"}}]}}
        }}"#
        );
        let err = check_json(&json).unwrap_err();
        assert!(err.to_string().contains("same table"));
    }
}
