//! # Specification Model
//!
//! The typed, self-consistent description of a dataset: timeframe, node
//! descriptors, column generators and modifiers, constraints, and targets.
//! Dynamic blocks are discriminated sum types — an unknown generator or
//! modifier identifier is a parse error, not a runtime lookup failure —
//! and every struct rejects unknown fields.
//!
//! A specification is created by the caller, validated once by
//! [`preflight::check`], then consumed read-only by the planner and the
//! executor.

pub mod preflight;
pub mod weights;

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DatasmithError, Result};
use weights::ChoiceWeights;

/// Top-level dataset specification.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Specification {
    pub version: String,
    pub metadata: Metadata,
    pub timeframe: Timeframe,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub targets: Targets,
}

impl Specification {
    /// Parse a specification from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DatasmithError::SpecInvalid {
            message: e.to_string(),
        })
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Resolve a `table.column` reference to its column descriptor.
    pub fn column(&self, reference: &ColumnRef) -> Option<&ColumnSpec> {
        self.node(&reference.table)
            .and_then(|n| n.column(&reference.column))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
}

/// Closed interval of timestamps with a default sampling frequency.
/// Start is inclusive, end is exclusive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Timeframe {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub frequency: Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Hour,
    Day,
    Month,
}

/// Node kinds: dimensional rows, per-parent event rows, and small fixed
/// enumerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    Fact,
    Vocab,
}

/// Default row count for entity nodes without an explicit `rows`.
pub const DEFAULT_ENTITY_ROWS: usize = 1000;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub rows: Option<usize>,
    pub primary_key: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub fanout: Option<FanoutSpec>,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub segment_behavior: Option<SegmentBehavior>,
    #[serde(default)]
    pub vintage_behavior: Option<VintageBehavior>,
    #[serde(default)]
    pub stage_config: Option<StageConfig>,
    #[serde(default)]
    pub state_transition_model: Option<StateTransitionModel>,
    /// Table-scope effect joins: scale fanout counts before rows materialize.
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

impl NodeSpec {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_fact(&self) -> bool {
        self.kind == NodeKind::Fact
    }
}

/// Per-parent child-count distribution with a mandatory clamp window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FanoutSpec {
    pub distribution: FanoutDistribution,
    #[serde(default)]
    pub lambda: Option<f64>,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    pub clamp: [i64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutDistribution {
    Poisson,
    Uniform,
}

/// Column logical types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Integer,
    Floating,
    String,
    Boolean,
    Datetime,
    Date,
}

impl LogicalType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, LogicalType::Integer | LogicalType::Floating)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, LogicalType::Datetime | LogicalType::Date)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogicalType::Integer => "integer",
            LogicalType::Floating => "floating",
            LogicalType::String => "string",
            LogicalType::Boolean => "boolean",
            LogicalType::Datetime => "datetime",
            LogicalType::Date => "date",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub logical_type: LogicalType,
    #[serde(default)]
    pub nullable: bool,
    /// Probability of a null per row. Defaults to 0.05 when `nullable`.
    #[serde(default)]
    pub null_rate: Option<f64>,
    pub generator: GeneratorSpec,
    #[serde(default)]
    pub modifiers: Vec<ModifierSpec>,
}

impl ColumnSpec {
    pub fn effective_null_rate(&self) -> f64 {
        if !self.nullable {
            return 0.0;
        }
        self.null_rate.unwrap_or(0.05)
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// The closed set of primitive generators. Adding an identifier here is a
/// type-system event; specification parsing rejects anything else.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorSpec {
    Sequence(SequenceArgs),
    Choice(ChoiceArgs),
    Distribution(DistributionArgs),
    DatetimeSeries(DatetimeSeriesArgs),
    Faker(FakerArgs),
    Lookup(LookupArgs),
    Expression(ExpressionArgs),
    EnumList(EnumListArgs),
}

impl GeneratorSpec {
    pub fn identifier(&self) -> &'static str {
        match self {
            GeneratorSpec::Sequence(_) => "sequence",
            GeneratorSpec::Choice(_) => "choice",
            GeneratorSpec::Distribution(_) => "distribution",
            GeneratorSpec::DatetimeSeries(_) => "datetime_series",
            GeneratorSpec::Faker(_) => "faker",
            GeneratorSpec::Lookup(_) => "lookup",
            GeneratorSpec::Expression(_) => "expression",
            GeneratorSpec::EnumList(_) => "enum_list",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceArgs {
    #[serde(default = "default_one")]
    pub start: i64,
    #[serde(default = "default_one")]
    pub step: i64,
}

fn default_one() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceArgs {
    #[serde(default)]
    pub choices: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub choices_ref: Option<ColumnRef>,
    #[serde(default)]
    pub weights: ChoiceWeights,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionArgs {
    pub distribution: DistributionSpec,
    /// Out-of-range draws are truncated to the boundary, never discarded.
    pub clamp: [f64; 2],
}

/// Numeric distribution family.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionSpec {
    Normal(NormalDist),
    Lognormal(LognormalDist),
    Uniform(UniformDist),
    Poisson(PoissonDist),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NormalDist {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LognormalDist {
    pub mean: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UniformDist {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoissonDist {
    pub lambda: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatetimeSeriesArgs {
    #[serde(default)]
    pub within: WithinSpec,
    /// Defaults to the timeframe's frequency.
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub pattern: Option<PatternSpec>,
}

/// Sampling interval: the keyword `"timeframe"` or an explicit interval.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WithinSpec {
    Keyword(String),
    Interval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Default for WithinSpec {
    fn default() -> Self {
        WithinSpec::Keyword("timeframe".to_string())
    }
}

/// Bias datetime sampling by hour-of-day, day-of-week, or month-of-year.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    pub dimension: PatternDimension,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternDimension {
    Hour,
    Dow,
    Month,
}

impl PatternDimension {
    pub fn expected_len(&self) -> usize {
        match self {
            PatternDimension::Hour => 24,
            PatternDimension::Dow => 7,
            PatternDimension::Month => 12,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FakerArgs {
    pub method: FakerMethod,
    #[serde(default)]
    pub locale: Option<String>,
    /// Derive the locale per row from an ISO country code column.
    #[serde(default)]
    pub locale_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FakerMethod {
    Name,
    FirstName,
    LastName,
    Email,
    Address,
    City,
    Country,
    Company,
    Word,
    PhoneNumber,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LookupArgs {
    pub from: ColumnRef,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionArgs {
    pub expr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnumListArgs {
    pub values: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Modifiers
// ---------------------------------------------------------------------------

/// The closed set of column modifiers, applied in declaration order after
/// the generator and before the final range clamp and cast.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierSpec {
    Multiply(MultiplyArgs),
    Add(AddArgs),
    Clamp(ClampArgs),
    Jitter(JitterArgs),
    TimeJitter(TimeJitterArgs),
    MapValues(MapValuesArgs),
    Seasonality(SeasonalityArgs),
    Outliers(OutliersArgs),
    Effect(EffectSpec),
    Trend(TrendArgs),
}

impl ModifierSpec {
    pub fn identifier(&self) -> &'static str {
        match self {
            ModifierSpec::Multiply(_) => "multiply",
            ModifierSpec::Add(_) => "add",
            ModifierSpec::Clamp(_) => "clamp",
            ModifierSpec::Jitter(_) => "jitter",
            ModifierSpec::TimeJitter(_) => "time_jitter",
            ModifierSpec::MapValues(_) => "map_values",
            ModifierSpec::Seasonality(_) => "seasonality",
            ModifierSpec::Outliers(_) => "outliers",
            ModifierSpec::Effect(_) => "effect",
            ModifierSpec::Trend(_) => "trend",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MultiplyArgs {
    pub factor: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AddArgs {
    pub offset: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClampArgs {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JitterArgs {
    pub distribution: DistributionSpec,
    #[serde(default)]
    pub mode: JitterMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    #[default]
    Add,
    Mul,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimeJitterArgs {
    pub std_seconds: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MapValuesArgs {
    pub mapping: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SeasonalityArgs {
    pub dimension: PatternDimension,
    pub weights: Vec<f64>,
    /// Datetime column of the same node supplying the row's timestamp.
    /// Required on numeric columns; omitted when the modifier reweights a
    /// datetime column itself.
    #[serde(default)]
    pub time_column: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutliersArgs {
    pub rate: f64,
    pub magnitude: DistributionSpec,
    #[serde(default)]
    pub direction: OutlierDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierDirection {
    #[default]
    Spike,
    Drop,
    Both,
}

/// Join against an effect table on key columns and a time window, applying
/// its value as a multiplier or delta. At column scope this rewrites
/// values; as a node-level entry it scales fanout counts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EffectSpec {
    pub table: String,
    /// Local column name → effect-table key column name.
    pub keys: IndexMap<String, String>,
    #[serde(default)]
    pub time_column: Option<String>,
    /// `[window_start_column, window_end_column]` on the effect table.
    #[serde(default)]
    pub window: Option<[String; 2]>,
    pub op: EffectOp,
    pub value_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectOp {
    Mul,
    Add,
}

impl EffectOp {
    pub fn neutral(&self) -> f64 {
        match self {
            EffectOp::Mul => 1.0,
            EffectOp::Add => 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrendArgs {
    pub curve: TrendCurve,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub a: Option<f64>,
    #[serde(default)]
    pub b: Option<f64>,
    /// Datetime column supplying each row's position on the trend.
    pub time_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCurve {
    Exponential,
    Linear,
    Logarithmic,
}

// ---------------------------------------------------------------------------
// Behavior blocks
// ---------------------------------------------------------------------------

/// Segment-keyed multipliers for fanout and declared value columns. The
/// segment source may be a local column or, on fact nodes, a qualified
/// `parent.column`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentBehavior {
    pub column: String,
    #[serde(default)]
    pub value_columns: Vec<String>,
    pub segments: IndexMap<String, SegmentEffect>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentEffect {
    #[serde(default)]
    pub fanout_multiplier: Option<f64>,
    #[serde(default)]
    pub value_multiplier: Option<f64>,
}

/// Age-indexed multiplier curves keyed off an entity's creation timestamp.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VintageBehavior {
    pub created_at_column: String,
    pub unit: AgeUnit,
    #[serde(default)]
    pub activity_decay: Option<CurveSpec>,
    #[serde(default)]
    pub value_growth: Option<CurveSpec>,
    #[serde(default)]
    pub value_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeUnit {
    Day,
    Week,
    Month,
}

/// A multiplier curve: explicit points at integer ages, or a parametric
/// shape sampled into `points` values. Linear interpolation between
/// points; the last value holds beyond the end.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CurveSpec {
    Points(Vec<f64>),
    Parametric {
        shape: CurveShape,
        rate: f64,
        points: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveShape {
    Exponential,
    Linear,
    Logarithmic,
}

impl CurveSpec {
    /// Materialize the curve's points.
    pub fn sample_points(&self) -> Vec<f64> {
        match self {
            CurveSpec::Points(p) => p.clone(),
            CurveSpec::Parametric {
                shape,
                rate,
                points,
            } => (0..*points)
                .map(|age| {
                    let age = age as f64;
                    match shape {
                        CurveShape::Exponential => (1.0 + rate).powf(age),
                        CurveShape::Linear => 1.0 + rate * age,
                        CurveShape::Logarithmic => 1.0 + rate * (1.0 + age).ln(),
                    }
                })
                .collect(),
        }
    }

    /// Evaluate at a fractional age: linear interpolation between points,
    /// last value held beyond the end, first value before zero.
    pub fn value_at(&self, age: f64) -> f64 {
        let points = self.sample_points();
        if points.is_empty() {
            return 1.0;
        }
        if age <= 0.0 {
            return points[0];
        }
        let last = points.len() - 1;
        if age >= last as f64 {
            return points[last];
        }
        let lo = age.floor() as usize;
        let frac = age - lo as f64;
        points[lo] + (points[lo + 1] - points[lo]) * frac
    }
}

/// Ordered per-parent milestones with a declared drop-off at each step.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub stage_column: String,
    pub stages: Vec<StageSpec>,
    #[serde(default = "default_stage_hours")]
    pub time_between_stages_hours: f64,
    #[serde(default)]
    pub segment_column: Option<String>,
    #[serde(default)]
    pub segment_variation: IndexMap<String, StageSegmentVariation>,
}

fn default_stage_hours() -> f64 {
    24.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    /// Probability of reaching this stage from the previous one. The first
    /// stage is always reached (rate 1.0).
    #[serde(default)]
    pub transition_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StageSegmentVariation {
    pub transition_multiplier: f64,
}

/// Markov chain per parent with terminal states and per-period transition
/// probabilities.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateTransitionModel {
    pub state_column: String,
    pub initial_state: String,
    pub period: AgeUnit,
    pub transition_prob_per_period: f64,
    pub states: IndexMap<String, StateSpec>,
    #[serde(default)]
    pub segment_column: Option<String>,
    #[serde(default)]
    pub segment_multipliers: IndexMap<String, StateSegmentMultipliers>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    #[serde(default)]
    pub next: IndexMap<String, f64>,
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateSegmentMultipliers {
    pub churn_multiplier: f64,
}

// ---------------------------------------------------------------------------
// Constraints and targets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Constraints {
    pub unique: Vec<ColumnRef>,
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub ranges: Vec<RangeConstraint>,
    pub inequalities: Vec<InequalityConstraint>,
    pub enums: Vec<EnumConstraint>,
    pub patterns: Vec<PatternConstraint>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeySpec {
    pub child: ColumnRef,
    pub parent: ColumnRef,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConstraint {
    pub column: ColumnRef,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InequalityConstraint {
    pub left: ColumnRef,
    pub op: CmpOp,
    pub right: ColumnRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CmpOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
}

impl CmpOp {
    pub fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Eq => left == right,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnumConstraint {
    pub column: ColumnRef,
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PatternConstraint {
    pub column: ColumnRef,
    pub regex: String,
}

/// Soft, scored targets. Never block generation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Targets {
    pub weekend_share: Vec<WeekendShareTarget>,
    pub mean_in_range: Vec<MeanTarget>,
    pub composite_effects: Vec<CompositeEffectTarget>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WeekendShareTarget {
    pub column: ColumnRef,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MeanTarget {
    pub column: ColumnRef,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeEffectTarget {
    /// Numeric fact column whose per-stratum mean lift is scored.
    pub measure: ColumnRef,
    pub influences: Vec<Influence>,
    #[serde(default)]
    pub tolerance: Option<Tolerance>,
    #[serde(default = "default_min_stratum_rows")]
    pub min_stratum_rows: usize,
}

fn default_min_stratum_rows() -> usize {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Influence {
    /// Stratifying column: on the measure's node or on a parent entity
    /// reachable through the fact's parent-key lookup column.
    pub column: ColumnRef,
    pub multipliers: IndexMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Tolerance {
    pub mae: f64,
    pub mape: f64,
}

// ---------------------------------------------------------------------------
// Column references
// ---------------------------------------------------------------------------

/// A `table.column` identifier, serialized as a single dotted string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (table, column) = s.split_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(table, column))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

impl Serialize for ColumnRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}.{}", self.table, self.column))
    }
}

impl<'de> Deserialize<'de> for ColumnRef {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ColumnRef::parse(&s).ok_or_else(|| {
            D::Error::custom(format!(
                "expected a 'table.column' identifier, got '{}'",
                s
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_spec_parses() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "demo"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2025-01-01T00:00:00Z",
                          "frequency": "day"},
            "nodes": [{
                "name": "user",
                "kind": "entity",
                "rows": 10,
                "primary_key": "user_id",
                "columns": [
                    {"name": "user_id", "type": "integer",
                     "generator": {"sequence": {"start": 1}}},
                    {"name": "name", "type": "string",
                     "generator": {"faker": {"method": "name"}}}
                ]
            }]
        }"#;
        let spec = Specification::from_json(json).unwrap();
        assert_eq!(spec.nodes.len(), 1);
        let user = spec.node("user").unwrap();
        assert_eq!(user.kind, NodeKind::Entity);
        assert_eq!(user.rows, Some(10));
        let pk = user.column("user_id").unwrap();
        assert!(matches!(pk.generator, GeneratorSpec::Sequence(_)));
    }

    #[test]
    fn test_unknown_generator_rejected() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "demo"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2025-01-01T00:00:00Z",
                          "frequency": "day"},
            "nodes": [{
                "name": "user", "kind": "entity", "primary_key": "id",
                "columns": [{"name": "id", "type": "integer",
                             "generator": {"mystery": {}}}]
            }]
        }"#;
        let err = Specification::from_json(json).unwrap_err();
        assert!(matches!(err, DatasmithError::SpecInvalid { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{
            "version": "1",
            "metadata": {"name": "demo"},
            "timeframe": {"start": "2024-01-01T00:00:00Z",
                          "end": "2025-01-01T00:00:00Z",
                          "frequency": "day"},
            "nodes": [],
            "surprise": true
        }"#;
        assert!(Specification::from_json(json).is_err());
    }

    #[test]
    fn test_column_ref_round_trip() {
        let r: ColumnRef = serde_json::from_str(r#""user.user_id""#).unwrap();
        assert_eq!(r.table, "user");
        assert_eq!(r.column, "user_id");
        assert_eq!(serde_json::to_string(&r).unwrap(), r#""user.user_id""#);
    }

    #[test]
    fn test_column_ref_without_dot_rejected() {
        let r: std::result::Result<ColumnRef, _> = serde_json::from_str(r#""user_id""#);
        assert!(r.is_err());
    }

    #[test]
    fn test_curve_interpolation() {
        let curve = CurveSpec::Points(vec![1.0, 0.5]);
        assert_eq!(curve.value_at(0.0), 1.0);
        assert_eq!(curve.value_at(0.5), 0.75);
        assert_eq!(curve.value_at(1.0), 0.5);
        // Beyond the last point the last multiplier holds
        assert_eq!(curve.value_at(9.0), 0.5);
    }

    #[test]
    fn test_parametric_curve_shapes() {
        let exp = CurveSpec::Parametric {
            shape: CurveShape::Exponential,
            rate: -0.5,
            points: 3,
        };
        let pts = exp.sample_points();
        assert_eq!(pts, vec![1.0, 0.5, 0.25]);

        let lin = CurveSpec::Parametric {
            shape: CurveShape::Linear,
            rate: 0.1,
            points: 2,
        };
        assert_eq!(lin.sample_points(), vec![1.0, 1.1]);
    }

    #[test]
    fn test_cmp_op_symbols() {
        let op: CmpOp = serde_json::from_str(r#""<=""#).unwrap();
        assert_eq!(op, CmpOp::Le);
        assert!(op.holds(1.0, 1.0));
        assert!(!CmpOp::Lt.holds(1.0, 1.0));
    }
}
