//! # Primitive Generators
//!
//! Stateless column producers. Each takes its typed arguments, a row
//! count, and a derived RNG, and returns a full column; none has
//! observable side effects. Lookup resolution and faker dispatch live in
//! the executor and `faker` module respectively.

use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal, Poisson};

use crate::generate::column::{ColumnData, Value};
use crate::spec::weights::ResolvedWeights;
use crate::spec::{
    DatetimeSeriesArgs, DistributionArgs, DistributionSpec, FanoutDistribution, FanoutSpec,
    Frequency, LogicalType, PatternDimension, SequenceArgs, Timeframe, WithinSpec,
};

/// A validated draw source for the distribution family. Construction
/// checks parameters once per column production.
pub enum Sampler {
    Normal(Normal<f64>),
    Lognormal(LogNormal<f64>),
    Uniform { low: f64, high: f64 },
    Poisson(Poisson<f64>),
    Constant(f64),
}

impl Sampler {
    pub fn new(spec: &DistributionSpec) -> Result<Self, String> {
        match spec {
            DistributionSpec::Normal(d) => Normal::new(d.mean, d.std)
                .map(Sampler::Normal)
                .map_err(|e| format!("invalid normal{{mean={}, std={}}}: {}", d.mean, d.std, e)),
            DistributionSpec::Lognormal(d) => LogNormal::new(d.mean, d.sigma)
                .map(Sampler::Lognormal)
                .map_err(|e| {
                    format!(
                        "invalid lognormal{{mean={}, sigma={}}}: {}",
                        d.mean, d.sigma, e
                    )
                }),
            DistributionSpec::Uniform(d) => {
                if !d.low.is_finite() || !d.high.is_finite() || d.low > d.high {
                    return Err(format!(
                        "invalid uniform{{low={}, high={}}}: low must be <= high",
                        d.low, d.high
                    ));
                }
                if d.low == d.high {
                    Ok(Sampler::Constant(d.low))
                } else {
                    Ok(Sampler::Uniform {
                        low: d.low,
                        high: d.high,
                    })
                }
            }
            DistributionSpec::Poisson(d) => {
                if d.lambda == 0.0 {
                    return Ok(Sampler::Constant(0.0));
                }
                Poisson::new(d.lambda)
                    .map(Sampler::Poisson)
                    .map_err(|e| format!("invalid poisson{{lambda={}}}: {}", d.lambda, e))
            }
        }
    }

    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            Sampler::Normal(d) => d.sample(rng),
            Sampler::Lognormal(d) => d.sample(rng),
            Sampler::Uniform { low, high } => rng.random_range(*low..*high),
            Sampler::Poisson(d) => d.sample(rng),
            Sampler::Constant(c) => *c,
        }
    }
}

/// Consecutive integers from `start` by `step`.
pub fn sequence(args: &SequenceArgs, n: usize) -> ColumnData {
    ColumnData::Integer(
        (0..n)
            .map(|i| Some(args.start + args.step * i as i64))
            .collect(),
    )
}

/// Sample a numeric distribution into a column, truncating out-of-range
/// draws to the clamp boundary (never discarding).
pub fn distribution(
    args: &DistributionArgs,
    ty: LogicalType,
    n: usize,
    rng: &mut StdRng,
) -> Result<ColumnData, String> {
    let sampler = Sampler::new(&args.distribution)?;
    let [lo, hi] = args.clamp;
    if lo > hi {
        return Err(format!("clamp window [{}, {}] is inverted", lo, hi));
    }
    let values: Vec<Option<f64>> = (0..n)
        .map(|_| Some(sampler.sample(rng).clamp(lo, hi)))
        .collect();
    Ok(ColumnData::from_f64(values, ty))
}

/// Weighted sample from a fixed dictionary of typed values.
///
/// Cumulative-scan selection; weights arrive normalized from the resolved
/// weighting mode.
pub fn choice(
    values: &[Value],
    weights: &ResolvedWeights,
    ty: LogicalType,
    n: usize,
    rng: &mut StdRng,
) -> Result<ColumnData, String> {
    if values.is_empty() {
        return Err("choice dictionary is empty".to_string());
    }
    let normalized = weights.weights_for(values.len());
    let mut column = ColumnData::with_capacity(ty, n);
    for _ in 0..n {
        let roll: f64 = rng.random();
        let mut cumulative = 0.0;
        let mut chosen = values.len() - 1;
        for (i, w) in normalized.iter().enumerate() {
            cumulative += w;
            if roll < cumulative {
                chosen = i;
                break;
            }
        }
        column.push(values[chosen].clone());
    }
    Ok(column)
}

/// The literal values in order; sizes vocab nodes.
pub fn enum_list(values: &[serde_json::Value], ty: LogicalType) -> Result<ColumnData, String> {
    let mut column = ColumnData::with_capacity(ty, values.len());
    for (i, json) in values.iter().enumerate() {
        let value = Value::from_json(json, ty)
            .ok_or_else(|| format!("enum_list value #{} does not fit type {}", i, ty))?;
        column.push(value);
    }
    Ok(column)
}

/// Timestamps sampled over an interval, optionally biased by an
/// hour/dow/month pattern. Composite patterns are obtained by combining
/// with a `seasonality` modifier; the weights multiply on the rate scale.
pub fn datetime_series(
    args: &DatetimeSeriesArgs,
    timeframe: &Timeframe,
    ty: LogicalType,
    n: usize,
    rng: &mut StdRng,
) -> Result<ColumnData, String> {
    let (start, end) = resolve_within(&args.within, timeframe)?;
    let frequency = args.frequency.unwrap_or(timeframe.frequency);
    let timestamps = sample_timestamps(start, end, frequency, args.pattern.as_ref(), n, rng)?;
    Ok(timestamps_to_column(timestamps, ty))
}

pub fn resolve_within(
    within: &WithinSpec,
    timeframe: &Timeframe,
) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    match within {
        WithinSpec::Keyword(k) if k == "timeframe" => Ok((timeframe.start, timeframe.end)),
        WithinSpec::Keyword(k) => Err(format!("unknown interval keyword '{}'", k)),
        WithinSpec::Interval { start, end } => {
            if start >= end {
                return Err("interval start must precede end".to_string());
            }
            Ok((*start, *end))
        }
    }
}

/// Sample `n` timestamps in `[start, end)`.
pub fn sample_timestamps(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    frequency: Frequency,
    pattern: Option<&crate::spec::PatternSpec>,
    n: usize,
    rng: &mut StdRng,
) -> Result<Vec<DateTime<Utc>>, String> {
    if start >= end {
        return Err("empty sampling interval".to_string());
    }

    let Some(pattern) = pattern else {
        let total = (end - start).num_seconds().max(1);
        return Ok((0..n)
            .map(|_| start + Duration::seconds(rng.random_range(0..total)))
            .collect());
    };

    let periods = enumerate_periods(start, end, frequency);
    let weights: Vec<f64> = periods
        .iter()
        .map(|(p_start, _)| pattern_weight(pattern, *p_start))
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err("pattern weights sum to zero over the interval".to_string());
    }

    let mut cumulative = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for w in &weights {
        acc += w / total;
        cumulative.push(acc);
    }

    Ok((0..n)
        .map(|_| {
            let roll: f64 = rng.random();
            let idx = cumulative
                .partition_point(|c| *c < roll)
                .min(periods.len() - 1);
            let (p_start, p_end) = periods[idx];
            let span = (p_end - p_start).num_seconds().max(1);
            p_start + Duration::seconds(rng.random_range(0..span))
        })
        .collect())
}

fn pattern_weight(pattern: &crate::spec::PatternSpec, at: DateTime<Utc>) -> f64 {
    let idx = match pattern.dimension {
        PatternDimension::Hour => at.hour() as usize,
        PatternDimension::Dow => at.weekday().num_days_from_monday() as usize,
        PatternDimension::Month => at.month0() as usize,
    };
    pattern.weights.get(idx).copied().unwrap_or(0.0)
}

/// Enumerate `[period_start, period_end)` pairs covering the interval.
pub fn enumerate_periods(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    frequency: Frequency,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut periods = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = match frequency {
            Frequency::Hour => cursor + Duration::hours(1),
            Frequency::Day => cursor + Duration::days(1),
            Frequency::Month => cursor
                .checked_add_months(Months::new(1))
                .unwrap_or(cursor + Duration::days(31)),
        };
        periods.push((cursor, next.min(end)));
        cursor = next;
    }
    periods
}

pub fn timestamps_to_column(timestamps: Vec<DateTime<Utc>>, ty: LogicalType) -> ColumnData {
    match ty {
        LogicalType::Date => {
            ColumnData::Date(timestamps.into_iter().map(|ts| Some(ts.date_naive())).collect())
        }
        _ => ColumnData::DateTime(timestamps.into_iter().map(Some).collect()),
    }
}

/// Sample a fanout count, clamped to the declared window.
pub fn sample_fanout(fanout: &FanoutSpec, rng: &mut StdRng) -> Result<i64, String> {
    let raw = match fanout.distribution {
        FanoutDistribution::Poisson => {
            let lambda = fanout
                .lambda
                .ok_or_else(|| "poisson fanout requires lambda".to_string())?;
            if lambda == 0.0 {
                0.0
            } else {
                Poisson::new(lambda)
                    .map_err(|e| format!("invalid fanout poisson{{lambda={}}}: {}", lambda, e))?
                    .sample(rng)
            }
        }
        FanoutDistribution::Uniform => {
            let min = fanout
                .min
                .ok_or_else(|| "uniform fanout requires min".to_string())?;
            let max = fanout
                .max
                .ok_or_else(|| "uniform fanout requires max".to_string())?;
            if min > max {
                return Err(format!("uniform fanout min {} exceeds max {}", min, max));
            }
            rng.random_range(min..=max) as f64
        }
    };
    let [lo, hi] = fanout.clamp;
    Ok((raw.round() as i64).clamp(lo, hi))
}
