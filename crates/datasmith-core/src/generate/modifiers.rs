//! # Column Modifiers
//!
//! Modifiers fold over a freshly generated column in declaration order,
//! before the final range clamp and cast. Each transforms the column in
//! place; numeric modifiers work through an f64 view so integer and float
//! columns share one path.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::Rng;

use crate::generate::column::{ColumnData, Table};
use crate::generate::effects::EffectJoin;
use crate::generate::primitives::Sampler;
use crate::spec::{
    EffectSpec, JitterMode, ModifierSpec, OutlierDirection, PatternDimension, Timeframe,
    TrendArgs, TrendCurve,
};

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

/// Apply one modifier to a column.
///
/// `siblings` are the node's previously produced columns (for seasonality,
/// trend, and effect time/key columns); `completed` is the read-only
/// registry of finished tables (for effect joins).
pub fn apply(
    modifier: &ModifierSpec,
    column: &mut ColumnData,
    siblings: &IndexMap<String, ColumnData>,
    completed: &IndexMap<String, Table>,
    timeframe: &Timeframe,
    rng: &mut StdRng,
) -> Result<(), String> {
    match modifier {
        ModifierSpec::Multiply(args) => map_numeric(column, |v| v * args.factor),
        ModifierSpec::Add(args) => map_numeric(column, |v| v + args.offset),
        ModifierSpec::Clamp(args) => {
            if args.min > args.max {
                return Err(format!("clamp [{}, {}] is inverted", args.min, args.max));
            }
            map_numeric(column, |v| v.clamp(args.min, args.max))
        }
        ModifierSpec::Jitter(args) => {
            let sampler = Sampler::new(&args.distribution)?;
            let ty = column.logical_type();
            let mut values = column
                .numeric_f64()
                .ok_or_else(|| "jitter requires a numeric column".to_string())?;
            for slot in values.iter_mut() {
                let noise = sampler.sample(rng);
                if let Some(v) = slot.as_mut() {
                    *v = match args.mode {
                        JitterMode::Add => *v + noise,
                        JitterMode::Mul => *v * noise,
                    };
                }
            }
            *column = ColumnData::from_f64(values, ty);
            Ok(())
        }
        ModifierSpec::TimeJitter(args) => {
            let sampler = Sampler::new(&crate::spec::DistributionSpec::Normal(
                crate::spec::NormalDist {
                    mean: 0.0,
                    std: args.std_seconds,
                },
            ))?;
            match column {
                ColumnData::DateTime(values) => {
                    for slot in values.iter_mut() {
                        let shift = sampler.sample(rng);
                        if let Some(ts) = slot.as_mut() {
                            *ts += Duration::seconds(shift.round() as i64);
                        }
                    }
                    Ok(())
                }
                _ => Err("time_jitter requires a datetime column".to_string()),
            }
        }
        ModifierSpec::MapValues(args) => match column {
            ColumnData::Text(values) => {
                for slot in values.iter_mut() {
                    if let Some(s) = slot {
                        if let Some(mapped) = args.mapping.get(s.as_str()) {
                            *slot = Some(mapped.clone());
                        }
                    }
                }
                Ok(())
            }
            _ => Err("map_values requires a string column".to_string()),
        },
        ModifierSpec::Seasonality(args) => {
            let expected = args.dimension.expected_len();
            if args.weights.len() != expected {
                return Err(format!(
                    "seasonality over {:?} needs {} weights, got {}",
                    args.dimension,
                    expected,
                    args.weights.len()
                ));
            }
            // On a datetime column, seasonality reweights the timestamp's
            // own hour/dow/month component: this composes with the
            // generator's pattern into a product on the rate scale.
            if matches!(column, ColumnData::DateTime(_)) {
                return reweight_timestamps(args, column, timeframe, rng);
            }
            let time_column = args.time_column.as_deref().ok_or_else(|| {
                "seasonality on a numeric column requires 'time_column'".to_string()
            })?;
            let timestamps = siblings
                .get(time_column)
                .and_then(|c| c.timestamps())
                .ok_or_else(|| {
                    format!(
                        "seasonality time column '{}' is not an earlier datetime column",
                        time_column
                    )
                })?;
            // Normalize to mean 1 so seasonality reshapes without rescaling.
            let mean: f64 = args.weights.iter().sum::<f64>() / expected as f64;
            if mean <= 0.0 {
                return Err("seasonality weights must have positive mean".to_string());
            }
            let ty = column.logical_type();
            let mut values = column
                .numeric_f64()
                .ok_or_else(|| "seasonality requires a numeric or datetime column".to_string())?;
            for (slot, ts) in values.iter_mut().zip(timestamps.iter()) {
                if let (Some(v), Some(ts)) = (slot.as_mut(), ts) {
                    let idx = match args.dimension {
                        PatternDimension::Hour => ts.hour() as usize,
                        PatternDimension::Dow => ts.weekday().num_days_from_monday() as usize,
                        PatternDimension::Month => ts.month0() as usize,
                    };
                    *v *= args.weights[idx] / mean;
                }
            }
            *column = ColumnData::from_f64(values, ty);
            Ok(())
        }
        ModifierSpec::Outliers(args) => {
            if !(0.0..=1.0).contains(&args.rate) {
                return Err(format!("outlier rate {} must be in [0, 1]", args.rate));
            }
            let sampler = Sampler::new(&args.magnitude)?;
            let ty = column.logical_type();
            let mut values = column
                .numeric_f64()
                .ok_or_else(|| "outliers requires a numeric column".to_string())?;
            for slot in values.iter_mut() {
                let fired = rng.random::<f64>() < args.rate;
                if !fired {
                    continue;
                }
                let magnitude = sampler.sample(rng).abs().max(f64::EPSILON);
                let spike = match args.direction {
                    OutlierDirection::Spike => true,
                    OutlierDirection::Drop => false,
                    OutlierDirection::Both => rng.random::<f64>() < 0.5,
                };
                if let Some(v) = slot.as_mut() {
                    *v = if spike { *v * magnitude } else { *v / magnitude };
                }
            }
            *column = ColumnData::from_f64(values, ty);
            Ok(())
        }
        ModifierSpec::Effect(spec) => apply_effect(spec, column, siblings, completed),
        ModifierSpec::Trend(args) => apply_trend(args, column, siblings, timeframe),
    }
}

/// Redraw the hour/dow/month component of each timestamp in proportion to
/// the declared weights. Results that would leave the timeframe keep their
/// original value.
fn reweight_timestamps(
    args: &crate::spec::SeasonalityArgs,
    column: &mut ColumnData,
    timeframe: &Timeframe,
    rng: &mut StdRng,
) -> Result<(), String> {
    let total: f64 = args.weights.iter().sum();
    if total <= 0.0 {
        return Err("seasonality weights must not all be zero".to_string());
    }
    let mut cumulative = Vec::with_capacity(args.weights.len());
    let mut acc = 0.0;
    for w in &args.weights {
        if *w < 0.0 || !w.is_finite() {
            return Err("seasonality weights must be finite and non-negative".to_string());
        }
        acc += w / total;
        cumulative.push(acc);
    }

    let ColumnData::DateTime(values) = column else {
        return Err("timestamp seasonality requires a datetime column".to_string());
    };
    for slot in values.iter_mut() {
        let roll: f64 = rng.random();
        let idx = cumulative
            .partition_point(|c| *c < roll)
            .min(args.weights.len() - 1);
        let offset_seconds: i64 = rng.random_range(0..3600);
        let Some(ts) = slot.as_mut() else { continue };

        let shifted = match args.dimension {
            PatternDimension::Hour => ts
                .date_naive()
                .and_hms_opt(idx as u32, 0, 0)
                .map(|t| t.and_utc() + Duration::seconds(offset_seconds)),
            PatternDimension::Dow => {
                let back = ts.weekday().num_days_from_monday() as i64;
                let date = ts.date_naive() - Duration::days(back) + Duration::days(idx as i64);
                Some(date.and_time(ts.time()).and_utc())
            }
            PatternDimension::Month => ts
                .with_month0(idx as u32)
                .or_else(|| ts.with_day(28).and_then(|t| t.with_month0(idx as u32))),
        };
        if let Some(shifted) = shifted {
            if shifted >= timeframe.start && shifted < timeframe.end {
                *ts = shifted;
            }
        }
    }
    Ok(())
}

fn map_numeric(column: &mut ColumnData, f: impl Fn(f64) -> f64) -> Result<(), String> {
    let ty = column.logical_type();
    let values = column
        .numeric_f64()
        .ok_or_else(|| format!("modifier requires a numeric column, got {}", ty))?;
    let mapped: Vec<Option<f64>> = values.into_iter().map(|v| v.map(&f)).collect();
    *column = ColumnData::from_f64(mapped, ty);
    Ok(())
}

fn apply_effect(
    spec: &EffectSpec,
    column: &mut ColumnData,
    siblings: &IndexMap<String, ColumnData>,
    completed: &IndexMap<String, Table>,
) -> Result<(), String> {
    let effect_table = completed
        .get(&spec.table)
        .ok_or_else(|| format!("effect table '{}' has not been materialized", spec.table))?;
    let join = EffectJoin::build(spec, effect_table)?;

    let key_columns: Vec<&ColumnData> = spec
        .keys
        .keys()
        .map(|local| {
            siblings
                .get(local)
                .ok_or_else(|| format!("effect key column '{}' is not an earlier column", local))
        })
        .collect::<Result<_, _>>()?;

    let timestamps = match &spec.time_column {
        Some(name) => Some(siblings.get(name).and_then(|c| c.timestamps()).ok_or_else(
            || format!("effect time column '{}' is not an earlier datetime column", name),
        )?),
        None => None,
    };

    let ty = column.logical_type();
    let mut values = column
        .numeric_f64()
        .ok_or_else(|| "effect requires a numeric column".to_string())?;
    for (row, slot) in values.iter_mut().enumerate() {
        let Some(v) = slot.as_mut() else { continue };
        let key: Vec<String> = key_columns.iter().map(|c| c.value_at(row).to_key()).collect();
        let at = timestamps.as_ref().and_then(|ts| ts[row]);
        let effect = join.lookup(&key, at).unwrap_or(spec.op.neutral());
        *v = match spec.op {
            crate::spec::EffectOp::Mul => *v * effect,
            crate::spec::EffectOp::Add => *v + effect,
        };
    }
    *column = ColumnData::from_f64(values, ty);
    Ok(())
}

fn apply_trend(
    args: &TrendArgs,
    column: &mut ColumnData,
    siblings: &IndexMap<String, ColumnData>,
    timeframe: &Timeframe,
) -> Result<(), String> {
    let timestamps = siblings
        .get(&args.time_column)
        .and_then(|c| c.timestamps())
        .ok_or_else(|| {
            format!(
                "trend time column '{}' is not an earlier datetime column",
                args.time_column
            )
        })?;

    let ty = column.logical_type();
    let mut values = column
        .numeric_f64()
        .ok_or_else(|| "trend requires a numeric column".to_string())?;
    for (slot, ts) in values.iter_mut().zip(timestamps.iter()) {
        let (Some(v), Some(ts)) = (slot.as_mut(), ts) else {
            continue;
        };
        let factor = trend_factor(args, *ts, timeframe.start)?;
        *v *= factor;
    }
    *column = ColumnData::from_f64(values, ty);
    Ok(())
}

/// Growth factor at a timestamp; `t` is measured in years since the
/// timeframe start, negative rates denote decay.
pub fn trend_factor(
    args: &TrendArgs,
    at: DateTime<Utc>,
    baseline: DateTime<Utc>,
) -> Result<f64, String> {
    let t = ((at - baseline).num_seconds() as f64 / SECONDS_PER_YEAR).max(0.0);
    match args.curve {
        TrendCurve::Exponential => {
            let rate = args.rate.ok_or("exponential trend requires 'rate'")?;
            Ok((1.0 + rate).powf(t))
        }
        TrendCurve::Linear => {
            let rate = args.rate.ok_or("linear trend requires 'rate'")?;
            Ok(1.0 + rate * t)
        }
        TrendCurve::Logarithmic => {
            let a = args.a.ok_or("logarithmic trend requires 'a'")?;
            let b = args.b.ok_or("logarithmic trend requires 'b'")?;
            Ok(a + b * (1.0 + t).ln())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::rng_for;
    use crate::spec::{
        AddArgs, ClampArgs, Frequency, MapValuesArgs, MultiplyArgs, NormalDist, OutliersArgs,
        SeasonalityArgs, TimeJitterArgs,
    };

    fn timeframe() -> Timeframe {
        Timeframe {
            start: "2024-01-01T00:00:00Z".parse().unwrap(),
            end: "2026-01-01T00:00:00Z".parse().unwrap(),
            frequency: Frequency::Day,
        }
    }

    fn apply_one(
        modifier: &ModifierSpec,
        column: &mut ColumnData,
        siblings: &IndexMap<String, ColumnData>,
    ) -> Result<(), String> {
        let completed = IndexMap::new();
        let mut rng = rng_for(1, &["mod"]);
        apply(modifier, column, siblings, &completed, &timeframe(), &mut rng)
    }

    #[test]
    fn test_multiply_add_clamp_chain() {
        let mut col = ColumnData::Float(vec![Some(10.0), None, Some(50.0)]);
        let siblings = IndexMap::new();
        apply_one(
            &ModifierSpec::Multiply(MultiplyArgs { factor: 2.0 }),
            &mut col,
            &siblings,
        )
        .unwrap();
        apply_one(&ModifierSpec::Add(AddArgs { offset: 5.0 }), &mut col, &siblings).unwrap();
        apply_one(
            &ModifierSpec::Clamp(ClampArgs {
                min: 0.0,
                max: 60.0,
            }),
            &mut col,
            &siblings,
        )
        .unwrap();
        assert_eq!(col, ColumnData::Float(vec![Some(25.0), None, Some(60.0)]));
    }

    #[test]
    fn test_multiply_preserves_integer_type() {
        let mut col = ColumnData::Integer(vec![Some(3)]);
        apply_one(
            &ModifierSpec::Multiply(MultiplyArgs { factor: 2.5 }),
            &mut col,
            &IndexMap::new(),
        )
        .unwrap();
        assert_eq!(col, ColumnData::Integer(vec![Some(8)]));
    }

    #[test]
    fn test_numeric_modifier_rejects_text() {
        let mut col = ColumnData::Text(vec![Some("x".into())]);
        let err = apply_one(
            &ModifierSpec::Multiply(MultiplyArgs { factor: 2.0 }),
            &mut col,
            &IndexMap::new(),
        )
        .unwrap_err();
        assert!(err.contains("numeric"));
    }

    #[test]
    fn test_map_values_remaps_known_keys_only() {
        let mut col = ColumnData::Text(vec![Some("a".into()), Some("b".into()), None]);
        let mut mapping = IndexMap::new();
        mapping.insert("a".to_string(), "alpha".to_string());
        apply_one(
            &ModifierSpec::MapValues(MapValuesArgs { mapping }),
            &mut col,
            &IndexMap::new(),
        )
        .unwrap();
        assert_eq!(
            col,
            ColumnData::Text(vec![Some("alpha".into()), Some("b".into()), None])
        );
    }

    #[test]
    fn test_seasonality_scales_by_hour_weight() {
        // Two rows: one at hour 0 (weight 0), one at hour 12 (weight 2);
        // mean weight over the day is (0*23 + 2 + ...) — use a flat profile
        // with a single spike so the normalization is easy to reason about.
        let mut weights = vec![1.0; 24];
        weights[12] = 25.0; // mean = (23 + 25)/24 = 2.0
        let siblings: IndexMap<String, ColumnData> = [(
            "ts".to_string(),
            ColumnData::DateTime(vec![
                Some("2024-01-01T00:30:00Z".parse().unwrap()),
                Some("2024-01-01T12:30:00Z".parse().unwrap()),
            ]),
        )]
        .into_iter()
        .collect();
        let mut col = ColumnData::Float(vec![Some(10.0), Some(10.0)]);
        apply_one(
            &ModifierSpec::Seasonality(SeasonalityArgs {
                dimension: PatternDimension::Hour,
                weights,
                time_column: Some("ts".into()),
            }),
            &mut col,
            &siblings,
        )
        .unwrap();
        // hour 0: 10 * 1/2 = 5; hour 12: 10 * 25/2 = 125
        assert_eq!(col, ColumnData::Float(vec![Some(5.0), Some(125.0)]));
    }

    #[test]
    fn test_seasonality_wrong_weight_count_rejected() {
        let siblings: IndexMap<String, ColumnData> = [(
            "ts".to_string(),
            ColumnData::DateTime(vec![Some("2024-01-01T00:00:00Z".parse().unwrap())]),
        )]
        .into_iter()
        .collect();
        let mut col = ColumnData::Float(vec![Some(1.0)]);
        let err = apply_one(
            &ModifierSpec::Seasonality(SeasonalityArgs {
                dimension: PatternDimension::Dow,
                weights: vec![1.0; 24],
                time_column: Some("ts".into()),
            }),
            &mut col,
            &siblings,
        )
        .unwrap_err();
        assert!(err.contains("7 weights"));
    }

    #[test]
    fn test_seasonality_reweights_datetime_hours() {
        let mut weights = vec![0.0; 24];
        weights[9] = 3.0;
        weights[21] = 1.0;
        let start: DateTime<Utc> = "2024-01-01T12:00:00Z".parse().unwrap();
        let mut col = ColumnData::DateTime(
            (0..400).map(|i| Some(start + Duration::days(i % 300))).collect(),
        );
        apply_one(
            &ModifierSpec::Seasonality(SeasonalityArgs {
                dimension: PatternDimension::Hour,
                weights,
                time_column: None,
            }),
            &mut col,
            &IndexMap::new(),
        )
        .unwrap();
        if let ColumnData::DateTime(values) = &col {
            let nine = values.iter().flatten().filter(|ts| ts.hour() == 9).count();
            let nine_pm = values.iter().flatten().filter(|ts| ts.hour() == 21).count();
            assert_eq!(nine + nine_pm, 400, "every row lands on a weighted hour");
            let ratio = nine as f64 / nine_pm.max(1) as f64;
            assert!((1.8..=4.5).contains(&ratio), "3:1 weighting gave {}", ratio);
        }
    }

    #[test]
    fn test_time_jitter_moves_timestamps() {
        let base: DateTime<Utc> = "2024-06-01T12:00:00Z".parse().unwrap();
        let mut col = ColumnData::DateTime(vec![Some(base); 50]);
        apply_one(
            &ModifierSpec::TimeJitter(TimeJitterArgs { std_seconds: 300.0 }),
            &mut col,
            &IndexMap::new(),
        )
        .unwrap();
        if let ColumnData::DateTime(values) = &col {
            assert!(values.iter().flatten().any(|ts| *ts != base));
            for ts in values.iter().flatten() {
                let drift = (*ts - base).num_seconds().abs();
                assert!(drift < 3600, "5-minute jitter drifted {}s", drift);
            }
        }
    }

    #[test]
    fn test_outliers_rate_zero_is_identity() {
        let mut col = ColumnData::Float(vec![Some(1.0); 20]);
        apply_one(
            &ModifierSpec::Outliers(OutliersArgs {
                rate: 0.0,
                magnitude: crate::spec::DistributionSpec::Normal(NormalDist {
                    mean: 10.0,
                    std: 1.0,
                }),
                direction: OutlierDirection::Spike,
            }),
            &mut col,
            &IndexMap::new(),
        )
        .unwrap();
        assert_eq!(col, ColumnData::Float(vec![Some(1.0); 20]));
    }

    #[test]
    fn test_trend_exponential_growth() {
        let args = TrendArgs {
            curve: TrendCurve::Exponential,
            rate: Some(0.08),
            a: None,
            b: None,
            time_column: "ts".into(),
        };
        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let one_year = start + Duration::days(366);
        let f0 = trend_factor(&args, start, start).unwrap();
        let f1 = trend_factor(&args, one_year, start).unwrap();
        assert!((f0 - 1.0).abs() < 1e-9);
        assert!((f1 - 1.08).abs() < 0.01, "one-year factor {}", f1);
    }

    #[test]
    fn test_trend_negative_rate_decays() {
        let args = TrendArgs {
            curve: TrendCurve::Linear,
            rate: Some(-0.5),
            a: None,
            b: None,
            time_column: "ts".into(),
        };
        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let later = start + Duration::days(365);
        assert!(trend_factor(&args, later, start).unwrap() < 1.0);
    }
}
