//! # Stage Progression
//!
//! Fact rows as sequential per-parent milestones. Every parent reaches the
//! first stage; each later stage is reached with its declared transition
//! rate (optionally scaled per segment). Timestamps accumulate positive
//! exponential deltas from the parent's reference timestamp, so each
//! parent's stage times are strictly increasing.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::seed::rng_for;
use crate::spec::StageConfig;

/// One emitted milestone row.
#[derive(Debug, Clone)]
pub struct StageRow {
    pub parent_index: usize,
    pub stage: String,
    pub at: DateTime<Utc>,
}

/// Walk every parent through the stage ladder.
///
/// `parent_keys` feed seed derivation so row output is independent of
/// scheduling; `segments` supplies each parent's segment label when the
/// config declares segment variation.
pub fn progress_stages(
    config: &StageConfig,
    parent_keys: &[String],
    reference_times: &[DateTime<Utc>],
    segments: Option<&[Option<String>]>,
    timeframe_end: DateTime<Utc>,
    master: u64,
    node: &str,
) -> Result<Vec<StageRow>, String> {
    if config.stages.is_empty() {
        return Err("stage_config.stages must not be empty".to_string());
    }
    let mean_hours = config.time_between_stages_hours;
    if mean_hours <= 0.0 {
        return Err(format!(
            "time_between_stages_hours must be positive, got {}",
            mean_hours
        ));
    }
    let delta_dist = Exp::new(1.0 / mean_hours)
        .map_err(|e| format!("invalid stage delta distribution: {}", e))?;

    let mut rows = Vec::new();
    for (parent_index, key) in parent_keys.iter().enumerate() {
        let mut rng = rng_for(master, &[node, "stages", key]);
        let segment_multiplier = segments
            .and_then(|s| s.get(parent_index).and_then(|seg| seg.as_deref()))
            .and_then(|seg| config.segment_variation.get(seg))
            .map(|v| v.transition_multiplier)
            .unwrap_or(1.0);

        let mut at = reference_times[parent_index];
        for (stage_index, stage) in config.stages.iter().enumerate() {
            if stage_index > 0 {
                let rate = stage.transition_rate.unwrap_or(1.0) * segment_multiplier;
                if rng.random::<f64>() >= rate {
                    break;
                }
            }
            let delta_hours = delta_dist.sample(&mut rng);
            // At least one second so per-parent times are strictly increasing.
            let delta_seconds = ((delta_hours * 3600.0).round() as i64).max(1);
            at += Duration::seconds(delta_seconds);
            if at > timeframe_end {
                break;
            }
            rows.push(StageRow {
                parent_index,
                stage: stage.name.clone(),
                at,
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{StageSpec, StageSegmentVariation};
    use indexmap::IndexMap;

    fn config(rates: &[Option<f64>]) -> StageConfig {
        StageConfig {
            stage_column: "stage".into(),
            stages: rates
                .iter()
                .enumerate()
                .map(|(i, rate)| StageSpec {
                    name: format!("s{}", i),
                    transition_rate: *rate,
                })
                .collect(),
            time_between_stages_hours: 24.0,
            segment_column: None,
            segment_variation: IndexMap::new(),
        }
    }

    fn run(config: &StageConfig, parents: usize) -> Vec<StageRow> {
        let keys: Vec<String> = (0..parents).map(|i| i.to_string()).collect();
        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let refs = vec![start; parents];
        let end: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        progress_stages(config, &keys, &refs, None, end, 42, "funnel").unwrap()
    }

    #[test]
    fn test_every_parent_reaches_first_stage() {
        let rows = run(&config(&[None, Some(0.5)]), 200);
        let first_stage = rows.iter().filter(|r| r.stage == "s0").count();
        assert_eq!(first_stage, 200);
    }

    #[test]
    fn test_reached_stages_form_a_prefix() {
        let rows = run(&config(&[None, Some(0.6), Some(0.3)]), 100);
        for parent in 0..100 {
            let stages: Vec<&str> = rows
                .iter()
                .filter(|r| r.parent_index == parent)
                .map(|r| r.stage.as_str())
                .collect();
            let expected: Vec<&str> = ["s0", "s1", "s2"][..stages.len()].to_vec();
            assert_eq!(stages, expected, "parent {} skipped a stage", parent);
        }
    }

    #[test]
    fn test_timestamps_strictly_increase_per_parent() {
        let rows = run(&config(&[None, Some(0.9), Some(0.9)]), 100);
        for parent in 0..100 {
            let times: Vec<DateTime<Utc>> = rows
                .iter()
                .filter(|r| r.parent_index == parent)
                .map(|r| r.at)
                .collect();
            for pair in times.windows(2) {
                assert!(pair[1] > pair[0]);
            }
        }
    }

    #[test]
    fn test_transition_rate_thins_later_stages() {
        let rows = run(&config(&[None, Some(0.5)]), 1000);
        let second = rows.iter().filter(|r| r.stage == "s1").count();
        assert!(
            (350..=650).contains(&second),
            "rate 0.5 over 1000 parents produced {}",
            second
        );
    }

    #[test]
    fn test_segment_multiplier_raises_transition_rate() {
        let mut cfg = config(&[None, Some(0.4)]);
        cfg.segment_variation.insert(
            "vip".to_string(),
            StageSegmentVariation {
                transition_multiplier: 2.0,
            },
        );
        let keys: Vec<String> = (0..1000).map(|i| i.to_string()).collect();
        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let refs = vec![start; 1000];
        let end: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let segments: Vec<Option<String>> = (0..1000)
            .map(|i| Some(if i % 2 == 0 { "vip" } else { "std" }.to_string()))
            .collect();
        let rows =
            progress_stages(&cfg, &keys, &refs, Some(&segments), end, 7, "funnel").unwrap();

        let vip_second = rows
            .iter()
            .filter(|r| r.stage == "s1" && r.parent_index % 2 == 0)
            .count() as f64
            / 500.0;
        let std_second = rows
            .iter()
            .filter(|r| r.stage == "s1" && r.parent_index % 2 == 1)
            .count() as f64
            / 500.0;
        assert!(
            vip_second > std_second * 1.5,
            "vip rate {} should be well above standard {}",
            vip_second,
            std_second
        );
    }

    #[test]
    fn test_deterministic_across_runs() {
        let cfg = config(&[None, Some(0.7)]);
        let a = run(&cfg, 50);
        let b = run(&cfg, 50);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!((x.parent_index, &x.stage, x.at), (y.parent_index, &y.stage, y.at));
        }
    }
}
