//! # State Transition Chains
//!
//! A Markov chain per parent: one row per state occupation, starting in the
//! initial state at the parent's reference timestamp. Each period a
//! transition fires with the configured probability; the next state is
//! drawn from the current state's `next` distribution with terminal-state
//! probabilities scaled by the segment's churn multiplier. Unconsumed
//! probability mass keeps the chain in place, so effective terminal rates
//! scale linearly with the multiplier. Terminal states end the chain.

use chrono::{DateTime, Duration, Months, Utc};
use rand::Rng;

use crate::seed::rng_for;
use crate::spec::{AgeUnit, CurveSpec, StateTransitionModel};

/// One emitted state-occupation row.
#[derive(Debug, Clone)]
pub struct StateRow {
    pub parent_index: usize,
    pub state: String,
    pub at: DateTime<Utc>,
}

/// Parent age measured in fractional units.
pub fn age_in_units(from: DateTime<Utc>, to: DateTime<Utc>, unit: AgeUnit) -> f64 {
    let days = (to - from).num_seconds() as f64 / 86_400.0;
    match unit {
        AgeUnit::Day => days,
        AgeUnit::Week => days / 7.0,
        AgeUnit::Month => days / 30.44,
    }
}

fn step(at: DateTime<Utc>, unit: AgeUnit) -> DateTime<Utc> {
    match unit {
        AgeUnit::Day => at + Duration::days(1),
        AgeUnit::Week => at + Duration::weeks(1),
        AgeUnit::Month => at
            .checked_add_months(Months::new(1))
            .unwrap_or(at + Duration::days(31)),
    }
}

/// Run the chain for every parent.
///
/// `vintage` optionally scales the per-period transition probability by the
/// parent's activity-decay curve evaluated at its age in the curve's unit.
pub fn run_chains(
    model: &StateTransitionModel,
    parent_keys: &[String],
    reference_times: &[DateTime<Utc>],
    segments: Option<&[Option<String>]>,
    vintage: Option<(&CurveSpec, AgeUnit)>,
    timeframe_end: DateTime<Utc>,
    master: u64,
    node: &str,
) -> Result<Vec<StateRow>, String> {
    if !model.states.contains_key(&model.initial_state) {
        return Err(format!(
            "initial state '{}' is not declared",
            model.initial_state
        ));
    }

    let mut rows = Vec::new();
    for (parent_index, key) in parent_keys.iter().enumerate() {
        let mut rng = rng_for(master, &[node, "states", key]);
        let churn_multiplier = segments
            .and_then(|s| s.get(parent_index).and_then(|seg| seg.as_deref()))
            .and_then(|seg| model.segment_multipliers.get(seg))
            .map(|m| m.churn_multiplier)
            .unwrap_or(1.0);

        let born = reference_times[parent_index];
        let mut current = model.initial_state.clone();
        let mut at = born;
        rows.push(StateRow {
            parent_index,
            state: current.clone(),
            at,
        });

        if model.states[&current].terminal {
            continue;
        }

        loop {
            let next_at = step(at, model.period);
            if next_at >= timeframe_end {
                break;
            }
            at = next_at;

            let mut probability = model.transition_prob_per_period;
            if let Some((curve, unit)) = vintage {
                probability *= curve.value_at(age_in_units(born, at, unit));
            }
            if rng.random::<f64>() >= probability {
                continue;
            }

            let spec = model
                .states
                .get(&current)
                .ok_or_else(|| format!("state '{}' is not declared", current))?;
            let roll: f64 = rng.random();
            let mut cumulative = 0.0;
            let mut chosen: Option<&str> = None;
            for (name, p) in &spec.next {
                let terminal = model.states.get(name).map(|s| s.terminal).unwrap_or(false);
                cumulative += if terminal { p * churn_multiplier } else { *p };
                if roll < cumulative {
                    chosen = Some(name);
                    break;
                }
            }
            // Unconsumed mass: the chain stays in its current state.
            let Some(next_state) = chosen else { continue };

            current = next_state.to_string();
            rows.push(StateRow {
                parent_index,
                state: current.clone(),
                at,
            });
            if model.states[&current].terminal {
                break;
            }
        }
    }
    Ok(rows)
}
