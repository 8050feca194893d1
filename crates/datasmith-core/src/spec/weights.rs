//! Choice weighting modes.
//!
//! A `choice` generator's `weights` field is either an explicit numeric
//! vector or a symbolic mode string: `"uniform"`, `"zipf@α"` (α>0), or
//! `"head_tail@{h,a}"` (0<h<1, a>0). Symbolic forms are parsed into
//! validated numeric parameters at preflight time; malformed strings are a
//! specification error, never a runtime fallback.

use serde::{Deserialize, Serialize};

/// Raw weights as they appear in the specification document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChoiceWeights {
    Named(String),
    Explicit(Vec<f64>),
}

impl Default for ChoiceWeights {
    fn default() -> Self {
        ChoiceWeights::Named("uniform".to_string())
    }
}

impl ChoiceWeights {
    /// Parse into a validated weighting mode.
    pub fn resolve(&self) -> Result<ResolvedWeights, String> {
        match self {
            ChoiceWeights::Explicit(w) => {
                if w.is_empty() {
                    return Err("explicit weights must not be empty".to_string());
                }
                if w.iter().any(|x| *x < 0.0 || !x.is_finite()) {
                    return Err("explicit weights must be finite and non-negative".to_string());
                }
                if w.iter().sum::<f64>() <= 0.0 {
                    return Err("explicit weights must not all be zero".to_string());
                }
                Ok(ResolvedWeights::Explicit(w.clone()))
            }
            ChoiceWeights::Named(s) => parse_named(s),
        }
    }
}

fn parse_named(s: &str) -> Result<ResolvedWeights, String> {
    if s == "uniform" {
        return Ok(ResolvedWeights::Uniform);
    }
    if let Some(alpha) = s.strip_prefix("zipf@") {
        let alpha: f64 = alpha
            .parse()
            .map_err(|_| format!("malformed zipf exponent in '{}'", s))?;
        if alpha <= 0.0 || !alpha.is_finite() {
            return Err(format!("zipf exponent must be > 0, got {}", alpha));
        }
        return Ok(ResolvedWeights::Zipf(alpha));
    }
    if let Some(body) = s.strip_prefix("head_tail@") {
        let body = body
            .strip_prefix('{')
            .and_then(|b| b.strip_suffix('}'))
            .ok_or_else(|| format!("expected head_tail@{{h,a}}, got '{}'", s))?;
        let mut parts = body.splitn(2, ',');
        let head: f64 = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| format!("malformed head fraction in '{}'", s))?;
        let amp: f64 = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| format!("malformed head amplitude in '{}'", s))?;
        if !(0.0..1.0).contains(&head) || head == 0.0 {
            return Err(format!("head fraction must satisfy 0 < h < 1, got {}", head));
        }
        if amp <= 0.0 || !amp.is_finite() {
            return Err(format!("head amplitude must be > 0, got {}", amp));
        }
        return Ok(ResolvedWeights::HeadTail { head, amp });
    }
    Err(format!(
        "unknown weighting mode '{}' (expected 'uniform', weights array, 'zipf@a', or 'head_tail@{{h,a}}')",
        s
    ))
}

/// A validated weighting mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedWeights {
    Uniform,
    Explicit(Vec<f64>),
    /// Weight of rank k (1-based) ∝ 1/k^α.
    Zipf(f64),
    /// The first ⌈h·n⌉ ranks carry weight `amp` each, the rest weight 1.
    HeadTail { head: f64, amp: f64 },
}

impl ResolvedWeights {
    /// Normalized per-rank weights for `n` choices.
    ///
    /// Explicit vectors shorter than `n` pad with zero; longer ones are
    /// truncated (preflight rejects length mismatches up front, so this
    /// only matters for `choices_ref` dictionaries resolved at run time).
    pub fn weights_for(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let raw: Vec<f64> = match self {
            ResolvedWeights::Uniform => vec![1.0; n],
            ResolvedWeights::Explicit(w) => {
                let mut w = w.clone();
                w.resize(n, 0.0);
                w
            }
            ResolvedWeights::Zipf(alpha) => {
                (1..=n).map(|k| 1.0 / (k as f64).powf(*alpha)).collect()
            }
            ResolvedWeights::HeadTail { head, amp } => {
                let head_len = ((head * n as f64).ceil() as usize).clamp(1, n);
                (0..n)
                    .map(|i| if i < head_len { *amp } else { 1.0 })
                    .collect()
            }
        };
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / n as f64; n];
        }
        raw.into_iter().map(|w| w / total).collect()
    }
}
