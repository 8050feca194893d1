//! # Post-generation Validation
//!
//! Re-checks an emitted dataset against the specification: structural
//! integrity (keys, references, shape), value constraints (ranges,
//! inequalities, enums, patterns), and behavioral targets (weekend share,
//! means, composite effects). Findings never block generation; they feed
//! the report and the quality score.

pub mod behavioral;
pub mod structural;
pub mod value;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::generate::Dataset;
use crate::spec::{Specification, Tolerance};

/// How many offending samples a check records.
pub const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFamily {
    Structural,
    Value,
    Behavioral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// One executed check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub family: CheckFamily,
    pub status: CheckStatus,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<String>,
}

impl CheckResult {
    pub fn pass(
        name: impl Into<String>,
        family: CheckFamily,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            status: CheckStatus::Pass,
            table: table.into(),
            column: None,
            message: message.into(),
            samples: Vec::new(),
        }
    }

    pub fn fail(
        name: impl Into<String>,
        family: CheckFamily,
        table: impl Into<String>,
        message: impl Into<String>,
        samples: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            status: CheckStatus::Fail,
            table: table.into(),
            column: None,
            message: message.into(),
            samples,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub quality_score: f64,
}

/// The full validation report, serialized as the JSON contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub summary: Summary,
    pub checks: Vec<CheckResult>,
    pub row_counts: IndexMap<String, usize>,
}

impl ValidationReport {
    pub fn structural_ok(&self) -> bool {
        self.checks
            .iter()
            .filter(|c| c.family == CheckFamily::Structural)
            .all(|c| c.is_pass())
    }

    /// Exit-status rule: all structural checks pass and the quality score
    /// meets the threshold.
    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.structural_ok() && self.summary.quality_score >= threshold
    }
}

/// Family weights for the quality score.
#[derive(Debug, Clone, Copy)]
pub struct FamilyWeights {
    pub structural: f64,
    pub value: f64,
    pub behavioral: f64,
}

impl Default for FamilyWeights {
    fn default() -> Self {
        Self {
            structural: 0.50,
            value: 0.30,
            behavioral: 0.20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub weights: FamilyWeights,
    /// Fallback composite-effect tolerance when a target declares none.
    pub default_tolerance: Tolerance,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            weights: FamilyWeights::default(),
            default_tolerance: Tolerance {
                mae: 0.10,
                mape: 0.15,
            },
        }
    }
}

/// Validate with default options.
pub fn validate(spec: &Specification, dataset: &Dataset) -> ValidationReport {
    validate_with(spec, dataset, &ValidationOptions::default())
}

/// Run all three check families and score the result.
pub fn validate_with(
    spec: &Specification,
    dataset: &Dataset,
    options: &ValidationOptions,
) -> ValidationReport {
    let mut checks = Vec::new();
    checks.extend(structural::run(spec, dataset));
    checks.extend(value::run(spec, dataset));
    checks.extend(behavioral::run(spec, dataset, options));

    let row_counts: IndexMap<String, usize> = dataset
        .tables
        .iter()
        .map(|(name, table)| (name.clone(), table.row_count()))
        .collect();

    let passed = checks.iter().filter(|c| c.is_pass()).count();
    let failed = checks.len() - passed;
    let quality_score = quality_score(&checks, &options.weights);

    ValidationReport {
        summary: Summary {
            total_checks: checks.len(),
            passed,
            failed,
            quality_score,
        },
        checks,
        row_counts,
    }
}

/// Weighted sum of per-family pass rates, renormalized over the families
/// that actually ran checks, scaled to 0–100.
fn quality_score(checks: &[CheckResult], weights: &FamilyWeights) -> f64 {
    let mut weighted = 0.0;
    let mut weight_total = 0.0;
    for (family, weight) in [
        (CheckFamily::Structural, weights.structural),
        (CheckFamily::Value, weights.value),
        (CheckFamily::Behavioral, weights.behavioral),
    ] {
        let family_checks: Vec<&CheckResult> =
            checks.iter().filter(|c| c.family == family).collect();
        if family_checks.is_empty() {
            continue;
        }
        let pass_rate = family_checks.iter().filter(|c| c.is_pass()).count() as f64
            / family_checks.len() as f64;
        weighted += weight * pass_rate;
        weight_total += weight;
    }
    if weight_total == 0.0 {
        return 100.0;
    }
    100.0 * weighted / weight_total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(family: CheckFamily, pass: bool) -> CheckResult {
        if pass {
            CheckResult::pass("c", family, "t", "ok")
        } else {
            CheckResult::fail("c", family, "t", "bad", vec![])
        }
    }

    #[test]
    fn test_quality_score_all_pass() {
        let checks = vec![
            check(CheckFamily::Structural, true),
            check(CheckFamily::Value, true),
            check(CheckFamily::Behavioral, true),
        ];
        assert!((quality_score(&checks, &FamilyWeights::default()) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_score_weights_families() {
        // Structural all fail, value+behavioral all pass:
        // (0.3 + 0.2) / 1.0 = 50
        let checks = vec![
            check(CheckFamily::Structural, false),
            check(CheckFamily::Value, true),
            check(CheckFamily::Behavioral, true),
        ];
        let score = quality_score(&checks, &FamilyWeights::default());
        assert!((score - 50.0).abs() < 1e-9, "score {}", score);
    }

    #[test]
    fn test_quality_score_renormalizes_missing_families() {
        // Only structural checks: a full pass is still 100.
        let checks = vec![check(CheckFamily::Structural, true)];
        assert!((quality_score(&checks, &FamilyWeights::default()) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_meets_threshold_requires_structural() {
        let report = ValidationReport {
            summary: Summary {
                total_checks: 2,
                passed: 1,
                failed: 1,
                quality_score: 90.0,
            },
            checks: vec![
                check(CheckFamily::Structural, false),
                check(CheckFamily::Value, true),
            ],
            row_counts: IndexMap::new(),
        };
        assert!(!report.meets_threshold(80.0));
    }
}
