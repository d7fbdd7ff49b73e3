//! Leakage auditing for split plans.
//!
//! The auditor inspects a [`SplitPlan`] against the row table and reports:
//!
//! - **Temporal overlap** (fatal): any eval row at or before the latest train row.
//! - **Future information** (fatal): a suspect feature whose stored value differs
//!   from a value rebuilt using only strictly-earlier rows.
//! - **Stationarity** (advisory): population stability index between train and
//!   eval feature marginals.
//!
//! The auditor never modifies the plan. Violations are reported, never repaired.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use matchday_core::{AuditConfig, ObservationRow};

use crate::split::{Fold, SplitPlan};

/// Floor applied to bin proportions so PSI stays finite for empty bins.
const PSI_PROPORTION_FLOOR: f64 = 1e-4;

/// Number of quantile bins used for PSI.
const PSI_BINS: usize = 10;

/// A fatal finding that blocks training.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum LeakageViolation {
    #[error("fold {fold_number}: eval starts at {eval_min} but train runs until {train_max}")]
    TemporalOverlap {
        fold_number: usize,
        train_max: DateTime<Utc>,
        eval_min: DateTime<Utc>,
    },

    #[error("fold {fold_number}: row {row_index} appears in both train and eval")]
    IndexOverlap { fold_number: usize, row_index: usize },

    #[error("fold {fold_number}: row index {row_index} is outside a table of {rows} rows")]
    IndexOutOfRange {
        fold_number: usize,
        row_index: usize,
        rows: usize,
    },

    #[error("fold {fold_number}: row {row_index} feature {feature} stored {stored} but history gives {recomputed}")]
    FutureInformation {
        fold_number: usize,
        row_index: usize,
        feature: usize,
        stored: f64,
        recomputed: f64,
    },
}

impl LeakageViolation {
    /// Fold the violation was found in.
    #[must_use]
    pub fn fold_number(&self) -> usize {
        match self {
            Self::TemporalOverlap { fold_number, .. }
            | Self::IndexOverlap { fold_number, .. }
            | Self::IndexOutOfRange { fold_number, .. }
            | Self::FutureInformation { fold_number, .. } => *fold_number,
        }
    }
}

/// Raised when an audit with fatal findings is turned into a hard stop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuditError {
    #[error("leakage detected: {} violation(s), first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    LeakageDetected(Vec<LeakageViolation>),
}

/// Per-fold population stability summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldDrift {
    pub fold_number: usize,
    /// PSI per feature, in feature order.
    pub feature_psi: Vec<f64>,
    pub max_psi: f64,
    /// `max_psi` exceeded the configured threshold.
    pub high_risk: bool,
}

/// Outcome of an audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    /// False only when a fatal violation exists.
    pub passed: bool,
    pub violations: Vec<LeakageViolation>,
    /// Human-readable advisory notes; never block the pipeline.
    pub advisories: Vec<String>,
    pub drift: Vec<FoldDrift>,
}

impl AuditResult {
    /// Converts a failed audit into an [`AuditError`].
    ///
    /// # Errors
    /// Returns [`AuditError::LeakageDetected`] when any fatal violation exists.
    pub fn into_result(self) -> Result<Self, AuditError> {
        if self.passed {
            Ok(self)
        } else {
            Err(AuditError::LeakageDetected(self.violations))
        }
    }

    /// Fold numbers flagged as high drift risk.
    #[must_use]
    pub fn high_risk_folds(&self) -> Vec<usize> {
        self.drift
            .iter()
            .filter(|d| d.high_risk)
            .map(|d| d.fold_number)
            .collect()
    }
}

/// Rebuilds one feature of one row from strictly-earlier history.
///
/// `history` holds every row whose timestamp is strictly before `row`'s, in
/// chronological order. Return `None` when history is insufficient to rebuild
/// the value; the row is then skipped.
pub trait FeatureRecomputer: Send + Sync {
    fn recompute(
        &self,
        feature: usize,
        row: &ObservationRow,
        history: &[&ObservationRow],
    ) -> Option<f64>;
}

impl<F> FeatureRecomputer for F
where
    F: Fn(usize, &ObservationRow, &[&ObservationRow]) -> Option<f64> + Send + Sync,
{
    fn recompute(
        &self,
        feature: usize,
        row: &ObservationRow,
        history: &[&ObservationRow],
    ) -> Option<f64> {
        self(feature, row, history)
    }
}

/// Audits split plans for leakage and drift.
pub struct LeakageAuditor {
    config: AuditConfig,
    recomputer: Option<Box<dyn FeatureRecomputer>>,
}

impl std::fmt::Debug for LeakageAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakageAuditor")
            .field("config", &self.config)
            .field("has_recomputer", &self.recomputer.is_some())
            .finish()
    }
}

impl LeakageAuditor {
    #[must_use]
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            recomputer: None,
        }
    }

    /// Attaches the recomputer used by the future-information check.
    #[must_use]
    pub fn with_recomputer(mut self, recomputer: impl FeatureRecomputer + 'static) -> Self {
        self.recomputer = Some(Box::new(recomputer));
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Runs every enabled check over `plan`.
    #[must_use]
    pub fn audit(&self, plan: &SplitPlan, rows: &[ObservationRow]) -> AuditResult {
        let mut violations = Vec::new();
        let mut advisories = Vec::new();
        let mut drift = Vec::new();

        // Structural problems make the remaining checks meaningless for the fold.
        let mut sound_folds: Vec<&Fold> = Vec::with_capacity(plan.folds.len());
        for fold in &plan.folds {
            match out_of_range(fold, rows.len()) {
                Some(v) => violations.push(v),
                None => sound_folds.push(fold),
            }
        }

        if self.config.check_overlap {
            for fold in &sound_folds {
                violations.extend(overlap_violations(fold, rows));
            }
        }

        if self.config.check_future_information {
            if let Some(recomputer) = &self.recomputer {
                violations.extend(self.future_information(&sound_folds, rows, recomputer.as_ref()));
            }
        }

        if self.config.check_stationarity {
            for fold in &sound_folds {
                let fold_drift = fold_drift(fold, rows, self.config.psi_threshold);
                if fold_drift.high_risk {
                    tracing::warn!(
                        fold = fold.fold_number,
                        max_psi = fold_drift.max_psi,
                        "High drift risk between train and eval"
                    );
                    advisories.push(format!(
                        "fold {}: high drift risk, max PSI {:.3} exceeds {:.3}",
                        fold.fold_number, fold_drift.max_psi, self.config.psi_threshold
                    ));
                }
                drift.push(fold_drift);
            }
        }

        let passed = violations.is_empty();
        if !passed {
            tracing::warn!(violations = violations.len(), "Audit found leakage");
        }

        AuditResult {
            passed,
            violations,
            advisories,
            drift,
        }
    }

    fn future_information(
        &self,
        folds: &[&Fold],
        rows: &[ObservationRow],
        recomputer: &dyn FeatureRecomputer,
    ) -> Vec<LeakageViolation> {
        if self.config.suspect_features.is_empty() {
            return Vec::new();
        }

        let mut chronological: Vec<&ObservationRow> = rows.iter().collect();
        chronological.sort_by_key(|r| r.timestamp);

        let mut checked = HashSet::new();
        let mut violations = Vec::new();
        let mut skipped = 0usize;

        for fold in folds {
            for &row_index in &fold.train_indices {
                if !checked.insert(row_index) {
                    continue;
                }
                let row = &rows[row_index];
                let cutoff = chronological.partition_point(|r| r.timestamp < row.timestamp);
                let history = &chronological[..cutoff];

                for &feature in &self.config.suspect_features {
                    let Some(&stored) = row.features.get(feature) else {
                        continue;
                    };
                    match recomputer.recompute(feature, row, history) {
                        Some(recomputed) if (recomputed - stored).abs() > self.config.tolerance => {
                            violations.push(LeakageViolation::FutureInformation {
                                fold_number: fold.fold_number,
                                row_index,
                                feature,
                                stored,
                                recomputed,
                            });
                        }
                        Some(_) => {}
                        None => skipped += 1,
                    }
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "Feature checks skipped for short history");
        }
        violations
    }
}

fn out_of_range(fold: &Fold, rows: usize) -> Option<LeakageViolation> {
    fold.train_indices
        .iter()
        .chain(&fold.eval_indices)
        .find(|&&i| i >= rows)
        .map(|&row_index| LeakageViolation::IndexOutOfRange {
            fold_number: fold.fold_number,
            row_index,
            rows,
        })
}

fn overlap_violations(fold: &Fold, rows: &[ObservationRow]) -> Vec<LeakageViolation> {
    let mut violations = Vec::new();

    let train: HashSet<usize> = fold.train_indices.iter().copied().collect();
    if let Some(&row_index) = fold.eval_indices.iter().find(|i| train.contains(i)) {
        violations.push(LeakageViolation::IndexOverlap {
            fold_number: fold.fold_number,
            row_index,
        });
    }

    if let (Some((_, train_max)), Some((eval_min, _))) = (fold.train_range(rows), fold.eval_range(rows)) {
        if train_max >= eval_min {
            violations.push(LeakageViolation::TemporalOverlap {
                fold_number: fold.fold_number,
                train_max,
                eval_min,
            });
        }
    }

    violations
}

fn fold_drift(fold: &Fold, rows: &[ObservationRow], threshold: f64) -> FoldDrift {
    let dimension = fold
        .train_indices
        .first()
        .map_or(0, |&i| rows[i].dimension());

    let feature_psi: Vec<f64> = (0..dimension)
        .map(|feature| {
            let column = |indices: &[usize]| -> Vec<f64> {
                indices
                    .iter()
                    .filter_map(|&i| rows[i].features.get(feature).copied())
                    .collect()
            };
            population_stability_index(&column(&fold.train_indices), &column(&fold.eval_indices))
        })
        .collect();

    let max_psi = feature_psi.iter().copied().fold(0.0, f64::max);
    FoldDrift {
        fold_number: fold.fold_number,
        feature_psi,
        max_psi,
        high_risk: max_psi > threshold,
    }
}

/// Population stability index of `actual` against `expected`, using
/// decile edges taken from `expected`.
///
/// Returns 0.0 when either side is empty.
#[must_use]
pub fn population_stability_index(expected: &[f64], actual: &[f64]) -> f64 {
    if expected.is_empty() || actual.is_empty() {
        return 0.0;
    }

    let mut sorted = expected.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (1..PSI_BINS)
        .map(|k| sorted[(k * sorted.len() / PSI_BINS).min(sorted.len() - 1)])
        .collect();
    edges.dedup();

    let proportions = |values: &[f64]| -> Vec<f64> {
        let mut counts = vec![0usize; edges.len() + 1];
        for v in values {
            counts[edges.partition_point(|e| e <= v)] += 1;
        }
        counts
            .into_iter()
            .map(|c| (c as f64 / values.len() as f64).max(PSI_PROPORTION_FLOOR))
            .collect()
    };

    let e = proportions(expected);
    let a = proportions(actual);
    e.iter()
        .zip(&a)
        .map(|(&e, &a)| (a - e) * (a / e).ln())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use matchday_core::{SplitConfig, SplitStrategy};

    use crate::split::ChronologicalSplitter;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 10, 1, 0, 0, 0).unwrap()
    }

    fn rows_with(features: impl Fn(usize) -> Vec<f64>, count: usize) -> Vec<ObservationRow> {
        (0..count)
            .map(|i| ObservationRow::new(base() + Duration::days(i as i64), features(i), i % 3 == 0))
            .collect()
    }

    fn walk_forward(rows: &[ObservationRow], min_train: usize, folds: usize) -> SplitPlan {
        ChronologicalSplitter::new(SplitConfig {
            strategy: SplitStrategy::WalkForward,
            min_train_size: min_train,
            n_folds: folds,
            max_train_size: None,
            season_starts: Vec::new(),
            shuffle: false,
        })
        .unwrap()
        .split(rows)
        .unwrap()
    }

    fn overlap_only() -> AuditConfig {
        AuditConfig {
            check_future_information: false,
            check_stationarity: false,
            ..AuditConfig::default()
        }
    }

    /// Running win rate over strictly earlier rows.
    fn running_win_rate(history: &[&ObservationRow]) -> Option<f64> {
        if history.is_empty() {
            return None;
        }
        let wins = history.iter().filter(|r| r.label).count();
        Some(wins as f64 / history.len() as f64)
    }

    // ============================================================
    // Overlap Tests
    // ============================================================

    #[test]
    fn splitter_plan_passes_overlap_check() {
        let rows = rows_with(|i| vec![i as f64], 60);
        let plan = walk_forward(&rows, 20, 4);

        let result = LeakageAuditor::new(overlap_only()).audit(&plan, &rows);
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn hand_built_overlap_is_fatal_with_range() {
        let rows = rows_with(|i| vec![i as f64], 10);
        let plan = SplitPlan {
            strategy: SplitStrategy::WalkForward,
            folds: vec![Fold {
                fold_number: 2,
                train_indices: vec![0, 1, 2, 6],
                eval_indices: vec![5, 7],
            }],
        };

        let result = LeakageAuditor::new(overlap_only()).audit(&plan, &rows);
        assert!(!result.passed);
        assert_eq!(
            result.violations,
            vec![LeakageViolation::TemporalOverlap {
                fold_number: 2,
                train_max: base() + Duration::days(6),
                eval_min: base() + Duration::days(5),
            }]
        );
    }

    #[test]
    fn shared_index_is_reported() {
        let rows = rows_with(|i| vec![i as f64], 5);
        let plan = SplitPlan {
            strategy: SplitStrategy::WalkForward,
            folds: vec![Fold {
                fold_number: 1,
                train_indices: vec![0, 1, 2],
                eval_indices: vec![2, 3],
            }],
        };

        let result = LeakageAuditor::new(overlap_only()).audit(&plan, &rows);
        assert!(result
            .violations
            .contains(&LeakageViolation::IndexOverlap { fold_number: 1, row_index: 2 }));
    }

    #[test]
    fn out_of_range_index_is_fatal() {
        let rows = rows_with(|i| vec![i as f64], 5);
        let plan = SplitPlan {
            strategy: SplitStrategy::WalkForward,
            folds: vec![Fold {
                fold_number: 1,
                train_indices: vec![0, 1],
                eval_indices: vec![9],
            }],
        };

        let result = LeakageAuditor::new(AuditConfig::default()).audit(&plan, &rows);
        assert!(!result.passed);
        assert_eq!(result.violations[0].fold_number(), 1);
        assert!(result.into_result().is_err());
    }

    // ============================================================
    // Future Information Tests
    // ============================================================

    fn labelled_rows(count: usize, leak: bool) -> Vec<ObservationRow> {
        let labels: Vec<bool> = (0..count).map(|i| i % 3 == 0).collect();
        (0..count)
            .map(|i| {
                // A leaking feature includes the current row's own outcome.
                let upto = if leak { i + 1 } else { i };
                let rate = if upto == 0 {
                    0.5
                } else {
                    labels[..upto].iter().filter(|&&w| w).count() as f64 / upto as f64
                };
                ObservationRow::new(base() + Duration::days(i as i64), vec![rate], labels[i])
            })
            .collect()
    }

    fn future_only() -> AuditConfig {
        AuditConfig {
            check_overlap: false,
            check_stationarity: false,
            suspect_features: vec![0],
            ..AuditConfig::default()
        }
    }

    #[test]
    fn leaked_running_rate_is_detected() {
        let rows = labelled_rows(40, true);
        let plan = walk_forward(&rows, 20, 2);

        let auditor = LeakageAuditor::new(future_only())
            .with_recomputer(|_: usize, _: &ObservationRow, h: &[&ObservationRow]| running_win_rate(h));
        let result = auditor.audit(&plan, &rows);

        assert!(!result.passed);
        assert!(result
            .violations
            .iter()
            .all(|v| matches!(v, LeakageViolation::FutureInformation { feature: 0, .. })));
    }

    #[test]
    fn honest_running_rate_passes() {
        let rows = labelled_rows(40, false);
        let plan = walk_forward(&rows, 20, 2);

        let auditor = LeakageAuditor::new(future_only())
            .with_recomputer(|_: usize, _: &ObservationRow, h: &[&ObservationRow]| running_win_rate(h));
        let result = auditor.audit(&plan, &rows);

        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn recomputer_returning_none_skips_rows() {
        let rows = labelled_rows(40, true);
        let plan = walk_forward(&rows, 20, 2);

        let auditor = LeakageAuditor::new(future_only())
            .with_recomputer(|_: usize, _: &ObservationRow, _: &[&ObservationRow]| None);
        assert!(auditor.audit(&plan, &rows).passed);
    }

    #[test]
    fn future_check_without_recomputer_is_a_no_op() {
        let rows = labelled_rows(40, true);
        let plan = walk_forward(&rows, 20, 2);
        assert!(LeakageAuditor::new(future_only()).audit(&plan, &rows).passed);
    }

    // ============================================================
    // Stationarity Tests
    // ============================================================

    #[test]
    fn psi_of_identical_samples_is_zero() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        assert!(population_stability_index(&values, &values).abs() < 1e-12);
    }

    #[test]
    fn psi_of_shifted_sample_is_large() {
        let train: Vec<f64> = (0..100).map(f64::from).collect();
        let eval: Vec<f64> = (0..100).map(|v| f64::from(v) + 500.0).collect();
        assert!(population_stability_index(&train, &eval) > 1.0);
    }

    #[test]
    fn drift_is_advisory_only() {
        // Feature jumps after day 30.
        let rows = rows_with(|i| vec![if i < 30 { (i % 7) as f64 } else { 100.0 + i as f64 }], 60);
        let plan = walk_forward(&rows, 30, 1);

        let result = LeakageAuditor::new(AuditConfig::default()).audit(&plan, &rows);
        assert!(result.passed);
        assert_eq!(result.high_risk_folds(), vec![1]);
        assert_eq!(result.advisories.len(), 1);
    }

    #[test]
    fn disabled_checks_produce_no_findings() {
        let rows = rows_with(|i| vec![i as f64], 10);
        let plan = SplitPlan {
            strategy: SplitStrategy::WalkForward,
            folds: vec![Fold {
                fold_number: 1,
                train_indices: vec![5, 6],
                eval_indices: vec![0, 1],
            }],
        };
        let config = AuditConfig {
            check_overlap: false,
            check_future_information: false,
            check_stationarity: false,
            ..AuditConfig::default()
        };

        let result = LeakageAuditor::new(config).audit(&plan, &rows);
        assert!(result.passed);
        assert!(result.drift.is_empty());
    }
}
