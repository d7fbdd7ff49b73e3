//! Final report types and the overall verdict.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use matchday_core::{SplitStrategy, VerdictThresholds};

use crate::audit::{AuditResult, FoldDrift};
use crate::ensemble::ModelStatus;
use crate::ledger::{CombinedLedger, LedgerSummary};
use crate::validator::ValidationReport;

use super::fold::{FoldFailure, FoldProgress};

/// Overall conclusion of a completed run.
///
/// `Inconclusive` means no fold produced scores; it is never reported as
/// `Insignificant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Significant,
    Insignificant,
    Inconclusive,
}

impl Verdict {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Significant => "SIGNIFICANT",
            Self::Insignificant => "INSIGNIFICANT",
            Self::Inconclusive => "INCONCLUSIVE",
        }
    }
}

/// Which verdict bars were cleared by the pooled scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictChecks {
    pub brier: bool,
    pub roc_auc: bool,
    pub p_value: bool,
    pub roi: bool,
}

impl VerdictChecks {
    /// Evaluates pooled validation and combined ROI against the thresholds.
    #[must_use]
    pub fn evaluate(
        pooled: &ValidationReport,
        total: &LedgerSummary,
        thresholds: &VerdictThresholds,
    ) -> Self {
        Self {
            brier: pooled.brier_score < thresholds.max_brier,
            roc_auc: pooled.roc_auc.is_some_and(|auc| auc > thresholds.min_roc_auc),
            p_value: pooled.permutation_p_value < thresholds.max_p_value,
            roi: total.roi > thresholds.min_roi,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.brier && self.roc_auc && self.p_value && self.roi
    }
}

/// A model's state and weight in one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub family: String,
    #[serde(flatten)]
    pub status: ModelStatus,
    pub weight: f64,
}

/// What one fold produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold_number: usize,
    pub train_size: usize,
    pub eval_size: usize,
    pub eval_start: Option<DateTime<Utc>>,
    pub eval_end: Option<DateTime<Utc>>,
    pub models: Vec<ModelSummary>,
    pub validation: Option<ValidationReport>,
    pub backtest: Option<LedgerSummary>,
    pub drift: Option<FoldDrift>,
    pub failure: Option<FoldFailure>,
}

impl FoldReport {
    pub(crate) fn from_progress(
        progress: &FoldProgress,
        rows: &[matchday_core::ObservationRow],
        drift: Option<FoldDrift>,
    ) -> Self {
        let eval_range = progress.fold.eval_range(rows);
        let models = progress
            .models
            .iter()
            .map(|m| ModelSummary {
                model_id: m.model_id.clone(),
                family: m.family.to_string(),
                status: m.status.clone(),
                weight: progress
                    .weights
                    .as_ref()
                    .map_or(0.0, |w| w.weight_of(&m.model_id)),
            })
            .collect();

        Self {
            fold_number: progress.fold_number(),
            train_size: progress.fold.train_len(),
            eval_size: progress.fold.eval_len(),
            eval_start: eval_range.map(|(s, _)| s),
            eval_end: eval_range.map(|(_, e)| e),
            models,
            validation: progress.validation.clone(),
            backtest: progress.ledger.as_ref().map(|l| l.summary.clone()),
            drift,
            failure: progress.failure.clone(),
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub sport_tag: String,
    pub strategy: SplitStrategy,
    pub rows: usize,
    pub folds: Vec<FoldReport>,
    pub audit: AuditResult,
    /// Scores over every successful fold's eval predictions together.
    pub pooled: Option<ValidationReport>,
    pub ledger: CombinedLedger,
    pub checks: Option<VerdictChecks>,
    pub verdict: Verdict,
    pub thresholds: VerdictThresholds,
}

impl PipelineReport {
    #[must_use]
    pub fn completed_folds(&self) -> usize {
        self.folds.iter().filter(|f| f.failure.is_none()).count()
    }

    #[must_use]
    pub fn failed_folds(&self) -> usize {
        self.folds.len() - self.completed_folds()
    }

    /// Combined ROI across folds.
    #[must_use]
    pub fn roi(&self) -> Decimal {
        self.ledger.total.roi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pooled(brier: f64, auc: Option<f64>, p: f64) -> ValidationReport {
        ValidationReport {
            samples: 100,
            brier_score: brier,
            log_loss: 0.6,
            roc_auc: auc,
            accuracy: 0.6,
            calibration: Vec::new(),
            permutation_p_value: p,
            permutation_repeats: 1000,
        }
    }

    fn total(roi: Decimal) -> LedgerSummary {
        let mut summary = LedgerSummary::from_entries(dec!(1000), std::iter::empty(), 0);
        summary.roi = roi;
        summary
    }

    #[test]
    fn all_bars_cleared() {
        let checks = VerdictChecks::evaluate(
            &pooled(0.22, Some(0.61), 0.01),
            &total(dec!(0.04)),
            &VerdictThresholds::default(),
        );
        assert!(checks.all_passed());
    }

    #[test]
    fn zero_roi_fails_strict_bar() {
        let checks = VerdictChecks::evaluate(
            &pooled(0.22, Some(0.61), 0.01),
            &total(dec!(0)),
            &VerdictThresholds::default(),
        );
        assert!(!checks.roi);
        assert!(!checks.all_passed());
    }

    #[test]
    fn missing_auc_fails_auc_bar() {
        let checks = VerdictChecks::evaluate(
            &pooled(0.2, None, 0.01),
            &total(dec!(0.1)),
            &VerdictThresholds::default(),
        );
        assert!(!checks.roc_auc);
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(Verdict::Inconclusive.as_str(), "INCONCLUSIVE");
        assert_eq!(
            serde_json::to_string(&Verdict::Significant).unwrap(),
            "\"significant\""
        );
    }
}
