//! Per-fold work: train, weight, validate, backtest.
//!
//! Each step takes a [`FoldProgress`] by value and returns it with one more
//! artifact filled in, or with `failure` set. A failed fold is carried
//! through later steps untouched so the report can say why it stopped.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use matchday_core::{ObservationRow, ValidationConfig};

use crate::engine::{BacktestEngine, BacktestError};
use crate::ensemble::{EnsembleTrainer, EnsembleWeights, TrainedModel, WeightError, WeightOptimizer};
use crate::ledger::BankrollLedger;
use crate::split::Fold;
use crate::validator::{StatisticalValidator, ValidationError, ValidationReport};

/// Why a fold produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FoldFailure {
    #[error("no model could be fitted")]
    NoAvailableModels,

    #[error("cancelled before the fold ran")]
    Cancelled,

    #[error("weight search failed: {0}")]
    Weighting(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("backtest failed: {0}")]
    Backtest(String),
}

impl From<WeightError> for FoldFailure {
    fn from(e: WeightError) -> Self {
        match e {
            WeightError::NoAvailableModels => Self::NoAvailableModels,
            other => Self::Weighting(other.to_string()),
        }
    }
}

impl From<ValidationError> for FoldFailure {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<BacktestError> for FoldFailure {
    fn from(e: BacktestError) -> Self {
        Self::Backtest(e.to_string())
    }
}

/// Artifacts accumulated for one fold.
#[derive(Debug, Clone)]
pub struct FoldProgress {
    pub fold: Fold,
    pub models: Vec<TrainedModel>,
    pub weights: Option<EnsembleWeights>,
    /// Blended eval probabilities, aligned with `fold.eval_indices`.
    pub probabilities: Vec<f64>,
    pub validation: Option<ValidationReport>,
    pub ledger: Option<BankrollLedger>,
    pub failure: Option<FoldFailure>,
}

impl FoldProgress {
    #[must_use]
    pub fn new(fold: Fold) -> Self {
        Self {
            fold,
            models: Vec::new(),
            weights: None,
            probabilities: Vec::new(),
            validation: None,
            ledger: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn fold_number(&self) -> usize {
        self.fold.fold_number
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Eval labels in eval order.
    #[must_use]
    pub fn eval_labels(&self, rows: &[ObservationRow]) -> Vec<bool> {
        self.fold.eval_indices.iter().map(|&i| rows[i].label).collect()
    }

    fn fail(mut self, failure: FoldFailure) -> Self {
        warn!(fold = self.fold.fold_number, error = %failure, "Fold failed");
        self.failure = Some(failure);
        self
    }

    /// Returns the fold unchanged if it already failed or the run was cancelled.
    fn gate(self, stop: &AtomicBool) -> Result<Self, Self> {
        if self.is_failed() {
            return Err(self);
        }
        if stop.load(Ordering::SeqCst) {
            return Err(self.fail(FoldFailure::Cancelled));
        }
        Ok(self)
    }
}

fn select<'a>(rows: &'a [ObservationRow], indices: &[usize]) -> Vec<&'a ObservationRow> {
    indices.iter().map(|&i| &rows[i]).collect()
}

pub(crate) fn train(
    progress: FoldProgress,
    rows: &[ObservationRow],
    trainer: &EnsembleTrainer,
    stop: &AtomicBool,
) -> FoldProgress {
    let mut progress = match progress.gate(stop) {
        Ok(p) => p,
        Err(p) => return p,
    };

    let train_rows = select(rows, &progress.fold.train_indices);
    progress.models = trainer.train(&train_rows);

    let available = progress.models.iter().filter(|m| m.is_available()).count();
    info!(
        fold = progress.fold_number(),
        train_rows = train_rows.len(),
        available,
        "Fold trained"
    );
    progress
}

pub(crate) fn weight(
    progress: FoldProgress,
    rows: &[ObservationRow],
    optimizer: &WeightOptimizer,
    stop: &AtomicBool,
) -> FoldProgress {
    let mut progress = match progress.gate(stop) {
        Ok(p) => p,
        Err(p) => return p,
    };

    // Weights are tuned on the same rows they are later scored on.
    let eval_rows = select(rows, &progress.fold.eval_indices);
    match optimizer.optimize(&progress.models, &eval_rows) {
        Ok(weights) => {
            progress.probabilities = eval_rows
                .iter()
                .map(|r| weights.blend(&progress.models, &r.features))
                .collect();
            info!(
                fold = progress.fold_number(),
                objective = weights.objective,
                "Fold weighted"
            );
            progress.weights = Some(weights);
            progress
        }
        Err(e) => progress.fail(e.into()),
    }
}

pub(crate) fn validate(
    progress: FoldProgress,
    rows: &[ObservationRow],
    config: &ValidationConfig,
    stop: &AtomicBool,
) -> FoldProgress {
    let mut progress = match progress.gate(stop) {
        Ok(p) => p,
        Err(p) => return p,
    };

    // Each fold gets its own permutation stream.
    let validator = StatisticalValidator::new(ValidationConfig {
        permutation_repeats: config.permutation_repeats,
        random_seed: config
            .random_seed
            .wrapping_add(progress.fold_number() as u64),
    });
    let labels = progress.eval_labels(rows);
    match validator.validate(&progress.probabilities, &labels) {
        Ok(report) => {
            info!(
                fold = progress.fold_number(),
                brier = report.brier_score,
                p_value = report.permutation_p_value,
                "Fold validated"
            );
            progress.validation = Some(report);
            progress
        }
        Err(e) => progress.fail(e.into()),
    }
}

pub(crate) fn backtest(
    progress: FoldProgress,
    rows: &[ObservationRow],
    engine: &BacktestEngine,
    stop: &AtomicBool,
) -> FoldProgress {
    let mut progress = match progress.gate(stop) {
        Ok(p) => p,
        Err(p) => return p,
    };

    let eval_rows = select(rows, &progress.fold.eval_indices);
    match engine.run_indexed(&progress.probabilities, &eval_rows, &progress.fold.eval_indices) {
        Ok(ledger) => {
            info!(
                fold = progress.fold_number(),
                final_bankroll = %ledger.final_bankroll(),
                bets = ledger.summary.bets_placed,
                "Fold backtested"
            );
            progress.ledger = Some(ledger);
            progress
        }
        Err(e) => progress.fail(e.into()),
    }
}
