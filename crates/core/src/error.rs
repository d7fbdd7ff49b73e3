//! Error types shared across the pipeline crates.
//!
//! Configuration errors are raised before any fold is processed. Dataset errors
//! are raised while the row table handed over by feature engineering is checked.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while validating a [`crate::PipelineConfig`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The split parameters can never produce a fold.
    #[error("invalid split configuration: {0}")]
    InvalidSplit(String),

    /// No base models were configured.
    #[error("at least one model spec is required")]
    EmptyModelList,

    /// Two model specs share the same identifier.
    #[error("duplicate model id: {0}")]
    DuplicateModelId(String),

    /// A model spec carries parameters the estimator cannot use.
    #[error("invalid parameters for model {model_id}: {reason}")]
    InvalidModelParams {
        /// Offending model.
        model_id: String,
        /// What is wrong with the parameters.
        reason: String,
    },

    /// The weight search budget must allow at least one grid step.
    #[error("weight search grid resolution and candidate budget must be positive")]
    NonPositiveSearchBudget,

    /// The weight grid for the configured models is larger than the budget.
    #[error(
        "weight grid for {models} models at resolution {resolution} exceeds {max} candidates"
    )]
    SearchBudgetExceeded {
        models: usize,
        resolution: usize,
        max: usize,
    },

    /// Initial seed weights do not line up with the configured models.
    #[error("initial seeds: {0}")]
    InvalidInitialSeeds(String),

    /// The permutation test needs at least one shuffle.
    #[error("permutation repeats must be positive")]
    ZeroPermutationRepeats,

    /// Kelly multiplier must be strictly positive.
    #[error("risk fraction must be positive, got {0}")]
    InvalidRiskFraction(Decimal),

    /// Starting bankroll must be strictly positive.
    #[error("starting bankroll must be positive, got {0}")]
    NonPositiveBankroll(Decimal),

    /// Audit thresholds are out of range.
    #[error("invalid audit configuration: {0}")]
    InvalidAudit(String),
}

/// Errors raised while assembling a [`crate::Dataset`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatasetError {
    /// No rows were supplied.
    #[error("dataset is empty")]
    Empty,

    /// A row's feature vector does not match the dataset dimensionality.
    #[error("row {row}: expected {expected} features, found {found}")]
    DimensionMismatch {
        /// Row position in the input.
        row: usize,
        /// Dimensionality of the first row.
        expected: usize,
        /// Dimensionality of this row.
        found: usize,
    },

    /// A feature value is NaN or infinite.
    #[error("row {row}: feature {feature} is not finite")]
    NonFiniteFeature {
        /// Row position in the input.
        row: usize,
        /// Feature index.
        feature: usize,
    },

    /// Decimal odds must be positive when present.
    #[error("row {row}: decimal odds {odds} must be positive")]
    NonPositiveOdds {
        /// Row position in the input.
        row: usize,
        /// The rejected odds.
        odds: Decimal,
    },
}
