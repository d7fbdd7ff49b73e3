use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Free-form label carried into reports (e.g. "nba", "epl").
    pub sport_tag: String,
    pub split: SplitConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub weights: WeightSearchConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub thresholds: VerdictThresholds,
    /// Evaluate folds on a worker pool.
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Expanding train window, fixed step between cutoffs.
    WalkForward,
    /// Cutoffs at caller-supplied season starts.
    SeasonBased,
    /// Fixed-size train window that slides with the cutoff.
    SlidingWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub strategy: SplitStrategy,
    pub min_train_size: usize,
    pub n_folds: usize,
    /// Sliding-window train size; defaults to `min_train_size`.
    #[serde(default)]
    pub max_train_size: Option<usize>,
    /// Season start timestamps for the season-based strategy.
    #[serde(default)]
    pub season_starts: Vec<DateTime<Utc>>,
    /// Always rejected by the splitter.
    #[serde(default)]
    pub shuffle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub check_overlap: bool,
    pub check_future_information: bool,
    pub check_stationarity: bool,
    /// Population stability index above which a fold is flagged high risk.
    pub psi_threshold: f64,
    /// Absolute tolerance when comparing recomputed feature values.
    pub tolerance: f64,
    /// Feature indices re-derived by the future-information check.
    pub suspect_features: Vec<usize>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            check_overlap: true,
            check_future_information: true,
            check_stationarity: true,
            psi_threshold: 0.25,
            tolerance: 1e-9,
            suspect_features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    #[serde(flatten)]
    pub kind: ModelKind,
}

impl ModelSpec {
    #[must_use]
    pub fn new(model_id: &str, kind: ModelKind) -> Self {
        Self {
            model_id: model_id.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Logistic {
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
        #[serde(default = "default_l2")]
        l2: f64,
    },
    NaiveBayes {
        #[serde(default = "default_var_smoothing")]
        var_smoothing: f64,
    },
    Knn {
        #[serde(default = "default_k")]
        k: usize,
    },
    BaseRate,
}

impl ModelKind {
    #[must_use]
    pub fn logistic() -> Self {
        Self::Logistic {
            learning_rate: default_learning_rate(),
            max_iterations: default_max_iterations(),
            l2: default_l2(),
        }
    }

    #[must_use]
    pub fn naive_bayes() -> Self {
        Self::NaiveBayes {
            var_smoothing: default_var_smoothing(),
        }
    }

    #[must_use]
    pub fn knn() -> Self {
        Self::Knn { k: default_k() }
    }

    /// Short name used in logs and reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Logistic { .. } => "logistic",
            Self::NaiveBayes { .. } => "naive_bayes",
            Self::Knn { .. } => "knn",
            Self::BaseRate => "base_rate",
        }
    }

    fn check(&self) -> Result<(), String> {
        match *self {
            Self::Logistic {
                learning_rate,
                max_iterations,
                l2,
            } => {
                if !(learning_rate.is_finite() && learning_rate > 0.0) {
                    return Err(format!("learning_rate must be positive, got {learning_rate}"));
                }
                if max_iterations == 0 {
                    return Err("max_iterations must be positive".to_string());
                }
                if !(l2.is_finite() && l2 >= 0.0) {
                    return Err(format!("l2 must be non-negative, got {l2}"));
                }
                Ok(())
            }
            Self::NaiveBayes { var_smoothing } => {
                if var_smoothing.is_finite() && var_smoothing > 0.0 {
                    Ok(())
                } else {
                    Err(format!("var_smoothing must be positive, got {var_smoothing}"))
                }
            }
            Self::Knn { k } => {
                if k == 0 {
                    Err("k must be positive".to_string())
                } else {
                    Ok(())
                }
            }
            Self::BaseRate => Ok(()),
        }
    }
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_max_iterations() -> usize {
    500
}

fn default_l2() -> f64 {
    0.01
}

fn default_var_smoothing() -> f64 {
    1e-9
}

fn default_k() -> usize {
    25
}

fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("logistic", ModelKind::logistic()),
        ModelSpec::new("naive_bayes", ModelKind::naive_bayes()),
        ModelSpec::new("knn", ModelKind::knn()),
        ModelSpec::new("base_rate", ModelKind::BaseRate),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightSearchConfig {
    /// Number of grid steps per unit of weight (20 = 0.05 increments).
    pub grid_resolution: usize,
    /// Starting weights evaluated alongside the grid, in model order.
    pub initial_seeds: Vec<f64>,
    /// Upper bound on grid points scored per fold.
    pub max_candidates: usize,
}

impl WeightSearchConfig {
    /// Grid points for `models` weights at this resolution, `C(res + k - 1, k - 1)`.
    ///
    /// `None` if the count does not fit in a `usize`.
    #[must_use]
    pub fn grid_candidates(&self, models: usize) -> Option<usize> {
        let resolution = self.grid_resolution.max(1);
        let mut count: usize = 1;
        for i in 1..models {
            // C(res + i, i) = C(res + i - 1, i - 1) * (res + i) / i, exact at every step
            count = count.checked_mul(resolution.checked_add(i)?)? / i;
        }
        Some(count)
    }

    /// Whether the grid for `models` weights fits in `max_candidates`.
    #[must_use]
    pub fn fits_budget(&self, models: usize) -> bool {
        self.grid_candidates(models).is_some_and(|n| n <= self.max_candidates)
    }
}

impl Default for WeightSearchConfig {
    fn default() -> Self {
        Self {
            grid_resolution: 20,
            initial_seeds: Vec::new(),
            max_candidates: 250_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub permutation_repeats: usize,
    pub random_seed: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            permutation_repeats: 1_000,
            random_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub starting_bankroll: Decimal,
    /// Multiplier applied to the full Kelly fraction (0.25 = quarter Kelly).
    pub risk_fraction: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            starting_bankroll: Decimal::new(1000, 0),
            risk_fraction: Decimal::new(25, 2),
        }
    }
}

/// Pass/fail bars for the overall verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictThresholds {
    pub max_brier: f64,
    pub min_roc_auc: f64,
    pub max_p_value: f64,
    pub min_roi: Decimal,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            max_brier: 0.25,
            min_roc_auc: 0.55,
            max_p_value: 0.05,
            min_roi: Decimal::ZERO,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sport_tag: "generic".to_string(),
            split: SplitConfig {
                strategy: SplitStrategy::WalkForward,
                min_train_size: 300,
                n_folds: 5,
                max_train_size: None,
                season_starts: Vec::new(),
                shuffle: false,
            },
            audit: AuditConfig::default(),
            models: default_models(),
            weights: WeightSearchConfig {
                initial_seeds: vec![0.40, 0.35, 0.20, 0.05],
                ..WeightSearchConfig::default()
            },
            validation: ValidationConfig::default(),
            backtest: BacktestConfig::default(),
            thresholds: VerdictThresholds::default(),
            parallel: false,
        }
    }
}

impl PipelineConfig {
    /// Checks every parameter that can be rejected without looking at data.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let split = &self.split;
        if split.n_folds == 0 {
            return Err(ConfigError::InvalidSplit("n_folds must be positive".into()));
        }
        if split.min_train_size == 0 {
            return Err(ConfigError::InvalidSplit(
                "min_train_size must be positive".into(),
            ));
        }
        if let Some(max) = split.max_train_size {
            if max < split.min_train_size {
                return Err(ConfigError::InvalidSplit(format!(
                    "max_train_size {max} is below min_train_size {}",
                    split.min_train_size
                )));
            }
        }
        if split.strategy == SplitStrategy::SeasonBased && split.season_starts.is_empty() {
            return Err(ConfigError::InvalidSplit(
                "season_based strategy needs season_starts".into(),
            ));
        }

        if !(self.audit.psi_threshold.is_finite() && self.audit.psi_threshold > 0.0) {
            return Err(ConfigError::InvalidAudit(format!(
                "psi_threshold must be positive, got {}",
                self.audit.psi_threshold
            )));
        }
        if !(self.audit.tolerance.is_finite() && self.audit.tolerance >= 0.0) {
            return Err(ConfigError::InvalidAudit(format!(
                "tolerance must be non-negative, got {}",
                self.audit.tolerance
            )));
        }

        if self.models.is_empty() {
            return Err(ConfigError::EmptyModelList);
        }
        let mut seen = HashSet::new();
        for spec in &self.models {
            if !seen.insert(spec.model_id.as_str()) {
                return Err(ConfigError::DuplicateModelId(spec.model_id.clone()));
            }
            spec.kind
                .check()
                .map_err(|reason| ConfigError::InvalidModelParams {
                    model_id: spec.model_id.clone(),
                    reason,
                })?;
        }

        if self.weights.grid_resolution == 0 || self.weights.max_candidates == 0 {
            return Err(ConfigError::NonPositiveSearchBudget);
        }
        if !self.weights.fits_budget(self.models.len()) {
            return Err(ConfigError::SearchBudgetExceeded {
                models: self.models.len(),
                resolution: self.weights.grid_resolution,
                max: self.weights.max_candidates,
            });
        }
        let seeds = &self.weights.initial_seeds;
        if !seeds.is_empty() {
            if seeds.len() != self.models.len() {
                return Err(ConfigError::InvalidInitialSeeds(format!(
                    "{} seeds for {} models",
                    seeds.len(),
                    self.models.len()
                )));
            }
            if seeds.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(ConfigError::InvalidInitialSeeds(
                    "seeds must be finite and non-negative".into(),
                ));
            }
            if seeds.iter().sum::<f64>() <= 0.0 {
                return Err(ConfigError::InvalidInitialSeeds(
                    "seeds must not all be zero".into(),
                ));
            }
        }

        if self.validation.permutation_repeats == 0 {
            return Err(ConfigError::ZeroPermutationRepeats);
        }
        if self.backtest.risk_fraction <= Decimal::ZERO {
            return Err(ConfigError::InvalidRiskFraction(self.backtest.risk_fraction));
        }
        if self.backtest.starting_bankroll <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBankroll(
                self.backtest.starting_bankroll,
            ));
        }

        Ok(())
    }
}
