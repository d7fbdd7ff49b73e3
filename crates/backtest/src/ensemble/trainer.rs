//! Fits every configured model on a fold's training rows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use matchday_core::{ModelKind, ModelSpec, ObservationRow};

use super::base_rate::BaseRate;
use super::estimator::{Estimator, FittedModel};
use super::knn::NearestNeighbours;
use super::logistic::LogisticRegression;
use super::naive_bayes::GaussianNaiveBayes;

/// Whether a model can contribute to the blend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Available,
    Unavailable { reason: String },
}

/// A model fitted for one fold, or the reason it could not be.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model_id: String,
    pub family: &'static str,
    pub status: ModelStatus,
    fitted: Option<Arc<dyn FittedModel>>,
}

impl TrainedModel {
    /// Wraps an already-fitted model.
    #[must_use]
    pub fn available(model_id: &str, family: &'static str, fitted: Arc<dyn FittedModel>) -> Self {
        Self {
            model_id: model_id.to_string(),
            family,
            status: ModelStatus::Available,
            fitted: Some(fitted),
        }
    }

    #[must_use]
    pub fn unavailable(model_id: &str, family: &'static str, reason: impl Into<String>) -> Self {
        Self {
            model_id: model_id.to_string(),
            family,
            status: ModelStatus::Unavailable {
                reason: reason.into(),
            },
            fitted: None,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.fitted.is_some()
    }

    /// Win probability, or `None` for an unavailable model.
    #[must_use]
    pub fn predict_probability(&self, features: &[f64]) -> Option<f64> {
        self.fitted
            .as_ref()
            .map(|m| m.predict_probability(features))
    }
}

/// Creates the estimator for a model family.
#[must_use]
pub fn build_estimator(kind: &ModelKind) -> Box<dyn Estimator> {
    match *kind {
        ModelKind::Logistic {
            learning_rate,
            max_iterations,
            l2,
        } => Box::new(LogisticRegression {
            learning_rate,
            max_iterations,
            l2,
        }),
        ModelKind::NaiveBayes { var_smoothing } => Box::new(GaussianNaiveBayes { var_smoothing }),
        ModelKind::Knn { k } => Box::new(NearestNeighbours { k }),
        ModelKind::BaseRate => Box::new(BaseRate),
    }
}

/// Trains one model per spec, in spec order.
#[derive(Debug, Clone)]
pub struct EnsembleTrainer {
    specs: Vec<ModelSpec>,
}

impl EnsembleTrainer {
    #[must_use]
    pub fn new(specs: Vec<ModelSpec>) -> Self {
        Self { specs }
    }

    #[must_use]
    pub fn specs(&self) -> &[ModelSpec] {
        &self.specs
    }

    /// Fits every model independently on `train_rows`.
    ///
    /// Fit failures never propagate: the model is recorded as unavailable.
    #[must_use]
    pub fn train(&self, train_rows: &[&ObservationRow]) -> Vec<TrainedModel> {
        self.specs
            .iter()
            .map(|spec| {
                let estimator = build_estimator(&spec.kind);
                match estimator.fit(train_rows) {
                    Ok(fitted) => {
                        tracing::debug!(model_id = %spec.model_id, family = estimator.name(), "Model fitted");
                        TrainedModel::available(&spec.model_id, estimator.name(), Arc::from(fitted))
                    }
                    Err(e) => {
                        tracing::warn!(model_id = %spec.model_id, error = %e, "Model unavailable");
                        TrainedModel::unavailable(&spec.model_id, estimator.name(), e.to_string())
                    }
                }
            })
            .collect()
    }
}
