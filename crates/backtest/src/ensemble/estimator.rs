//! Capability interface shared by every model family.

use std::fmt::Debug;

use thiserror::Error;

use matchday_core::ObservationRow;

/// Reasons a model could not be fitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("training labels contain a single class")]
    SingleClass,

    #[error("feature dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("fit did not converge: {0}")]
    NonConvergence(String),
}

/// An untrained model family.
pub trait Estimator: Send + Sync {
    /// Family name, e.g. "logistic".
    fn name(&self) -> &'static str;

    /// Fits the model on training rows.
    ///
    /// # Errors
    /// Returns a [`ModelError`] when the rows cannot support a fit.
    fn fit(&self, rows: &[&ObservationRow]) -> Result<Box<dyn FittedModel>, ModelError>;
}

/// A fitted model that maps a feature vector to a win probability.
pub trait FittedModel: Send + Sync + Debug {
    /// Win probability in [0, 1].
    fn predict_probability(&self, features: &[f64]) -> f64;
}

/// Label counts and dimension of a usable training set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrainingShape {
    pub rows: usize,
    pub wins: usize,
    pub dimension: usize,
}

/// Rejects empty, single-class or ragged training sets.
pub(crate) fn check_training_set(rows: &[&ObservationRow]) -> Result<TrainingShape, ModelError> {
    let first = rows.first().ok_or(ModelError::EmptyTrainingSet)?;
    let dimension = first.dimension();

    if let Some(bad) = rows.iter().find(|r| r.dimension() != dimension) {
        return Err(ModelError::DimensionMismatch {
            expected: dimension,
            found: bad.dimension(),
        });
    }

    let wins = rows.iter().filter(|r| r.label).count();
    if wins == 0 || wins == rows.len() {
        return Err(ModelError::SingleClass);
    }

    Ok(TrainingShape {
        rows: rows.len(),
        wins,
        dimension,
    })
}

/// Per-feature z-scoring fitted on training rows.
///
/// Zero-variance features are centred but not scaled.
#[derive(Debug, Clone)]
pub(crate) struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[&ObservationRow], dimension: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; dimension];
        for row in rows {
            for (m, v) in means.iter_mut().zip(&row.features) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut scales = vec![0.0; dimension];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(&row.features).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut scales {
            let std = (*s / n).sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        Self { means, scales }
    }

    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
