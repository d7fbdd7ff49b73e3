//! Prior win rate, ignoring features.

use matchday_core::ObservationRow;

use super::estimator::{check_training_set, Estimator, FittedModel, ModelError};

#[derive(Debug, Clone, Default)]
pub struct BaseRate;

#[derive(Debug, Clone)]
struct FittedBaseRate {
    probability: f64,
}

impl FittedModel for FittedBaseRate {
    fn predict_probability(&self, _features: &[f64]) -> f64 {
        self.probability
    }
}

impl Estimator for BaseRate {
    fn name(&self) -> &'static str {
        "base_rate"
    }

    fn fit(&self, rows: &[&ObservationRow]) -> Result<Box<dyn FittedModel>, ModelError> {
        let shape = check_training_set(rows)?;
        // Laplace smoothing
        let probability = (shape.wins as f64 + 1.0) / (shape.rows as f64 + 2.0);
        Ok(Box::new(FittedBaseRate { probability }))
    }
}
