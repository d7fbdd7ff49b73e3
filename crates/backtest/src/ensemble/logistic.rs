//! L2-regularized logistic regression fitted by batch gradient descent.

use matchday_core::ObservationRow;

use super::estimator::{
    check_training_set, sigmoid, Estimator, FittedModel, ModelError, Standardizer,
};

/// Gradient norm below which descent stops early.
const GRADIENT_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub max_iterations: usize,
    pub l2: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iterations: 500,
            l2: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
struct FittedLogistic {
    standardizer: Standardizer,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl FittedModel for FittedLogistic {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        let z = self.standardizer.transform(features);
        let logit = self.intercept
            + self
                .coefficients
                .iter()
                .zip(&z)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        sigmoid(logit)
    }
}

impl Estimator for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn fit(&self, rows: &[&ObservationRow]) -> Result<Box<dyn FittedModel>, ModelError> {
        let shape = check_training_set(rows)?;
        let standardizer = Standardizer::fit(rows, shape.dimension);
        let xs: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| standardizer.transform(&r.features))
            .collect();
        let ys: Vec<f64> = rows.iter().map(|r| if r.label { 1.0 } else { 0.0 }).collect();
        let n = shape.rows as f64;

        let mut coefficients = vec![0.0; shape.dimension];
        let mut intercept = 0.0;

        for _ in 0..self.max_iterations {
            let mut grad_w = vec![0.0; shape.dimension];
            let mut grad_b = 0.0;

            for (x, y) in xs.iter().zip(&ys) {
                let logit = intercept + coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
                let residual = sigmoid(logit) - y;
                grad_b += residual;
                for (g, v) in grad_w.iter_mut().zip(x) {
                    *g += residual * v;
                }
            }

            let mut norm = (grad_b / n).powi(2);
            for (g, w) in grad_w.iter_mut().zip(&coefficients) {
                *g = *g / n + self.l2 * w;
                norm += g.powi(2);
            }

            intercept -= self.learning_rate * grad_b / n;
            for (w, g) in coefficients.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * g;
            }

            if norm.sqrt() < GRADIENT_TOLERANCE {
                break;
            }
        }

        if !intercept.is_finite() || coefficients.iter().any(|w| !w.is_finite()) {
            return Err(ModelError::NonConvergence(
                "logistic coefficients are not finite".to_string(),
            ));
        }

        Ok(Box::new(FittedLogistic {
            standardizer,
            coefficients,
            intercept,
        }))
    }
}
