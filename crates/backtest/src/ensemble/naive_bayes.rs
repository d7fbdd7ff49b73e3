//! Gaussian naive Bayes with variance smoothing.

use matchday_core::ObservationRow;

use super::estimator::{check_training_set, Estimator, FittedModel, ModelError};

#[derive(Debug, Clone)]
pub struct GaussianNaiveBayes {
    /// Fraction of the largest feature variance added to every variance.
    pub var_smoothing: f64,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self { var_smoothing: 1e-9 }
    }
}

#[derive(Debug, Clone)]
struct ClassModel {
    log_prior: f64,
    means: Vec<f64>,
    variances: Vec<f64>,
}

impl ClassModel {
    fn log_likelihood(&self, features: &[f64]) -> f64 {
        self.log_prior
            + features
                .iter()
                .zip(self.means.iter().zip(&self.variances))
                .map(|(x, (m, v))| {
                    -0.5 * ((2.0 * std::f64::consts::PI * v).ln() + (x - m).powi(2) / v)
                })
                .sum::<f64>()
    }
}

#[derive(Debug, Clone)]
struct FittedNaiveBayes {
    win: ClassModel,
    loss: ClassModel,
}

impl FittedModel for FittedNaiveBayes {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        let lw = self.win.log_likelihood(features);
        let ll = self.loss.log_likelihood(features);
        // Posterior via log-sum-exp.
        let max = lw.max(ll);
        let pw = (lw - max).exp();
        let pl = (ll - max).exp();
        let p = pw / (pw + pl);
        if p.is_finite() {
            p
        } else {
            0.5
        }
    }
}

fn moments(rows: &[&ObservationRow], dimension: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    let mut means = vec![0.0; dimension];
    for row in rows {
        for (m, v) in means.iter_mut().zip(&row.features) {
            *m += v / n;
        }
    }
    let mut variances = vec![0.0; dimension];
    for row in rows {
        for ((s, v), m) in variances.iter_mut().zip(&row.features).zip(&means) {
            *s += (v - m).powi(2) / n;
        }
    }
    (means, variances)
}

impl Estimator for GaussianNaiveBayes {
    fn name(&self) -> &'static str {
        "naive_bayes"
    }

    fn fit(&self, rows: &[&ObservationRow]) -> Result<Box<dyn FittedModel>, ModelError> {
        let shape = check_training_set(rows)?;

        let (_, all_variances) = moments(rows, shape.dimension);
        let largest = all_variances.iter().copied().fold(0.0, f64::max);
        let epsilon = self.var_smoothing * if largest > 0.0 { largest } else { 1.0 };

        let class_model = |label: bool| -> ClassModel {
            let members: Vec<&ObservationRow> =
                rows.iter().copied().filter(|r| r.label == label).collect();
            let (means, variances) = moments(&members, shape.dimension);
            ClassModel {
                log_prior: (members.len() as f64 / shape.rows as f64).ln(),
                means,
                variances: variances.into_iter().map(|v| v + epsilon).collect(),
            }
        };

        let model = FittedNaiveBayes {
            win: class_model(true),
            loss: class_model(false),
        };

        let finite = |c: &ClassModel| {
            c.log_prior.is_finite()
                && c.means.iter().chain(&c.variances).all(|v| v.is_finite())
        };
        if !finite(&model.win) || !finite(&model.loss) {
            return Err(ModelError::NonConvergence(
                "class moments are not finite".to_string(),
            ));
        }

        Ok(Box::new(model))
    }
}
