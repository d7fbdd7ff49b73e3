//! k-nearest neighbours vote share on standardized features.

use matchday_core::ObservationRow;

use super::estimator::{check_training_set, Estimator, FittedModel, ModelError, Standardizer};

#[derive(Debug, Clone)]
pub struct NearestNeighbours {
    pub k: usize,
}

impl Default for NearestNeighbours {
    fn default() -> Self {
        Self { k: 25 }
    }
}

#[derive(Debug, Clone)]
struct FittedNeighbours {
    k: usize,
    standardizer: Standardizer,
    points: Vec<Vec<f64>>,
    labels: Vec<bool>,
}

impl FittedModel for FittedNeighbours {
    /// Laplace-smoothed share of wins among the `k` closest training rows.
    fn predict_probability(&self, features: &[f64]) -> f64 {
        let z = self.standardizer.transform(features);
        let mut distances: Vec<(f64, bool)> = self
            .points
            .iter()
            .zip(&self.labels)
            .map(|(p, &label)| {
                let d: f64 = p.iter().zip(&z).map(|(a, b)| (a - b).powi(2)).sum();
                (d, label)
            })
            .collect();

        let k = self.k.min(distances.len());
        if k < distances.len() {
            distances.select_nth_unstable_by(k, |a, b| a.0.total_cmp(&b.0));
        }
        let wins = distances[..k].iter().filter(|(_, label)| *label).count();
        (wins as f64 + 1.0) / (k as f64 + 2.0)
    }
}

impl Estimator for NearestNeighbours {
    fn name(&self) -> &'static str {
        "knn"
    }

    fn fit(&self, rows: &[&ObservationRow]) -> Result<Box<dyn FittedModel>, ModelError> {
        let shape = check_training_set(rows)?;
        let standardizer = Standardizer::fit(rows, shape.dimension);
        let points = rows
            .iter()
            .map(|r| standardizer.transform(&r.features))
            .collect();

        Ok(Box::new(FittedNeighbours {
            k: self.k,
            standardizer,
            points,
            labels: rows.iter().map(|r| r.label).collect(),
        }))
    }
}
