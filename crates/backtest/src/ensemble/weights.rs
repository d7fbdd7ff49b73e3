//! Blend weight search over the probability simplex.
//!
//! Every composition of `grid_resolution` units across the available models
//! is scored by the log loss of the blended probability on the evaluation
//! rows. Grid points are generated one at a time and only the running best
//! is kept, so memory stays flat in the grid size; `max_candidates` bounds
//! the work. Configured initial seeds are scored alongside the grid after
//! being renormalized over the available models. Unavailable models always
//! get 0.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use matchday_core::{log_loss, ObservationRow, WeightSearchConfig};

use super::trainer::TrainedModel;

/// Candidates whose objective is within this distance of the best are tied.
const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeightError {
    #[error("no model is available for weighting")]
    NoAvailableModels,

    #[error("evaluation set is empty")]
    EmptyEvaluationSet,

    #[error("weight grid for {models} models exceeds {max} candidates")]
    BudgetExceeded { models: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeight {
    pub model_id: String,
    pub weight: f64,
}

/// Non-negative weights summing to one, in model order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub weights: Vec<ModelWeight>,
    /// Log loss of the chosen blend on the evaluation rows.
    pub objective: f64,
    pub candidates_evaluated: usize,
}

impl EnsembleWeights {
    /// Weight for `model_id`, 0.0 if unknown.
    #[must_use]
    pub fn weight_of(&self, model_id: &str) -> f64 {
        self.weights
            .iter()
            .find(|w| w.model_id == model_id)
            .map_or(0.0, |w| w.weight)
    }

    /// Blended probability for one feature vector.
    ///
    /// `models` must be in the same order the weights were produced for.
    #[must_use]
    pub fn blend(&self, models: &[TrainedModel], features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(models)
            .filter(|(w, _)| w.weight > 0.0)
            .filter_map(|(w, m)| m.predict_probability(features).map(|p| w.weight * p))
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }
}

/// Searches blend weights for a fold's trained models.
#[derive(Debug, Clone)]
pub struct WeightOptimizer {
    config: WeightSearchConfig,
}

impl WeightOptimizer {
    #[must_use]
    pub fn new(config: WeightSearchConfig) -> Self {
        Self { config }
    }

    /// Chooses weights minimizing log loss on `eval_rows`.
    ///
    /// Ties within 1e-9 of the running best go to the candidate closest to
    /// uniform.
    ///
    /// # Errors
    /// [`WeightError::NoAvailableModels`] if every model is unavailable,
    /// [`WeightError::EmptyEvaluationSet`] if `eval_rows` is empty, and
    /// [`WeightError::BudgetExceeded`] if the grid is larger than
    /// `max_candidates`.
    pub fn optimize(
        &self,
        models: &[TrainedModel],
        eval_rows: &[&ObservationRow],
    ) -> Result<EnsembleWeights, WeightError> {
        let available: Vec<usize> = models
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_available())
            .map(|(i, _)| i)
            .collect();

        if available.is_empty() {
            return Err(WeightError::NoAvailableModels);
        }
        if eval_rows.is_empty() {
            return Err(WeightError::EmptyEvaluationSet);
        }
        if !self.config.fits_budget(available.len()) {
            return Err(WeightError::BudgetExceeded {
                models: available.len(),
                max: self.config.max_candidates,
            });
        }

        let labels: Vec<bool> = eval_rows.iter().map(|r| r.label).collect();
        // predictions[j][r]: available model j on eval row r
        let predictions: Vec<Vec<f64>> = available
            .iter()
            .map(|&i| {
                eval_rows
                    .iter()
                    .map(|r| models[i].predict_probability(&r.features).unwrap_or(0.5))
                    .collect()
            })
            .collect();

        let mut blended = vec![0.0; eval_rows.len()];
        let mut score = |candidate: &[f64]| -> f64 {
            for (r, slot) in blended.iter_mut().enumerate() {
                *slot = candidate
                    .iter()
                    .zip(&predictions)
                    .map(|(w, p)| w * p[r])
                    .sum::<f64>();
            }
            log_loss(&blended, &labels)
        };

        let seed = if available.len() == 1 {
            None
        } else {
            self.seed_candidate(models.len(), &available)
        };
        let candidates = SimplexGrid::new(available.len(), self.config.grid_resolution).chain(seed);

        let mut best: Option<Best> = None;
        let mut evaluated = 0usize;
        for candidate in candidates {
            evaluated += 1;
            let objective = score(&candidate);
            if objective.is_nan() {
                continue;
            }
            let spread = variance(&candidate);
            let replace = best.as_ref().map_or(true, |b| {
                objective < b.objective - TIE_TOLERANCE
                    || (objective <= b.objective + TIE_TOLERANCE && spread < b.spread)
            });
            if replace {
                best = Some(Best {
                    objective,
                    spread,
                    weights: candidate,
                });
            }
        }

        let best = best.ok_or(WeightError::NoAvailableModels)?;

        let mut weights: Vec<ModelWeight> = models
            .iter()
            .map(|m| ModelWeight {
                model_id: m.model_id.clone(),
                weight: 0.0,
            })
            .collect();
        for (&i, &w) in available.iter().zip(&best.weights) {
            weights[i].weight = w;
        }

        tracing::debug!(
            candidates = evaluated,
            objective = best.objective,
            "Weight search finished"
        );

        Ok(EnsembleWeights {
            weights,
            objective: best.objective,
            candidates_evaluated: evaluated,
        })
    }

    /// Configured seeds restricted to the available models and renormalized.
    fn seed_candidate(&self, model_count: usize, available: &[usize]) -> Option<Vec<f64>> {
        let seeds = &self.config.initial_seeds;
        if seeds.len() != model_count {
            return None;
        }
        let kept: Vec<f64> = available.iter().map(|&i| seeds[i].max(0.0)).collect();
        let total: f64 = kept.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        Some(kept.into_iter().map(|w| w / total).collect())
    }
}

struct Best {
    objective: f64,
    spread: f64,
    weights: Vec<f64>,
}

/// Every weight vector of `k` components in steps of `1 / resolution`,
/// generated lazily in lexicographic order of the leading components.
struct SimplexGrid {
    /// Units per component; the last holds the remainder.
    units: Vec<usize>,
    resolution: usize,
    done: bool,
}

impl SimplexGrid {
    fn new(k: usize, resolution: usize) -> Self {
        let resolution = resolution.max(1);
        let mut units = vec![0; k.max(1)];
        if let Some(last) = units.last_mut() {
            *last = resolution;
        }
        Self {
            units,
            resolution,
            done: false,
        }
    }

    /// Moves to the next composition, or marks the grid exhausted.
    fn step(&mut self) {
        let last = self.units.len() - 1;
        let mut prefix = 0;
        let mut pivot = None;
        for j in 0..last {
            prefix += self.units[j];
            if prefix < self.resolution {
                pivot = Some((j, prefix));
            }
        }
        match pivot {
            Some((j, prefix)) => {
                self.units[j] += 1;
                for u in &mut self.units[j + 1..last] {
                    *u = 0;
                }
                self.units[last] = self.resolution - prefix - 1;
            }
            None => self.done = true,
        }
    }
}

impl Iterator for SimplexGrid {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Vec<f64>> {
        if self.done {
            return None;
        }
        let scale = self.resolution as f64;
        let point = self.units.iter().map(|&u| u as f64 / scale).collect();
        self.step();
        Some(point)
    }
}

fn variance(weights: &[f64]) -> f64 {
    let n = weights.len() as f64;
    let mean = weights.iter().sum::<f64>() / n;
    weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n
}
