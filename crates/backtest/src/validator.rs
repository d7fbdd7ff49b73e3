//! Statistical validation of out-of-sample probabilities.
//!
//! Scores one fold's blended probabilities against realized outcomes:
//! Brier score, log loss, ROC-AUC, accuracy, a ten-bin calibration table and
//! a label-permutation significance test.
//!
//! The permutation test is seeded, so the same inputs and seed always yield
//! the same p-value.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use matchday_core::{log_loss, ValidationConfig};

/// Calibration bins are centred on 0.0, 0.1, ..., 1.0.
const CALIBRATION_BINS: usize = 11;
const BIN_HALF_WIDTH: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{probabilities} probabilities for {labels} labels")]
    LengthMismatch { probabilities: usize, labels: usize },

    #[error("no predictions to validate")]
    EmptyInput,

    #[error("permutation test needs at least one repeat")]
    ZeroRepeats,

    #[error("probability {value} at index {index} is not in [0, 1]")]
    InvalidProbability { index: usize, value: f64 },
}

/// One reliability-diagram bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub midpoint: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub observed_rate: f64,
}

/// Scores for one set of predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub samples: usize,
    pub brier_score: f64,
    pub log_loss: f64,
    /// `None` when only one class is present.
    pub roc_auc: Option<f64>,
    pub accuracy: f64,
    /// Non-empty bins only, ascending.
    pub calibration: Vec<CalibrationBin>,
    pub permutation_p_value: f64,
    pub permutation_repeats: usize,
}

#[derive(Debug, Clone)]
pub struct StatisticalValidator {
    config: ValidationConfig,
}

impl StatisticalValidator {
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Scores `probabilities` against `labels`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for mismatched lengths, empty input,
    /// zero permutation repeats or probabilities outside [0, 1].
    pub fn validate(
        &self,
        probabilities: &[f64],
        labels: &[bool],
    ) -> Result<ValidationReport, ValidationError> {
        if probabilities.len() != labels.len() {
            return Err(ValidationError::LengthMismatch {
                probabilities: probabilities.len(),
                labels: labels.len(),
            });
        }
        if probabilities.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        if self.config.permutation_repeats == 0 {
            return Err(ValidationError::ZeroRepeats);
        }
        if let Some((index, &value)) = probabilities
            .iter()
            .enumerate()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(ValidationError::InvalidProbability { index, value });
        }

        let real_log_loss = log_loss(probabilities, labels);
        let report = ValidationReport {
            samples: probabilities.len(),
            brier_score: brier_score(probabilities, labels),
            log_loss: real_log_loss,
            roc_auc: roc_auc(probabilities, labels),
            accuracy: accuracy(probabilities, labels),
            calibration: calibration_bins(probabilities, labels),
            permutation_p_value: self.permutation_p_value(probabilities, labels, real_log_loss),
            permutation_repeats: self.config.permutation_repeats,
        };

        tracing::debug!(
            samples = report.samples,
            brier = report.brier_score,
            p_value = report.permutation_p_value,
            "Predictions validated"
        );
        Ok(report)
    }

    /// Fraction of label shuffles whose log loss is at or below the real one.
    fn permutation_p_value(&self, probabilities: &[f64], labels: &[bool], real: f64) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
        let mut shuffled = labels.to_vec();
        let repeats = self.config.permutation_repeats;

        let at_least_as_good = (0..repeats)
            .filter(|_| {
                shuffled.shuffle(&mut rng);
                log_loss(probabilities, &shuffled) <= real
            })
            .count();

        at_least_as_good as f64 / repeats as f64
    }
}

/// Mean squared error between probability and outcome.
#[must_use]
pub fn brier_score(probabilities: &[f64], labels: &[bool]) -> f64 {
    let n = probabilities.len().min(labels.len());
    if n == 0 {
        return f64::NAN;
    }
    probabilities
        .iter()
        .zip(labels)
        .map(|(p, &y)| (p - if y { 1.0 } else { 0.0 }).powi(2))
        .sum::<f64>()
        / n as f64
}

/// Share of predictions on the right side of 0.5.
#[must_use]
pub fn accuracy(probabilities: &[f64], labels: &[bool]) -> f64 {
    let n = probabilities.len().min(labels.len());
    if n == 0 {
        return f64::NAN;
    }
    let correct = probabilities
        .iter()
        .zip(labels)
        .filter(|&(&p, &y)| (p >= 0.5) == y)
        .count();
    correct as f64 / n as f64
}

/// Area under the ROC curve via the Mann-Whitney U statistic.
///
/// Tied scores receive their average rank. Returns `None` unless both
/// classes are present.
#[must_use]
pub fn roc_auc(probabilities: &[f64], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&y| y).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut ranks = vec![0.0; order.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && probabilities[order[end]] == probabilities[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1 ..= end share their mean.
        let average = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = average;
        }
        start = end;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|&(_, &y)| y)
        .map(|(r, _)| r)
        .sum();
    let p = positives as f64;
    let u = positive_rank_sum - p * (p + 1.0) / 2.0;
    Some(u / (p * negatives as f64))
}

/// Ten-point calibration table; bin `k` covers `[k/10 - 0.05, k/10 + 0.05)`.
#[must_use]
pub fn calibration_bins(probabilities: &[f64], labels: &[bool]) -> Vec<CalibrationBin> {
    let mut counts = [0usize; CALIBRATION_BINS];
    let mut predicted = [0.0f64; CALIBRATION_BINS];
    let mut wins = [0usize; CALIBRATION_BINS];

    for (&p, &y) in probabilities.iter().zip(labels) {
        let k = ((p * 10.0).round().max(0.0) as usize).min(CALIBRATION_BINS - 1);
        counts[k] += 1;
        predicted[k] += p;
        if y {
            wins[k] += 1;
        }
    }

    (0..CALIBRATION_BINS)
        .filter(|&k| counts[k] > 0)
        .map(|k| {
            let midpoint = k as f64 / 10.0;
            CalibrationBin {
                lower: (midpoint - BIN_HALF_WIDTH).max(0.0),
                upper: (midpoint + BIN_HALF_WIDTH).min(1.0),
                midpoint,
                count: counts[k],
                mean_predicted: predicted[k] / counts[k] as f64,
                observed_rate: wins[k] as f64 / counts[k] as f64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn validator(repeats: usize, seed: u64) -> StatisticalValidator {
        StatisticalValidator::new(ValidationConfig {
            permutation_repeats: repeats,
            random_seed: seed,
        })
    }

    // ============================================
    // Metric Tests
    // ============================================

    #[test]
    fn brier_of_perfect_and_coin_flip() {
        assert_eq!(brier_score(&[1.0, 0.0], &[true, false]), 0.0);
        assert!((brier_score(&[0.5, 0.5], &[true, false]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn accuracy_uses_half_threshold() {
        let acc = accuracy(&[0.5, 0.49, 0.8, 0.2], &[true, true, false, false]);
        assert!((acc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn auc_perfect_ranking_is_one() {
        let auc = roc_auc(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true]).unwrap();
        assert!((auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn auc_all_ties_is_half() {
        let auc = roc_auc(&[0.5; 4], &[true, false, true, false]).unwrap();
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn auc_partial_ties_use_average_rank() {
        // Pairs (pos, neg): (0.6 vs 0.6) ties count half, (0.6 vs 0.2) wins.
        let auc = roc_auc(&[0.6, 0.6, 0.2], &[true, false, false]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn auc_undefined_for_single_class() {
        assert_eq!(roc_auc(&[0.3, 0.7], &[true, true]), None);
    }

    // ============================================
    // Calibration Tests
    // ============================================

    #[test]
    fn seventy_percent_predictions_land_in_centred_bin() {
        // 100 predictions of 0.7 with 70 wins.
        let probabilities = vec![0.7; 100];
        let labels: Vec<bool> = (0..100).map(|i| i < 70).collect();

        let bins = calibration_bins(&probabilities, &labels);
        assert_eq!(bins.len(), 1);
        let bin = &bins[0];
        assert!((bin.lower - 0.65).abs() < 1e-12);
        assert!((bin.upper - 0.75).abs() < 1e-12);
        assert!((bin.midpoint - 0.70).abs() < 1e-12);
        assert_eq!(bin.count, 100);
        assert!((bin.mean_predicted - 0.7).abs() < 1e-12);
        assert!((bin.observed_rate - 0.70).abs() < 1e-12);
    }

    #[test]
    fn sixty_eight_wins_at_seventy_percent_is_well_calibrated() {
        let probabilities = vec![0.7; 100];
        let labels: Vec<bool> = (0..100).map(|i| i % 25 < 17).collect();

        let bins = calibration_bins(&probabilities, &labels);
        assert_eq!(bins.len(), 1);
        let bin = &bins[0];
        assert!((bin.lower - 0.65).abs() < 1e-12);
        assert!((bin.upper - 0.75).abs() < 1e-12);
        assert_eq!(bin.count, 100);
        assert!((bin.observed_rate - 0.68).abs() < 1e-12);
        assert!((bin.observed_rate - bin.midpoint).abs() <= 0.02 + 1e-12);
    }

    #[test]
    fn edge_bins_are_clipped_to_unit_interval() {
        let bins = calibration_bins(&[0.0, 0.02, 1.0], &[false, false, true]);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].lower, 0.0);
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[1].upper, 1.0);
        assert_eq!(bins[1].midpoint, 1.0);
    }

    // ============================================
    // Validation Errors
    // ============================================

    #[test]
    fn mismatched_lengths_rejected() {
        let err = validator(10, 1).validate(&[0.5], &[true, false]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::LengthMismatch {
                probabilities: 1,
                labels: 2
            }
        );
    }

    #[test]
    fn empty_input_rejected() {
        assert_eq!(
            validator(10, 1).validate(&[], &[]).unwrap_err(),
            ValidationError::EmptyInput
        );
    }

    #[test]
    fn zero_repeats_rejected() {
        assert_eq!(
            validator(0, 1).validate(&[0.5], &[true]).unwrap_err(),
            ValidationError::ZeroRepeats
        );
    }

    #[test]
    fn out_of_range_probability_rejected() {
        let err = validator(10, 1).validate(&[0.5, 1.5], &[true, false]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidProbability { index: 1, .. }));
    }

    // ============================================
    // Permutation Test
    // ============================================

    #[test]
    fn permutation_test_is_deterministic_for_a_seed() {
        let probabilities: Vec<f64> = (0..50).map(|i| (i % 10) as f64 / 10.0).collect();
        let labels: Vec<bool> = (0..50).map(|i| i % 3 == 0).collect();

        let a = validator(200, 9).validate(&probabilities, &labels).unwrap();
        let b = validator(200, 9).validate(&probabilities, &labels).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn informative_predictions_are_significant() {
        let labels: Vec<bool> = (0..200).map(|i| i % 2 == 0).collect();
        let probabilities: Vec<f64> = labels.iter().map(|&y| if y { 0.8 } else { 0.2 }).collect();

        let report = validator(500, 3).validate(&probabilities, &labels).unwrap();
        assert!(report.permutation_p_value < 0.01);
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn noise_predictions_are_rarely_significant() {
        // p-values are uniform under the null, so about 5% of trials land
        // at or below 0.05.
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let trials = 200;
        let mut insignificant = 0;

        for trial in 0..trials {
            let probabilities: Vec<f64> = (0..100).map(|_| rng.gen_range(0.05..0.95)).collect();
            let labels: Vec<bool> = (0..100).map(|_| rng.gen_bool(0.5)).collect();

            let report = validator(200, trial).validate(&probabilities, &labels).unwrap();
            if report.permutation_p_value > 0.05 {
                insignificant += 1;
            }
        }

        assert!(
            insignificant * 100 >= trials * 95,
            "only {insignificant} of {trials} noise trials were insignificant"
        );
    }
}
