//! Numerical helpers shared by the validator and the backtest summary.

/// Lower clamp bound applied to probabilities before any logarithm.
pub const PROBABILITY_EPSILON: f64 = 1e-15;

/// Clamps a probability to `[ε, 1 − ε]` so log loss stays finite.
///
/// Applied uniformly to every probability entering a log-loss computation.
#[must_use]
pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)
}

/// Mean binary cross-entropy of `probabilities` against `labels`.
///
/// Returns `f64::NAN` for empty input. Lengths are assumed equal; extra
/// elements on either side are ignored.
#[must_use]
pub fn log_loss(probabilities: &[f64], labels: &[bool]) -> f64 {
    let n = probabilities.len().min(labels.len());
    if n == 0 {
        return f64::NAN;
    }
    let total: f64 = probabilities
        .iter()
        .zip(labels)
        .map(|(&p, &y)| {
            let p = clamp_probability(p);
            if y {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / n as f64
}

/// Calculates the Wilson score confidence interval for a proportion.
///
/// The Wilson score interval is preferred over the normal approximation
/// because it has better coverage properties, especially for proportions
/// near 0 or 1, and for small sample sizes.
///
/// # Formula
/// ```text
/// CI = (p + z^2/(2n) +/- z * sqrt(p(1-p)/n + z^2/(4n^2))) / (1 + z^2/n)
/// ```
///
/// # Examples
/// ```
/// use matchday_core::stats::wilson_ci;
///
/// let (lower, upper) = wilson_ci(50, 100, 1.96);
/// assert!(lower > 0.39 && lower < 0.41);
/// assert!(upper > 0.59 && upper < 0.61);
/// ```
#[must_use]
pub fn wilson_ci(wins: usize, n: usize, z: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }

    let n_f = n as f64;
    let p = wins as f64 / n_f;
    let z_sq = z * z;

    let denominator = 1.0 + z_sq / n_f;
    let center = p + z_sq / (2.0 * n_f);

    // Under the square root: p(1-p)/n + z^2/(4n^2)
    let variance_term = p * (1.0 - p) / n_f;
    let correction_term = z_sq / (4.0 * n_f * n_f);
    let spread = z * (variance_term + correction_term).sqrt();

    let lower = (center - spread) / denominator;
    let upper = (center + spread) / denominator;

    (lower.max(0.0), upper.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================
    // clamp_probability / log_loss Tests
    // ============================================

    #[test]
    fn clamp_keeps_interior_values() {
        assert_eq!(clamp_probability(0.3), 0.3);
    }

    #[test]
    fn clamp_pulls_extremes_inside() {
        assert_eq!(clamp_probability(0.0), PROBABILITY_EPSILON);
        assert_eq!(clamp_probability(1.0), 1.0 - PROBABILITY_EPSILON);
    }

    #[test]
    fn log_loss_is_finite_for_certain_wrong_predictions() {
        let loss = log_loss(&[1.0, 0.0], &[false, true]);
        assert!(loss.is_finite());
        assert!(loss > 30.0);
    }

    #[test]
    fn log_loss_of_coin_flip_is_ln2() {
        let loss = log_loss(&[0.5, 0.5, 0.5, 0.5], &[true, false, true, false]);
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn log_loss_empty_is_nan() {
        assert!(log_loss(&[], &[]).is_nan());
    }

    // ============================================
    // wilson_ci Tests
    // ============================================

    #[test]
    fn wilson_ci_50_percent_approximately_40_60() {
        let (lower, upper) = wilson_ci(50, 100, 1.96);
        assert!(lower > 0.39 && lower < 0.42, "lower was {lower}");
        assert!(upper > 0.58 && upper < 0.61, "upper was {upper}");
    }

    #[test]
    fn wilson_ci_zero_wins() {
        let (lower, upper) = wilson_ci(0, 20, 1.96);
        assert_eq!(lower, 0.0);
        assert!(upper > 0.0 && upper < 0.2);
    }

    #[test]
    fn wilson_ci_all_wins() {
        let (lower, upper) = wilson_ci(20, 20, 1.96);
        assert!(lower > 0.8);
        assert!((upper - 1.0).abs() < 1e-12);
    }

    #[test]
    fn wilson_ci_zero_samples() {
        assert_eq!(wilson_ci(0, 0, 1.96), (0.0, 0.0));
    }
}
