//! Chronological train/evaluate splitting.
//!
//! This module turns a row table into a [`SplitPlan`]: an ordered list of
//! folds where every evaluation row strictly postdates every training row of
//! the same fold. Shuffling is never performed and requests for it are
//! rejected.
//!
//! # Strategies
//!
//! 1. **Walk-forward**: the train window is everything before a cutoff; the
//!    cutoff advances by a fixed step, so the window grows.
//! 2. **Season-based**: cutoffs sit on caller-supplied season starts (train on
//!    seasons `1..k`, evaluate on season `k+1`).
//! 3. **Sliding-window**: same cutoffs as walk-forward, but the train window
//!    keeps only the most recent `max_train_size` rows.
//!
//! Cutoffs are always moved forward to the next timestamp boundary so rows
//! sharing a timestamp never straddle train and eval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use matchday_core::{ObservationRow, SplitConfig, SplitStrategy};

/// Errors raised while building a split plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    /// Not enough rows to satisfy `min_train_size` for even one fold.
    #[error("insufficient data: {rows} rows cannot provide {n_folds} folds with at least {min_train_size} training rows")]
    InsufficientData {
        /// Rows supplied.
        rows: usize,
        /// Required training rows.
        min_train_size: usize,
        /// Requested folds.
        n_folds: usize,
    },

    /// A fold's evaluation window would be empty.
    #[error("fold {fold_number} has an empty evaluation window")]
    DegenerateFold {
        /// 1-based fold number.
        fold_number: usize,
    },

    /// Shuffled splits leak future information and are never produced.
    #[error("shuffled splits are not supported by a chronological splitter")]
    ShuffleRejected,

    /// A split parameter can never produce a valid plan.
    #[error("invalid split parameter: {0}")]
    InvalidParameter(String),
}

/// One train/evaluate pair of row indices.
///
/// Indices refer to positions in the row slice passed to the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// 1-based, chronological fold number.
    pub fold_number: usize,
    /// Training row indices, in chronological order.
    pub train_indices: Vec<usize>,
    /// Evaluation row indices, in chronological order.
    pub eval_indices: Vec<usize>,
}

impl Fold {
    /// Number of training rows.
    #[must_use]
    pub fn train_len(&self) -> usize {
        self.train_indices.len()
    }

    /// Number of evaluation rows.
    #[must_use]
    pub fn eval_len(&self) -> usize {
        self.eval_indices.len()
    }

    /// Earliest and latest training timestamps.
    #[must_use]
    pub fn train_range(&self, rows: &[ObservationRow]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        time_range(rows, &self.train_indices)
    }

    /// Earliest and latest evaluation timestamps.
    #[must_use]
    pub fn eval_range(&self, rows: &[ObservationRow]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        time_range(rows, &self.eval_indices)
    }

    /// Returns true if every evaluation row strictly postdates every training row.
    #[must_use]
    pub fn is_leak_free(&self, rows: &[ObservationRow]) -> bool {
        match (self.train_range(rows), self.eval_range(rows)) {
            (Some((_, train_max)), Some((eval_min, _))) => train_max < eval_min,
            _ => false,
        }
    }
}

fn time_range(rows: &[ObservationRow], indices: &[usize]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut iter = indices.iter().filter_map(|&i| rows.get(i)).map(|r| r.timestamp);
    let first = iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
}

/// Ordered folds produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    /// Strategy that produced the plan.
    pub strategy: SplitStrategy,
    /// Folds sorted by `fold_number`.
    pub folds: Vec<Fold>,
}

impl SplitPlan {
    /// Number of folds.
    #[must_use]
    pub fn num_folds(&self) -> usize {
        self.folds.len()
    }
}

/// Chronological splitter.
#[derive(Debug, Clone)]
pub struct ChronologicalSplitter {
    config: SplitConfig,
}

impl ChronologicalSplitter {
    /// Creates a splitter, rejecting shuffled or impossible configurations.
    ///
    /// # Errors
    /// Returns [`SplitError::ShuffleRejected`] if `shuffle` is set, or
    /// [`SplitError::InvalidParameter`] for zero folds, zero training rows or
    /// a sliding window smaller than the training minimum.
    pub fn new(config: SplitConfig) -> Result<Self, SplitError> {
        if config.shuffle {
            return Err(SplitError::ShuffleRejected);
        }
        if config.n_folds == 0 {
            return Err(SplitError::InvalidParameter("n_folds must be positive".into()));
        }
        if config.min_train_size == 0 {
            return Err(SplitError::InvalidParameter(
                "min_train_size must be positive".into(),
            ));
        }
        if let Some(max) = config.max_train_size {
            if max < config.min_train_size {
                return Err(SplitError::InvalidParameter(format!(
                    "max_train_size {max} is below min_train_size {}",
                    config.min_train_size
                )));
            }
        }
        if config.strategy == SplitStrategy::SeasonBased && config.season_starts.is_empty() {
            return Err(SplitError::InvalidParameter(
                "season_based strategy needs at least one season start".into(),
            ));
        }
        Ok(Self { config })
    }

    /// Convenience constructor mirroring the `split(rows, strategy, min_train_size, n_folds)` contract.
    ///
    /// # Errors
    /// See [`ChronologicalSplitter::new`].
    pub fn with_strategy(
        strategy: SplitStrategy,
        min_train_size: usize,
        n_folds: usize,
    ) -> Result<Self, SplitError> {
        Self::new(SplitConfig {
            strategy,
            min_train_size,
            n_folds,
            max_train_size: None,
            season_starts: Vec::new(),
            shuffle: false,
        })
    }

    /// Returns the splitter configuration.
    #[must_use]
    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Builds a split plan over `rows`.
    ///
    /// Rows may arrive in any order; the splitter sorts positions by
    /// timestamp (stable) and returns indices into the original slice.
    ///
    /// # Errors
    /// Returns [`SplitError::InsufficientData`] or [`SplitError::DegenerateFold`].
    pub fn split(&self, rows: &[ObservationRow]) -> Result<SplitPlan, SplitError> {
        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by_key(|&i| rows[i].timestamp);
        let timestamps: Vec<DateTime<Utc>> = order.iter().map(|&i| rows[i].timestamp).collect();

        let windows = match self.config.strategy {
            SplitStrategy::WalkForward => self.cutoff_windows(&timestamps, None)?,
            SplitStrategy::SlidingWindow => {
                let window = self
                    .config
                    .max_train_size
                    .unwrap_or(self.config.min_train_size);
                self.cutoff_windows(&timestamps, Some(window))?
            }
            SplitStrategy::SeasonBased => self.season_windows(&timestamps)?,
        };

        let folds = windows
            .into_iter()
            .enumerate()
            .map(|(k, w)| Fold {
                fold_number: k + 1,
                train_indices: order[w.train_start..w.train_end].to_vec(),
                eval_indices: order[w.eval_start..w.eval_end].to_vec(),
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            strategy = ?self.config.strategy,
            folds = folds.len(),
            rows = rows.len(),
            "Split plan built"
        );

        Ok(SplitPlan {
            strategy: self.config.strategy,
            folds,
        })
    }

    fn insufficient(&self, rows: usize) -> SplitError {
        SplitError::InsufficientData {
            rows,
            min_train_size: self.config.min_train_size,
            n_folds: self.config.n_folds,
        }
    }

    /// Walk-forward and sliding-window cutoffs over sorted timestamps.
    fn cutoff_windows(
        &self,
        timestamps: &[DateTime<Utc>],
        max_train: Option<usize>,
    ) -> Result<Vec<Window>, SplitError> {
        let n = timestamps.len();
        let min_train = self.config.min_train_size;
        let n_folds = self.config.n_folds;

        if n <= min_train {
            return Err(self.insufficient(n));
        }
        let first_cutoff = snap_to_boundary(timestamps, min_train);
        if first_cutoff >= n {
            return Err(self.insufficient(n));
        }

        let step = (n - min_train) / n_folds;
        let mut cutoffs: Vec<usize> = (0..n_folds)
            .map(|k| snap_to_boundary(timestamps, min_train + k * step))
            .collect();
        cutoffs.push(n);

        let mut windows = Vec::with_capacity(n_folds);
        for k in 0..n_folds {
            let (eval_start, eval_end) = (cutoffs[k], cutoffs[k + 1]);
            if eval_start >= eval_end {
                return Err(SplitError::DegenerateFold { fold_number: k + 1 });
            }
            let train_start = max_train.map_or(0, |w| eval_start.saturating_sub(w));
            windows.push(Window {
                train_start,
                train_end: eval_start,
                eval_start,
                eval_end,
            });
        }

        Ok(windows)
    }

    /// Season-boundary cutoffs over sorted timestamps.
    fn season_windows(&self, timestamps: &[DateTime<Utc>]) -> Result<Vec<Window>, SplitError> {
        let n = timestamps.len();
        let mut starts = self.config.season_starts.clone();
        starts.sort();
        starts.dedup();

        let position = |boundary: DateTime<Utc>| timestamps.partition_point(|t| *t < boundary);

        let candidates: Vec<Window> = starts
            .iter()
            .enumerate()
            .filter_map(|(j, &start)| {
                let train_end = position(start);
                if train_end < self.config.min_train_size {
                    return None;
                }
                let eval_end = starts.get(j + 1).map_or(n, |&next| position(next));
                Some(Window {
                    train_start: 0,
                    train_end,
                    eval_start: train_end,
                    eval_end,
                })
            })
            .collect();

        if candidates.len() < self.config.n_folds {
            return Err(self.insufficient(n));
        }

        let windows = candidates[candidates.len() - self.config.n_folds..].to_vec();
        for (k, w) in windows.iter().enumerate() {
            if w.eval_start >= w.eval_end {
                return Err(SplitError::DegenerateFold { fold_number: k + 1 });
            }
        }

        Ok(windows)
    }
}

/// Position ranges into the sorted order.
#[derive(Debug, Clone, Copy)]
struct Window {
    train_start: usize,
    train_end: usize,
    eval_start: usize,
    eval_end: usize,
}

/// Moves `cutoff` forward until the rows on either side have distinct timestamps.
fn snap_to_boundary(timestamps: &[DateTime<Utc>], cutoff: usize) -> usize {
    let mut c = cutoff.min(timestamps.len());
    while c > 0 && c < timestamps.len() && timestamps[c] == timestamps[c - 1] {
        c += 1;
    }
    c
}

/// Builds a split plan from a config in one call.
///
/// # Errors
/// Any [`SplitError`] from construction or splitting.
pub fn split(rows: &[ObservationRow], config: &SplitConfig) -> Result<SplitPlan, SplitError> {
    ChronologicalSplitter::new(config.clone())?.split(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 9, 1, 0, 0, 0).unwrap()
    }

    fn row_at(timestamp: DateTime<Utc>) -> ObservationRow {
        ObservationRow::new(timestamp, vec![0.0], false)
    }

    fn daily_rows(count: usize) -> Vec<ObservationRow> {
        (0..count)
            .map(|i| row_at(base() + Duration::days(i as i64)))
            .collect()
    }

    /// `chunks` blocks of `per_chunk` rows, every row in a block sharing a timestamp.
    fn chunked_rows(chunks: usize, per_chunk: usize) -> Vec<ObservationRow> {
        (0..chunks * per_chunk)
            .map(|i| row_at(base() + Duration::weeks((i / per_chunk) as i64)))
            .collect()
    }

    fn config(strategy: SplitStrategy, min_train_size: usize, n_folds: usize) -> SplitConfig {
        SplitConfig {
            strategy,
            min_train_size,
            n_folds,
            max_train_size: None,
            season_starts: Vec::new(),
            shuffle: false,
        }
    }

    fn assert_leak_free(plan: &SplitPlan, rows: &[ObservationRow]) {
        for fold in &plan.folds {
            assert!(
                fold.is_leak_free(rows),
                "fold {} leaks: train {:?} eval {:?}",
                fold.fold_number,
                fold.train_range(rows),
                fold.eval_range(rows)
            );
            for idx in &fold.train_indices {
                assert!(!fold.eval_indices.contains(idx));
            }
        }
    }

    // ============================================================
    // Construction Tests
    // ============================================================

    #[test]
    fn shuffle_request_is_rejected() {
        let mut cfg = config(SplitStrategy::WalkForward, 10, 2);
        cfg.shuffle = true;
        assert_eq!(
            ChronologicalSplitter::new(cfg).unwrap_err(),
            SplitError::ShuffleRejected
        );
    }

    #[test]
    fn zero_folds_rejected() {
        let err = ChronologicalSplitter::with_strategy(SplitStrategy::WalkForward, 10, 0);
        assert!(matches!(err, Err(SplitError::InvalidParameter(_))));
    }

    #[test]
    fn season_strategy_requires_boundaries() {
        let err = ChronologicalSplitter::with_strategy(SplitStrategy::SeasonBased, 10, 1);
        assert!(matches!(err, Err(SplitError::InvalidParameter(_))));
    }

    // ============================================================
    // Walk-forward Tests
    // ============================================================

    #[test]
    fn walk_forward_ten_chunk_scenario() {
        let rows = chunked_rows(10, 100);
        let plan = split(&rows, &config(SplitStrategy::WalkForward, 300, 5)).unwrap();

        assert_eq!(plan.num_folds(), 5);
        let first = &plan.folds[0];
        let last = &plan.folds[4];
        assert!(first.train_len() >= 300);
        assert!(first.train_len() < last.train_len());
        for pair in plan.folds.windows(2) {
            assert!(pair[0].train_len() < pair[1].train_len());
        }
        assert_leak_free(&plan, &rows);
    }

    #[test]
    fn walk_forward_eval_windows_cover_tail() {
        let rows = daily_rows(100);
        let plan = split(&rows, &config(SplitStrategy::WalkForward, 40, 3)).unwrap();

        let total_eval: usize = plan.folds.iter().map(Fold::eval_len).sum();
        assert_eq!(total_eval, 60);
        assert_eq!(plan.folds[0].train_len(), 40);
        assert_eq!(plan.folds[2].eval_indices.last(), Some(&99));
    }

    #[test]
    fn walk_forward_fold_numbers_are_one_based_and_ordered() {
        let rows = daily_rows(50);
        let plan = split(&rows, &config(SplitStrategy::WalkForward, 20, 3)).unwrap();
        let numbers: Vec<usize> = plan.folds.iter().map(|f| f.fold_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn insufficient_rows_for_training_minimum() {
        let rows = daily_rows(50);
        let err = split(&rows, &config(SplitStrategy::WalkForward, 50, 2)).unwrap_err();
        assert!(matches!(err, SplitError::InsufficientData { rows: 50, .. }));
    }

    #[test]
    fn all_rows_sharing_a_timestamp_is_insufficient() {
        let rows = chunked_rows(1, 40);
        let err = split(&rows, &config(SplitStrategy::WalkForward, 10, 2)).unwrap_err();
        assert!(matches!(err, SplitError::InsufficientData { .. }));
    }

    #[test]
    fn too_many_folds_for_remaining_rows_is_degenerate() {
        let rows = daily_rows(12);
        let err = split(&rows, &config(SplitStrategy::WalkForward, 10, 3)).unwrap_err();
        assert!(matches!(err, SplitError::DegenerateFold { .. }));
    }

    #[test]
    fn cutoff_never_splits_equal_timestamps() {
        // Chunks of 7 rows; cutoff at 10 would split the second chunk.
        let rows = chunked_rows(6, 7);
        let plan = split(&rows, &config(SplitStrategy::WalkForward, 10, 2)).unwrap();
        assert_eq!(plan.folds[0].train_len(), 14);
        assert_leak_free(&plan, &rows);
    }

    #[test]
    fn unsorted_input_indices_map_back_to_original_positions() {
        let mut rows = daily_rows(30);
        rows.reverse();
        let plan = split(&rows, &config(SplitStrategy::WalkForward, 10, 2)).unwrap();

        // Earliest row sits at the end of the reversed input.
        assert_eq!(plan.folds[0].train_indices[0], 29);
        assert_leak_free(&plan, &rows);
    }

    // ============================================================
    // Sliding-window Tests
    // ============================================================

    #[test]
    fn sliding_window_keeps_fixed_train_size() {
        let rows = daily_rows(100);
        let mut cfg = config(SplitStrategy::SlidingWindow, 30, 4);
        cfg.max_train_size = Some(30);
        let plan = split(&rows, &cfg).unwrap();

        for fold in &plan.folds {
            assert_eq!(fold.train_len(), 30);
        }
        let first_start = plan.folds[0].train_range(&rows).unwrap().0;
        let last_start = plan.folds[3].train_range(&rows).unwrap().0;
        assert!(last_start > first_start);
        assert_leak_free(&plan, &rows);
    }

    #[test]
    fn sliding_window_defaults_to_min_train_size() {
        let rows = daily_rows(60);
        let plan = split(&rows, &config(SplitStrategy::SlidingWindow, 20, 2)).unwrap();
        assert!(plan.folds.iter().all(|f| f.train_len() == 20));
    }

    // ============================================================
    // Season-based Tests
    // ============================================================

    fn season_config(min_train: usize, n_folds: usize, seasons: &[i64]) -> SplitConfig {
        let mut cfg = config(SplitStrategy::SeasonBased, min_train, n_folds);
        cfg.season_starts = seasons.iter().map(|d| base() + Duration::days(*d)).collect();
        cfg
    }

    #[test]
    fn season_based_evaluates_on_following_season() {
        let rows = daily_rows(120);
        // Seasons start on days 0, 30, 60, 90.
        let plan = split(&rows, &season_config(25, 2, &[0, 30, 60, 90])).unwrap();

        assert_eq!(plan.num_folds(), 2);
        assert_eq!(plan.folds[0].train_len(), 60);
        assert_eq!(plan.folds[0].eval_len(), 30);
        assert_eq!(plan.folds[1].train_len(), 90);
        assert_eq!(plan.folds[1].eval_len(), 30);
        assert_leak_free(&plan, &rows);
    }

    #[test]
    fn season_based_insufficient_when_too_few_qualifying_seasons() {
        let rows = daily_rows(60);
        let err = split(&rows, &season_config(40, 2, &[30, 45])).unwrap_err();
        assert!(matches!(err, SplitError::InsufficientData { .. }));
    }

    #[test]
    fn season_after_last_row_is_degenerate() {
        let rows = daily_rows(60);
        let err = split(&rows, &season_config(10, 2, &[30, 200])).unwrap_err();
        assert_eq!(err, SplitError::DegenerateFold { fold_number: 2 });
    }

    // ============================================================
    // Property: no leakage across random orderings and parameters
    // ============================================================

    #[test]
    fn no_fold_ever_leaks_under_random_inputs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut produced = 0;

        for _ in 0..200 {
            let n = rng.gen_range(20..300);
            let mut rows: Vec<ObservationRow> = (0..n)
                .map(|_| row_at(base() + Duration::hours(rng.gen_range(0..500))))
                .collect();
            rows.shuffle(&mut rng);

            let strategy = match rng.gen_range(0..3) {
                0 => SplitStrategy::WalkForward,
                1 => SplitStrategy::SlidingWindow,
                _ => SplitStrategy::SeasonBased,
            };
            let mut cfg = config(strategy, rng.gen_range(1..n), rng.gen_range(1..6));
            if strategy == SplitStrategy::SlidingWindow {
                cfg.max_train_size = Some(cfg.min_train_size + rng.gen_range(0..20));
            }
            if strategy == SplitStrategy::SeasonBased {
                cfg.season_starts = (0..rng.gen_range(1..8))
                    .map(|_| base() + Duration::hours(rng.gen_range(0..500)))
                    .collect();
            }

            if let Ok(plan) = split(&rows, &cfg) {
                produced += 1;
                assert_eq!(plan.num_folds(), cfg.n_folds);
                assert_leak_free(&plan, &rows);
                for fold in &plan.folds {
                    assert!(fold.train_len() >= cfg.min_train_size);
                    assert!(fold.eval_len() > 0);
                }
            }
        }

        assert!(produced > 20, "only {produced} plans were produced");
    }

    #[test]
    fn fold_serializes_with_explicit_number() {
        let fold = Fold {
            fold_number: 3,
            train_indices: vec![0, 1],
            eval_indices: vec![2],
        };
        let json = serde_json::to_string(&fold).unwrap();
        assert!(json.contains("\"fold_number\":3"));
    }
}
