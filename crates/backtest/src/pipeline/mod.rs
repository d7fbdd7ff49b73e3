//! Pipeline orchestration.
//!
//! A run is a [`PipelineRun`] value threaded through
//! [`PipelineOrchestrator::advance`], one state at a time:
//!
//! ```text
//! Loaded -> FeaturesReady -> Split -> Audited -> Trained -> Weighted
//!        -> Validated -> Backtested -> Reported
//! ```
//!
//! Any pipeline-level error moves the run to `Failed`, tagged with the state
//! the failed transition was producing. Fold-level problems
//! (no usable model, a validation or backtest error, cancellation) are
//! recorded on the fold and never fail the run.
//!
//! A run remembers the configuration that first advanced it. Advancing it
//! with an orchestrator built from a different configuration fails with
//! [`PipelineError::ConfigChanged`]; [`PipelineRun::reset`] clears it.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = PipelineOrchestrator::new(config)?;
//! let mut run = PipelineRun::new(rows);
//! while !run.is_terminal() {
//!     run = orchestrator.advance(run);
//! }
//! let report = run.into_report()?;
//! ```

pub mod fold;
pub mod outcome;

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use matchday_core::{ConfigError, Dataset, DatasetError, ObservationRow, PipelineConfig};

use crate::audit::{AuditError, AuditResult, FeatureRecomputer, LeakageAuditor};
use crate::engine::{BacktestEngine, BacktestError};
use crate::ensemble::{EnsembleTrainer, WeightOptimizer};
use crate::ledger::{CombinedLedger, FoldLedger};
use crate::split::{ChronologicalSplitter, SplitError, SplitPlan};
use crate::validator::StatisticalValidator;

pub use fold::{FoldFailure, FoldProgress};
pub use outcome::{FoldReport, ModelSummary, PipelineReport, Verdict, VerdictChecks};

/// Errors that stop the whole run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid data: {0}")]
    Data(#[from] DatasetError),

    #[error("split failed: {0}")]
    Split(#[from] SplitError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("backtest setup failed: {0}")]
    Backtest(#[from] BacktestError),

    #[error("run stopped at {0} before a report was produced")]
    Incomplete(Stage),

    #[error("run was started under a different configuration; reset it first")]
    ConfigChanged,
}

/// Name of a pipeline state, for logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loaded,
    FeaturesReady,
    Split,
    Audited,
    Trained,
    Weighted,
    Validated,
    Backtested,
    Reported,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::FeaturesReady => "features_ready",
            Self::Split => "split",
            Self::Audited => "audited",
            Self::Trained => "trained",
            Self::Weighted => "weighted",
            Self::Validated => "validated",
            Self::Backtested => "backtested",
            Self::Reported => "reported",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Artifacts shared by the fold-level states.
#[derive(Debug, Clone)]
pub struct FoldSet {
    pub dataset: Dataset,
    pub plan: SplitPlan,
    pub audit: AuditResult,
    pub folds: Vec<FoldProgress>,
}

/// The state of a run and the artifacts produced so far.
#[derive(Debug, Clone)]
pub enum PipelineState {
    Loaded,
    FeaturesReady {
        dataset: Dataset,
    },
    Split {
        dataset: Dataset,
        plan: SplitPlan,
    },
    Audited {
        dataset: Dataset,
        plan: SplitPlan,
        audit: AuditResult,
    },
    Trained(FoldSet),
    Weighted(FoldSet),
    Validated(FoldSet),
    Backtested(FoldSet),
    Reported(Box<PipelineReport>),
    /// `at` is the state the failed transition was producing, or the
    /// current state for [`PipelineError::ConfigChanged`].
    Failed {
        at: Stage,
        error: PipelineError,
    },
}

impl PipelineState {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Loaded => Stage::Loaded,
            Self::FeaturesReady { .. } => Stage::FeaturesReady,
            Self::Split { .. } => Stage::Split,
            Self::Audited { .. } => Stage::Audited,
            Self::Trained(_) => Stage::Trained,
            Self::Weighted(_) => Stage::Weighted,
            Self::Validated(_) => Stage::Validated,
            Self::Backtested(_) => Stage::Backtested,
            Self::Reported(_) => Stage::Reported,
            Self::Failed { .. } => Stage::Failed,
        }
    }
}

/// A pipeline run: the loaded rows plus the current state.
///
/// Only [`PipelineOrchestrator::advance`] moves a run forward, one state at
/// a time.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    source: Arc<Vec<ObservationRow>>,
    state: PipelineState,
    /// Configuration the artifacts were produced under.
    fingerprint: Option<Arc<str>>,
}

impl PipelineRun {
    #[must_use]
    pub fn new(rows: Vec<ObservationRow>) -> Self {
        Self {
            source: Arc::new(rows),
            state: PipelineState::Loaded,
            fingerprint: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.stage(), Stage::Reported | Stage::Failed)
    }

    /// Discards every downstream artifact and returns to `Loaded`.
    ///
    /// The reset run may be advanced under any configuration.
    #[must_use]
    pub fn reset(self) -> Self {
        info!(from = %self.stage(), "Pipeline reset");
        Self {
            source: self.source,
            state: PipelineState::Loaded,
            fingerprint: None,
        }
    }

    #[must_use]
    pub fn report(&self) -> Option<&PipelineReport> {
        match &self.state {
            PipelineState::Reported(report) => Some(report),
            _ => None,
        }
    }

    /// Consumes a terminal run.
    ///
    /// # Errors
    /// The run's failure, or [`PipelineError::Incomplete`] if it never
    /// reached `Reported`.
    pub fn into_report(self) -> Result<PipelineReport, PipelineError> {
        match self.state {
            PipelineState::Reported(report) => Ok(*report),
            PipelineState::Failed { error, .. } => Err(error),
            other => Err(PipelineError::Incomplete(other.stage())),
        }
    }
}

/// Immutable run context: configuration, components and the stop handle.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    fingerprint: Arc<str>,
    auditor: LeakageAuditor,
    trainer: EnsembleTrainer,
    optimizer: WeightOptimizer,
    engine: BacktestEngine,
    stop: Arc<AtomicBool>,
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("sport_tag", &self.config.sport_tag)
            .field("parallel", &self.config.parallel)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Validates the configuration and builds every component.
    ///
    /// # Errors
    /// Configuration errors are returned here, before any fold runs.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let engine = BacktestEngine::new(&config.backtest)?;

        Ok(Self {
            auditor: LeakageAuditor::new(config.audit.clone()),
            trainer: EnsembleTrainer::new(config.models.clone()),
            optimizer: WeightOptimizer::new(config.weights.clone()),
            engine,
            stop: Arc::new(AtomicBool::new(false)),
            fingerprint: format!("{config:?}").into(),
            config,
        })
    }

    /// Attaches the recomputer used by the future-information audit.
    #[must_use]
    pub fn with_recomputer(mut self, recomputer: impl FeatureRecomputer + 'static) -> Self {
        self.auditor = LeakageAuditor::new(self.config.audit.clone()).with_recomputer(recomputer);
        self
    }

    /// Setting the returned flag cancels every fold that has not started a step.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs from `Loaded` to a terminal state.
    ///
    /// # Errors
    /// The pipeline-level error that moved the run to `Failed`.
    pub fn run(&self, rows: Vec<ObservationRow>) -> Result<PipelineReport, PipelineError> {
        let mut run = PipelineRun::new(rows);
        while !run.is_terminal() {
            run = self.advance(run);
        }
        run.into_report()
    }

    /// Performs exactly one transition. Terminal runs are returned unchanged.
    #[must_use]
    pub fn advance(&self, run: PipelineRun) -> PipelineRun {
        let PipelineRun {
            source,
            state,
            fingerprint,
        } = run;
        let from = state.stage();

        let stale = fingerprint.as_ref().is_some_and(|f| *f != self.fingerprint);
        if stale && !matches!(from, Stage::Reported | Stage::Failed) {
            return PipelineRun {
                source,
                state: failed(from, PipelineError::ConfigChanged),
                fingerprint,
            };
        }
        let fingerprint = fingerprint.or_else(|| Some(Arc::clone(&self.fingerprint)));

        let next = match state {
            PipelineState::Loaded => match Dataset::new(source.to_vec()) {
                Ok(dataset) => {
                    let (start, end) = dataset.time_range();
                    info!(
                        rows = dataset.len(),
                        features = dataset.dimension(),
                        chronological = dataset.is_chronological(),
                        start = %start,
                        end = %end,
                        "Dataset checked"
                    );
                    PipelineState::FeaturesReady { dataset }
                }
                Err(e) => failed(Stage::FeaturesReady, e.into()),
            },

            PipelineState::FeaturesReady { dataset } => {
                let plan = ChronologicalSplitter::new(self.config.split.clone())
                    .and_then(|splitter| splitter.split(dataset.rows()));
                match plan {
                    Ok(plan) => PipelineState::Split { dataset, plan },
                    Err(e) => failed(Stage::Split, e.into()),
                }
            }

            PipelineState::Split { dataset, plan } => {
                match self.auditor.audit(&plan, dataset.rows()).into_result() {
                    Ok(audit) => PipelineState::Audited {
                        dataset,
                        plan,
                        audit,
                    },
                    Err(e) => failed(Stage::Audited, e.into()),
                }
            }

            PipelineState::Audited {
                dataset,
                plan,
                audit,
            } => {
                let folds = plan.folds.iter().cloned().map(FoldProgress::new).collect();
                let rows = dataset.rows();
                let folds = self.map_folds(folds, |p| fold::train(p, rows, &self.trainer, &self.stop));
                PipelineState::Trained(FoldSet {
                    dataset,
                    plan,
                    audit,
                    folds,
                })
            }

            PipelineState::Trained(mut set) => {
                let folds = std::mem::take(&mut set.folds);
                let rows = set.dataset.rows();
                set.folds = self.map_folds(folds, |p| fold::weight(p, rows, &self.optimizer, &self.stop));
                PipelineState::Weighted(set)
            }

            PipelineState::Weighted(mut set) => {
                let folds = std::mem::take(&mut set.folds);
                let rows = set.dataset.rows();
                let config = &self.config.validation;
                set.folds = self.map_folds(folds, |p| fold::validate(p, rows, config, &self.stop));
                PipelineState::Validated(set)
            }

            PipelineState::Validated(mut set) => {
                let folds = std::mem::take(&mut set.folds);
                let rows = set.dataset.rows();
                set.folds = self.map_folds(folds, |p| fold::backtest(p, rows, &self.engine, &self.stop));
                PipelineState::Backtested(set)
            }

            PipelineState::Backtested(set) => PipelineState::Reported(Box::new(self.report(&set))),

            terminal @ (PipelineState::Reported(_) | PipelineState::Failed { .. }) => terminal,
        };

        if from != next.stage() {
            info!(from = %from, to = %next.stage(), sport = %self.config.sport_tag, "Pipeline transition");
        }

        PipelineRun {
            source,
            state: next,
            fingerprint,
        }
    }

    /// Applies one fold step to every fold, in parallel when configured.
    fn map_folds<F>(&self, folds: Vec<FoldProgress>, step: F) -> Vec<FoldProgress>
    where
        F: Fn(FoldProgress) -> FoldProgress + Send + Sync,
    {
        let mut folds: Vec<FoldProgress> = if self.config.parallel {
            folds.into_par_iter().map(&step).collect()
        } else {
            folds.into_iter().map(step).collect()
        };
        folds.sort_by_key(FoldProgress::fold_number);
        folds
    }

    fn report(&self, set: &FoldSet) -> PipelineReport {
        let rows = set.dataset.rows();
        let drift_for = |fold_number: usize| {
            set.audit
                .drift
                .iter()
                .find(|d| d.fold_number == fold_number)
                .cloned()
        };

        let folds: Vec<FoldReport> = set
            .folds
            .iter()
            .map(|p| FoldReport::from_progress(p, rows, drift_for(p.fold_number())))
            .collect();

        let mut probabilities = Vec::new();
        let mut labels = Vec::new();
        for progress in set.folds.iter().filter(|p| !p.is_failed()) {
            probabilities.extend_from_slice(&progress.probabilities);
            labels.extend(progress.eval_labels(rows));
        }

        let pooled = if probabilities.is_empty() {
            None
        } else {
            match StatisticalValidator::new(self.config.validation.clone())
                .validate(&probabilities, &labels)
            {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Pooled validation failed");
                    None
                }
            }
        };

        let ledger = CombinedLedger::new(
            self.engine.starting_bankroll(),
            set.folds
                .iter()
                .filter(|p| !p.is_failed())
                .filter_map(|p| {
                    p.ledger.clone().map(|ledger| FoldLedger {
                        fold_number: p.fold_number(),
                        ledger,
                    })
                })
                .collect(),
        );

        let checks = pooled
            .as_ref()
            .map(|v| VerdictChecks::evaluate(v, &ledger.total, &self.config.thresholds));
        let verdict = match checks {
            Some(c) if c.all_passed() => Verdict::Significant,
            Some(_) => Verdict::Insignificant,
            None => Verdict::Inconclusive,
        };

        let report = PipelineReport {
            sport_tag: self.config.sport_tag.clone(),
            strategy: set.plan.strategy,
            rows: rows.len(),
            folds,
            audit: set.audit.clone(),
            pooled,
            ledger,
            checks,
            verdict,
            thresholds: self.config.thresholds.clone(),
        };

        info!(
            verdict = report.verdict.as_str(),
            completed = report.completed_folds(),
            failed = report.failed_folds(),
            roi = %report.roi(),
            "Pipeline report ready"
        );
        report
    }
}

fn failed(at: Stage, error: PipelineError) -> PipelineState {
    warn!(stage = %at, error = %error, "Pipeline failed");
    PipelineState::Failed { at, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use matchday_core::{ModelKind, ModelSpec, SplitConfig, SplitStrategy};
    use rust_decimal_macros::dec;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 8, 1, 0, 0, 0).unwrap()
    }

    /// Rows whose first feature carries signal about the label.
    fn season(count: usize) -> Vec<ObservationRow> {
        (0..count)
            .map(|i| {
                let strength = ((i * 37) % 100) as f64 / 100.0;
                let win = strength > 0.5;
                ObservationRow::new(
                    base() + Duration::hours(i as i64 * 6),
                    vec![strength, ((i * 13) % 7) as f64],
                    win,
                )
                .with_odds(dec!(2.1))
            })
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            sport_tag: "test".into(),
            split: SplitConfig {
                strategy: SplitStrategy::WalkForward,
                min_train_size: 60,
                n_folds: 3,
                max_train_size: None,
                season_starts: Vec::new(),
                shuffle: false,
            },
            models: vec![
                ModelSpec::new("logistic", ModelKind::logistic()),
                ModelSpec::new("base_rate", ModelKind::BaseRate),
            ],
            weights: matchday_core::WeightSearchConfig {
                grid_resolution: 10,
                ..Default::default()
            },
            validation: matchday_core::ValidationConfig {
                permutation_repeats: 100,
                random_seed: 5,
            },
            ..PipelineConfig::default()
        }
    }

    fn step(orchestrator: &PipelineOrchestrator, run: PipelineRun, expected: Stage) -> PipelineRun {
        let run = orchestrator.advance(run);
        assert_eq!(run.stage(), expected);
        run
    }

    // ============================================================
    // State Machine Tests
    // ============================================================

    #[test]
    fn visits_every_state_in_order() {
        let orchestrator = PipelineOrchestrator::new(config()).unwrap();
        let run = PipelineRun::new(season(150));
        assert_eq!(run.stage(), Stage::Loaded);

        let run = step(&orchestrator, run, Stage::FeaturesReady);
        let run = step(&orchestrator, run, Stage::Split);
        let run = step(&orchestrator, run, Stage::Audited);
        let run = step(&orchestrator, run, Stage::Trained);
        let run = step(&orchestrator, run, Stage::Weighted);
        let run = step(&orchestrator, run, Stage::Validated);
        let run = step(&orchestrator, run, Stage::Backtested);
        let run = step(&orchestrator, run, Stage::Reported);
        let run = step(&orchestrator, run, Stage::Reported);

        let report = run.into_report().unwrap();
        assert_eq!(report.folds.len(), 3);
        assert_ne!(report.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn reset_returns_to_loaded_and_reruns_identically() {
        let orchestrator = PipelineOrchestrator::new(config()).unwrap();
        let mut run = PipelineRun::new(season(150));
        while !run.is_terminal() {
            run = orchestrator.advance(run);
        }
        let first = run.report().cloned().unwrap();

        let mut run = run.reset();
        assert_eq!(run.stage(), Stage::Loaded);
        assert!(run.report().is_none());
        while !run.is_terminal() {
            run = orchestrator.advance(run);
        }
        assert_eq!(run.into_report().unwrap(), first);
    }

    #[test]
    fn invalid_config_fails_before_any_fold() {
        let mut cfg = config();
        cfg.validation.permutation_repeats = 0;
        assert_eq!(
            PipelineOrchestrator::new(cfg).unwrap_err(),
            PipelineError::Config(ConfigError::ZeroPermutationRepeats)
        );
    }

    #[test]
    fn ragged_rows_fail_at_features() {
        let orchestrator = PipelineOrchestrator::new(config()).unwrap();
        let mut rows = season(150);
        rows[3].features.push(1.0);

        let run = orchestrator.advance(PipelineRun::new(rows));
        assert!(matches!(
            run.state(),
            PipelineState::Failed {
                at: Stage::FeaturesReady,
                error: PipelineError::Data(_)
            }
        ));
    }

    #[test]
    fn too_few_rows_fail_at_split() {
        let orchestrator = PipelineOrchestrator::new(config()).unwrap();
        let err = orchestrator.run(season(40)).unwrap_err();
        assert!(matches!(err, PipelineError::Split(SplitError::InsufficientData { .. })));
    }

    /// Disagrees with every stored value, as a feature built from the future would.
    fn future_strength(_feature: usize, row: &ObservationRow, _: &[&ObservationRow]) -> Option<f64> {
        Some(row.features[0] + 1.0)
    }

    #[test]
    fn leakage_fails_the_run_at_audit() {
        let mut cfg = config();
        cfg.audit.suspect_features = vec![0];
        let orchestrator = PipelineOrchestrator::new(cfg)
            .unwrap()
            .with_recomputer(future_strength);

        let mut run = PipelineRun::new(season(150));
        for _ in 0..3 {
            run = orchestrator.advance(run);
        }
        assert!(matches!(
            run.state(),
            PipelineState::Failed {
                at: Stage::Audited,
                error: PipelineError::Audit(AuditError::LeakageDetected(_))
            }
        ));
        assert!(run.report().is_none());
    }

    #[test]
    fn run_cannot_cross_to_a_different_configuration() {
        let three_folds = PipelineOrchestrator::new(config()).unwrap();
        let mut cfg = config();
        cfg.split.n_folds = 2;
        let two_folds = PipelineOrchestrator::new(cfg).unwrap();

        let run = PipelineRun::new(season(150));
        let run = step(&three_folds, run, Stage::FeaturesReady);
        let run = step(&three_folds, run, Stage::Split);

        let run = two_folds.advance(run);
        assert!(matches!(
            run.state(),
            PipelineState::Failed {
                at: Stage::Split,
                error: PipelineError::ConfigChanged
            }
        ));
        assert_eq!(run.into_report().unwrap_err(), PipelineError::ConfigChanged);
    }

    #[test]
    fn reset_run_may_switch_configuration() {
        let three_folds = PipelineOrchestrator::new(config()).unwrap();
        let mut cfg = config();
        cfg.split.n_folds = 2;
        let two_folds = PipelineOrchestrator::new(cfg).unwrap();

        let run = PipelineRun::new(season(150));
        let run = step(&three_folds, run, Stage::FeaturesReady);
        let run = step(&three_folds, run, Stage::Split);

        let mut run = run.reset();
        while !run.is_terminal() {
            run = two_folds.advance(run);
        }
        assert_eq!(run.into_report().unwrap().folds.len(), 2);
    }

    #[test]
    fn same_configuration_may_continue_on_another_orchestrator() {
        let first = PipelineOrchestrator::new(config()).unwrap();
        let second = PipelineOrchestrator::new(config()).unwrap();

        let run = step(&first, PipelineRun::new(season(150)), Stage::FeaturesReady);
        let run = step(&second, run, Stage::Split);
        assert_eq!(run.stage(), Stage::Split);
    }

    #[test]
    fn incomplete_run_has_no_report() {
        let run = PipelineRun::new(season(10));
        assert_eq!(
            run.into_report().unwrap_err(),
            PipelineError::Incomplete(Stage::Loaded)
        );
    }

    // ============================================================
    // Fold Isolation Tests
    // ============================================================

    #[test]
    fn stop_handle_cancels_folds_without_failing_the_run() {
        let orchestrator = PipelineOrchestrator::new(config()).unwrap();
        orchestrator.stop_handle().store(true, Ordering::SeqCst);

        let report = orchestrator.run(season(150)).unwrap();
        assert!(report
            .folds
            .iter()
            .all(|f| f.failure == Some(FoldFailure::Cancelled)));
        assert_eq!(report.verdict, Verdict::Inconclusive);
        assert!(report.pooled.is_none());
    }

    #[test]
    fn single_class_fold_is_isolated() {
        // The first 60 rows are all wins, so fold 1 cannot fit any model.
        let mut rows = season(150);
        for row in rows.iter_mut().take(60) {
            row.label = true;
        }
        let orchestrator = PipelineOrchestrator::new(config()).unwrap();
        let report = orchestrator.run(rows).unwrap();

        assert_eq!(report.folds[0].failure, Some(FoldFailure::NoAvailableModels));
        assert!(report.folds[1..].iter().all(|f| f.failure.is_none()));
        assert_eq!(report.ledger.folds.len(), 2);
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let sequential = PipelineOrchestrator::new(config()).unwrap();
        let mut cfg = config();
        cfg.parallel = true;
        let parallel = PipelineOrchestrator::new(cfg).unwrap();

        let a = sequential.run(season(150)).unwrap();
        let b = parallel.run(season(150)).unwrap();
        assert_eq!(a.folds, b.folds);
        assert_eq!(a.ledger, b.ledger);
        assert_eq!(a.verdict, b.verdict);
    }
}
