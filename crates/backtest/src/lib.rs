//! Leak-free temporal evaluation of win-probability ensembles.
//!
//! The crate splits a historical row table chronologically, audits the split
//! for leakage, trains and weights an ensemble per fold, scores the blended
//! predictions and replays them through a fractional-Kelly bankroll. The
//! [`pipeline`] module strings these steps together.

pub mod audit;
pub mod engine;
pub mod ensemble;
pub mod ledger;
pub mod pipeline;
pub mod report;
pub mod split;
pub mod validator;

pub use audit::{
    population_stability_index, AuditError, AuditResult, FeatureRecomputer, FoldDrift,
    LeakageAuditor, LeakageViolation,
};
pub use engine::{BacktestEngine, BacktestError, BANKROLL_LIMIT};
pub use ensemble::{
    EnsembleTrainer, EnsembleWeights, Estimator, FittedModel, ModelError, ModelStatus,
    TrainedModel, WeightError, WeightOptimizer,
};
pub use ledger::{BankrollLedger, CombinedLedger, FoldLedger, LedgerEntry, LedgerSummary};
pub use pipeline::{
    FoldFailure, FoldReport, PipelineError, PipelineOrchestrator, PipelineReport, PipelineRun,
    PipelineState, Stage, Verdict, VerdictChecks,
};
pub use report::{to_json, write_ledger_csv, write_validation_csv, ReportFormatter};
pub use split::{ChronologicalSplitter, Fold, SplitError, SplitPlan};
pub use validator::{CalibrationBin, StatisticalValidator, ValidationError, ValidationReport};
