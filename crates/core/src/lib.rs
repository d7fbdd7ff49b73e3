pub mod config;
pub mod config_loader;
pub mod error;
pub mod kelly;
pub mod observation;
pub mod stats;

pub use config::{
    AuditConfig, BacktestConfig, ModelKind, ModelSpec, PipelineConfig, SplitConfig,
    SplitStrategy, ValidationConfig, VerdictThresholds, WeightSearchConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{ConfigError, DatasetError};
pub use kelly::{BetDecision, KellySizer, StakeReason};
pub use observation::{Dataset, ObservationRow};
pub use stats::{clamp_probability, log_loss, wilson_ci, PROBABILITY_EPSILON};
