//! CLI commands for the evaluation pipeline.

pub mod audit;
pub mod loader;
pub mod run;
pub mod split;

pub use audit::{run_audit, AuditArgs};
pub use run::{run_pipeline, RunArgs};
pub use split::{run_split, SplitArgs};

use anyhow::Result;
use clap::Args;
use matchday_core::{ConfigLoader, PipelineConfig};

/// Input options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Observation table CSV: timestamp,label,odds,<feature columns...>
    #[arg(short, long)]
    pub data: String,

    /// Pipeline config file path
    #[arg(short, long, default_value = "config/Pipeline.toml")]
    pub config: String,

    /// Overrides the config's sport tag
    #[arg(long)]
    pub sport: Option<String>,
}

impl InputArgs {
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = ConfigLoader::load_from(&self.config)?;
        if let Some(sport) = &self.sport {
            config.sport_tag.clone_from(sport);
        }
        Ok(config)
    }
}
