use std::path::Path;

use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads pipeline configuration rooted at a TOML file, merged with
    /// environment variables and a sibling JSON file.
    ///
    /// Environment variables use the `MATCHDAY_` prefix with `__` separating
    /// nested keys, e.g. `MATCHDAY_BACKTEST__RISK_FRACTION=0.5`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or if
    /// the merged configuration fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<PipelineConfig> {
        let path = path.as_ref();
        let config: PipelineConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load pipeline config from {}", path.display()))?;

        config.validate().context("Invalid pipeline configuration")?;
        tracing::debug!(
            sport = %config.sport_tag,
            models = config.models.len(),
            "Pipeline config loaded"
        );

        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        let json = path.with_extension("json");
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MATCHDAY_").split("__"))
            .join(Json::file(json))
    }
}
