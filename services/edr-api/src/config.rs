//! Service configuration loading.

use std::path::Path;

use anyhow::{Context, Result};
use query_engine::EngineConfig;

/// Load the engine configuration.
///
/// Starts from the YAML file when one is given (defaults otherwise), then
/// applies `EDR_*` environment variables and the CLI connection limit.
pub fn load_engine_config(
    path: Option<&Path>,
    max_connections: Option<u32>,
) -> Result<EngineConfig> {
    let base = match path {
        Some(path) => {
            let config = EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?;
            tracing::info!(path = %path.display(), "Loaded engine config");
            config
        }
        None => EngineConfig::default(),
    };

    let mut config = base.with_env_overrides();
    if let Some(max) = max_connections {
        config.max_connections = max;
    }

    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}
