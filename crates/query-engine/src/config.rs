//! Configuration for the query engine.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{DEFAULT_SRID, POSITION_BUFFER_METERS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SRID assumed for WKT without an `SRID=` prefix.
    pub default_srid: i32,

    /// Buffer in meters for position and trajectory queries.
    pub position_buffer_m: f64,

    /// Pool size for storage connections.
    pub max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_srid: DEFAULT_SRID,
            position_buffer_m: POSITION_BUFFER_METERS,
            max_connections: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a YAML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EDR_*` environment variables on top of this configuration.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup("EDR_DEFAULT_SRID") {
            if let Ok(srid) = val.parse() {
                self.default_srid = srid;
            }
        }

        if let Some(val) = lookup("EDR_POSITION_BUFFER_M") {
            if let Ok(buffer) = val.parse() {
                self.position_buffer_m = buffer;
            }
        }

        if let Some(val) = lookup("EDR_MAX_CONNECTIONS") {
            if let Ok(max) = val.parse() {
                self.max_connections = max;
            }
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_srid <= 0 {
            return Err(ConfigError::Invalid("default_srid must be > 0".to_string()));
        }

        if !self.position_buffer_m.is_finite() || self.position_buffer_m < 0.0 {
            return Err(ConfigError::Invalid(
                "position_buffer_m must be a non-negative number".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be > 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_srid, 4326);
        assert_eq!(config.position_buffer_m, 100.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_ignore_bad_values() {
        let env: HashMap<&str, &str> = [
            ("EDR_DEFAULT_SRID", "27700"),
            ("EDR_POSITION_BUFFER_M", "not-a-number"),
            ("EDR_MAX_CONNECTIONS", "4"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.default_srid, 27700);
        assert_eq!(config.position_buffer_m, 100.0);
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "position_buffer_m: 250.0").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.position_buffer_m, 250.0);
        assert_eq!(config.default_srid, 4326);
    }

    #[test]
    fn test_invalid_yaml_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_connections: 0").unwrap();

        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
