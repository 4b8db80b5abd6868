//! Configuration management for the neugraph CLI

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use neugraph_widget::RenderConfig;

use crate::error::{CliError, CliResult};

/// Global CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default logging level
    pub log_level: Option<String>,

    /// Step size used when a trace file carries none and `--dt` is not given
    pub default_dt: Option<f64>,

    /// Figure geometry for `plot`
    pub render: RenderConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            default_dt: None,
            render: RenderConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Load `explicit` if given (it must exist), else the per-user file if
    /// there is one, else defaults
    pub fn load(explicit: Option<&Path>) -> CliResult<Self> {
        match explicit {
            Some(path) if !path.exists() => Err(CliError::missing_resource(format!(
                "config file {}",
                path.display()
            ))),
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Ok(path) => Self::load_from_file(&path),
                Err(_) => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::config("Could not determine config directory"))?;
        Ok(config_dir.join("neugraph").join("config.toml"))
    }
}
