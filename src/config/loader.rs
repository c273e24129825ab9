//! Configuration file loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::{ForwardConfig, StreamConfig};

/// Top-level configuration file with optional `[stream]` and `[forward]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodkitConfig {
    /// Log aggregation settings.
    pub stream: Option<StreamConfig>,
    /// Port forwarding settings.
    pub forward: Option<ForwardConfig>,
}

impl PodkitConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate every table that is present.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(stream) = &self.stream {
            stream.validate()?;
        }
        if let Some(forward) = &self.forward {
            forward.validate()?;
        }
        Ok(())
    }
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("podkit.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("podkit").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            search_paths: vec![path.into()],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated.
    pub fn load(&self) -> Result<PodkitConfig, ConfigError> {
        let Some(path) = self.find_config_file() else {
            tracing::debug!("No config file found, using defaults");
            return Ok(PodkitConfig::default());
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        let config = Self::load_from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<PodkitConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        PodkitConfig::from_toml(&content)
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
