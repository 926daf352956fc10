//! Daemon configuration.
//!
//! Read from `config.toml` in the platform config directory. A missing file
//! means defaults; unknown keys are rejected. The step timeouts reach an
//! orchestrator through [`Config::orchestrator_config`], which embedders pass
//! to `Orchestrator::new`; the `status` command prints the effective values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorConfig;

const DATABASE_FILE: &str = "trustsync.db";

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine platform directories")]
    NoPlatformDirs,
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the database. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub push_registration_timeout_secs: u64,
    pub app_metadata_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            data_dir: None,
            push_registration_timeout_secs: defaults.push_registration_timeout.as_secs(),
            app_metadata_timeout_secs: defaults.app_metadata_timeout.as_secs(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location if `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Where the database lives, honouring an explicit override.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_local_dir().to_path_buf()),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(DATABASE_FILE))
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        if self.push_registration_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("push_registration_timeout_secs"));
        }
        if self.app_metadata_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("app_metadata_timeout_secs"));
        }

        Ok(OrchestratorConfig {
            push_registration_timeout: Duration::from_secs(self.push_registration_timeout_secs),
            app_metadata_timeout: Duration::from_secs(self.app_metadata_timeout_secs),
        })
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, ConfigError> {
    directories::ProjectDirs::from("com", "trustsync", "trustsync").ok_or(ConfigError::NoPlatformDirs)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}
