//! Configuration management for candy-deploy
//!
//! Two layers: the tool [`Settings`] (TOML, per user) and the per-collection
//! [`DeploymentConfig`] (JSON, passed on the command line).

pub mod deployment;
pub mod schema;

pub use deployment::DeploymentConfig;
pub use schema::Settings;

use crate::error::{DeployError, DeployResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Settings file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("candy-deploy")
            .join("config.toml")
    }

    /// Load settings, using defaults if the file does not exist
    pub async fn load(&self) -> DeployResult<Settings> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            DeployError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;

        toml::from_str(&content).map_err(|e| DeployError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Save settings to file
    pub async fn save(&self, settings: &Settings) -> DeployResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DeployError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(settings)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            DeployError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Load and validate a deployment file for the given environment
    pub async fn load_deployment(path: &Path, env: &str) -> DeployResult<DeploymentConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DeployError::io(format!("reading deployment config {}", path.display()), e))?;

        let deployment: DeploymentConfig =
            serde_json::from_str(&content).map_err(|e| DeployError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        deployment.validate(env)?;
        Ok(deployment)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
