//! Configuration loading: defaults, project YAML file, then environment.

use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project directory holding configuration files
pub const CONFIG_DIR: &str = ".trialforge";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "TRIALFORGE_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Log level outside the known set
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Log format outside the known set
    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    /// Rotation policy outside the known set
    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    /// `min_observed` larger than the initialization budget
    #[error("Invalid min_observed_initialization_trials: {0}. Cannot exceed initialization_budget {1}")]
    InvalidInitialization(usize, usize),

    /// Any other invalid value
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .trialforge/config.yaml (project config)
    /// 3. .trialforge/local.yaml (local overrides, optional)
    /// 4. Environment variables (TRIALFORGE_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same precedence as [`load`](Self::load) with files read from `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        config
            .orchestration
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        let generation = &config.generation;
        if let Some(budget) = generation.initialization_budget
            && generation.min_observed_initialization_trials > budget
            && !generation.allow_exceeding_initialization_budget
        {
            return Err(ConfigError::InvalidInitialization(
                generation.min_observed_initialization_trials,
                budget,
            ));
        }

        Ok(())
    }
}
