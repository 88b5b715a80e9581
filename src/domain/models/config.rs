//! Engine configuration model.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Main configuration structure for trialforge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Orchestration loop policy
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// Default generation strategy settings
    #[serde(default)]
    pub generation: GenerationStrategyConfig,

    /// Seed for anything random the engine does itself
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            orchestration: OrchestrationConfig::default(),
            generation: GenerationStrategyConfig::default(),
            random_seed: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation of the log file: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Budget, concurrency and failure-tolerance policy of the orchestration loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestrationConfig {
    /// Maximum number of non-terminal trials at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Fraction of failed terminal trials above which the run aborts
    #[serde(default = "default_tolerated_trial_failure_rate")]
    pub tolerated_trial_failure_rate: f64,

    /// Delay between poll cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on the backed-off poll delay
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Growth of the poll delay after a cycle with no change
    #[serde(default = "default_poll_backoff_factor")]
    pub poll_backoff_factor: f64,
}

const fn default_parallelism() -> usize {
    1
}

const fn default_tolerated_trial_failure_rate() -> f64 {
    0.5
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_max_poll_interval_ms() -> u64 {
    30_000
}

const fn default_poll_backoff_factor() -> f64 {
    1.5
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            tolerated_trial_failure_rate: default_tolerated_trial_failure_rate(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            poll_backoff_factor: default_poll_backoff_factor(),
        }
    }
}

impl OrchestrationConfig {
    /// Check that the policy can drive a loop.
    pub fn validate(&self) -> DomainResult<()> {
        if self.parallelism == 0 {
            return Err(DomainError::ValidationFailed(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tolerated_trial_failure_rate) {
            return Err(DomainError::ValidationFailed(format!(
                "tolerated_trial_failure_rate must be within [0, 1], got {}",
                self.tolerated_trial_failure_rate
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(DomainError::ValidationFailed(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(DomainError::ValidationFailed(format!(
                "max_poll_interval_ms ({}) is below poll_interval_ms ({})",
                self.max_poll_interval_ms, self.poll_interval_ms
            )));
        }
        if !self.poll_backoff_factor.is_finite() || self.poll_backoff_factor < 1.0 {
            return Err(DomainError::ValidationFailed(format!(
                "poll_backoff_factor must be at least 1.0, got {}",
                self.poll_backoff_factor
            )));
        }
        Ok(())
    }
}

/// Settings for the default generation strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GenerationStrategyConfig {
    /// Number of quasi-random initialization candidates; derived from the
    /// search space when unset
    #[serde(default)]
    pub initialization_budget: Option<usize>,

    /// Completed trials required before leaving initialization
    #[serde(default = "default_min_observed_initialization_trials")]
    pub min_observed_initialization_trials: usize,

    /// Keep sampling quasi-randomly instead of waiting for data
    #[serde(default)]
    pub allow_exceeding_initialization_budget: bool,

    /// Seed of the initialization sampler
    #[serde(default)]
    pub initialization_random_seed: Option<u64>,
}

const fn default_min_observed_initialization_trials() -> usize {
    1
}

impl Default for GenerationStrategyConfig {
    fn default() -> Self {
        Self {
            initialization_budget: None,
            min_observed_initialization_trials: default_min_observed_initialization_trials(),
            allow_exceeding_initialization_budget: false,
            initialization_random_seed: None,
        }
    }
}

impl GenerationStrategyConfig {
    /// Initialization budget for a space with `tunable` tunable parameters.
    pub fn resolved_initialization_budget(&self, tunable: usize) -> usize {
        self.initialization_budget
            .unwrap_or_else(|| (2 * tunable).max(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.orchestration.parallelism, 1);
        assert_eq!(config.orchestration.poll_interval_ms, 1_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.generation.min_observed_initialization_trials, 1);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("orchestration:\n  parallelism: 4\n").unwrap();
        assert_eq!(config.orchestration.parallelism, 4);
        assert_eq!(config.orchestration.max_poll_interval_ms, 30_000);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_orchestration_validation() {
        assert!(OrchestrationConfig::default().validate().is_ok());

        let zero = OrchestrationConfig { parallelism: 0, ..Default::default() };
        assert!(zero.validate().is_err());

        let rate = OrchestrationConfig { tolerated_trial_failure_rate: 1.5, ..Default::default() };
        assert!(rate.validate().is_err());

        let backoff = OrchestrationConfig { poll_backoff_factor: 0.5, ..Default::default() };
        assert!(backoff.validate().is_err());

        let cap = OrchestrationConfig {
            poll_interval_ms: 500,
            max_poll_interval_ms: 100,
            ..Default::default()
        };
        assert!(cap.validate().is_err());
    }

    #[test]
    fn test_resolved_initialization_budget() {
        let config = GenerationStrategyConfig::default();
        assert_eq!(config.resolved_initialization_budget(1), 5);
        assert_eq!(config.resolved_initialization_budget(4), 8);

        let explicit = GenerationStrategyConfig {
            initialization_budget: Some(2),
            ..Default::default()
        };
        assert_eq!(explicit.resolved_initialization_budget(10), 2);
    }
}
