//! Experiment domain model.
//!
//! The experiment carries the search space, the optimization config, the
//! tracking metrics and the status-quo reference. Trials live in the
//! trial store; [`ExperimentSnapshot`] pairs the two for read-only
//! consumers such as generation and early-stopping strategies.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::objective::OptimizationConfig;
use super::parameter::{Parameterization, SearchSpace};
use super::trial::{Trial, TrialIndex, TrialStatus};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::MetricHandle;

/// An optimization run's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique, non-empty name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Parameters trials are drawn from
    pub search_space: SearchSpace,
    /// What to optimize; absent for pure exploration
    #[serde(default)]
    pub optimization_config: Option<OptimizationConfig>,
    /// Metrics recorded for visibility only, keyed by name
    #[serde(default)]
    pub tracking_metrics: BTreeMap<String, MetricHandle>,
    /// Trial whose arm is the baseline for relative constraints
    #[serde(default)]
    pub status_quo: Option<TrialIndex>,
}

impl Experiment {
    /// Experiment with no objective or tracking metrics.
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            name: name.into(),
            description: None,
            search_space,
            optimization_config: None,
            tracking_metrics: BTreeMap::new(),
            status_quo: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the objective and constraints.
    pub fn with_optimization_config(mut self, config: OptimizationConfig) -> Self {
        self.optimization_config = Some(config);
        self
    }

    /// Add a tracking metric, replacing one with the same name.
    pub fn add_tracking_metric(&mut self, metric: MetricHandle) {
        self.tracking_metrics.insert(metric.name().to_string(), metric);
    }

    /// Every metric handle on the experiment: optimization config first,
    /// then tracking metrics.
    pub fn metric_handles(&self) -> Vec<MetricHandle> {
        let mut handles = self
            .optimization_config
            .as_ref()
            .map(OptimizationConfig::metric_handles)
            .unwrap_or_default();
        handles.extend(self.tracking_metrics.values().cloned());
        handles
    }

    /// Check the experiment's own invariants.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "experiment name cannot be empty".to_string(),
            ));
        }
        self.search_space.validate()?;
        if let Some(config) = &self.optimization_config {
            config.validate()?;
            let optimized = config.metric_names();
            if let Some(name) = self.tracking_metrics.keys().find(|n| optimized.contains(*n)) {
                return Err(DomainError::ValidationFailed(format!(
                    "metric '{name}' is both optimized and tracked"
                )));
            }
        }
        Ok(())
    }
}

/// Read-only view of an experiment and its trials at one instant.
#[derive(Debug, Clone)]
pub struct ExperimentSnapshot {
    /// Experiment configuration at snapshot time
    pub experiment: Experiment,
    /// Trials ordered by index
    pub trials: Vec<Trial>,
}

impl ExperimentSnapshot {
    /// Trial by index.
    pub fn trial(&self, index: TrialIndex) -> Option<&Trial> {
        self.trials.iter().find(|t| t.index == index)
    }

    /// Trials currently in `status`.
    pub fn trials_with_status(&self, status: TrialStatus) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(move |t| t.status == status)
    }

    /// Parameterizations of every non-terminal trial.
    pub fn pending_parameterizations(&self) -> Vec<Parameterization> {
        self.trials
            .iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.parameters.clone())
            .collect()
    }

    /// Trials whose data can inform decisions: completed or early stopped.
    pub fn observed_trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials
            .iter()
            .filter(|t| matches!(t.status, TrialStatus::Completed | TrialStatus::EarlyStopped))
    }

    /// The status quo trial, if configured and present.
    pub fn status_quo(&self) -> Option<&Trial> {
        self.experiment.status_quo.and_then(|idx| self.trial(idx))
    }

    /// Indices grouped by status.
    pub fn status_counts(&self) -> BTreeMap<TrialStatus, usize> {
        let mut counts = BTreeMap::new();
        for trial in &self.trials {
            *counts.entry(trial.status).or_insert(0) += 1;
        }
        counts
    }

    /// Names of metrics with at least one observation on any trial.
    pub fn metric_names_with_data(&self) -> BTreeSet<String> {
        self.trials
            .iter()
            .flat_map(|t| t.data.metric_names())
            .collect()
    }
}
