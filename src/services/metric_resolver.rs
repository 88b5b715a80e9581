//! Metric resolver.
//!
//! Reconciles a named metric implementation with the experiment. A name
//! lives in at most one of objective, outcome constraints and tracking
//! metrics, so resolution substitutes into the first matching slot and
//! never duplicates.

use std::fmt;

use tracing::{debug, warn};

use crate::domain::models::Experiment;
use crate::domain::ports::MetricHandle;

/// Where a resolved metric ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricResolution {
    /// Substituted into an objective slot.
    Objective,
    /// Substituted into an outcome constraint.
    OutcomeConstraint,
    /// Replaced an existing tracking metric.
    Tracking,
    /// Unknown name, inserted as a new tracking metric.
    AddedAsTracking,
}

impl MetricResolution {
    /// Snake-case name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Objective => "objective",
            Self::OutcomeConstraint => "outcome_constraint",
            Self::Tracking => "tracking",
            Self::AddedAsTracking => "added_as_tracking",
        }
    }
}

impl fmt::Display for MetricResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substitute `metric` into exactly one location of `experiment`.
///
/// Scan order: objective slots in declaration order, then outcome
/// constraints in declaration order, then tracking metrics. An unknown
/// name becomes a tracking metric and a warning is logged.
pub fn resolve_metric(experiment: &mut Experiment, metric: MetricHandle) -> MetricResolution {
    let name = metric.name().to_string();

    if let Some(config) = experiment.optimization_config.as_mut() {
        if let Some(slot) = config.objective.metric_slot_mut(&name) {
            *slot = metric;
            debug!(metric = %name, "metric substituted into objective");
            return MetricResolution::Objective;
        }
        if let Some(constraint) = config
            .outcome_constraints
            .iter_mut()
            .find(|c| c.metric.name() == name)
        {
            constraint.metric = metric;
            debug!(metric = %name, "metric substituted into outcome constraint");
            return MetricResolution::OutcomeConstraint;
        }
    }

    if let Some(slot) = experiment.tracking_metrics.get_mut(&name) {
        *slot = metric;
        debug!(metric = %name, "tracking metric replaced");
        return MetricResolution::Tracking;
    }

    warn!(
        metric = %name,
        "metric not found in optimization config, added as tracking"
    );
    experiment.tracking_metrics.insert(name, metric);
    MetricResolution::AddedAsTracking
}

/// Move tracking metrics whose names now appear in the optimization
/// config out of the tracking set, substituting their implementations
/// into the config. Returns the names moved.
pub fn absorb_tracking_metrics(experiment: &mut Experiment) -> Vec<String> {
    let Some(config) = experiment.optimization_config.as_ref() else {
        return Vec::new();
    };
    let overlapping: Vec<String> = config
        .metric_names()
        .into_iter()
        .filter(|name| experiment.tracking_metrics.contains_key(name))
        .collect();

    for name in &overlapping {
        if let Some(handle) = experiment.tracking_metrics.remove(name) {
            let landed = resolve_metric(experiment, handle);
            debug!(metric = %name, landed = %landed, "tracking metric moved into optimization config");
        }
    }
    overlapping
}
