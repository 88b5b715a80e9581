//! Observed outcome data attached to trials.
//!
//! A trial's data is keyed by metric name; each metric holds a sequence
//! of observations indexed by progression (training step, epoch, ...) or
//! by the [`Progression::Unindexed`] marker for data without progression.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Progression index of an observation.
///
/// `Unindexed` orders before every step, so the latest observation of a
/// metric is always the one with the highest step when steps exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progression {
    /// No progression was reported.
    Unindexed,
    /// A real progression index.
    Step(i64),
}

impl From<Option<i64>> for Progression {
    fn from(step: Option<i64>) -> Self {
        step.map_or(Self::Unindexed, Self::Step)
    }
}

/// Observed value of one metric: mean and optional standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Observed mean
    pub mean: f64,
    /// Standard error of the mean, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sem: Option<f64>,
}

impl MetricValue {
    /// Value with unknown standard error.
    pub fn new(mean: f64) -> Self {
        Self { mean, sem: None }
    }

    /// Value with a known standard error.
    pub fn with_sem(mean: f64, sem: f64) -> Self {
        Self {
            mean,
            sem: Some(sem),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(mean: f64) -> Self {
        Self::new(mean)
    }
}

impl From<(f64, f64)> for MetricValue {
    fn from((mean, sem): (f64, f64)) -> Self {
        Self::with_sem(mean, sem)
    }
}

/// Raw outcome reported for a trial: metric name to value.
pub type Outcome = BTreeMap<String, MetricValue>;

/// One (progression, value) pair for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Progression the value was observed at
    pub progression: Progression,
    /// Observed value
    pub value: MetricValue,
}

/// A full outcome observed at a single progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Progression the outcome was observed at
    pub progression: Progression,
    /// Values by metric name
    pub outcome: Outcome,
}

impl ObservationRecord {
    /// Record at `progression`, or the final progression when `None`.
    pub fn new(outcome: Outcome, progression: Option<i64>) -> Self {
        Self {
            progression: progression.into(),
            outcome,
        }
    }
}

/// Accumulated observations of a trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialData {
    metrics: BTreeMap<String, Vec<Observation>>,
}

impl TrialData {
    /// Whether no metric has any observation.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Merge a record into the accumulated data.
    ///
    /// A metric already observed at the record's progression is overwritten;
    /// a new progression is appended. Metrics absent from the record keep
    /// their previous observations.
    pub fn merge(&mut self, record: ObservationRecord) {
        for (metric, value) in record.outcome {
            let observations = self.metrics.entry(metric).or_default();
            match observations
                .iter_mut()
                .find(|obs| obs.progression == record.progression)
            {
                Some(existing) => existing.value = value,
                None => observations.push(Observation {
                    progression: record.progression,
                    value,
                }),
            }
        }
    }

    /// Names of metrics with at least one observation.
    pub fn metric_names(&self) -> BTreeSet<String> {
        self.metrics.keys().cloned().collect()
    }

    /// Whether `metric` has at least one observation.
    pub fn has_metric(&self, metric: &str) -> bool {
        self.metrics.contains_key(metric)
    }

    /// Observations of `metric` in the order they were first reported.
    pub fn observations(&self, metric: &str) -> &[Observation] {
        self.metrics.get(metric).map_or(&[], Vec::as_slice)
    }

    /// Observation of `metric` at the highest progression.
    pub fn latest(&self, metric: &str) -> Option<&Observation> {
        self.observations(metric)
            .iter()
            .max_by_key(|obs| obs.progression)
    }

    /// Latest value of every metric.
    pub fn latest_outcome(&self) -> Outcome {
        self.metrics
            .keys()
            .filter_map(|name| self.latest(name).map(|obs| (name.clone(), obs.value)))
            .collect()
    }
}
