//! Threshold early stopping.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExperimentSnapshot, Progression, TrialIndex, TrialStatus};
use crate::domain::ports::EarlyStoppingStrategy;

/// Stops a running trial whose latest observation of `metric`, reported
/// at or beyond `min_progression`, is worse than `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdEarlyStopping {
    metric: String,
    threshold: f64,
    minimize: bool,
    min_progression: i64,
}

impl ThresholdEarlyStopping {
    /// Strategy stopping trials whose latest value is worse than `threshold`
    /// once they reach `min_progression`.
    pub fn new(
        metric: impl Into<String>,
        threshold: f64,
        minimize: bool,
        min_progression: i64,
    ) -> DomainResult<Self> {
        if !threshold.is_finite() {
            return Err(DomainError::ValidationFailed(
                "early stopping threshold must be finite".to_string(),
            ));
        }
        Ok(Self {
            metric: metric.into(),
            threshold,
            minimize,
            min_progression,
        })
    }

    fn is_worse(&self, value: f64) -> bool {
        if self.minimize {
            value > self.threshold
        } else {
            value < self.threshold
        }
    }
}

#[async_trait]
impl EarlyStoppingStrategy for ThresholdEarlyStopping {
    async fn should_stop_trials_early(
        &self,
        trial_indices: &BTreeSet<TrialIndex>,
        experiment: &ExperimentSnapshot,
    ) -> DomainResult<BTreeMap<TrialIndex, Option<String>>> {
        let mut decisions = BTreeMap::new();
        for &index in trial_indices {
            let Some(trial) = experiment.trial(index) else {
                continue;
            };
            if trial.status != TrialStatus::Running {
                continue;
            }
            let Some(latest) = trial.data.latest(&self.metric) else {
                continue;
            };
            let Progression::Step(step) = latest.progression else {
                continue;
            };
            if step >= self.min_progression && self.is_worse(latest.value.mean) {
                debug!(
                    trial_index = index,
                    metric = %self.metric,
                    value = latest.value.mean,
                    threshold = self.threshold,
                    "recommending early stop"
                );
                decisions.insert(
                    index,
                    Some(format!(
                        "{} = {} at step {step} is worse than threshold {}",
                        self.metric, latest.value.mean, self.threshold
                    )),
                );
            }
        }
        Ok(decisions)
    }
}
