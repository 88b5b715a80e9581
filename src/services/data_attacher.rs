//! Data attacher.
//!
//! Merges observed outcomes into a trial's accumulated data, either as
//! reported by the caller or fetched from metric implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ObservationRecord, Outcome, TrialIndex};
use crate::domain::ports::MetricHandle;
use crate::services::trial_store::TrialStore;

/// Which metrics to fetch for a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchScope {
    /// Only metrics that report interim values while a trial runs.
    WhileRunning,
    /// Every fetch-capable metric.
    Final,
}

/// Merges observations into trials, from runners or by fetching metrics.
#[derive(Debug, Clone)]
pub struct DataAttacher {
    store: Arc<TrialStore>,
}

impl DataAttacher {
    /// Attacher writing into `store`.
    pub fn new(store: Arc<TrialStore>) -> Self {
        Self { store }
    }

    /// Merge `outcome` observed at `progression` into the trial's data.
    ///
    /// A repeated progression overwrites the values at that step; a new
    /// progression is appended. Status is left untouched.
    pub async fn attach(
        &self,
        trial_index: TrialIndex,
        outcome: Outcome,
        progression: Option<i64>,
    ) -> DomainResult<()> {
        let metrics = outcome.len();
        self.store
            .update_data(trial_index, ObservationRecord::new(outcome, progression))
            .await?;
        debug!(trial_index, metrics, ?progression, "data attached");
        Ok(())
    }

    /// Fetch values from `metrics` and attach them.
    ///
    /// Fetch failures are logged and skipped so one broken metric cannot
    /// block completion; the completion evaluator will see it as missing.
    /// Returns the number of values attached.
    pub async fn fetch_and_attach(
        &self,
        trial_index: TrialIndex,
        metrics: &[MetricHandle],
        scope: FetchScope,
    ) -> DomainResult<usize> {
        let trial = self.store.get(trial_index).await?;
        let mut by_progression: BTreeMap<Option<i64>, Outcome> = BTreeMap::new();

        for handle in metrics {
            let metric = handle.metric();
            if !metric.is_fetchable()
                || (scope == FetchScope::WhileRunning && !metric.is_available_while_running())
            {
                continue;
            }
            match metric.fetch(&trial).await {
                Ok(Some(observation)) => {
                    by_progression
                        .entry(observation.progression)
                        .or_default()
                        .insert(handle.name().to_string(), observation.value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(trial_index, metric = handle.name(), error = %e, "metric fetch failed");
                }
            }
        }

        let mut attached = 0;
        for (progression, outcome) in by_progression {
            attached += outcome.len();
            self.attach(trial_index, outcome, progression).await?;
        }
        Ok(attached)
    }
}
