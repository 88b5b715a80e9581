//! Completion evaluator.
//!
//! Finalizes a trial from its data: complete when every metric the
//! optimization config requires is present, failed otherwise. Missing
//! data is an expected outcome, so it is reported through the trial's
//! status and a warning rather than an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    OptimizationConfig, Outcome, TrialData, TrialIndex, TrialStatus,
};
use crate::services::data_attacher::DataAttacher;
use crate::services::trial_store::TrialStore;

/// Required metrics absent from `data`.
pub fn missing_metrics(required: &BTreeSet<String>, data: &TrialData) -> BTreeSet<String> {
    required
        .iter()
        .filter(|name| !data.has_metric(name))
        .cloned()
        .collect()
}

/// Decides whether finished trials have the data to complete.
#[derive(Debug, Clone)]
pub struct CompletionEvaluator {
    store: Arc<TrialStore>,
    attacher: DataAttacher,
}

impl CompletionEvaluator {
    /// Evaluator over `store`.
    pub fn new(store: Arc<TrialStore>) -> Self {
        let attacher = DataAttacher::new(store.clone());
        Self { store, attacher }
    }

    /// Attach `outcome` if given, then mark the trial completed or failed.
    ///
    /// With no optimization config the trial always completes. Returns
    /// the trial's status afterwards; a trial that was already terminal
    /// keeps its status.
    pub async fn complete(
        &self,
        trial_index: TrialIndex,
        optimization_config: Option<&OptimizationConfig>,
        outcome: Option<Outcome>,
        progression: Option<i64>,
    ) -> DomainResult<TrialStatus> {
        if let Some(outcome) = outcome {
            self.attacher.attach(trial_index, outcome, progression).await?;
        }

        let Some(config) = optimization_config else {
            self.store.mark_completed(trial_index).await?;
            return self.store.status(trial_index).await;
        };

        let data = self.store.with_trial(trial_index, |t| t.data.clone()).await?;
        let missing = missing_metrics(&config.metric_names(), &data);
        if missing.is_empty() {
            self.store.mark_completed(trial_index).await?;
            info!(trial_index, "trial completed");
        } else {
            let names: Vec<&str> = missing.iter().map(String::as_str).collect();
            warn!(
                trial_index,
                missing = ?names,
                "trial finished without all required metrics, marking failed"
            );
            self.store
                .mark_failed(trial_index, Some(format!("missing metrics: {}", names.join(", "))))
                .await?;
        }
        self.store.status(trial_index).await
    }
}
