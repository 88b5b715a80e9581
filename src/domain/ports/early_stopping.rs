//! Early stopping port.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExperimentSnapshot, TrialIndex};

/// Opaque capability deciding early termination of running trials.
#[async_trait]
pub trait EarlyStoppingStrategy: Send + Sync {
    /// Subset of `trial_indices` recommended for early termination,
    /// each with an optional reason.
    async fn should_stop_trials_early(
        &self,
        trial_indices: &BTreeSet<TrialIndex>,
        experiment: &ExperimentSnapshot,
    ) -> DomainResult<BTreeMap<TrialIndex, Option<String>>>;
}
