//! Trial store.
//!
//! Holds every trial of the experiment keyed by index. Each trial sits
//! behind its own mutex so manual API calls and the orchestration loop can
//! touch different trials concurrently while writes to one trial are
//! serialized. The index map itself is only locked long enough to clone a
//! trial handle, never across an await on a collaborator.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ObservationRecord, Parameterization, TransitionOutcome, Trial, TrialIndex, TrialStatus,
};

#[derive(Debug, Default)]
struct Inner {
    trials: BTreeMap<TrialIndex, Arc<Mutex<Trial>>>,
    next_index: TrialIndex,
}

/// Indexed collection of trials with per-trial exclusive sections.
#[derive(Debug, Default)]
pub struct TrialStore {
    inner: RwLock<Inner>,
}

impl TrialStore {
    /// Empty store whose first trial gets index 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from checkpointed trials.
    pub fn from_trials(trials: Vec<Trial>, next_index: TrialIndex) -> DomainResult<Self> {
        let mut map = BTreeMap::new();
        for trial in trials {
            if trial.index >= next_index {
                return Err(DomainError::ValidationFailed(format!(
                    "trial index {} is not below next index {next_index}",
                    trial.index
                )));
            }
            let index = trial.index;
            if map.insert(index, Arc::new(Mutex::new(trial))).is_some() {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate trial index {index}"
                )));
            }
        }
        Ok(Self {
            inner: RwLock::new(Inner {
                trials: map,
                next_index,
            }),
        })
    }

    /// Create a trial with the next index.
    ///
    /// `status` must be `Candidate` or `Running`; a running trial is moved
    /// through `Candidate` so its start time is recorded.
    pub async fn create(
        &self,
        parameters: Parameterization,
        arm_name: Option<String>,
        status: TrialStatus,
    ) -> DomainResult<TrialIndex> {
        if !matches!(status, TrialStatus::Candidate | TrialStatus::Running) {
            return Err(DomainError::ValidationFailed(format!(
                "trials cannot be created as {status}"
            )));
        }

        let mut inner = self.inner.write().await;
        let index = inner.next_index;
        let mut trial = Trial::new(index, parameters);
        trial.arm_name = arm_name;
        if status == TrialStatus::Running {
            trial.mark_running()?;
        }
        inner.trials.insert(index, Arc::new(Mutex::new(trial)));
        inner.next_index += 1;

        debug!(trial_index = index, status = %status, "trial created");
        Ok(index)
    }

    async fn handle(&self, index: TrialIndex) -> DomainResult<Arc<Mutex<Trial>>> {
        self.inner
            .read()
            .await
            .trials
            .get(&index)
            .cloned()
            .ok_or(DomainError::TrialNotFound(index))
    }

    /// Run `f` inside the trial's exclusive section.
    pub async fn with_trial<R>(
        &self,
        index: TrialIndex,
        f: impl FnOnce(&mut Trial) -> R,
    ) -> DomainResult<R> {
        let handle = self.handle(index).await?;
        let mut trial = handle.lock().await;
        Ok(f(&mut trial))
    }

    /// Copy of a trial.
    pub async fn get(&self, index: TrialIndex) -> DomainResult<Trial> {
        self.with_trial(index, |trial| trial.clone()).await
    }

    /// Whether a trial with `index` exists.
    pub async fn contains(&self, index: TrialIndex) -> bool {
        self.inner.read().await.trials.contains_key(&index)
    }

    /// Current status of a trial.
    pub async fn status(&self, index: TrialIndex) -> DomainResult<TrialStatus> {
        self.with_trial(index, |trial| trial.status).await
    }

    async fn transition(
        &self,
        index: TrialIndex,
        f: impl FnOnce(&mut Trial) -> DomainResult<TransitionOutcome>,
    ) -> DomainResult<TransitionOutcome> {
        let (outcome, status) = self
            .with_trial(index, |trial| {
                let outcome = f(trial)?;
                Ok::<_, DomainError>((outcome, trial.status))
            })
            .await??;
        if outcome.is_applied() {
            debug!(trial_index = index, status = %status, "trial status changed");
        }
        Ok(outcome)
    }

    /// Transition a trial to running.
    pub async fn mark_running(&self, index: TrialIndex) -> DomainResult<TransitionOutcome> {
        self.transition(index, Trial::mark_running).await
    }

    /// Transition a trial to completed.
    pub async fn mark_completed(&self, index: TrialIndex) -> DomainResult<TransitionOutcome> {
        self.transition(index, Trial::mark_completed).await
    }

    /// Manual failure. A no-op with a warning on a terminal trial.
    pub async fn mark_failed(
        &self,
        index: TrialIndex,
        reason: Option<String>,
    ) -> DomainResult<TransitionOutcome> {
        self.transition(index, |trial| trial.mark_failed(reason))
            .await
    }

    /// Manual abandonment. A no-op with a warning on a terminal trial.
    pub async fn mark_abandoned(
        &self,
        index: TrialIndex,
        reason: Option<String>,
    ) -> DomainResult<TransitionOutcome> {
        self.transition(index, |trial| trial.mark_abandoned(reason))
            .await
    }

    /// Attach the latest data and mark the trial early stopped as one
    /// operation inside the trial's exclusive section.
    ///
    /// Data is attached even when the trial turns out to be terminal
    /// already, matching what a plain data attach would do.
    pub async fn attach_and_mark_early_stopped(
        &self,
        index: TrialIndex,
        record: Option<ObservationRecord>,
        reason: Option<String>,
    ) -> DomainResult<TransitionOutcome> {
        self.transition(index, |trial| {
            if !trial.is_terminal() && !trial.status.can_transition_to(TrialStatus::EarlyStopped) {
                return Err(DomainError::InvalidStateTransition {
                    index: trial.index,
                    from: trial.status,
                    to: TrialStatus::EarlyStopped,
                });
            }
            if let Some(record) = record {
                trial.update_data(record);
            }
            trial.mark_early_stopped(reason)
        })
        .await
    }

    /// Merge an observation record. Does not change status.
    pub async fn update_data(&self, index: TrialIndex, record: ObservationRecord) -> DomainResult<()> {
        self.with_trial(index, |trial| {
            if trial.is_terminal() {
                warn!(
                    trial_index = index,
                    status = %trial.status,
                    "attaching data to a terminal trial"
                );
            }
            trial.update_data(record);
        })
        .await
    }

    /// Copies of every trial in index order.
    pub async fn all(&self) -> Vec<Trial> {
        let handles: Vec<_> = self.inner.read().await.trials.values().cloned().collect();
        let mut trials = Vec::with_capacity(handles.len());
        for handle in handles {
            trials.push(handle.lock().await.clone());
        }
        trials
    }

    /// Indices of trials currently in `status`.
    pub async fn indices_with_status(&self, status: TrialStatus) -> Vec<TrialIndex> {
        self.all()
            .await
            .into_iter()
            .filter(|t| t.status == status)
            .map(|t| t.index)
            .collect()
    }

    /// Indices of every trial not yet in a terminal status.
    pub async fn non_terminal_indices(&self) -> Vec<TrialIndex> {
        self.all()
            .await
            .into_iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.index)
            .collect()
    }

    /// Drop every trial and restart indexing at 0. Returns how many
    /// trials were discarded.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let discarded = inner.trials.len();
        inner.trials.clear();
        inner.next_index = 0;
        if discarded > 0 {
            warn!(discarded, "trial store cleared");
        }
        discarded
    }

    /// Number of trials in each status.
    pub async fn counts(&self) -> BTreeMap<TrialStatus, usize> {
        let mut counts = BTreeMap::new();
        for trial in self.all().await {
            *counts.entry(trial.status).or_insert(0) += 1;
        }
        counts
    }

    /// Number of trials.
    pub async fn len(&self) -> usize {
        self.inner.read().await.trials.len()
    }

    /// Whether no trial exists.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.trials.is_empty()
    }

    /// Index the next created trial will receive.
    pub async fn next_index(&self) -> TrialIndex {
        self.inner.read().await.next_index
    }
}
