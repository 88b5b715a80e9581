//! Orchestrator - bounded trial scheduling loop
//!
//! Drives trial creation, polling and termination under a trial budget,
//! a parallelism limit and a tolerated failure rate:
//! - Generation one candidate at a time while capacity allows
//! - Polling of running trials with backoff on quiet cycles
//! - Metric fetching and soft completion of finished trials
//! - Early stopping through the configured strategy
//! - Graceful shutdown with a cancellation token
//!
//! The loop owns no optimization logic. Every state change it makes is
//! one transition on one trial, so cancelling between cycles never leaves
//! a trial half-updated.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::experiment_client::ExperimentClient;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{OrchestrationConfig, TrialIndex, TrialStatus};
use crate::domain::ports::{TrialPoll, TrialRunner};
use crate::services::FetchScope;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every trial of the budget was created and reached a terminal state.
    BudgetExhausted,
    /// The generation strategy had no further candidates; every created
    /// trial reached a terminal state.
    OptimizationComplete,
    /// Too many trials failed; the remaining budget was left unused.
    FailureRateExceeded {
        /// Failed trials among `terminal`
        failed: usize,
        /// Terminal trials driven by the run
        terminal: usize,
        /// `failed / terminal`
        rate: f64,
        /// Configured tolerance
        tolerated: f64,
    },
    /// A cycle hit an error it cannot recover from, such as a generation
    /// contract violation or a strategy waiting on data no running trial
    /// will produce.
    Aborted {
        /// The error that ended the run
        reason: String,
    },
    /// The cancellation token fired.
    Cancelled,
}

impl RunOutcome {
    /// Whether the run ended without an abort or cancellation.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::BudgetExhausted | Self::OptimizationComplete)
    }
}

/// Summary of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Trials created by this run, in creation order
    pub trials_created: Vec<TrialIndex>,
    /// Trials that were already outstanding and were driven by this run
    pub adopted: Vec<TrialIndex>,
    /// Trials of the experiment left in a non-terminal state
    pub non_terminal: Vec<TrialIndex>,
    /// Status counts over created and adopted trials
    pub status_counts: BTreeMap<TrialStatus, usize>,
    /// Number of poll cycles performed
    pub poll_cycles: usize,
}

#[derive(Debug, Default)]
struct RunState {
    created: Vec<TrialIndex>,
    adopted: Vec<TrialIndex>,
    exhausted: bool,
    poll_cycles: usize,
}

impl RunState {
    fn tracked(&self) -> BTreeSet<TrialIndex> {
        self.created.iter().chain(&self.adopted).copied().collect()
    }
}

enum Cycle {
    Continue { changed: bool },
    Finished(RunOutcome),
}

/// Delay before the next poll: reset after a cycle with changes, grown by
/// `factor` and capped at `max` otherwise.
fn next_poll_delay(current: Duration, base: Duration, max: Duration, factor: f64, changed: bool) -> Duration {
    if changed {
        return base;
    }
    current.mul_f64(factor).min(max)
}

/// Drives one experiment's trials through a [`TrialRunner`].
///
/// Every non-terminal trial of the experiment counts against the
/// parallelism limit and is polled, whether this run created it or not.
/// Only the trial budget is scoped to the run.
pub struct Orchestrator<'a> {
    client: &'a ExperimentClient,
    options: OrchestrationConfig,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator over `client`, stopped early by `cancel`.
    pub fn new(client: &'a ExperimentClient, options: OrchestrationConfig, cancel: CancellationToken) -> Self {
        Self {
            client,
            options,
            cancel,
        }
    }

    /// Run until `max_trials` trials have been created and every trial is
    /// terminal, the strategy is exhausted, the failure rate is exceeded,
    /// a cycle fails, or the token is cancelled.
    ///
    /// Errors are returned only for problems found before any trial is
    /// touched; anything later ends the run with [`RunOutcome::Aborted`].
    pub async fn run(&self, max_trials: usize) -> DomainResult<RunReport> {
        self.options.validate()?;
        let experiment = self.client.experiment().await?;
        let runner = self.client.runner().await?;

        info!(
            experiment = %experiment.name,
            max_trials,
            parallelism = self.options.parallelism,
            tolerated_failure_rate = self.options.tolerated_trial_failure_rate,
            "orchestration run started"
        );

        let base = Duration::from_millis(self.options.poll_interval_ms);
        let max = Duration::from_millis(self.options.max_poll_interval_ms);
        let mut delay = base;
        let mut state = RunState::default();

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }

            let changed = match self.cycle(&runner, max_trials, &mut state).await {
                Ok(Cycle::Finished(outcome)) => break outcome,
                Ok(Cycle::Continue { changed }) => changed,
                Err(e) => {
                    error!(error = %e, poll_cycle = state.poll_cycles, "orchestration cycle failed");
                    break RunOutcome::Aborted { reason: e.to_string() };
                }
            };

            delay = next_poll_delay(delay, base, max, self.options.poll_backoff_factor, changed);
            debug!(poll_cycle = state.poll_cycles, delay_ms = delay.as_millis() as u64, changed, "waiting for next poll");
            select! {
                () = self.cancel.cancelled() => break RunOutcome::Cancelled,
                () = sleep(delay) => {}
            }
        };

        let report = self.report(outcome, state).await;
        match &report.outcome {
            RunOutcome::FailureRateExceeded { rate, tolerated, .. } => error!(
                rate,
                tolerated,
                non_terminal = ?report.non_terminal,
                "orchestration run aborted: failure rate exceeded"
            ),
            RunOutcome::Aborted { reason } => error!(
                %reason,
                non_terminal = ?report.non_terminal,
                "orchestration run aborted"
            ),
            RunOutcome::Cancelled => warn!(
                non_terminal = ?report.non_terminal,
                "orchestration run cancelled"
            ),
            outcome => info!(
                outcome = ?outcome,
                trials = report.trials_created.len(),
                adopted = report.adopted.len(),
                poll_cycles = report.poll_cycles,
                "orchestration run finished"
            ),
        }
        Ok(report)
    }

    /// One scheduling cycle: launch, check, poll, check, stop early.
    async fn cycle(
        &self,
        runner: &Arc<dyn TrialRunner>,
        max_trials: usize,
        state: &mut RunState,
    ) -> DomainResult<Cycle> {
        self.adopt_outstanding(state).await;
        let mut changed = self.fill_capacity(runner, max_trials, state).await?;

        if let Some(abort) = self.check_failure_rate(state).await {
            return Ok(Cycle::Finished(abort));
        }
        if self.client.store().non_terminal_indices().await.is_empty() {
            if state.created.len() >= max_trials {
                return Ok(Cycle::Finished(RunOutcome::BudgetExhausted));
            }
            if state.exhausted {
                return Ok(Cycle::Finished(RunOutcome::OptimizationComplete));
            }
        }

        state.poll_cycles += 1;
        changed |= self.poll_running(runner).await?;

        if let Some(abort) = self.check_failure_rate(state).await {
            return Ok(Cycle::Finished(abort));
        }

        changed |= self.apply_early_stopping(runner).await?;
        Ok(Cycle::Continue { changed })
    }

    /// Take over outstanding trials this run did not create, such as ones
    /// generated or attached manually, or restored from a checkpoint.
    async fn adopt_outstanding(&self, state: &mut RunState) {
        let tracked = state.tracked();
        for index in self.client.store().non_terminal_indices().await {
            if !tracked.contains(&index) {
                info!(trial_index = index, "adopting outstanding trial");
                state.adopted.push(index);
            }
        }
    }

    /// Create and launch trials while the budget and parallelism allow.
    async fn fill_capacity(
        &self,
        runner: &Arc<dyn TrialRunner>,
        max_trials: usize,
        state: &mut RunState,
    ) -> DomainResult<bool> {
        let mut changed = false;
        while !state.exhausted && state.created.len() < max_trials {
            if self.client.store().non_terminal_indices().await.len() >= self.options.parallelism {
                break;
            }
            let trials = match self.client.get_next_trials(1, None).await {
                Ok(trials) => trials,
                Err(DomainError::DataRequired(reason)) => {
                    if self.client.store().indices_with_status(TrialStatus::Running).await.is_empty() {
                        return Err(DomainError::DataRequired(reason));
                    }
                    debug!(%reason, "waiting for running trials before generating more");
                    break;
                }
                Err(DomainError::OptimizationComplete(reason)) => {
                    info!(%reason, "generation strategy exhausted");
                    state.exhausted = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            for index in trials.into_keys() {
                state.created.push(index);
                changed = true;
                self.launch(runner, index).await?;
            }
        }
        Ok(changed)
    }

    /// Hand a trial to the runner, failing it if the runner refuses.
    async fn launch(&self, runner: &Arc<dyn TrialRunner>, index: TrialIndex) -> DomainResult<()> {
        let trial = self.client.store().get(index).await?;
        if let Err(e) = runner.run(&trial).await {
            warn!(trial_index = index, error = %e, "runner failed to start trial");
            self.client
                .store()
                .mark_failed(index, Some(format!("runner failed to start trial: {e}")))
                .await?;
        } else {
            debug!(trial_index = index, "trial launched");
        }
        Ok(())
    }

    /// Poll every running trial of the experiment once. Returns whether
    /// any trial gained data or changed status.
    async fn poll_running(&self, runner: &Arc<dyn TrialRunner>) -> DomainResult<bool> {
        let metrics = self.client.experiment().await?.metric_handles();
        let mut changed = false;

        for index in self.client.store().indices_with_status(TrialStatus::Running).await {
            let trial = self.client.store().get(index).await?;
            let poll = match runner.poll(&trial).await {
                Ok(poll) => poll,
                Err(e) => {
                    warn!(trial_index = index, error = %e, "poll failed, treating trial as still running");
                    continue;
                }
            };

            match poll {
                TrialPoll::Running { update } => {
                    if let Some(update) = update {
                        self.client
                            .attach_data(index, update.outcome, update.progression)
                            .await?;
                        changed = true;
                    }
                    let fetched = self
                        .client
                        .attacher()
                        .fetch_and_attach(index, &metrics, FetchScope::WhileRunning)
                        .await?;
                    changed |= fetched > 0;
                }
                TrialPoll::Completed { update } => {
                    if let Some(update) = update {
                        self.client
                            .attach_data(index, update.outcome, update.progression)
                            .await?;
                    }
                    self.client
                        .attacher()
                        .fetch_and_attach(index, &metrics, FetchScope::Final)
                        .await?;
                    let status = self.client.complete_trial(index, None, None).await?;
                    debug!(trial_index = index, status = %status, "trial finished");
                    changed = true;
                }
                TrialPoll::Failed { reason } => {
                    warn!(trial_index = index, %reason, "trial execution failed");
                    self.client.store().mark_failed(index, Some(reason)).await?;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Abort outcome when failed trials exceed the tolerated share of the
    /// run's terminal trials.
    async fn check_failure_rate(&self, state: &RunState) -> Option<RunOutcome> {
        let tracked = state.tracked();
        let mut failed = 0;
        let mut terminal = 0;
        for trial in self.client.store().all().await {
            if !tracked.contains(&trial.index) || !trial.is_terminal() {
                continue;
            }
            terminal += 1;
            if trial.status == TrialStatus::Failed {
                failed += 1;
            }
        }
        if terminal == 0 {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let rate = failed as f64 / terminal as f64;
        let tolerated = self.options.tolerated_trial_failure_rate;
        (rate > tolerated).then_some(RunOutcome::FailureRateExceeded {
            failed,
            terminal,
            rate,
            tolerated,
        })
    }

    /// Stop running trials the early-stopping strategy recommends.
    async fn apply_early_stopping(&self, runner: &Arc<dyn TrialRunner>) -> DomainResult<bool> {
        let Some(strategy) = self.client.early_stopping_strategy().await else {
            return Ok(false);
        };
        let running: BTreeSet<TrialIndex> = self
            .client
            .store()
            .indices_with_status(TrialStatus::Running)
            .await
            .into_iter()
            .collect();
        if running.is_empty() {
            return Ok(false);
        }

        let snapshot = self.client.snapshot().await?;
        let decisions = match strategy.should_stop_trials_early(&running, &snapshot).await {
            Ok(decisions) => decisions,
            Err(e) => {
                warn!(error = %e, "early stopping evaluation failed");
                return Ok(false);
            }
        };

        let mut changed = false;
        for (index, reason) in decisions {
            if !running.contains(&index) {
                continue;
            }
            let trial = self.client.store().get(index).await?;
            if let Err(e) = runner.stop(&trial, reason.as_deref()).await {
                warn!(trial_index = index, error = %e, "runner failed to stop trial");
            }
            let outcome = self
                .client
                .store()
                .attach_and_mark_early_stopped(index, None, reason)
                .await?;
            if outcome.is_applied() {
                info!(trial_index = index, "trial stopped early");
                changed = true;
            }
        }
        Ok(changed)
    }

    async fn report(&self, outcome: RunOutcome, state: RunState) -> RunReport {
        let tracked = state.tracked();
        let mut status_counts = BTreeMap::new();
        let mut non_terminal = Vec::new();
        for trial in self.client.store().all().await {
            if tracked.contains(&trial.index) {
                *status_counts.entry(trial.status).or_insert(0) += 1;
            }
            if !trial.is_terminal() {
                non_terminal.push(trial.index);
            }
        }
        RunReport {
            outcome,
            trials_created: state.created,
            adopted: state.adopted,
            non_terminal,
            status_counts,
            poll_cycles: state.poll_cycles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_poll_delay_backs_off_and_resets() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(250);

        let d1 = next_poll_delay(base, base, max, 2.0, false);
        assert_eq!(d1, Duration::from_millis(200));
        let d2 = next_poll_delay(d1, base, max, 2.0, false);
        assert_eq!(d2, max);
        assert_eq!(next_poll_delay(d2, base, max, 2.0, true), base);
    }

    #[test]
    fn test_tracked_merges_created_and_adopted() {
        let state = RunState {
            created: vec![3, 4],
            adopted: vec![0, 1],
            ..Default::default()
        };
        assert_eq!(state.tracked().into_iter().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_outcome_success_classification() {
        assert!(RunOutcome::BudgetExhausted.is_success());
        assert!(RunOutcome::OptimizationComplete.is_success());
        assert!(!RunOutcome::Cancelled.is_success());
        assert!(
            !RunOutcome::Aborted {
                reason: "boom".to_string()
            }
            .is_success()
        );
        assert!(
            !RunOutcome::FailureRateExceeded {
                failed: 1,
                terminal: 1,
                rate: 1.0,
                tolerated: 0.2
            }
            .is_success()
        );
    }
}
