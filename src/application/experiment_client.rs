//! ExperimentClient - the orchestration engine instance
//!
//! Owns one experiment, its trials, the generation strategy and the
//! execution collaborators. Every operation goes through an explicitly
//! held client; there is no process-wide experiment state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::orchestration_loop::{Orchestrator, RunReport};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CHECKPOINT_VERSION, Config, Experiment, ExperimentCheckpoint, ExperimentSnapshot,
    GenerationStrategyConfig, ObservationRecord, OptimizationConfig, OrchestrationConfig,
    Outcome, Parameterization, TransitionOutcome, Trial, TrialIndex, TrialStatus,
};
use crate::domain::ports::{
    EarlyStoppingStrategy, GenerationStrategy, Metric, MetricHandle, TrialRunner,
};
use crate::services::{
    BestTrial, CompletionEvaluator, DataAttacher, GenerationService, MetricResolution,
    TrialStore, absorb_tracking_metrics, best_point, resolve_metric,
};

/// Arm name given to a baseline attached without one.
pub const BASELINE_ARM_NAME: &str = "baseline";

/// One experiment with its trials, generation strategy and execution
/// collaborators.
pub struct ExperimentClient {
    config: Config,
    experiment: RwLock<Option<Experiment>>,
    store: Arc<TrialStore>,
    attacher: DataAttacher,
    evaluator: CompletionEvaluator,
    generation: GenerationService,
    runner: RwLock<Option<Arc<dyn TrialRunner>>>,
    early_stopping: RwLock<Option<Arc<dyn EarlyStoppingStrategy>>>,
}

impl Default for ExperimentClient {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl ExperimentClient {
    /// Client with no experiment configured yet.
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(TrialStore::new()))
    }

    fn with_store(config: Config, store: Arc<TrialStore>) -> Self {
        let generation = GenerationService::new(config.generation.clone(), config.random_seed);
        Self {
            attacher: DataAttacher::new(store.clone()),
            evaluator: CompletionEvaluator::new(store.clone()),
            store,
            generation,
            experiment: RwLock::new(None),
            runner: RwLock::new(None),
            early_stopping: RwLock::new(None),
            config,
        }
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Set the experiment. Fails if one is already configured.
    pub async fn configure_experiment(&self, experiment: Experiment) -> DomainResult<()> {
        experiment.validate()?;
        let mut slot = self.experiment.write().await;
        if slot.is_some() {
            return Err(DomainError::ExperimentAlreadyConfigured);
        }
        info!(experiment = %experiment.name, parameters = experiment.search_space.len(), "experiment configured");
        *slot = Some(experiment);
        Ok(())
    }

    /// Overwrite the experiment unconditionally.
    ///
    /// Trials of the previous experiment are discarded and indexing
    /// restarts at 0. A pinned default generation strategy is dropped so
    /// the next request synthesizes one for the new search space; a custom
    /// strategy stays installed.
    pub async fn set_experiment(&self, experiment: Experiment) -> DomainResult<()> {
        experiment.validate()?;
        let mut slot = self.experiment.write().await;
        if slot.is_some() {
            let discarded = self.store.clear().await;
            let unpinned = self.generation.reset_default().await;
            warn!(
                experiment = %experiment.name,
                discarded_trials = discarded,
                default_strategy_reset = unpinned,
                "overwriting existing experiment"
            );
        }
        *slot = Some(experiment);
        Ok(())
    }

    /// Set the optimization config, moving any tracking metric it now
    /// names into its slot in the config.
    pub async fn configure_optimization(&self, config: OptimizationConfig) -> DomainResult<()> {
        config.validate()?;
        self.update_experiment(|experiment| {
            experiment.optimization_config = Some(config);
            let moved = absorb_tracking_metrics(experiment);
            if !moved.is_empty() {
                info!(metrics = ?moved, "tracking metrics moved into optimization config");
            }
            experiment.validate()
        })
        .await?;
        info!("optimization configured");
        Ok(())
    }

    /// Overwrite the optimization config without reconciling tracking
    /// metrics.
    pub async fn set_optimization_config(&self, config: OptimizationConfig) -> DomainResult<()> {
        config.validate()?;
        self.update_experiment(|experiment| {
            experiment.optimization_config = Some(config);
            Ok(())
        })
        .await
    }

    /// Synthesize the default generation strategy from `config`,
    /// replacing any current strategy.
    pub async fn configure_generation_strategy(&self, config: GenerationStrategyConfig) -> DomainResult<()> {
        let experiment = self.experiment().await?;
        self.generation.configure_default(&experiment, &config).await;
        Ok(())
    }

    /// Install a custom generation strategy.
    pub async fn set_generation_strategy(&self, strategy: Box<dyn GenerationStrategy>) {
        self.generation.set_strategy(strategy).await;
    }

    /// Set the runner used by [`run_trials`](Self::run_trials).
    pub async fn configure_runner(&self, runner: Arc<dyn TrialRunner>) {
        *self.runner.write().await = Some(runner);
        debug!("trial runner configured");
    }

    /// Resolve each metric into the experiment. Returns where each landed.
    pub async fn configure_metrics(
        &self,
        metrics: Vec<Arc<dyn Metric>>,
    ) -> DomainResult<Vec<(String, MetricResolution)>> {
        self.update_experiment(|experiment| {
            Ok(metrics
                .into_iter()
                .map(|metric| {
                    let handle = MetricHandle::new(metric);
                    let name = handle.name().to_string();
                    (name, resolve_metric(experiment, handle))
                })
                .collect())
        })
        .await
    }

    /// Set the strategy consulted for early stopping.
    pub async fn set_early_stopping_strategy(&self, strategy: Arc<dyn EarlyStoppingStrategy>) {
        *self.early_stopping.write().await = Some(strategy);
        debug!("early stopping strategy configured");
    }

    async fn update_experiment<R>(
        &self,
        f: impl FnOnce(&mut Experiment) -> DomainResult<R>,
    ) -> DomainResult<R> {
        let mut slot = self.experiment.write().await;
        let experiment = slot.as_mut().ok_or(DomainError::ExperimentNotConfigured)?;
        let mut draft = experiment.clone();
        let result = f(&mut draft)?;
        *experiment = draft;
        Ok(result)
    }

    // ========================================================================
    // Trials
    // ========================================================================

    /// Generate up to `max_trials` trials and register them as RUNNING.
    ///
    /// Candidates are requested one at a time so every request sees the
    /// trials created before it as pending. Stops early when the strategy
    /// needs more data or is exhausted, failing only if nothing was
    /// generated. Any other failure abandons the trials already created
    /// by this call before the error is returned.
    pub async fn get_next_trials(
        &self,
        max_trials: usize,
        fixed_parameters: Option<Parameterization>,
    ) -> DomainResult<BTreeMap<TrialIndex, Parameterization>> {
        let mut trials = BTreeMap::new();
        for _ in 0..max_trials {
            let snapshot = self.snapshot().await?;
            let candidates = match self
                .generation
                .generate(snapshot, fixed_parameters.clone(), 1)
                .await
            {
                Ok(candidates) => candidates,
                Err(e @ (DomainError::DataRequired(_) | DomainError::OptimizationComplete(_)))
                    if !trials.is_empty() =>
                {
                    info!(generated = trials.len(), reason = %e, "stopping generation early");
                    break;
                }
                Err(e) => {
                    self.abandon_batch(trials.keys().copied(), &e).await;
                    return Err(e);
                }
            };
            for parameters in candidates {
                let index = self
                    .store
                    .create(parameters.clone(), None, TrialStatus::Running)
                    .await?;
                trials.insert(index, parameters);
            }
        }
        info!(count = trials.len(), "trials generated");
        Ok(trials)
    }

    async fn abandon_batch(&self, indices: impl Iterator<Item = TrialIndex>, cause: &DomainError) {
        for index in indices {
            let reason = format!("generation batch failed: {cause}");
            match self.store.mark_abandoned(index, Some(reason)).await {
                Ok(_) => warn!(trial_index = index, error = %cause, "trial abandoned with failed batch"),
                Err(e) => warn!(trial_index = index, error = %e, "could not abandon trial of failed batch"),
            }
        }
    }

    /// Register a manually chosen parameterization as a RUNNING trial.
    pub async fn attach_trial(
        &self,
        parameters: Parameterization,
        arm_name: Option<String>,
    ) -> DomainResult<TrialIndex> {
        let experiment = self.experiment().await?;
        experiment.search_space.check_membership(&parameters, true)?;
        let index = self.store.create(parameters, arm_name, TrialStatus::Running).await?;
        info!(trial_index = index, "trial attached");
        Ok(index)
    }

    /// Attach the status-quo parameterization used as the baseline for
    /// relative constraints.
    pub async fn attach_baseline(
        &self,
        parameters: Parameterization,
        arm_name: Option<String>,
    ) -> DomainResult<TrialIndex> {
        let arm_name = arm_name.unwrap_or_else(|| BASELINE_ARM_NAME.to_string());
        let index = self.attach_trial(parameters, Some(arm_name)).await?;
        self.update_experiment(|experiment| {
            experiment.status_quo = Some(index);
            Ok(())
        })
        .await?;
        Ok(index)
    }

    /// Merge observed data into a trial without changing its status.
    pub async fn attach_data(
        &self,
        trial_index: TrialIndex,
        outcome: Outcome,
        progression: Option<i64>,
    ) -> DomainResult<()> {
        self.attacher.attach(trial_index, outcome, progression).await
    }

    /// Attach optional final data and mark the trial completed, or failed
    /// when required metrics are missing. Returns the resulting status.
    pub async fn complete_trial(
        &self,
        trial_index: TrialIndex,
        outcome: Option<Outcome>,
        progression: Option<i64>,
    ) -> DomainResult<TrialStatus> {
        let experiment = self.experiment().await?;
        self.evaluator
            .complete(
                trial_index,
                experiment.optimization_config.as_ref(),
                outcome,
                progression,
            )
            .await
    }

    /// Mark a running trial failed. A no-op on terminal trials.
    pub async fn mark_trial_failed(
        &self,
        trial_index: TrialIndex,
        reason: Option<String>,
    ) -> DomainResult<TransitionOutcome> {
        self.store.mark_failed(trial_index, reason).await
    }

    /// Mark a running trial abandoned. A no-op on terminal trials.
    pub async fn mark_trial_abandoned(
        &self,
        trial_index: TrialIndex,
        reason: Option<String>,
    ) -> DomainResult<TransitionOutcome> {
        self.store.mark_abandoned(trial_index, reason).await
    }

    /// Attach the latest data and mark the trial early stopped in one
    /// step.
    pub async fn mark_trial_early_stopped(
        &self,
        trial_index: TrialIndex,
        outcome: Option<Outcome>,
        progression: Option<i64>,
    ) -> DomainResult<TransitionOutcome> {
        let record = outcome.map(|o| ObservationRecord::new(o, progression));
        self.store
            .attach_and_mark_early_stopped(trial_index, record, None)
            .await
    }

    /// Ask the early-stopping strategy about one trial.
    pub async fn should_stop_trial_early(&self, trial_index: TrialIndex) -> DomainResult<bool> {
        let strategy = self
            .early_stopping
            .read()
            .await
            .clone()
            .ok_or(DomainError::EarlyStoppingStrategyMissing)?;
        if !self.store.contains(trial_index).await {
            return Err(DomainError::TrialNotFound(trial_index));
        }
        let snapshot = self.snapshot().await?;
        let decisions = strategy
            .should_stop_trials_early(&BTreeSet::from([trial_index]), &snapshot)
            .await?;
        Ok(decisions.contains_key(&trial_index))
    }

    /// Copy of one trial.
    pub async fn get_trial(&self, trial_index: TrialIndex) -> DomainResult<Trial> {
        self.store.get(trial_index).await
    }

    /// Copies of every trial in index order.
    pub async fn trials(&self) -> Vec<Trial> {
        self.store.all().await
    }

    /// Copy of the experiment.
    pub async fn experiment(&self) -> DomainResult<Experiment> {
        self.experiment
            .read()
            .await
            .clone()
            .ok_or(DomainError::ExperimentNotConfigured)
    }

    /// Experiment and trials at this instant.
    pub async fn snapshot(&self) -> DomainResult<ExperimentSnapshot> {
        let experiment = self.experiment().await?;
        Ok(ExperimentSnapshot {
            experiment,
            trials: self.store.all().await,
        })
    }

    // ========================================================================
    // Orchestration
    // ========================================================================

    /// Drive up to `max_trials` new trials to completion with the
    /// configured runner.
    pub async fn run_trials(
        &self,
        max_trials: usize,
        options: OrchestrationConfig,
        cancel: CancellationToken,
    ) -> DomainResult<RunReport> {
        Orchestrator::new(self, options, cancel).run(max_trials).await
    }

    pub(crate) async fn runner(&self) -> DomainResult<Arc<dyn TrialRunner>> {
        self.runner
            .read()
            .await
            .clone()
            .ok_or(DomainError::TrialRunnerMissing)
    }

    pub(crate) async fn early_stopping_strategy(&self) -> Option<Arc<dyn EarlyStoppingStrategy>> {
        self.early_stopping.read().await.clone()
    }

    pub(crate) fn store(&self) -> &TrialStore {
        &self.store
    }

    pub(crate) fn attacher(&self) -> &DataAttacher {
        &self.attacher
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Best feasible observed trial; `Unsupported` for multi-objective.
    pub async fn get_best_trial(&self) -> DomainResult<Option<BestTrial>> {
        best_point::best_trial(&self.snapshot().await?)
    }

    /// Non-dominated feasible observed trials.
    pub async fn get_pareto_frontier(&self) -> DomainResult<Vec<BestTrial>> {
        best_point::pareto_frontier(&self.snapshot().await?)
    }

    /// Best-so-far objective value after each observed trial.
    pub async fn get_trace(&self) -> DomainResult<Vec<f64>> {
        best_point::optimization_trace(&self.snapshot().await?)
    }

    /// Percent improvement of the best trial over the status quo.
    pub async fn get_improvement_over_baseline(&self) -> DomainResult<f64> {
        best_point::improvement_over_baseline(&self.snapshot().await?)
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    /// Capture everything needed to resume this experiment.
    pub async fn checkpoint(&self) -> DomainResult<ExperimentCheckpoint> {
        let experiment = self.experiment().await?;
        Ok(ExperimentCheckpoint {
            version: CHECKPOINT_VERSION,
            experiment,
            trials: self.store.all().await,
            next_trial_index: self.store.next_index().await,
            generation_strategy: self.generation.state().await,
            created_at: Utc::now(),
        })
    }

    /// Rebuild a client from a checkpoint.
    ///
    /// Metrics come back as placeholders; re-attach live implementations
    /// with [`configure_metrics`](Self::configure_metrics). A custom
    /// generation strategy must be supplied when the checkpoint holds the
    /// state of one.
    pub async fn restore(
        checkpoint: ExperimentCheckpoint,
        config: Config,
        strategy: Option<Box<dyn GenerationStrategy>>,
    ) -> DomainResult<Self> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(DomainError::ValidationFailed(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        checkpoint.experiment.validate()?;

        let trial_count = checkpoint.trials.len();
        let store = TrialStore::from_trials(checkpoint.trials, checkpoint.next_trial_index)?;
        let client = Self::with_store(config, Arc::new(store));
        match (checkpoint.generation_strategy, strategy) {
            (Some(saved), custom) => {
                client
                    .generation
                    .restore(&checkpoint.experiment, saved, custom)
                    .await?;
            }
            (None, Some(custom)) => client.generation.set_strategy(custom).await,
            (None, None) => {}
        }
        info!(
            experiment = %checkpoint.experiment.name,
            trials = trial_count,
            "experiment restored from checkpoint"
        );
        *client.experiment.write().await = Some(checkpoint.experiment);
        Ok(client)
    }
}
