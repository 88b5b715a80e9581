//! Common test utilities for integration tests
//!
//! Provides shared fixtures, mock runners and scripted strategies used
//! across multiple integration test files.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use trialforge::domain::models::SingleObjective;
use trialforge::{
    Config, DataUpdate, DomainError, DomainResult, Experiment, ExperimentClient, GenerationRequest,
    GenerationStrategy, MetricHandle, MetricValue, Objective, OptimizationConfig, Outcome,
    ParameterDomain, ParameterValue, Parameterization, SearchSpace, Trial, TrialIndex, TrialPoll,
    TrialRunner,
};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Two-parameter space: `x` in [0, 1], `y` in 0..=10.
pub fn search_space() -> SearchSpace {
    SearchSpace::new()
        .with_parameter(
            "x",
            ParameterDomain::Float {
                lower: 0.0,
                upper: 1.0,
                log_scale: false,
            },
        )
        .with_parameter("y", ParameterDomain::Int { lower: 0, upper: 10 })
}

pub fn params(x: f64, y: i64) -> Parameterization {
    Parameterization::from([
        ("x".to_string(), ParameterValue::Float(x)),
        ("y".to_string(), ParameterValue::Int(y)),
    ])
}

pub fn outcome(values: &[(&str, f64)]) -> Outcome {
    values
        .iter()
        .map(|(name, value)| ((*name).to_string(), MetricValue::new(*value)))
        .collect()
}

/// Objective that minimizes `loss`.
pub fn minimize_loss() -> OptimizationConfig {
    OptimizationConfig::new(Objective::Single(SingleObjective::minimize(
        MetricHandle::placeholder("loss"),
    )))
}

/// Client with the two-parameter experiment and a `loss` objective.
pub async fn configured_client(config: Config) -> ExperimentClient {
    let client = ExperimentClient::new(config);
    client
        .configure_experiment(Experiment::new("integration", search_space()))
        .await
        .expect("experiment should configure");
    client
        .configure_optimization(minimize_loss())
        .await
        .expect("optimization should configure");
    client
}

/// Seeded config with a fast poll loop.
pub fn test_config(seed: u64) -> Config {
    let mut config = Config {
        random_seed: Some(seed),
        ..Default::default()
    };
    config.orchestration.poll_interval_ms = 5;
    config.orchestration.max_poll_interval_ms = 20;
    config
}

/// Loss reported for a trial by the mock runner: its `x` value.
pub fn loss_of(trial: &Trial) -> f64 {
    trial
        .parameters
        .get("x")
        .and_then(ParameterValue::as_f64)
        .unwrap_or(1.0)
}

// ============================================================================
// Mock runner
// ============================================================================

/// Decides what a poll returns given the trial and the poll count so far
/// (starting at 1).
pub type PollScript = Arc<dyn Fn(&Trial, usize) -> TrialPoll + Send + Sync>;

#[derive(Debug, Default)]
struct RunnerState {
    polls: HashMap<TrialIndex, usize>,
    active: BTreeSet<TrialIndex>,
    max_active: usize,
    started: Vec<TrialIndex>,
    stopped: Vec<TrialIndex>,
}

/// In-memory runner that records concurrency and follows a poll script.
pub struct MockRunner {
    script: PollScript,
    refuse_start: BTreeSet<TrialIndex>,
    state: Mutex<RunnerState>,
}

impl MockRunner {
    pub fn new(script: PollScript) -> Self {
        Self {
            script,
            refuse_start: BTreeSet::new(),
            state: Mutex::new(RunnerState::default()),
        }
    }

    /// Completes every trial after `polls` polls with `loss` equal to `x`.
    pub fn completing_after(polls: usize) -> Self {
        Self::new(Arc::new(move |trial, count| {
            if count >= polls {
                TrialPoll::Completed {
                    update: Some(DataUpdate::new(outcome(&[("loss", loss_of(trial))]))),
                }
            } else {
                TrialPoll::Running { update: None }
            }
        }))
    }

    /// Reports `loss` at each poll as a progression and never finishes.
    pub fn never_finishing() -> Self {
        Self::new(Arc::new(|trial, count| TrialPoll::Running {
            update: Some(DataUpdate::at(
                outcome(&[("loss", loss_of(trial))]),
                i64::try_from(count).unwrap_or(i64::MAX),
            )),
        }))
    }

    /// Refuse to start the given trials.
    pub fn refusing(mut self, indices: impl IntoIterator<Item = TrialIndex>) -> Self {
        self.refuse_start.extend(indices);
        self
    }

    pub fn max_active(&self) -> usize {
        self.state.lock().unwrap().max_active
    }

    pub fn started(&self) -> Vec<TrialIndex> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<TrialIndex> {
        self.state.lock().unwrap().stopped.clone()
    }
}

#[async_trait]
impl TrialRunner for MockRunner {
    async fn run(&self, trial: &Trial) -> DomainResult<()> {
        if self.refuse_start.contains(&trial.index) {
            return Err(DomainError::ExecutionFailed("no capacity".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.started.push(trial.index);
        state.active.insert(trial.index);
        state.max_active = state.max_active.max(state.active.len());
        Ok(())
    }

    async fn poll(&self, trial: &Trial) -> DomainResult<TrialPoll> {
        let count = {
            let mut state = self.state.lock().unwrap();
            let count = state.polls.entry(trial.index).or_insert(0);
            *count += 1;
            *count
        };
        let poll = (self.script)(trial, count);
        if !matches!(poll, TrialPoll::Running { .. }) {
            self.state.lock().unwrap().active.remove(&trial.index);
        }
        Ok(poll)
    }

    async fn stop(&self, trial: &Trial, _reason: Option<&str>) -> DomainResult<()> {
        let mut state = self.state.lock().unwrap();
        state.active.remove(&trial.index);
        state.stopped.push(trial.index);
        Ok(())
    }
}

// ============================================================================
// Scripted generation strategy
// ============================================================================

/// Shared log of what a [`ScriptedStrategy`] was asked.
#[derive(Debug, Default)]
pub struct StrategyLog {
    pub pending_sizes: Vec<usize>,
    pub pending: Vec<Vec<Parameterization>>,
}

/// Strategy proposing points from a fixed list, then reporting
/// exhaustion. Records every pending set it is given.
pub struct ScriptedStrategy {
    points: Vec<Parameterization>,
    next: usize,
    log: Arc<Mutex<StrategyLog>>,
}

impl ScriptedStrategy {
    pub fn new(points: Vec<Parameterization>) -> (Self, Arc<Mutex<StrategyLog>>) {
        let log = Arc::new(Mutex::new(StrategyLog::default()));
        (
            Self {
                points,
                next: 0,
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl GenerationStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&mut self, request: &GenerationRequest) -> DomainResult<Vec<Parameterization>> {
        {
            let mut log = self.log.lock().unwrap();
            log.pending_sizes.push(request.pending.len());
            log.pending.push(request.pending.clone());
        }
        let end = self.next + request.count;
        if end > self.points.len() {
            return Err(DomainError::OptimizationComplete("script finished".to_string()));
        }
        let mut candidates = self.points[self.next..end].to_vec();
        if let Some(fixed) = &request.fixed_parameters {
            for candidate in &mut candidates {
                candidate.extend(fixed.clone());
            }
        }
        self.next = end;
        Ok(candidates)
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({ "next": self.next })
    }

    fn restore_state(&mut self, state: serde_json::Value) -> DomainResult<()> {
        self.next = state
            .get("next")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| DomainError::SerializationError("missing 'next'".to_string()))?;
        Ok(())
    }
}

/// Strategy that honors its first request and then returns no
/// candidates at all, breaking the count contract.
#[derive(Debug, Default)]
pub struct ShortChangingStrategy {
    calls: usize,
}

#[async_trait]
impl GenerationStrategy for ShortChangingStrategy {
    fn name(&self) -> &str {
        "short-changing"
    }

    async fn generate(&mut self, _request: &GenerationRequest) -> DomainResult<Vec<Parameterization>> {
        self.calls += 1;
        if self.calls == 1 {
            Ok(vec![params(0.5, 5)])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Parameterizations of the form `x = i / 10, y = i`.
pub fn ladder(count: usize) -> Vec<Parameterization> {
    (0..count)
        .map(|i| {
            let i = i64::try_from(i).unwrap_or(0);
            #[allow(clippy::cast_precision_loss)]
            params(i as f64 / 10.0, i)
        })
        .collect()
}

/// Status of every trial keyed by index.
pub async fn statuses(client: &ExperimentClient) -> BTreeMap<TrialIndex, trialforge::TrialStatus> {
    client
        .trials()
        .await
        .into_iter()
        .map(|t| (t.index, t.status))
        .collect()
}
