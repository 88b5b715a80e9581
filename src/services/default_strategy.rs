//! Default generation strategy.
//!
//! Two phases. Initialization draws seeded uniform samples from the search
//! space. Once enough trials have been observed, local search perturbs the
//! incumbent: the best feasible trial for a scalar objective, or a seeded
//! pick from the Pareto frontier for multi-objective. Each candidate gets
//! its own generator derived from the seed and its ordinal, so a restored
//! strategy continues the exact sequence it would have produced.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExperimentSnapshot, GenerationStrategyConfig, Parameterization, SearchSpace, TrialStatus,
};
use crate::domain::ports::{GenerationRequest, GenerationStrategy};
use crate::services::best_point;

/// Name recorded in checkpoints.
pub const DEFAULT_STRATEGY_NAME: &str = "uniform+local_search";

const MAX_DEDUP_ATTEMPTS: usize = 32;
const INITIAL_STEP: f64 = 0.2;
const MIN_STEP: f64 = 0.02;

/// Everything needed to continue the candidate sequence, including the
/// phase settings the strategy was synthesized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StrategyState {
    seed: u64,
    generated: usize,
    initialization_budget: usize,
    min_observed: usize,
    allow_exceeding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialization,
    LocalSearch,
}

/// Seeded uniform initialization followed by local search.
#[derive(Debug, Clone)]
pub struct DefaultGenerationStrategy {
    state: StrategyState,
}

impl DefaultGenerationStrategy {
    /// Synthesize the strategy for `search_space`.
    pub fn new(search_space: &SearchSpace, config: &GenerationStrategyConfig, seed: u64) -> Self {
        let initialization_budget =
            config.resolved_initialization_budget(search_space.tunable_count());
        debug!(
            initialization_budget,
            seed, "default generation strategy synthesized"
        );
        Self {
            state: StrategyState {
                seed,
                generated: 0,
                initialization_budget,
                min_observed: config.min_observed_initialization_trials,
                allow_exceeding: config.allow_exceeding_initialization_budget,
            },
        }
    }

    /// Candidates drawn uniformly before local search starts.
    pub fn initialization_budget(&self) -> usize {
        self.state.initialization_budget
    }

    /// Number of candidates produced so far.
    pub fn generated(&self) -> usize {
        self.state.generated
    }

    fn rng_for(&self, ordinal: usize) -> StdRng {
        let mix = (ordinal as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(self.state.seed ^ mix)
    }

    fn phase_for(&self, ordinal: usize, observed: usize) -> DomainResult<Phase> {
        let StrategyState {
            initialization_budget,
            min_observed,
            allow_exceeding,
            ..
        } = self.state;
        if ordinal < initialization_budget {
            return Ok(Phase::Initialization);
        }
        if observed >= min_observed.max(1) {
            return Ok(Phase::LocalSearch);
        }
        if allow_exceeding {
            return Ok(Phase::Initialization);
        }
        Err(DomainError::DataRequired(format!(
            "initialization budget of {initialization_budget} candidates is spent and {observed} of {min_observed} required trials are completed"
        )))
    }

    /// Parameterization to search around, if any trial has usable data.
    fn incumbent(snapshot: &ExperimentSnapshot, rng: &mut StdRng) -> Option<Parameterization> {
        let config = snapshot.experiment.optimization_config.as_ref()?;
        if config.is_multi_objective() {
            let frontier = best_point::pareto_frontier(snapshot).ok()?;
            if frontier.is_empty() {
                return None;
            }
            let pick = rng.gen_range(0..frontier.len());
            return frontier.into_iter().nth(pick).map(|b| b.parameters);
        }
        best_point::best_trial(snapshot).ok().flatten().map(|b| b.parameters)
    }

    #[allow(clippy::cast_precision_loss)]
    fn step_size(&self, ordinal: usize) -> f64 {
        let rounds = ordinal.saturating_sub(self.state.initialization_budget) as f64;
        (INITIAL_STEP / (1.0 + rounds / 10.0)).max(MIN_STEP)
    }
}

#[async_trait]
impl GenerationStrategy for DefaultGenerationStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY_NAME
    }

    async fn generate(&mut self, request: &GenerationRequest) -> DomainResult<Vec<Parameterization>> {
        let snapshot = &request.experiment;
        let space = &snapshot.experiment.search_space;
        let fixed = request.fixed_parameters.as_ref();
        if let Some(fixed) = fixed {
            space.check_membership(fixed, false)?;
        }

        let observed = snapshot.trials_with_status(TrialStatus::Completed).count();
        let mut seen: Vec<Parameterization> = snapshot
            .trials
            .iter()
            .map(|t| t.parameters.clone())
            .chain(request.pending.iter().cloned())
            .collect();

        if fixed.is_none()
            && let Some(cardinality) = space.cardinality()
        {
            let mut used: Vec<&Parameterization> = Vec::new();
            for params in snapshot.trials.iter().map(|t| &t.parameters).chain(&request.pending) {
                if !used.contains(&params) {
                    used.push(params);
                }
            }
            if (used.len() as u128).saturating_add(request.count as u128) > cardinality {
                return Err(DomainError::OptimizationComplete(format!(
                    "all {cardinality} points of the discrete search space have been suggested"
                )));
            }
        }

        let mut candidates = Vec::with_capacity(request.count);
        for offset in 0..request.count {
            let ordinal = self.state.generated + offset;
            let phase = self.phase_for(ordinal, observed)?;
            let mut rng = self.rng_for(ordinal);
            let center = match phase {
                Phase::Initialization => None,
                Phase::LocalSearch => Self::incumbent(snapshot, &mut rng),
            };
            let step = self.step_size(ordinal);

            let mut candidate = Parameterization::new();
            for _ in 0..MAX_DEDUP_ATTEMPTS {
                candidate = match &center {
                    Some(center) => space.perturb(center, fixed, step, &mut rng),
                    None => space.sample(fixed, &mut rng),
                };
                if !seen.contains(&candidate) {
                    break;
                }
            }
            seen.push(candidate.clone());
            candidates.push(candidate);
        }

        self.state.generated += request.count;
        debug!(
            count = request.count,
            generated = self.state.generated,
            pending = request.pending.len(),
            "default strategy generated candidates"
        );
        Ok(candidates)
    }

    fn state(&self) -> serde_json::Value {
        serde_json::to_value(self.state).unwrap_or(serde_json::Value::Null)
    }

    fn restore_state(&mut self, state: serde_json::Value) -> DomainResult<()> {
        self.state = serde_json::from_value(state)?;
        Ok(())
    }
}
