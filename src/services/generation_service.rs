//! Generation service.
//!
//! Owns the generation strategy and the invocation protocol around it:
//! precondition checks, the pending set, and verification of the
//! candidates returned. When no strategy has been set, the default one is
//! synthesized on first use and stays pinned for the rest of the run.

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Experiment, ExperimentSnapshot, GenerationStrategyConfig, GenerationStrategyState,
    Parameterization,
};
use crate::domain::ports::{GenerationRequest, GenerationStrategy};
use crate::services::default_strategy::{DEFAULT_STRATEGY_NAME, DefaultGenerationStrategy};

/// Owner of the generation strategy for one experiment.
pub struct GenerationService {
    strategy: Mutex<Option<Box<dyn GenerationStrategy>>>,
    defaults: GenerationStrategyConfig,
    seed: Option<u64>,
}

impl GenerationService {
    /// `seed` is used for the default strategy when the generation config
    /// does not carry its own.
    pub fn new(defaults: GenerationStrategyConfig, seed: Option<u64>) -> Self {
        Self {
            strategy: Mutex::new(None),
            defaults,
            seed,
        }
    }

    fn default_strategy(
        &self,
        experiment: &Experiment,
        config: &GenerationStrategyConfig,
    ) -> DefaultGenerationStrategy {
        let seed = config
            .initialization_random_seed
            .or(self.seed)
            .unwrap_or_else(rand::random);
        DefaultGenerationStrategy::new(&experiment.search_space, config, seed)
    }

    /// Install a custom strategy, replacing the current one.
    pub async fn set_strategy(&self, strategy: Box<dyn GenerationStrategy>) {
        info!(strategy = strategy.name(), "generation strategy set");
        *self.strategy.lock().await = Some(strategy);
    }

    /// Synthesize the default strategy from `config` now, replacing the
    /// current one.
    pub async fn configure_default(&self, experiment: &Experiment, config: &GenerationStrategyConfig) {
        let strategy = self.default_strategy(experiment, config);
        info!(
            initialization_budget = strategy.initialization_budget(),
            "default generation strategy configured"
        );
        *self.strategy.lock().await = Some(Box::new(strategy));
    }

    /// Drop the default strategy if it is the current one, so the next
    /// request synthesizes a fresh one. Custom strategies are kept.
    pub async fn reset_default(&self) -> bool {
        let mut guard = self.strategy.lock().await;
        if guard.as_ref().is_some_and(|s| s.name() == DEFAULT_STRATEGY_NAME) {
            *guard = None;
            debug!("default generation strategy unpinned");
            return true;
        }
        false
    }

    /// Whether a strategy is set or pinned.
    pub async fn has_strategy(&self) -> bool {
        self.strategy.lock().await.is_some()
    }

    /// Name of the current strategy, if any.
    pub async fn strategy_name(&self) -> Option<String> {
        self.strategy.lock().await.as_ref().map(|s| s.name().to_string())
    }

    /// Checkpointable state of the current strategy.
    pub async fn state(&self) -> Option<GenerationStrategyState> {
        self.strategy.lock().await.as_ref().map(|s| GenerationStrategyState {
            name: s.name().to_string(),
            state: s.state(),
        })
    }

    /// Restore checkpointed strategy state.
    ///
    /// With `custom` the state is handed to that strategy. Otherwise the
    /// state must belong to the default strategy, which is rebuilt for
    /// `experiment`.
    pub async fn restore(
        &self,
        experiment: &Experiment,
        saved: GenerationStrategyState,
        custom: Option<Box<dyn GenerationStrategy>>,
    ) -> DomainResult<()> {
        let mut strategy: Box<dyn GenerationStrategy> = match custom {
            Some(custom) => custom,
            None if saved.name == DEFAULT_STRATEGY_NAME => {
                Box::new(self.default_strategy(experiment, &self.defaults))
            }
            None => {
                return Err(DomainError::ValidationFailed(format!(
                    "checkpoint holds state of strategy '{}'; supply that strategy to restore it",
                    saved.name
                )));
            }
        };
        if strategy.name() != saved.name {
            return Err(DomainError::ValidationFailed(format!(
                "checkpoint holds state of strategy '{}', got '{}'",
                saved.name,
                strategy.name()
            )));
        }
        strategy.restore_state(saved.state)?;
        *self.strategy.lock().await = Some(strategy);
        Ok(())
    }

    /// Ask the strategy for exactly `count` candidates.
    ///
    /// The pending set is computed from `snapshot` so it always reflects
    /// every non-terminal trial. Count mismatches and fixed-parameter
    /// violations are contract errors and are never papered over.
    pub async fn generate(
        &self,
        snapshot: ExperimentSnapshot,
        fixed_parameters: Option<Parameterization>,
        count: usize,
    ) -> DomainResult<Vec<Parameterization>> {
        if snapshot.experiment.optimization_config.is_none() {
            return Err(DomainError::OptimizationConfigMissing);
        }
        if let Some(fixed) = &fixed_parameters {
            snapshot.experiment.search_space.check_membership(fixed, false)?;
        }

        let mut guard = self.strategy.lock().await;
        if guard.is_none() {
            let strategy = self.default_strategy(&snapshot.experiment, &self.defaults);
            info!(
                initialization_budget = strategy.initialization_budget(),
                "no generation strategy set, pinning default"
            );
            *guard = Some(Box::new(strategy));
        }
        let Some(strategy) = guard.as_mut() else {
            return Err(DomainError::GenerationFailed("no generation strategy".to_string()));
        };

        let request = GenerationRequest {
            pending: snapshot.pending_parameterizations(),
            experiment: snapshot,
            fixed_parameters,
            count,
        };
        debug!(
            strategy = strategy.name(),
            count,
            pending = request.pending.len(),
            "requesting candidates"
        );
        let candidates = strategy.generate(&request).await?;
        drop(guard);

        verify_candidates(&request, &candidates)?;
        Ok(candidates)
    }
}

fn verify_candidates(request: &GenerationRequest, candidates: &[Parameterization]) -> DomainResult<()> {
    if candidates.len() != request.count {
        return Err(DomainError::CandidateCountMismatch {
            requested: request.count,
            returned: candidates.len(),
        });
    }
    if let Some(fixed) = &request.fixed_parameters {
        for candidate in candidates {
            if let Some((name, _)) = fixed.iter().find(|(name, value)| candidate.get(*name) != Some(value)) {
                return Err(DomainError::FixedParameterViolated {
                    parameter: name.clone(),
                });
            }
        }
    }
    let space = &request.experiment.experiment.search_space;
    for candidate in candidates {
        space.check_membership(candidate, true).map_err(|e| {
            DomainError::GenerationFailed(format!("candidate outside the search space: {e}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::models::{
        Objective, OptimizationConfig, ParameterDomain, ParameterValue, SearchSpace,
        SingleObjective,
    };
    use crate::domain::ports::MetricHandle;

    /// Returns a scripted number of copies of one parameterization.
    struct ScriptedStrategy {
        returns: usize,
        value: i64,
        seen_pending: Arc<StdMutex<Vec<usize>>>,
    }

    #[async_trait]
    impl GenerationStrategy for ScriptedStrategy {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&mut self, request: &GenerationRequest) -> DomainResult<Vec<Parameterization>> {
            self.seen_pending.lock().unwrap().push(request.pending.len());
            Ok(vec![
                [("x".to_string(), ParameterValue::Int(self.value))].into();
                self.returns
            ])
        }
    }

    fn experiment(with_config: bool) -> Experiment {
        let exp = Experiment::new(
            "gen",
            SearchSpace::new().with_parameter("x", ParameterDomain::Int { lower: 0, upper: 10 }),
        );
        if with_config {
            exp.with_optimization_config(OptimizationConfig::new(Objective::Single(
                SingleObjective::minimize(MetricHandle::placeholder("loss")),
            )))
        } else {
            exp
        }
    }

    fn snapshot(with_config: bool) -> ExperimentSnapshot {
        ExperimentSnapshot {
            experiment: experiment(with_config),
            trials: vec![],
        }
    }

    #[tokio::test]
    async fn test_missing_optimization_config() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), Some(1));
        let err = service.generate(snapshot(false), None, 1).await.unwrap_err();
        assert!(matches!(err, DomainError::OptimizationConfigMissing));
        assert!(!service.has_strategy().await);
    }

    #[tokio::test]
    async fn test_default_is_pinned_on_first_use() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), Some(1));
        let candidates = service.generate(snapshot(true), None, 2).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(service.strategy_name().await.as_deref(), Some(DEFAULT_STRATEGY_NAME));

        let state = service.state().await.unwrap();
        assert_eq!(state.state["generated"], 2);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_fatal() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), None);
        service
            .set_strategy(Box::new(ScriptedStrategy {
                returns: 1,
                value: 3,
                seen_pending: Arc::default(),
            }))
            .await;
        let err = service.generate(snapshot(true), None, 2).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::CandidateCountMismatch { requested: 2, returned: 1 }
        ));
    }

    #[tokio::test]
    async fn test_fixed_parameter_violation_is_fatal() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), None);
        service
            .set_strategy(Box::new(ScriptedStrategy {
                returns: 1,
                value: 3,
                seen_pending: Arc::default(),
            }))
            .await;
        let fixed = [("x".to_string(), ParameterValue::Int(4))].into();
        let err = service.generate(snapshot(true), Some(fixed), 1).await.unwrap_err();
        assert!(matches!(err, DomainError::FixedParameterViolated { parameter } if parameter == "x"));
    }

    #[tokio::test]
    async fn test_out_of_space_candidate_rejected() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), None);
        service
            .set_strategy(Box::new(ScriptedStrategy {
                returns: 1,
                value: 42,
                seen_pending: Arc::default(),
            }))
            .await;
        let err = service.generate(snapshot(true), None, 1).await.unwrap_err();
        assert!(matches!(err, DomainError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn test_restore_requires_matching_strategy() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), None);
        let saved = GenerationStrategyState {
            name: "scripted".to_string(),
            state: serde_json::Value::Null,
        };
        assert!(service.restore(&experiment(true), saved.clone(), None).await.is_err());

        let custom = Box::new(ScriptedStrategy {
            returns: 1,
            value: 1,
            seen_pending: Arc::default(),
        });
        service.restore(&experiment(true), saved, Some(custom)).await.unwrap();
        assert_eq!(service.strategy_name().await.as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn test_reset_default_keeps_custom_strategy() {
        let service = GenerationService::new(GenerationStrategyConfig::default(), Some(2));
        service.generate(snapshot(true), None, 1).await.unwrap();
        assert!(service.reset_default().await);
        assert!(!service.has_strategy().await);

        service
            .set_strategy(Box::new(ScriptedStrategy {
                returns: 1,
                value: 1,
                seen_pending: Arc::default(),
            }))
            .await;
        assert!(!service.reset_default().await);
        assert_eq!(service.strategy_name().await.as_deref(), Some("scripted"));
    }
}
