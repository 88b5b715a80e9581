//! Generation strategy port: proposes parameterizations for new trials.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExperimentSnapshot, Parameterization};

/// Context handed to a generation strategy for one call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Experiment and every trial so far
    pub experiment: ExperimentSnapshot,
    /// Parameterizations of every non-terminal trial, computed fresh per call
    pub pending: Vec<Parameterization>,
    /// Entries held constant across every candidate
    pub fixed_parameters: Option<Parameterization>,
    /// Number of candidates wanted
    pub count: usize,
}

/// Pluggable candidate-proposal capability.
///
/// The orchestrator treats implementations as opaque: context in,
/// candidates out. Returning a number of candidates other than
/// `request.count` is a contract violation the caller surfaces as fatal.
/// Strategies signal a temporary shortage of data with
/// [`DomainError::DataRequired`](crate::domain::errors::DomainError::DataRequired)
/// and exhaustion with
/// [`DomainError::OptimizationComplete`](crate::domain::errors::DomainError::OptimizationComplete).
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    /// Name recorded in checkpoints.
    fn name(&self) -> &str;

    /// Produce exactly `request.count` parameterizations.
    async fn generate(&mut self, request: &GenerationRequest) -> DomainResult<Vec<Parameterization>>;

    /// Opaque state to be checkpointed.
    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Restore state produced by [`state`](Self::state).
    fn restore_state(&mut self, _state: serde_json::Value) -> DomainResult<()> {
        Ok(())
    }
}
