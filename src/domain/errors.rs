//! Domain errors for the trialforge orchestration engine.

use thiserror::Error;

use crate::domain::models::{TrialIndex, TrialStatus};

/// Domain-level errors that can occur while orchestrating an experiment.
///
/// Soft data incompleteness and repeated terminal transitions are not
/// represented here: they are recovered locally and surface as a trial
/// status or a [`TransitionOutcome`](crate::domain::models::TransitionOutcome).
#[derive(Debug, Error)]
pub enum DomainError {
    /// No experiment has been configured or restored yet.
    #[error("Experiment not set. Configure or restore an experiment before using the client")]
    ExperimentNotConfigured,

    /// `configure_experiment` was called twice.
    #[error("Experiment already configured. Create a new client for a new experiment")]
    ExperimentAlreadyConfigured,

    /// An operation needs an objective that has not been set.
    #[error("Optimization config not set. Configure optimization before generating trials")]
    OptimizationConfigMissing,

    /// An early-stopping query without a strategy.
    #[error("Early stopping strategy not set")]
    EarlyStoppingStrategyMissing,

    /// A run was started without a runner.
    #[error("Trial runner not set. Configure a runner before running trials")]
    TrialRunnerMissing,

    /// No trial has this index.
    #[error("Trial not found: {0}")]
    TrialNotFound(TrialIndex),

    /// A status edge outside the trial state machine.
    #[error("Invalid state transition for trial {index} from {from} to {to}")]
    InvalidStateTransition {
        /// Trial the transition was requested for
        index: TrialIndex,
        /// Status at the time of the request
        from: TrialStatus,
        /// Requested status
        to: TrialStatus,
    },

    /// A generation strategy returned the wrong number of candidates.
    #[error("Generation strategy returned {returned} candidates, {requested} were requested")]
    CandidateCountMismatch {
        /// Candidates asked for
        requested: usize,
        /// Candidates returned
        returned: usize,
    },

    /// A candidate changed a parameter the caller fixed.
    #[error("Generation strategy violated fixed parameter '{parameter}'")]
    FixedParameterViolated {
        /// Name of the fixed parameter
        parameter: String,
    },

    /// The strategy waits for more completed trials.
    #[error("More data required before generating: {0}")]
    DataRequired(String),

    /// The strategy has nothing left to propose.
    #[error("Generation strategy has no further candidates: {0}")]
    OptimizationComplete(String),

    /// Candidates could not be produced or were unusable.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// A runner could not execute or control a trial.
    #[error("Trial execution failed: {0}")]
    ExecutionFailed(String),

    /// A metric implementation failed to fetch.
    #[error("Metric '{metric}' fetch failed: {reason}")]
    MetricFetchFailed {
        /// Metric name
        metric: String,
        /// Error reported by the metric
        reason: String,
    },

    /// Invalid configuration, input or checkpoint.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The query has no answer for this kind of objective.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Checkpoint state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Whether the error is a contract violation by a generation strategy.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::CandidateCountMismatch { .. } | Self::FixedParameterViolated { .. }
        )
    }
}

/// Result alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
