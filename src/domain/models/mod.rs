//! Domain models: experiments, trials, parameters, objectives, observations
//! and configuration.

pub mod checkpoint;
pub mod config;
pub mod experiment;
pub mod objective;
pub mod observation;
pub mod parameter;
pub mod trial;

pub use checkpoint::{CHECKPOINT_VERSION, ExperimentCheckpoint, GenerationStrategyState};
pub use config::{Config, GenerationStrategyConfig, LoggingConfig, OrchestrationConfig};
pub use experiment::{Experiment, ExperimentSnapshot};
pub use objective::{
    ComparisonOp, Objective, OptimizationConfig, OutcomeConstraint, SingleObjective,
    WeightedMetric,
};
pub use observation::{
    MetricValue, Observation, ObservationRecord, Outcome, Progression, TrialData,
};
pub use parameter::{ParameterDomain, ParameterValue, Parameterization, SearchSpace};
pub use trial::{TransitionOutcome, Trial, TrialIndex, TrialStatus};
