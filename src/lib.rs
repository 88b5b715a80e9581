//! Trialforge - Experiment Orchestration Engine
//!
//! Trialforge runs iterative optimization experiments: it holds a search
//! space and an optimization goal, asks a pluggable generation strategy for
//! candidate parameterizations, tracks every trial through its lifecycle,
//! attaches observed metric data and reports the best configurations found.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Experiment models, errors and port traits
//! - **Service Layer** (`services`): Trial store, data attachment, completion,
//!   generation and best-point analysis
//! - **Application Layer** (`application`): The experiment client and the
//!   orchestration loop
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use trialforge::domain::models::SingleObjective;
//! use trialforge::{ExperimentClient, Experiment, MetricHandle, Objective, OptimizationConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ExperimentClient::default();
//!     client.configure_experiment(Experiment::new("tuning", space)).await?;
//!     let accuracy = MetricHandle::placeholder("accuracy");
//!     let objective = Objective::Single(SingleObjective::maximize(accuracy));
//!     client.configure_optimization(OptimizationConfig::new(objective)).await?;
//!     for (index, parameters) in client.get_next_trials(4, None).await? {
//!         let outcome = evaluate(&parameters).await;
//!         client.complete_trial(index, Some(outcome), None).await?;
//!     }
//!     println!("{:?}", client.get_best_trial().await?);
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{BASELINE_ARM_NAME, ExperimentClient, Orchestrator, RunOutcome, RunReport};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ComparisonOp, Config, Experiment, ExperimentCheckpoint, GenerationStrategyConfig,
    LoggingConfig, MetricValue, Objective, OptimizationConfig, OrchestrationConfig, Outcome,
    OutcomeConstraint, ParameterDomain, ParameterValue, Parameterization, SearchSpace, Trial,
    TrialIndex, TrialStatus,
};
pub use domain::ports::{
    DataUpdate, EarlyStoppingStrategy, GenerationRequest, GenerationStrategy, Metric,
    MetricHandle, TrialPoll, TrialRunner,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::{LogConfig, LoggerImpl};
pub use services::{BestTrial, DefaultGenerationStrategy, ThresholdEarlyStopping};
