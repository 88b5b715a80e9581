//! Port trait definitions (Hexagonal Architecture)
//!
//! Boundaries the orchestration engine consumes but does not implement:
//! - Metric: produces outcome values for a trial
//! - GenerationStrategy: proposes candidate parameterizations
//! - TrialRunner: executes and polls trials
//! - EarlyStoppingStrategy: recommends early termination

pub mod early_stopping;
pub mod generation_strategy;
pub mod metric;
pub mod trial_runner;

pub use early_stopping::EarlyStoppingStrategy;
pub use generation_strategy::{GenerationRequest, GenerationStrategy};
pub use metric::{Metric, MetricHandle, MetricObservation, PlaceholderMetric};
pub use trial_runner::{DataUpdate, TrialPoll, TrialRunner};
