//! Application layer: the experiment client and the orchestration loop.

pub mod experiment_client;
pub mod orchestration_loop;

pub use experiment_client::{BASELINE_ARM_NAME, ExperimentClient};
pub use orchestration_loop::{Orchestrator, RunOutcome, RunReport};
