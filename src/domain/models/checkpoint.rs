//! Save/restore checkpoint of an orchestration engine.
//!
//! Only round-trip fidelity is required of the blob; where it is stored
//! is up to the embedding application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::experiment::Experiment;
use super::trial::{Trial, TrialIndex};
use crate::domain::errors::DomainResult;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Opaque generation strategy state tagged with the strategy's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStrategyState {
    /// Name of the strategy that produced `state`
    pub name: String,
    /// Strategy-defined state
    pub state: serde_json::Value,
}

/// Everything needed to resume an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentCheckpoint {
    /// Format version, [`CHECKPOINT_VERSION`] when written
    pub version: u32,
    /// Experiment configuration
    pub experiment: Experiment,
    /// All trials in index order
    pub trials: Vec<Trial>,
    /// Index the next trial will receive
    pub next_trial_index: TrialIndex,
    /// State of the generation strategy, if one was set
    pub generation_strategy: Option<GenerationStrategyState>,
    /// When the checkpoint was taken
    pub created_at: DateTime<Utc>,
}

impl ExperimentCheckpoint {
    /// Serialize to an opaque byte blob.
    pub fn to_blob(&self) -> DomainResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore from a blob produced by [`to_blob`](Self::to_blob).
    pub fn from_blob(blob: &[u8]) -> DomainResult<Self> {
        Ok(serde_json::from_slice(blob)?)
    }
}
