//! Trial runner port: launches trials and reports their execution state.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ObservationRecord, Outcome, Trial};

/// Data reported by a runner alongside a poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    /// Values by metric name
    pub outcome: Outcome,
    /// Progression of the values; `None` for final data
    pub progression: Option<i64>,
}

impl DataUpdate {
    /// Final data.
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            progression: None,
        }
    }

    /// Interim data at `progression`.
    pub fn at(outcome: Outcome, progression: i64) -> Self {
        Self {
            outcome,
            progression: Some(progression),
        }
    }

    /// Convert into a record for the trial's data.
    pub fn into_record(self) -> ObservationRecord {
        ObservationRecord::new(self.outcome, self.progression)
    }
}

/// Execution state of a trial as seen by its runner.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialPoll {
    /// Still executing, possibly with interim data.
    Running { update: Option<DataUpdate> },
    /// Finished, possibly with final data.
    Completed { update: Option<DataUpdate> },
    /// Execution failed.
    Failed { reason: String },
}

/// Boundary to the infrastructure that physically executes trials.
#[async_trait]
pub trait TrialRunner: Send + Sync {
    /// Start executing `trial`.
    async fn run(&self, trial: &Trial) -> DomainResult<()>;

    /// Report the current execution state of `trial`.
    async fn poll(&self, trial: &Trial) -> DomainResult<TrialPoll>;

    /// Ask execution of `trial` to stop. Runners without the capability
    /// may ignore the request.
    async fn stop(&self, _trial: &Trial, _reason: Option<&str>) -> DomainResult<()> {
        Ok(())
    }
}
