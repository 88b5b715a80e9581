//! Trial domain model.
//!
//! A trial is one parameterization under evaluation. It moves through
//! `Candidate -> Running -> {Completed, Failed, Abandoned, EarlyStopped}`;
//! the four outcomes are terminal and absorbing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::observation::{ObservationRecord, TrialData};
use super::parameter::Parameterization;
use crate::domain::errors::{DomainError, DomainResult};

/// Index of a trial within its experiment, assigned from 0 upward.
pub type TrialIndex = u64;

/// Status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Created, no execution signal yet
    Candidate,
    /// Handed to external execution
    Running,
    /// Finished with all required data
    Completed,
    /// Failed during execution or finished with missing data
    Failed,
    /// Manually given up on
    Abandoned,
    /// Terminated before natural completion
    EarlyStopped,
}

impl Default for TrialStatus {
    fn default() -> Self {
        Self::Candidate
    }
}

impl TrialStatus {
    /// Snake-case name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
            Self::EarlyStopped => "early_stopped",
        }
    }

    /// Parse a status name, ignoring case.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "candidate" => Some(Self::Candidate),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            "early_stopped" | "early-stopped" => Some(Self::EarlyStopped),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Abandoned | Self::EarlyStopped
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TrialStatus] {
        match self {
            Self::Candidate => &[Self::Running],
            Self::Running => &[
                Self::Completed,
                Self::Failed,
                Self::Abandoned,
                Self::EarlyStopped,
            ],
            Self::Completed | Self::Failed | Self::Abandoned | Self::EarlyStopped => &[],
        }
    }

    /// Whether `new_status` is a legal next status.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied,
    /// The trial was already terminal; nothing changed.
    AlreadyTerminal(TrialStatus),
}

impl TransitionOutcome {
    /// Whether the status actually changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A single-arm trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Index within the experiment
    pub index: TrialIndex,
    /// Parameter values under evaluation
    pub parameters: Parameterization,
    /// Explicit arm name, if one was given
    pub arm_name: Option<String>,
    /// Current status
    pub status: TrialStatus,
    /// Accumulated observations
    pub data: TrialData,
    /// Why the trial failed, was abandoned, or was stopped early
    pub status_reason: Option<String>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When the trial reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl Trial {
    /// Create a new candidate trial.
    pub fn new(index: TrialIndex, parameters: Parameterization) -> Self {
        Self {
            index,
            parameters,
            arm_name: None,
            status: TrialStatus::Candidate,
            data: TrialData::default(),
            status_reason: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the arm name.
    pub fn with_arm_name(mut self, arm_name: impl Into<String>) -> Self {
        self.arm_name = Some(arm_name.into());
        self
    }

    /// Arm name used for display; defaults to `<index>_0`.
    pub fn arm_name(&self) -> String {
        self.arm_name
            .clone()
            .unwrap_or_else(|| format!("{}_0", self.index))
    }

    /// Check if the trial is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to a new status.
    ///
    /// A terminal trial is left untouched and reported as
    /// [`TransitionOutcome::AlreadyTerminal`]; any other disallowed edge is
    /// an error.
    pub fn transition_to(&mut self, new_status: TrialStatus) -> DomainResult<TransitionOutcome> {
        if self.status.is_terminal() {
            warn!(
                trial_index = self.index,
                status = %self.status,
                requested = %new_status,
                "trial already terminal, ignoring transition"
            );
            return Ok(TransitionOutcome::AlreadyTerminal(self.status));
        }
        if !self.status.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                index: self.index,
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;
        let now = Utc::now();
        match new_status {
            TrialStatus::Running => self.started_at = Some(now),
            TrialStatus::Completed
            | TrialStatus::Failed
            | TrialStatus::Abandoned
            | TrialStatus::EarlyStopped => self.completed_at = Some(now),
            TrialStatus::Candidate => {}
        }
        Ok(TransitionOutcome::Applied)
    }

    /// Hand the trial to execution. Records `started_at`.
    pub fn mark_running(&mut self) -> DomainResult<TransitionOutcome> {
        self.transition_to(TrialStatus::Running)
    }

    /// Mark completed. Records `completed_at`.
    pub fn mark_completed(&mut self) -> DomainResult<TransitionOutcome> {
        self.transition_to(TrialStatus::Completed)
    }

    /// Mark failed, recording the reason when the transition applies.
    pub fn mark_failed(&mut self, reason: Option<String>) -> DomainResult<TransitionOutcome> {
        self.transition_with_reason(TrialStatus::Failed, reason)
    }

    /// Mark abandoned, recording the reason when the transition applies.
    pub fn mark_abandoned(&mut self, reason: Option<String>) -> DomainResult<TransitionOutcome> {
        self.transition_with_reason(TrialStatus::Abandoned, reason)
    }

    /// Mark early stopped, recording the reason when the transition applies.
    pub fn mark_early_stopped(&mut self, reason: Option<String>) -> DomainResult<TransitionOutcome> {
        self.transition_with_reason(TrialStatus::EarlyStopped, reason)
    }

    fn transition_with_reason(
        &mut self,
        status: TrialStatus,
        reason: Option<String>,
    ) -> DomainResult<TransitionOutcome> {
        let outcome = self.transition_to(status)?;
        if outcome.is_applied() {
            self.status_reason = reason;
        }
        Ok(outcome)
    }

    /// Merge newly observed data. Does not touch the status.
    pub fn update_data(&mut self, record: ObservationRecord) {
        self.data.merge(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::observation::MetricValue;

    fn trial() -> Trial {
        Trial::new(0, Parameterization::new())
    }

    #[test]
    fn test_trial_creation() {
        let trial = trial();
        assert_eq!(trial.status, TrialStatus::Candidate);
        assert_eq!(trial.arm_name(), "0_0");
        assert!(trial.data.is_empty());

        let named = Trial::new(4, Parameterization::new()).with_arm_name("baseline");
        assert_eq!(named.arm_name(), "baseline");
    }

    #[test]
    fn test_trial_state_transitions() {
        let mut trial = trial();
        assert_eq!(trial.mark_running().unwrap(), TransitionOutcome::Applied);
        assert!(trial.started_at.is_some());

        assert_eq!(trial.mark_completed().unwrap(), TransitionOutcome::Applied);
        assert!(trial.completed_at.is_some());
        assert!(trial.is_terminal());
    }

    #[test]
    fn test_candidate_cannot_complete() {
        let mut trial = trial();
        let err = trial.mark_completed().unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStateTransition {
                from: TrialStatus::Candidate,
                to: TrialStatus::Completed,
                ..
            }
        ));
        assert!(trial.mark_failed(None).is_err());
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let mut trial = trial();
        trial.mark_running().unwrap();
        trial.mark_failed(Some("crashed".into())).unwrap();

        let outcome = trial.mark_abandoned(Some("later".into())).unwrap();
        assert_eq!(outcome, TransitionOutcome::AlreadyTerminal(TrialStatus::Failed));
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.status_reason.as_deref(), Some("crashed"));

        assert_eq!(
            trial.mark_running().unwrap(),
            TransitionOutcome::AlreadyTerminal(TrialStatus::Failed)
        );
    }

    #[test]
    fn test_update_data_keeps_status() {
        let mut trial = trial();
        trial.mark_running().unwrap();
        let outcome = [("loss".to_string(), MetricValue::new(0.3))].into();
        trial.update_data(ObservationRecord::new(outcome, None));
        assert_eq!(trial.status, TrialStatus::Running);
        assert!(trial.data.has_metric("loss"));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TrialStatus::Candidate,
            TrialStatus::Running,
            TrialStatus::Completed,
            TrialStatus::Failed,
            TrialStatus::Abandoned,
            TrialStatus::EarlyStopped,
        ] {
            assert_eq!(TrialStatus::from_str(status.as_str()), Some(status));
            assert_eq!(status.is_terminal(), status.valid_transitions().is_empty());
        }
        assert_eq!(TrialStatus::from_str("bogus"), None);
    }
}
