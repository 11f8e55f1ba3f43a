//! Lifecycle state machine for jobs.
//!
//! Encodes the legal transition table and rejects everything else with a
//! typed `InvalidStateTransition` error. Transitions are never retried.

use crate::error::OrchestratorError;
use crate::job::JobState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An action that may transition a job between lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Begin the pipeline: `pending -> running`.
    Start,
    /// Finish successfully: `running -> completed`.
    Complete,
    /// Abort with a classified error: `pending | running -> failed`.
    Fail,
    /// Pause for human sign-off: `running -> awaiting_approval`.
    AwaitApproval,
    /// Continue after approval: `awaiting_approval -> running`.
    Resume,
}

impl JobAction {
    /// Returns the canonical string form used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Start => "start",
            JobAction::Complete => "complete",
            JobAction::Fail => "fail",
            JobAction::AwaitApproval => "await_approval",
            JobAction::Resume => "resume",
        }
    }
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-job finite-state machine over `JobState`.
///
/// The orchestrator keeps machines in an in-memory cache keyed by job id and
/// reconstructs them from the store on a miss; the persisted job row, not the
/// cache, is the source of truth.
#[derive(Debug, Clone)]
pub struct StateMachine {
    job_id: Uuid,
    state: JobState,
}

impl StateMachine {
    /// Creates a machine positioned at the given state.
    ///
    /// Used both for fresh jobs (`pending`) and for reconstruction from a
    /// stored job row.
    pub fn new(job_id: Uuid, state: JobState) -> Self {
        Self { job_id, state }
    }

    /// Returns the job this machine belongs to.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Returns the current state.
    pub fn current(&self) -> JobState {
        self.state
    }

    /// Returns the target state for `(state, action)` if the edge is legal.
    pub fn target_for(state: JobState, action: JobAction) -> Option<JobState> {
        match (state, action) {
            (JobState::Pending, JobAction::Start) => Some(JobState::Running),
            (JobState::Running, JobAction::Complete) => Some(JobState::Completed),
            (JobState::Running, JobAction::Fail) => Some(JobState::Failed),
            (JobState::Pending, JobAction::Fail) => Some(JobState::Failed),
            (JobState::Running, JobAction::AwaitApproval) => Some(JobState::AwaitingApproval),
            (JobState::AwaitingApproval, JobAction::Resume) => Some(JobState::Running),
            _ => None,
        }
    }

    /// Returns whether `action` is legal from the current state.
    pub fn can_apply(&self, action: JobAction) -> bool {
        Self::target_for(self.state, action).is_some()
    }

    /// Applies `action`, advancing the machine and returning the new state.
    ///
    /// Illegal `(state, action)` pairs leave the machine untouched and return
    /// `InvalidStateTransition` carrying the job id, current state and the
    /// attempted action.
    pub fn apply(&mut self, action: JobAction) -> Result<JobState, OrchestratorError> {
        match Self::target_for(self.state, action) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => Err(OrchestratorError::InvalidStateTransition {
                job_id: self.job_id,
                current_state: self.state,
                attempted_action: action,
            }),
        }
    }
}
