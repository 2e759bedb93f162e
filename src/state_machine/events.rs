//! Events emitted by the state machine after processing commands.
//!
//! These are for logging and notification purposes only. Presentation gets
//! state through the watch channel's StateSnapshot.

use crate::state::WorkflowPhase;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StateEvent {
    PhaseChanged {
        from: WorkflowPhase,
        to: WorkflowPhase,
    },
    FolderSelected { files: usize, roots: usize },
    GateAttached { job_id: String, expected_total: usize },
    /// Failed uploads are never processed remotely, so the gate waits on fewer.
    ExpectedTotalNarrowed { from: usize, to: usize },
    Phase1Completed { successes: usize },
    Phase1Aborted { reason: String },
    /// A guard refused the command; the phase is unchanged.
    TransitionRefused { command: String, reason: String },
    WorkflowComplete { phase1_successes: usize },
    WorkflowReset,
}

impl StateEvent {
    pub fn refusal(&self) -> Option<&str> {
        match self {
            Self::TransitionRefused { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
