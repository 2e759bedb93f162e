//! Read-only snapshot of workflow state for display.
//!
//! Presentation NEVER mutates this; it receives new snapshots via watch channel.

use crate::gate::GateContext;
use crate::state::{WorkflowMode, WorkflowPhase, WorkflowState};
use crate::tree::TreeNode;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub phase: WorkflowPhase,
    pub mode: WorkflowMode,
    pub tree: Vec<TreeNode>,
    pub file_count: usize,
    pub gate: Option<GateContext>,
    pub phase1_successes: usize,
    pub workflow_id: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowState> for StateSnapshot {
    fn from(state: &WorkflowState) -> Self {
        Self {
            phase: state.phase,
            mode: state.mode,
            tree: state.tree.clone(),
            file_count: state.files.len(),
            gate: state.gate.clone(),
            phase1_successes: state.phase1_successes.len(),
            workflow_id: state.workflow_id.clone(),
            updated_at: state.updated_at,
        }
    }
}
