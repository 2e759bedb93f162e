use crate::gate::GateContext;
use crate::tree::{self, TreeNode};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Idle,
    /// Tree built, nothing started.
    Collecting,
    RunningPhase1,
    /// Waiting for the server-side stage; gated mode only.
    AwaitingGate,
    RunningPhase2,
    Complete,
}

impl Display for WorkflowPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::RunningPhase1 => "phase 1",
            Self::AwaitingGate => "awaiting gate",
            Self::RunningPhase2 => "phase 2",
            Self::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

/// Whether phase 2 waits on a server-side condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    Ungated,
    Gated,
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub phase: WorkflowPhase,
    pub mode: WorkflowMode,
    pub tree: Vec<TreeNode>,
    /// Ordered work list, the flattened tree.
    pub files: Vec<String>,
    pub gate: Option<GateContext>,
    /// Subjects that succeeded in phase 1, in ledger order.
    pub phase1_successes: Vec<String>,
    /// Changes every reset, correlating log lines of one run.
    pub workflow_id: String,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(mode: WorkflowMode) -> Self {
        Self {
            phase: WorkflowPhase::Idle,
            mode,
            tree: Vec::new(),
            files: Vec::new(),
            gate: None,
            phase1_successes: Vec::new(),
            workflow_id: uuid::Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_gated(&self) -> bool {
        self.mode == WorkflowMode::Gated
    }

    /// Replaces the selection; the work list is read back from the tree.
    pub fn set_selection(&mut self, entries: &[String]) {
        self.tree = tree::build(entries);
        self.files = tree::flatten(&self.tree);
    }

    /// Drops everything tied to the current selection and run.
    pub fn clear_run(&mut self) {
        self.tree.clear();
        self.files.clear();
        self.gate = None;
        self.phase1_successes.clear();
        self.workflow_id = uuid::Uuid::new_v4().to_string();
    }

    pub fn set_updated_at(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn transition(&mut self, to: WorkflowPhase) -> Result<()> {
        use WorkflowPhase::*;

        let valid = match (self.phase, to) {
            (Idle, Collecting)
            | (Collecting, Collecting)
            | (Collecting, RunningPhase1)
            | (RunningPhase1, Collecting)
            | (AwaitingGate, RunningPhase2)
            | (RunningPhase2, Complete) => true,
            (RunningPhase1, AwaitingGate) => self.is_gated(),
            (RunningPhase1, RunningPhase2) => !self.is_gated(),
            _ => false,
        };

        if valid {
            self.phase = to;
            Ok(())
        } else {
            anyhow::bail!(
                "Invalid state transition from {:?} to {:?} ({:?} mode)",
                self.phase,
                to,
                self.mode
            )
        }
    }
}
