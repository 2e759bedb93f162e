//! Commands that can mutate workflow state.
//!
//! All state changes MUST go through the state machine's `apply()` method.

use crate::gate::GateContext;

#[derive(Debug, Clone)]
pub enum StateCommand {
    /// Replace the selection; clears the previous run.
    SelectFolder { entries: Vec<String> },
    /// Begin phase 1 over the flattened selection.
    StartPhase1,
    /// Record the job issued by the remote side (gated mode).
    AttachGate { context: GateContext },
    /// Phase 1 could not start remotely; back to `Collecting`.
    AbortPhase1 { reason: String },
    /// Phase-1 runner finished; carries the successful subjects in order.
    CompletePhase1 { successes: Vec<String> },
    /// The poller observed readiness.
    GateReady,
    /// Phase-2 runner finished.
    CompletePhase2,
    /// Back to `Idle` from any phase.
    Reset,
}

impl StateCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectFolder { .. } => "select_folder",
            Self::StartPhase1 => "start_phase1",
            Self::AttachGate { .. } => "attach_gate",
            Self::AbortPhase1 { .. } => "abort_phase1",
            Self::CompletePhase1 { .. } => "complete_phase1",
            Self::GateReady => "gate_ready",
            Self::CompletePhase2 => "complete_phase2",
            Self::Reset => "reset",
        }
    }
}
