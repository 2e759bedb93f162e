//! Centralized state machine for the batch workflow.
//!
//! This module provides the ONLY place where phase transitions happen.
//! The state machine owns the state, validates commands, emits events,
//! and broadcasts snapshots to subscribers via a watch channel.
//!
//! Two kinds of rejection exist. Guards (no files selected, no successful
//! phase-1 items) refuse the command with a `TransitionRefused` event and
//! leave the phase unchanged. Commands that are impossible in the current
//! phase are contract violations and return an error.

mod commands;
mod events;
mod snapshot;

pub use commands::StateCommand;
pub use events::StateEvent;
pub use snapshot::StateSnapshot;

use crate::gate::GateContext;
use crate::state::{WorkflowMode, WorkflowPhase, WorkflowState};
use crate::structured_logger::StructuredLogger;
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::watch;

pub struct WorkflowStateMachine {
    state: WorkflowState,
    snapshot_tx: watch::Sender<StateSnapshot>,
    logger: Option<Arc<StructuredLogger>>,
    seq: u64,
}

impl WorkflowStateMachine {
    /// Creates a state machine in `Idle` for the given mode.
    ///
    /// Returns the state machine and a watch receiver for state snapshots.
    pub fn new(
        mode: WorkflowMode,
        logger: Option<Arc<StructuredLogger>>,
    ) -> (Self, watch::Receiver<StateSnapshot>) {
        let state = WorkflowState::new(mode);
        let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot::from(&state));

        let machine = Self {
            state,
            snapshot_tx,
            logger,
            seq: 0,
        };

        (machine, snapshot_rx)
    }

    /// All mutations go through this single method.
    /// Returns events for logging; broadcasts snapshot automatically.
    pub fn apply(&mut self, command: StateCommand) -> Result<Vec<StateEvent>> {
        self.seq += 1;

        if let Some(logger) = &self.logger {
            logger.log_command(self.seq, &command);
        }

        let events = self.apply_internal(command)?;

        if let Some(logger) = &self.logger {
            for event in &events {
                logger.log_event(self.seq, event);
            }
        }

        self.state.set_updated_at();
        self.broadcast_snapshot();

        Ok(events)
    }

    fn apply_internal(&mut self, command: StateCommand) -> Result<Vec<StateEvent>> {
        use StateCommand::*;
        use StateEvent::*;

        let name = command.name();
        let refused = |reason: &str| -> Result<Vec<StateEvent>> {
            Ok(vec![TransitionRefused {
                command: name.to_string(),
                reason: reason.to_string(),
            }])
        };

        match command {
            SelectFolder { entries } => {
                if !matches!(
                    self.state.phase,
                    WorkflowPhase::Idle | WorkflowPhase::Collecting
                ) {
                    return refused("the current run must be reset first");
                }
                if entries.is_empty() {
                    return refused("selection contains no files");
                }
                let from = self.state.phase;
                self.state.clear_run();
                self.state.set_selection(&entries);
                self.state.transition(WorkflowPhase::Collecting)?;
                Ok(vec![
                    FolderSelected {
                        files: self.state.files.len(),
                        roots: self.state.tree.len(),
                    },
                    PhaseChanged {
                        from,
                        to: self.state.phase,
                    },
                ])
            }

            StartPhase1 => {
                if self.state.phase != WorkflowPhase::Collecting {
                    bail!("Cannot start phase 1 from phase {:?}", self.state.phase);
                }
                if self.state.files.is_empty() {
                    return refused("no files selected");
                }
                self.change_phase(WorkflowPhase::RunningPhase1)
            }

            AttachGate { context } => {
                if self.state.phase != WorkflowPhase::RunningPhase1 {
                    bail!("Cannot attach a gate in phase {:?}", self.state.phase);
                }
                if !self.state.is_gated() {
                    bail!("Cannot attach a gate to an ungated workflow");
                }
                let event = GateAttached {
                    job_id: context.job_id.clone(),
                    expected_total: context.expected_total,
                };
                self.state.gate = Some(context);
                Ok(vec![event])
            }

            AbortPhase1 { reason } => {
                if self.state.phase != WorkflowPhase::RunningPhase1 {
                    bail!("Cannot abort phase 1 from phase {:?}", self.state.phase);
                }
                self.state.gate = None;
                let mut events = vec![Phase1Aborted { reason }];
                events.extend(self.change_phase(WorkflowPhase::Collecting)?);
                Ok(events)
            }

            CompletePhase1 { successes } => {
                if self.state.phase != WorkflowPhase::RunningPhase1 {
                    bail!("Cannot complete phase 1 from phase {:?}", self.state.phase);
                }
                if self.state.is_gated() && self.state.gate.is_none() {
                    bail!("Gated phase 1 completed without a gate context");
                }
                let mut events = vec![Phase1Completed {
                    successes: successes.len(),
                }];
                self.state.phase1_successes = successes;

                match self.state.mode {
                    WorkflowMode::Gated => {
                        let Some(gate) = self.state.gate.as_mut() else {
                            bail!("Gated phase 1 completed without a gate context");
                        };
                        let narrowed = self.state.phase1_successes.len();
                        if gate.expected_total != narrowed {
                            events.push(ExpectedTotalNarrowed {
                                from: gate.expected_total,
                                to: narrowed,
                            });
                            gate.expected_total = narrowed;
                        }
                        events.extend(self.change_phase(WorkflowPhase::AwaitingGate)?);
                    }
                    WorkflowMode::Ungated => {
                        events.extend(self.enter_phase2(name)?);
                    }
                }
                Ok(events)
            }

            GateReady => {
                if self.state.phase != WorkflowPhase::AwaitingGate {
                    bail!("Gate readiness is only valid while awaiting the gate, not in {:?}", self.state.phase);
                }
                self.enter_phase2(name)
            }

            CompletePhase2 => {
                if self.state.phase != WorkflowPhase::RunningPhase2 {
                    bail!("Cannot complete phase 2 from phase {:?}", self.state.phase);
                }
                let mut events = self.change_phase(WorkflowPhase::Complete)?;
                events.push(WorkflowComplete {
                    phase1_successes: self.state.phase1_successes.len(),
                });
                Ok(events)
            }

            Reset => {
                // Reset is valid from every phase, so it bypasses transition().
                let from = self.state.phase;
                self.state.clear_run();
                self.state.phase = WorkflowPhase::Idle;
                if let Some(logger) = &self.logger {
                    logger.increment_run_id();
                }
                let mut events = Vec::new();
                if from != WorkflowPhase::Idle {
                    events.push(PhaseChanged {
                        from,
                        to: WorkflowPhase::Idle,
                    });
                }
                events.push(WorkflowReset);
                Ok(events)
            }
        }
    }

    fn change_phase(&mut self, to: WorkflowPhase) -> Result<Vec<StateEvent>> {
        let from = self.state.phase;
        self.state.transition(to)?;
        Ok(vec![StateEvent::PhaseChanged { from, to }])
    }

    /// Entry into phase 2 requires at least one phase-1 success.
    fn enter_phase2(&mut self, command: &str) -> Result<Vec<StateEvent>> {
        if self.state.phase1_successes.is_empty() {
            return Ok(vec![StateEvent::TransitionRefused {
                command: command.to_string(),
                reason: "no successful phase-1 items".to_string(),
            }]);
        }
        if self.state.is_gated() && self.state.gate.is_none() {
            bail!("Gated phase 2 requires a gate context");
        }
        self.change_phase(WorkflowPhase::RunningPhase2)
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.state.phase
    }

    pub fn gate(&self) -> Option<&GateContext> {
        self.state.gate.as_ref()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn broadcast_snapshot(&self) {
        self.snapshot_tx.send_replace(StateSnapshot::from(&self.state));
    }
}

/// First refusal reason among `events`, if a guard refused the command.
pub fn refusal(events: &[StateEvent]) -> Option<String> {
    events
        .iter()
        .find_map(StateEvent::refusal)
        .map(String::from)
}
