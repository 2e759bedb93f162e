//! Batch workflows: the two-phase pipeline and the single-pass variant.
//!
//! [`BatchWorkflow`] drives the state machine through its phases, owning
//! both ledgers and the poller. Only one phase is active at a time, so the
//! ledgers are never touched by two runners at once.

use crate::gate::{self, GateContext, GateOutcome, PollHandle};
use crate::ledger::{ItemLedger, LedgerCounts};
use crate::remote::{GateService, PhaseInvokers, RemoteInvoker};
use crate::runner::{Canceller, RunObserver, RunReport, SequentialRunner, SilentObserver};
use crate::state::{WorkflowMode, WorkflowPhase, WorkflowState};
use crate::state_machine::{refusal, StateCommand, StateEvent, StateSnapshot, WorkflowStateMachine};
use crate::structured_logger::StructuredLogger;
use crate::tree::{self, TreeNode};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

fn upload_message(subject: &str) -> String {
    format!("Uploading {}...", subject)
}

fn generate_message(subject: &str) -> String {
    format!("Generating 2-layer PDF for {}...", subject)
}

/// Remote capabilities of a workflow. Gated iff `gate` is present.
#[derive(Clone)]
pub struct WorkflowServices {
    pub invokers: Arc<dyn PhaseInvokers>,
    pub gate: Option<Arc<dyn GateService>>,
}

#[derive(Clone)]
pub struct WorkflowOptions {
    pub poll_interval: Duration,
    pub item_timeout: Option<Duration>,
    pub observer: Arc<dyn RunObserver>,
    pub logger: Option<Arc<StructuredLogger>>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            item_timeout: None,
            observer: Arc::new(SilentObserver),
            logger: None,
        }
    }
}

impl WorkflowOptions {
    fn runner(&self, phase: &str, invoker: Arc<dyn RemoteInvoker>) -> SequentialRunner {
        SequentialRunner::new(phase, invoker)
            .with_item_timeout(self.item_timeout)
            .with_observer(self.observer.clone())
            .with_logger(self.logger.clone())
    }
}

/// Result of asking the workflow to run a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ran(RunReport),
    /// A guard refused the phase; nothing was dispatched.
    Refused(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub phase: WorkflowPhase,
    /// A gate poller is running.
    pub polling: bool,
    pub phase1: LedgerCounts,
    pub phase1_percent: f64,
    pub phase2: LedgerCounts,
    pub phase2_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    pub phase1: Option<RunReport>,
    pub gate: Option<GateOutcome>,
    pub phase2: Option<RunReport>,
    pub refused: Option<String>,
    pub final_phase: WorkflowPhase,
}

impl WorkflowReport {
    pub fn failed_items(&self) -> usize {
        self.phase1.map_or(0, |r| r.failed) + self.phase2.map_or(0, |r| r.failed)
    }
}

pub struct BatchWorkflow {
    machine: WorkflowStateMachine,
    phase1: ItemLedger,
    phase2: ItemLedger,
    poller: Option<PollHandle>,
    canceller: Canceller,
    services: WorkflowServices,
    options: WorkflowOptions,
}

impl BatchWorkflow {
    pub fn new(services: WorkflowServices, options: WorkflowOptions) -> Self {
        let mode = if services.gate.is_some() {
            WorkflowMode::Gated
        } else {
            WorkflowMode::Ungated
        };
        let (machine, _snapshot_rx) = WorkflowStateMachine::new(mode, options.logger.clone());
        Self {
            machine,
            phase1: ItemLedger::new(),
            phase2: ItemLedger::new(),
            poller: None,
            canceller: Canceller::new(),
            services,
            options,
        }
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.machine.phase()
    }

    pub fn state(&self) -> &WorkflowState {
        self.machine.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.machine.subscribe()
    }

    pub fn phase1_ledger(&self) -> &ItemLedger {
        &self.phase1
    }

    pub fn phase2_ledger(&self) -> &ItemLedger {
        &self.phase2
    }

    /// Handle for cancelling the workflow from another task.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            phase: self.phase(),
            polling: self.poller.is_some(),
            phase1: self.phase1.counts(),
            phase1_percent: self.phase1.percent_complete(),
            phase2: self.phase2.counts(),
            phase2_percent: self.phase2.percent_complete(),
        }
    }

    /// Replaces the selection. Both ledgers are cleared when accepted.
    pub fn select(&mut self, entries: Vec<String>) -> Result<Vec<StateEvent>> {
        let events = self.machine.apply(StateCommand::SelectFolder { entries })?;
        if refusal(&events).is_none() {
            self.phase1.clear();
            self.phase2.clear();
        }
        Ok(events)
    }

    /// Runs phase 1 over the flattened selection.
    ///
    /// In gated mode the remote job is created first; if that fails the
    /// workflow returns to `Collecting` and the error is returned. Polling
    /// starts once the pass ends with at least one success.
    pub async fn run_phase1(&mut self) -> Result<StepOutcome> {
        let events = self.machine.apply(StateCommand::StartPhase1)?;
        if let Some(reason) = refusal(&events) {
            return Ok(StepOutcome::Refused(reason));
        }

        let files = self.machine.state().files.clone();
        self.phase1.begin_batch(files.len());

        if let Some(gate) = self.services.gate.clone() {
            match gate.create_job().await {
                Ok(job_id) => {
                    info!(job_id = %job_id, files = files.len(), "remote job created");
                    self.machine.apply(StateCommand::AttachGate {
                        context: GateContext::new(job_id, files.len()),
                    })?;
                }
                Err(e) => {
                    self.machine.apply(StateCommand::AbortPhase1 {
                        reason: e.to_string(),
                    })?;
                    self.phase1.clear();
                    return Err(e.context("Failed to create remote job"));
                }
            }
        }

        let invoker = self.services.invokers.phase1(self.machine.gate());
        let runner = self
            .options
            .runner("phase1", invoker)
            .with_pending_message(upload_message);
        let report = runner.run(&files, &mut self.phase1, &self.canceller).await?;
        if report.cancelled {
            return Ok(StepOutcome::Ran(report));
        }

        let successes = self.phase1.successful_subjects();
        self.machine
            .apply(StateCommand::CompletePhase1 { successes })?;

        if self.phase() == WorkflowPhase::AwaitingGate {
            self.start_poller();
        }
        Ok(StepOutcome::Ran(report))
    }

    fn start_poller(&mut self) {
        let (Some(service), Some(context)) = (self.services.gate.clone(), self.machine.gate()) else {
            return;
        };
        if context.expected_total == 0 {
            info!("no successful uploads, gate polling not started");
            return;
        }
        self.poller = Some(gate::start_polling(
            context.clone(),
            self.options.poll_interval,
            service,
            self.options.logger.clone(),
        ));
    }

    /// Waits for the gate to open, then enters phase 2.
    ///
    /// Returns `Stopped` on cancellation, or when polling never started
    /// because phase 1 had no successes. A wait cut short by cancellation
    /// resumes with a fresh poller on the next call.
    pub async fn await_gate(&mut self) -> Result<GateOutcome> {
        match self.phase() {
            WorkflowPhase::AwaitingGate => {}
            WorkflowPhase::RunningPhase2 => return Ok(GateOutcome::Ready),
            phase => bail!("Cannot await the gate in phase {:?}", phase),
        }
        if self.canceller.is_cancelled() {
            return Ok(GateOutcome::Stopped);
        }

        if self.state().phase1_successes.is_empty() {
            let events = self.machine.apply(StateCommand::GateReady)?;
            if let Some(reason) = refusal(&events) {
                info!(reason = %reason, "phase 2 refused");
            }
            return Ok(GateOutcome::Stopped);
        }

        if self.poller.is_none() {
            self.start_poller();
        }
        let Some(mut poller) = self.poller.take() else {
            bail!("Gate polling could not be started");
        };

        info!(successes = self.state().phase1_successes.len(), "awaiting server-side processing");
        let canceller = self.canceller.clone();
        let outcome = tokio::select! {
            outcome = poller.ready() => outcome,
            _ = canceller.cancelled() => GateOutcome::Stopped,
        };
        poller.stop();
        let stats = poller.stats();
        info!(
            outcome = ?outcome,
            issued = stats.issued,
            skipped = stats.skipped,
            failed = stats.failed,
            "gate wait finished"
        );

        if outcome == GateOutcome::Ready {
            self.machine.apply(StateCommand::GateReady)?;
        }
        Ok(outcome)
    }

    /// Runs phase 2 over the phase-1 successes, in phase-1 ledger order.
    pub async fn run_phase2(&mut self) -> Result<StepOutcome> {
        if self.phase() != WorkflowPhase::RunningPhase2 {
            return Ok(StepOutcome::Refused(format!(
                "phase 2 cannot start while {}",
                self.phase()
            )));
        }

        let subjects = self.machine.state().phase1_successes.clone();
        self.phase2.begin_batch(subjects.len());

        if let Some(service) = self.services.gate.clone() {
            let Some(context) = self.machine.gate().cloned() else {
                bail!("Gated phase 2 requires a gate context");
            };
            tokio::spawn(async move {
                if let Err(e) = service.trigger_download(&context).await {
                    warn!(job_id = %context.job_id, error = %e, "download trigger failed");
                }
            });
        }

        let invoker = self.services.invokers.phase2(self.machine.gate());
        let runner = self
            .options
            .runner("phase2", invoker)
            .with_pending_message(generate_message);
        let report = runner.run(&subjects, &mut self.phase2, &self.canceller).await?;
        if !report.cancelled {
            self.machine.apply(StateCommand::CompletePhase2)?;
        }
        Ok(StepOutcome::Ran(report))
    }

    /// Drives the workflow from `Collecting` until it completes, a guard
    /// refuses, or it is cancelled.
    pub async fn run_to_completion(&mut self) -> Result<WorkflowReport> {
        let mut report = WorkflowReport {
            phase1: None,
            gate: None,
            phase2: None,
            refused: None,
            final_phase: self.phase(),
        };

        loop {
            match self.phase() {
                WorkflowPhase::Collecting => match self.run_phase1().await? {
                    StepOutcome::Ran(run) => {
                        report.phase1 = Some(run);
                        if run.cancelled {
                            break;
                        }
                        if self.phase() == WorkflowPhase::RunningPhase1 {
                            report.refused = Some("no successful phase-1 items".to_string());
                            break;
                        }
                    }
                    StepOutcome::Refused(reason) => {
                        report.refused = Some(reason);
                        break;
                    }
                },

                WorkflowPhase::AwaitingGate => {
                    let outcome = self.await_gate().await?;
                    report.gate = Some(outcome);
                    if outcome == GateOutcome::Stopped {
                        if !self.canceller.is_cancelled() {
                            report.refused = Some("no successful phase-1 items".to_string());
                        }
                        break;
                    }
                }

                WorkflowPhase::RunningPhase2 => {
                    if let StepOutcome::Ran(run) = self.run_phase2().await? {
                        report.phase2 = Some(run);
                    }
                    break;
                }

                phase => bail!("Cannot run the workflow from phase {:?}", phase),
            }
        }

        report.final_phase = self.phase();
        Ok(report)
    }

    /// Stops polling, clears both ledgers and the cancel flag, and returns
    /// to `Idle`.
    pub fn reset(&mut self) -> Result<Vec<StateEvent>> {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.phase1.clear();
        self.phase2.clear();
        self.canceller.rearm();
        self.machine.apply(StateCommand::Reset)
    }
}

/// Outcome of a single-pass run.
#[derive(Debug)]
pub struct SinglePass {
    pub tree: Vec<TreeNode>,
    pub ledger: ItemLedger,
    pub report: RunReport,
}

/// Selection, tree, flattened list, one runner pass. No phases, no gate.
///
/// # Errors
///
/// Returns an error for an empty selection, before anything is dispatched.
pub async fn run_single_pass(
    entries: &[String],
    invoker: Arc<dyn RemoteInvoker>,
    options: &WorkflowOptions,
    canceller: &Canceller,
) -> Result<SinglePass> {
    if entries.is_empty() {
        bail!("Selection contains no files");
    }

    let tree = tree::build(entries);
    let files = tree::flatten(&tree);
    let mut ledger = ItemLedger::new();
    ledger.begin_batch(files.len());

    let report = options
        .runner("rename", invoker)
        .run(&files, &mut ledger, canceller)
        .await?;

    Ok(SinglePass {
        tree,
        ledger,
        report,
    })
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
