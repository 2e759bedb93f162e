//! Recurring readiness check for the server-side asynchronous stage.
//!
//! [`start_polling`] spawns a task that checks the remote side once per
//! period and resolves the returned [`PollHandle`] exactly once when the
//! check reports readiness. The handle owns the task: stopping or dropping
//! it cancels the loop, and a check still in flight at that point is
//! discarded instead of advancing the workflow.

use crate::remote::GateService;
use crate::structured_logger::StructuredLogger;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Poll parameters issued by the remote side at phase-1 start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateContext {
    /// Opaque job/folder identifier.
    pub job_id: String,
    /// Number of items the remote side must finish before the gate opens.
    pub expected_total: usize,
}

impl GateContext {
    pub fn new(job_id: impl Into<String>, expected_total: usize) -> Self {
        Self {
            job_id: job_id.into(),
            expected_total,
        }
    }
}

/// How waiting on a [`PollHandle`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Ready,
    Stopped,
}

#[derive(Debug, Default)]
struct PollCounters {
    issued: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollStats {
    /// Readiness checks sent to the remote side.
    pub issued: u64,
    /// Ticks dropped because a check was still outstanding.
    pub skipped: u64,
    /// Checks that failed and were only reported.
    pub failed: u64,
}

/// Owner of one polling loop.
pub struct PollHandle {
    stop_tx: watch::Sender<bool>,
    ready_rx: Option<oneshot::Receiver<()>>,
    counters: Arc<PollCounters>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stops the loop. Safe to call any number of times, with or without a
    /// check in flight.
    pub fn stop(&self) {
        let already = self.stop_tx.send_replace(true);
        if !already {
            debug!("gate polling stopped");
        }
    }

    /// Waits until the gate opens or polling is stopped.
    ///
    /// Readiness is reported at most once; later calls return `Stopped`.
    pub async fn ready(&mut self) -> GateOutcome {
        let Some(ready_rx) = self.ready_rx.take() else {
            return GateOutcome::Stopped;
        };
        match ready_rx.await {
            Ok(()) => GateOutcome::Ready,
            Err(_) => GateOutcome::Stopped,
        }
    }

    pub fn stats(&self) -> PollStats {
        PollStats {
            issued: self.counters.issued.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts checking `service` for readiness every `period`.
///
/// The first check fires one full period after the call. A tick that finds
/// the previous check still outstanding is skipped, so at most one check per
/// handle is ever in flight.
pub fn start_polling(
    context: GateContext,
    period: Duration,
    service: Arc<dyn GateService>,
    logger: Option<Arc<StructuredLogger>>,
) -> PollHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let counters = Arc::new(PollCounters::default());

    info!(
        job_id = %context.job_id,
        expected_total = context.expected_total,
        period_ms = period.as_millis() as u64,
        "gate polling started"
    );

    let task = tokio::spawn(poll_loop(
        context,
        period,
        service,
        logger,
        counters.clone(),
        stop_rx,
        ready_tx,
    ));

    PollHandle {
        stop_tx,
        ready_rx: Some(ready_rx),
        counters,
        task,
    }
}

async fn poll_loop(
    context: GateContext,
    period: Duration,
    service: Arc<dyn GateService>,
    logger: Option<Arc<StructuredLogger>>,
    counters: Arc<PollCounters>,
    mut stop_rx: watch::Receiver<bool>,
    ready_tx: oneshot::Sender<()>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<anyhow::Result<bool>>> = None;
    let mut stopped = false;

    loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                // A dropped sender means the handle is gone: treat as stop.
                if changed.is_err() || *stop_rx.borrow() {
                    stopped = true;
                    break;
                }
            }

            joined = await_check(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                if *stop_rx.borrow() {
                    stopped = true;
                    break;
                }
                match joined {
                    Ok(Ok(true)) => {
                        log_poll(&logger, "ready", &context);
                        info!(job_id = %context.job_id, "gate is ready");
                        // Late results from this handle must not fire again.
                        let _ = ready_tx.send(());
                        break;
                    }
                    Ok(Ok(false)) => {
                        debug!(job_id = %context.job_id, "gate not ready yet");
                    }
                    Ok(Err(e)) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        log_poll(&logger, "failed", &context);
                        warn!(job_id = %context.job_id, error = %e, "readiness check failed");
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        log_poll(&logger, "failed", &context);
                        warn!(job_id = %context.job_id, error = %e, "readiness check task failed");
                    }
                }
            }

            _ = interval.tick() => {
                if in_flight.is_some() {
                    counters.skipped.fetch_add(1, Ordering::SeqCst);
                    log_poll(&logger, "skipped", &context);
                    debug!(job_id = %context.job_id, "previous check outstanding, tick skipped");
                    continue;
                }
                counters.issued.fetch_add(1, Ordering::SeqCst);
                log_poll(&logger, "issued", &context);
                let service = service.clone();
                let context = context.clone();
                in_flight = Some(tokio::spawn(async move {
                    service.check_ready(&context).await
                }));
            }
        }
    }

    if let Some(check) = in_flight.take() {
        check.abort();
        log_poll(&logger, "discarded", &context);
    }
    if stopped {
        log_poll(&logger, "stopped", &context);
    }
}

async fn await_check(
    slot: &mut Option<JoinHandle<anyhow::Result<bool>>>,
) -> Result<anyhow::Result<bool>, JoinError> {
    match slot {
        Some(check) => check.await,
        None => std::future::pending().await,
    }
}

fn log_poll(logger: &Option<Arc<StructuredLogger>>, kind: &str, context: &GateContext) {
    if let Some(logger) = logger {
        logger.log_gate(kind, context);
    }
}

#[cfg(test)]
#[path = "tests/gate_tests.rs"]
mod tests;
