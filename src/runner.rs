//! Strictly sequential execution of one remote call per subject.
//!
//! The runner owns the ledger for the duration of a pass: it begins an item,
//! awaits the remote call, resolves the item, and only then moves to the
//! next subject. A failed item never stops the pass; only cancellation does.

use crate::ledger::{pending_message, ItemLedger, LogItem, Outcome};
use crate::remote::{InvokeFailure, RemoteInvoker};
use crate::structured_logger::StructuredLogger;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Receives ledger changes as they happen, for presentation.
///
/// All methods have default no-op implementations.
pub trait RunObserver: Send + Sync {
    fn item_begun(&self, _item: &LogItem) {}
    fn item_resolved(&self, _item: &LogItem, _ledger: &ItemLedger) {}
}

/// No-op observer for silent operation.
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Cancellation flag shared between a workflow and its runners.
#[derive(Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clears the flag so the owner can run again.
    pub fn rearm(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `changed` cannot fail while we wait.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    /// True when the pass stopped before reaching every subject.
    pub cancelled: bool,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Message recorded for a failed item.
pub fn failure_message(subject: &str, failure: &InvokeFailure) -> String {
    format!("Failed to process {}: {}", subject, failure)
}

pub struct SequentialRunner {
    invoker: Arc<dyn RemoteInvoker>,
    phase: String,
    item_timeout: Option<Duration>,
    pending_message: fn(&str) -> String,
    observer: Arc<dyn RunObserver>,
    logger: Option<Arc<StructuredLogger>>,
}

impl SequentialRunner {
    pub fn new(phase: impl Into<String>, invoker: Arc<dyn RemoteInvoker>) -> Self {
        Self {
            invoker,
            phase: phase.into(),
            item_timeout: None,
            pending_message,
            observer: Arc::new(SilentObserver),
            logger: None,
        }
    }

    /// Bounds every remote call; an elapsed call settles its item as `Error`.
    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_pending_message(mut self, pending_message: fn(&str) -> String) -> Self {
        self.pending_message = pending_message;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_logger(mut self, logger: Option<Arc<StructuredLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Processes `subjects` in order, one remote call at a time.
    ///
    /// The caller starts the batch on the ledger; the runner only appends and
    /// resolves. Returns once every begun item is settled.
    ///
    /// # Errors
    ///
    /// Only on ledger contract violations; remote failures are recorded as
    /// `Error` items.
    pub async fn run(
        &self,
        subjects: &[String],
        ledger: &mut ItemLedger,
        canceller: &Canceller,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        info!(phase = %self.phase, items = subjects.len(), "runner started");

        for subject in subjects {
            if canceller.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let id = ledger.begin_with_message(subject, (self.pending_message)(subject));
            if let Some(item) = ledger.get(id) {
                self.observer.item_begun(item);
                if let Some(logger) = &self.logger {
                    logger.log_item_begun(&self.phase, item);
                }
            }

            let result = tokio::select! {
                biased;
                _ = canceller.cancelled() => Err(InvokeFailure::Cancelled),
                result = self.invoke(subject) => result,
            };

            let (outcome, message) = match result {
                Ok(message) => {
                    report.succeeded += 1;
                    (Outcome::Success, message)
                }
                Err(failure) => {
                    report.failed += 1;
                    if failure == InvokeFailure::Cancelled {
                        report.cancelled = true;
                    }
                    debug!(phase = %self.phase, subject = %subject, error = %failure, "item failed");
                    (Outcome::Error, failure_message(subject, &failure))
                }
            };

            ledger.resolve(id, outcome, message)?;
            if let Some(item) = ledger.get(id) {
                self.observer.item_resolved(item, ledger);
                if let Some(logger) = &self.logger {
                    logger.log_item_resolved(&self.phase, item);
                }
            }

            if report.cancelled {
                break;
            }
        }

        info!(
            phase = %self.phase,
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "runner finished"
        );
        Ok(report)
    }

    async fn invoke(&self, subject: &str) -> Result<String, InvokeFailure> {
        match self.item_timeout {
            Some(limit) => tokio::time::timeout(limit, self.invoker.invoke(subject))
                .await
                .unwrap_or(Err(InvokeFailure::Timeout(limit))),
            None => self.invoker.invoke(subject).await,
        }
    }
}

#[cfg(test)]
#[path = "tests/runner_tests.rs"]
mod tests;
