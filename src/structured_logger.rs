//! Structured JSONL logger for debugging and run reconstruction.
//!
//! This module provides machine-parseable logging with:
//! - Monotonic sequence numbers for ordering
//! - ISO 8601 timestamps with microsecond precision
//! - Session and run IDs for correlation
//! - Structured event data in JSON format

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::gate::GateContext;
use crate::ledger::LogItem;
use crate::state_machine::{StateCommand, StateEvent};

/// Structured JSONL logger for debugging and run reconstruction.
pub struct StructuredLogger {
    session_id: String,
    run_id: AtomicU64,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across entire session)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    pub session_id: String,
    /// Run ID (increments on workflow reset within a session)
    pub run_id: u64,
    /// Component that emitted the log
    pub component: String,
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a new structured logger for the given session.
    ///
    /// Logs are written to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            run_id: AtomicU64::new(1),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    /// Increments the run ID (called when the workflow is reset).
    pub fn increment_run_id(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event.
    ///
    /// The event is serialized to JSON and written as a single line.
    /// This method is thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            session_id: self.session_id.clone(),
            run_id: self.run_id.load(Ordering::SeqCst),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs a command received by the workflow state machine.
    pub fn log_command(&self, machine_seq: u64, command: &StateCommand) {
        self.log(
            "Workflow",
            serde_json::json!({
                "type": "Command",
                "machine_seq": machine_seq,
                "command": command.name()
            }),
        );
    }

    /// Logs an event emitted by the workflow state machine.
    pub fn log_event(&self, machine_seq: u64, event: &StateEvent) {
        self.log(
            "Workflow",
            serde_json::json!({
                "type": "Event",
                "machine_seq": machine_seq,
                "event": event
            }),
        );
    }

    /// Logs an item entering `Processing`.
    pub fn log_item_begun(&self, phase: &str, item: &LogItem) {
        self.log(
            "Runner",
            serde_json::json!({
                "type": "ItemBegun",
                "phase": phase,
                "id": item.id,
                "subject": item.subject
            }),
        );
    }

    /// Logs an item settling to `Success` or `Error`.
    pub fn log_item_resolved(&self, phase: &str, item: &LogItem) {
        self.log(
            "Runner",
            serde_json::json!({
                "type": "ItemResolved",
                "phase": phase,
                "id": item.id,
                "subject": item.subject,
                "status": item.status,
                "message": item.message
            }),
        );
    }

    /// Logs a poll-loop occurrence (`issued`, `skipped`, `failed`, `ready`, `discarded`).
    pub fn log_gate(&self, kind: &str, context: &GateContext) {
        self.log(
            "Gate",
            serde_json::json!({
                "type": "Poll",
                "kind": kind,
                "job_id": context.job_id,
                "expected_total": context.expected_total
            }),
        );
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
