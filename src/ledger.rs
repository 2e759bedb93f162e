//! Ordered per-item status records for one processing phase.
//!
//! Items are appended in `Processing` status when work on them begins and
//! resolved exactly once to `Success` or `Error`. The ledger never deletes an
//! item mid-batch; it is only emptied when a new batch begins or the workflow
//! is reset.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier of a ledger item. Minted from a counter owned by the ledger and
/// never reused, not even across [`ItemLedger::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogItemId(u64);

impl std::fmt::Display for LogItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Processing,
    Success,
    Error,
}

impl ItemStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ItemStatus::Processing)
    }
}

/// Terminal outcome of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
}

impl From<Outcome> for ItemStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ItemStatus::Success,
            Outcome::Error => ItemStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogItem {
    pub id: LogItemId,
    /// File path being acted on.
    pub subject: String,
    pub status: ItemStatus,
    pub message: String,
    /// Time of the last status change.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerCounts {
    /// Items in `Success` or `Error`.
    pub processed: usize,
    pub in_flight: usize,
    pub total: usize,
}

/// Read-only view of a ledger handed to presentation code.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSnapshot {
    pub items: Vec<LogItem>,
    pub counts: LedgerCounts,
    pub total_expected: usize,
    pub percent_complete: f64,
}

#[derive(Debug, Default)]
pub struct ItemLedger {
    items: Vec<LogItem>,
    next_id: u64,
    total_expected: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Default message for an item that has begun but not settled.
pub fn pending_message(subject: &str) -> String {
    format!("Processing {}...", subject)
}

impl ItemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties the ledger and records how many items the new batch will hold.
    pub fn begin_batch(&mut self, total_expected: usize) {
        self.clear();
        self.total_expected = total_expected;
    }

    /// Appends a `Processing` item with the default pending message.
    pub fn begin(&mut self, subject: &str) -> LogItemId {
        self.begin_with_message(subject, pending_message(subject))
    }

    pub fn begin_with_message(&mut self, subject: &str, message: impl Into<String>) -> LogItemId {
        self.next_id += 1;
        let id = LogItemId(self.next_id);
        let timestamp = self.next_timestamp();
        self.items.push(LogItem {
            id,
            subject: subject.to_string(),
            status: ItemStatus::Processing,
            message: message.into(),
            timestamp,
        });
        id
    }

    /// Settles an item in place. Ledger order is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown or the item was already resolved.
    pub fn resolve(&mut self, id: LogItemId, outcome: Outcome, message: impl Into<String>) -> Result<()> {
        let timestamp = self.next_timestamp();
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            bail!("No ledger item with id {}", id);
        };
        if item.status.is_settled() {
            bail!("Ledger item {} was already resolved as {:?}", id, item.status);
        }
        item.status = outcome.into();
        item.message = message.into();
        item.timestamp = timestamp;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_expected = 0;
    }

    pub fn counts(&self) -> LedgerCounts {
        let in_flight = self
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Processing)
            .count();
        LedgerCounts {
            processed: self.items.len() - in_flight,
            in_flight,
            total: self.items.len(),
        }
    }

    /// `processed / total_expected * 100`, or 0 when nothing is expected.
    pub fn percent_complete(&self) -> f64 {
        if self.total_expected == 0 {
            return 0.0;
        }
        self.counts().processed as f64 / self.total_expected as f64 * 100.0
    }

    pub fn total_expected(&self) -> usize {
        self.total_expected
    }

    pub fn items(&self) -> &[LogItem] {
        &self.items
    }

    pub fn get(&self, id: LogItemId) -> Option<&LogItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Success)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Error)
            .count()
    }

    /// Subjects that ended in `Success`, in ledger order.
    pub fn successful_subjects(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Success)
            .map(|item| item.subject.clone())
            .collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            items: self.items.clone(),
            counts: self.counts(),
            total_expected: self.total_expected,
            percent_complete: self.percent_complete(),
        }
    }

    // Wall clocks can step backwards; timestamps must not.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}
