//! Plain-text presentation of trees and ledgers for the console.

use crate::ledger::{ItemLedger, ItemStatus, LogItem};
use crate::runner::RunObserver;
use crate::state_machine::StateSnapshot;
use crate::tree::{self, TreeNode};
use crate::workflow::Progress;
use chrono::Local;
use std::io::Write;
use std::sync::Mutex;

const INDENT: &str = "  ";

/// Renders a tree with two spaces of indentation per level.
/// Folders carry a trailing `/`.
pub fn render_tree(nodes: &[TreeNode]) -> String {
    let mut out = String::new();
    render_level(nodes, 0, &mut out);
    out
}

fn render_level(nodes: &[TreeNode], depth: usize, out: &mut String) {
    for node in nodes {
        out.push_str(&INDENT.repeat(depth));
        match node {
            TreeNode::Folder { name, children } => {
                out.push_str(name);
                out.push_str("/\n");
                render_level(children, depth + 1, out);
            }
            TreeNode::File { name } => {
                out.push_str(name);
                out.push('\n');
            }
        }
    }
}

pub fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Processing => "....",
        ItemStatus::Success => "ok  ",
        ItemStatus::Error => "FAIL",
    }
}

/// `[HH:MM:SS] <status> <subject>: <message>`, local time.
pub fn format_item(item: &LogItem) -> String {
    format!(
        "[{}] {} {}: {}",
        item.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        status_label(item.status),
        item.subject,
        item.message
    )
}

/// `processed/total (pct%)`
pub fn format_progress(ledger: &ItemLedger) -> String {
    format!(
        "{}/{} ({:.0}%)",
        ledger.counts().processed,
        ledger.total_expected(),
        ledger.percent_complete()
    )
}

pub fn format_summary(label: &str, ledger: &ItemLedger) -> String {
    format!(
        "{}: {} succeeded, {} failed, {} total",
        label,
        ledger.success_count(),
        ledger.error_count(),
        ledger.items().len()
    )
}

/// Header line naming the selected folder, followed by its tree.
pub fn format_selection<S: AsRef<str>>(entries: &[S]) -> String {
    let nodes = tree::build(entries);
    let root = tree::root_name(entries).unwrap_or_default();
    format!(
        "Selected {} ({} files)\n{}",
        root,
        tree::file_count(&nodes),
        render_tree(&nodes)
    )
}

pub fn format_phase(snapshot: &StateSnapshot) -> String {
    match &snapshot.gate {
        Some(gate) => format!("== {} (job {})", snapshot.phase, gate.job_id),
        None => format!("== {}", snapshot.phase),
    }
}

pub fn format_workflow_progress(progress: &Progress) -> String {
    format!(
        "{} (phase 1 {:.0}%, phase 2 {:.0}%{})",
        progress.phase,
        progress.phase1_percent,
        progress.phase2_percent,
        if progress.polling { ", gate polling" } else { "" }
    )
}

/// Prints every ledger change as it happens.
pub struct ConsoleObserver {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleObserver {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write_lines(&self, lines: &[String]) {
        if let Ok(mut out) = self.out.lock() {
            for line in lines {
                let _ = writeln!(out, "{}", line);
            }
            let _ = out.flush();
        }
    }
}

impl RunObserver for ConsoleObserver {
    fn item_begun(&self, item: &LogItem) {
        self.write_lines(&[format_item(item)]);
    }

    fn item_resolved(&self, item: &LogItem, ledger: &ItemLedger) {
        self.write_lines(&[
            format_item(item),
            format!("{}{}", INDENT, format_progress(ledger)),
        ]);
    }
}
