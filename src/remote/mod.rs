//! Capabilities for reaching the remote processing service.
//!
//! The runner and the gate only see these traits. Production wires them to
//! the HTTP backend in [`http`]; tests substitute deterministic fakes.

pub mod http;

use crate::gate::GateContext;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Fallback shown when the server rejects an item without a `detail`.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Why a single remote invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeFailure {
    /// The service answered with a non-2xx status.
    Server { status: u16, detail: Option<String> },
    /// No response at all; carries the raw transport error text.
    Transport(String),
    /// The configured per-item timeout elapsed first.
    Timeout(Duration),
    /// The workflow was cancelled while the call was in flight.
    Cancelled,
}

impl Display for InvokeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server { detail, .. } => {
                write!(f, "{}", detail.as_deref().unwrap_or(UNKNOWN_ERROR))
            }
            Self::Transport(text) => write!(f, "{}", text),
            Self::Timeout(after) => write!(f, "timed out after {}s", after.as_secs()),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for InvokeFailure {}

/// One remote call per subject; resolves to a human-readable outcome.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke(&self, subject: &str) -> Result<String, InvokeFailure>;
}

/// Server-side asynchronous stage of the gated workflow.
#[async_trait]
pub trait GateService: Send + Sync {
    /// Creates the remote job and returns its identifier.
    async fn create_job(&self) -> Result<String>;

    /// True once the remote side reports the job as ready.
    async fn check_ready(&self, context: &GateContext) -> Result<bool>;

    /// Asks the remote side to start producing downloads for the job.
    async fn trigger_download(&self, context: &GateContext) -> Result<()>;
}

/// Builds the per-phase invokers of a two-phase workflow.
///
/// Phase-1 invokers of gated workflows need the job identifier, which only
/// exists once phase 1 has started, hence a factory instead of fixed values.
pub trait PhaseInvokers: Send + Sync {
    fn phase1(&self, gate: Option<&GateContext>) -> Arc<dyn RemoteInvoker>;
    fn phase2(&self, gate: Option<&GateContext>) -> Arc<dyn RemoteInvoker>;
}

#[cfg(test)]
pub mod fake;
