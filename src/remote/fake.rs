//! Deterministic stand-ins for the remote service used by unit tests.

use super::{GateService, InvokeFailure, PhaseInvokers, RemoteInvoker};
use crate::gate::GateContext;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = Box<dyn Fn(usize, &str) -> Result<String, InvokeFailure> + Send + Sync>;

/// Invoker whose outcome is computed from the call index and subject.
pub struct ScriptedInvoker {
    script: Script,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new(
        script: impl Fn(usize, &str) -> Result<String, InvokeFailure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_, subject| Ok(format!("done {}", subject)))
    }

    /// Even calls succeed, odd calls fail with a server detail.
    pub fn alternating() -> Self {
        Self::new(|index, subject| {
            if index % 2 == 0 {
                Ok(format!("renamed {}", subject))
            } else {
                Err(InvokeFailure::Server {
                    status: 500,
                    detail: Some(format!("not found: {}", subject)),
                })
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteInvoker for ScriptedInvoker {
    async fn invoke(&self, subject: &str) -> Result<String, InvokeFailure> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(subject.to_string());
            calls.len() - 1
        };
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.script)(index, subject)
    }
}

/// Gate service that answers readiness checks from a fixed script.
///
/// Once the script is exhausted every further check reports ready.
pub struct ScriptedGate {
    job_id: Option<String>,
    readiness: Mutex<VecDeque<Result<bool>>>,
    check_delay: Duration,
    checks: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    triggers: AtomicUsize,
    contexts: Mutex<Vec<GateContext>>,
}

impl ScriptedGate {
    pub fn new(readiness: Vec<Result<bool>>) -> Self {
        Self {
            job_id: Some("job-1".to_string()),
            readiness: Mutex::new(readiness.into()),
            check_delay: Duration::ZERO,
            checks: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            triggers: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Ready on the `n`th check (1-based).
    pub fn ready_on(n: usize) -> Self {
        let mut script: Vec<Result<bool>> = (1..n).map(|_| Ok(false)).collect();
        script.push(Ok(true));
        Self::new(script)
    }

    pub fn never_ready() -> Self {
        let script = (0..10_000).map(|_| Ok(false)).collect();
        Self::new(script)
    }

    pub fn failing_job_creation(mut self) -> Self {
        self.job_id = None;
        self
    }

    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn triggers(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<GateContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GateService for ScriptedGate {
    async fn create_job(&self) -> Result<String> {
        self.job_id
            .clone()
            .ok_or_else(|| anyhow!("job service unavailable"))
    }

    async fn check_ready(&self, context: &GateContext) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let next = self.readiness.lock().unwrap().pop_front();
        next.unwrap_or(Ok(true))
    }

    async fn trigger_download(&self, _context: &GateContext) -> Result<()> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fixed invokers for both phases, recording the job each was built for.
pub struct FixedInvokers {
    pub phase1: Arc<ScriptedInvoker>,
    pub phase2: Arc<ScriptedInvoker>,
    pub jobs: Mutex<Vec<Option<String>>>,
}

impl FixedInvokers {
    pub fn new(phase1: ScriptedInvoker, phase2: ScriptedInvoker) -> Self {
        Self {
            phase1: Arc::new(phase1),
            phase2: Arc::new(phase2),
            jobs: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, gate: Option<&GateContext>) {
        self.jobs
            .lock()
            .unwrap()
            .push(gate.map(|context| context.job_id.clone()));
    }
}

impl PhaseInvokers for FixedInvokers {
    fn phase1(&self, gate: Option<&GateContext>) -> Arc<dyn RemoteInvoker> {
        self.record(gate);
        self.phase1.clone()
    }

    fn phase2(&self, gate: Option<&GateContext>) -> Arc<dyn RemoteInvoker> {
        self.record(gate);
        self.phase2.clone()
    }
}
