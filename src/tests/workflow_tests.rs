use super::*;
use crate::ledger::ItemStatus;
use crate::remote::fake::{FixedInvokers, ScriptedGate, ScriptedInvoker};
use crate::remote::InvokeFailure;

fn entries() -> Vec<String> {
    vec![
        "a.pdf".to_string(),
        "dir/b.pdf".to_string(),
        "dir/c.pdf".to_string(),
    ]
}

fn failing() -> ScriptedInvoker {
    ScriptedInvoker::new(|_, subject| {
        Err(InvokeFailure::Server {
            status: 500,
            detail: Some(format!("cannot read {}", subject)),
        })
    })
}

fn workflow(
    phase1: ScriptedInvoker,
    phase2: ScriptedInvoker,
    gate: Option<Arc<ScriptedGate>>,
) -> (BatchWorkflow, Arc<FixedInvokers>) {
    let invokers = Arc::new(FixedInvokers::new(phase1, phase2));
    let services = WorkflowServices {
        invokers: invokers.clone(),
        gate: gate.map(|gate| gate as Arc<dyn GateService>),
    };
    (BatchWorkflow::new(services, WorkflowOptions::default()), invokers)
}

fn subjects(ledger: &ItemLedger) -> Vec<String> {
    ledger.items().iter().map(|item| item.subject.clone()).collect()
}

#[tokio::test]
async fn test_ungated_runs_phase2_over_phase1_successes() {
    let (mut workflow, invokers) = workflow(
        ScriptedInvoker::alternating(),
        ScriptedInvoker::succeeding(),
        None,
    );
    workflow.select(entries()).unwrap();

    let report = workflow.run_to_completion().await.unwrap();

    assert_eq!(report.final_phase, WorkflowPhase::Complete);
    assert_eq!(report.phase1.map(|r| r.succeeded), Some(2));
    assert_eq!(report.phase2.map(|r| r.succeeded), Some(2));
    assert_eq!(report.gate, None);
    assert_eq!(report.failed_items(), 1);

    assert_eq!(subjects(workflow.phase1_ledger()), entries());
    assert_eq!(invokers.phase2.calls(), vec!["a.pdf", "dir/c.pdf"]);
    assert_eq!(subjects(workflow.phase2_ledger()), vec!["a.pdf", "dir/c.pdf"]);
    assert_eq!(*invokers.jobs.lock().unwrap(), vec![None, None]);

    let progress = workflow.progress();
    assert_eq!(progress.phase1_percent, 100.0);
    assert_eq!(progress.phase2_percent, 100.0);
    assert_eq!(progress.phase2.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_gated_waits_for_gate_then_downloads() {
    let gate = Arc::new(ScriptedGate::ready_on(2));
    let (mut workflow, invokers) = workflow(
        ScriptedInvoker::alternating(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();

    let report = workflow.run_to_completion().await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(report.final_phase, WorkflowPhase::Complete);
    assert_eq!(report.gate, Some(GateOutcome::Ready));
    assert_eq!(gate.checks(), 2);
    assert_eq!(gate.triggers(), 1);
    // Only the two successful uploads are awaited remotely.
    assert!(gate.contexts().iter().all(|c| c.expected_total == 2));
    assert_eq!(
        *invokers.jobs.lock().unwrap(),
        vec![Some("job-1".to_string()), Some("job-1".to_string())]
    );
    assert_eq!(subjects(workflow.phase2_ledger()), vec!["a.pdf", "dir/c.pdf"]);
    assert!(!workflow.progress().polling);
}

#[tokio::test(start_paused = true)]
async fn test_phase_by_phase_gated() {
    let gate = Arc::new(ScriptedGate::ready_on(1));
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();

    let outcome = workflow.run_phase1().await.unwrap();
    assert!(matches!(outcome, StepOutcome::Ran(report) if report.succeeded == 3));
    assert_eq!(workflow.phase(), WorkflowPhase::AwaitingGate);
    assert!(workflow.progress().polling);

    // Phase 2 cannot run before the gate opens.
    assert!(matches!(
        workflow.run_phase2().await.unwrap(),
        StepOutcome::Refused(_)
    ));
    assert!(workflow.phase2_ledger().is_empty());

    assert_eq!(workflow.await_gate().await.unwrap(), GateOutcome::Ready);
    assert_eq!(workflow.phase(), WorkflowPhase::RunningPhase2);

    workflow.run_phase2().await.unwrap();
    assert_eq!(workflow.phase(), WorkflowPhase::Complete);
    assert_eq!(workflow.phase2_ledger().items().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_gated_zero_successes_never_polls() {
    let gate = Arc::new(ScriptedGate::never_ready());
    let (mut workflow, invokers) = workflow(failing(), ScriptedInvoker::succeeding(), Some(gate.clone()));
    workflow.select(entries()).unwrap();

    let report = workflow.run_to_completion().await.unwrap();

    assert_eq!(report.refused.as_deref(), Some("no successful phase-1 items"));
    assert_eq!(report.final_phase, WorkflowPhase::AwaitingGate);
    assert_eq!(report.phase2, None);
    assert!(!workflow.progress().polling);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gate.checks(), 0);
    assert!(invokers.phase2.calls().is_empty());
}

#[tokio::test]
async fn test_ungated_zero_successes_stays_in_phase1() {
    let (mut workflow, invokers) = workflow(failing(), ScriptedInvoker::succeeding(), None);
    workflow.select(entries()).unwrap();

    let report = workflow.run_to_completion().await.unwrap();

    assert_eq!(report.final_phase, WorkflowPhase::RunningPhase1);
    assert!(report.refused.is_some());
    assert_eq!(workflow.phase1_ledger().error_count(), 3);
    assert!(invokers.phase2.calls().is_empty());
}

#[tokio::test]
async fn test_job_creation_failure_returns_to_collecting() {
    let gate = Arc::new(ScriptedGate::ready_on(1).failing_job_creation());
    let (mut workflow, invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate),
    );
    workflow.select(entries()).unwrap();

    let err = workflow.run_phase1().await.unwrap_err();

    assert!(err.to_string().contains("Failed to create remote job"));
    assert_eq!(workflow.phase(), WorkflowPhase::Collecting);
    assert!(workflow.phase1_ledger().is_empty());
    assert!(invokers.phase1.calls().is_empty());
    assert_eq!(workflow.state().files, entries());
}

#[tokio::test]
async fn test_empty_selection_is_refused() {
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        None,
    );

    let events = workflow.select(vec![]).unwrap();

    assert!(refusal(&events).is_some());
    assert_eq!(workflow.phase(), WorkflowPhase::Idle);
    assert!(workflow.run_to_completion().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reset_stops_poller_and_clears() {
    let gate = Arc::new(ScriptedGate::never_ready());
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();
    workflow.run_phase1().await.unwrap();
    assert!(workflow.progress().polling);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(gate.checks(), 1);

    workflow.reset().unwrap();

    assert_eq!(workflow.phase(), WorkflowPhase::Idle);
    assert!(!workflow.progress().polling);
    assert!(workflow.phase1_ledger().is_empty());
    assert!(workflow.state().gate.is_none());
    assert!(workflow.state().tree.is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gate.checks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_awaiting_gate() {
    let gate = Arc::new(ScriptedGate::never_ready());
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();
    workflow.run_phase1().await.unwrap();

    let canceller = workflow.canceller();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        canceller.cancel();
    });

    let report = workflow.run_to_completion().await.unwrap();

    assert_eq!(report.gate, Some(GateOutcome::Stopped));
    assert_eq!(report.refused, None);
    assert_eq!(report.final_phase, WorkflowPhase::AwaitingGate);
    assert!(!workflow.progress().polling);
    let checks = gate.checks();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gate.checks(), checks);

    workflow.reset().unwrap();
    assert!(!workflow.canceller().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_resumed_wait_requires_readiness() {
    let gate = Arc::new(ScriptedGate::never_ready());
    let (mut workflow, invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();
    workflow.run_phase1().await.unwrap();

    let canceller = workflow.canceller();
    let cancel_after = |secs| {
        let canceller = canceller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            canceller.cancel();
        })
    };

    cancel_after(12);
    assert_eq!(workflow.await_gate().await.unwrap(), GateOutcome::Stopped);
    assert_eq!(workflow.phase(), WorkflowPhase::AwaitingGate);
    let checks = gate.checks();
    assert_eq!(checks, 2);

    // Still cancelled: nothing is applied.
    assert_eq!(workflow.await_gate().await.unwrap(), GateOutcome::Stopped);
    assert_eq!(workflow.phase(), WorkflowPhase::AwaitingGate);

    canceller.rearm();
    cancel_after(12);
    assert_eq!(workflow.await_gate().await.unwrap(), GateOutcome::Stopped);
    assert_eq!(workflow.phase(), WorkflowPhase::AwaitingGate);
    assert_eq!(gate.checks(), checks + 2);
    assert!(invokers.phase2.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resumed_wait_enters_phase2_when_ready() {
    let gate = Arc::new(ScriptedGate::ready_on(4));
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();
    workflow.run_phase1().await.unwrap();

    let canceller = workflow.canceller();
    let delayed = canceller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        delayed.cancel();
    });
    assert_eq!(workflow.await_gate().await.unwrap(), GateOutcome::Stopped);
    assert_eq!(gate.checks(), 2);

    canceller.rearm();
    assert_eq!(workflow.await_gate().await.unwrap(), GateOutcome::Ready);
    assert_eq!(workflow.phase(), WorkflowPhase::RunningPhase2);
    assert_eq!(gate.checks(), 4);
}

#[tokio::test]
async fn test_cancel_during_phase1_keeps_phase() {
    let (mut workflow, invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        None,
    );
    workflow.select(entries()).unwrap();
    workflow.canceller().cancel();

    let report = workflow.run_to_completion().await.unwrap();

    assert_eq!(report.phase1.map(|r| r.cancelled), Some(true));
    assert_eq!(report.final_phase, WorkflowPhase::RunningPhase1);
    assert!(invokers.phase1.calls().is_empty());
    assert!(workflow.phase1_ledger().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_poller() {
    let gate = Arc::new(ScriptedGate::never_ready());
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        Some(gate.clone()),
    );
    workflow.select(entries()).unwrap();
    workflow.run_phase1().await.unwrap();

    drop(workflow);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gate.checks(), 0);
}

#[tokio::test]
async fn test_select_after_reset_starts_fresh() {
    let (mut workflow, _invokers) = workflow(
        ScriptedInvoker::succeeding(),
        ScriptedInvoker::succeeding(),
        None,
    );
    workflow.select(entries()).unwrap();
    workflow.run_to_completion().await.unwrap();
    assert_eq!(workflow.phase(), WorkflowPhase::Complete);

    // A finished run must be reset before a new selection.
    assert!(refusal(&workflow.select(vec!["x.pdf".to_string()]).unwrap()).is_some());

    workflow.reset().unwrap();
    workflow.select(vec!["x.pdf".to_string()]).unwrap();
    assert!(workflow.phase1_ledger().is_empty());
    assert!(workflow.phase2_ledger().is_empty());
    assert_eq!(workflow.subscribe().borrow().file_count, 1);
}

#[tokio::test]
async fn test_single_pass_scenario() {
    let invoker = Arc::new(ScriptedInvoker::new(|index, _| {
        if index == 1 {
            Err(InvokeFailure::Server {
                status: 404,
                detail: Some("not found".to_string()),
            })
        } else {
            Ok("renamed_ok".to_string())
        }
    }));

    let pass = run_single_pass(&entries(), invoker, &WorkflowOptions::default(), &Canceller::new())
        .await
        .unwrap();

    assert_eq!(pass.tree.len(), 2);
    assert_eq!(pass.tree[0], TreeNode::File { name: "a.pdf".to_string() });
    assert_eq!(pass.tree[1].name(), "dir");
    let statuses: Vec<ItemStatus> = pass.ledger.items().iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Success, ItemStatus::Error, ItemStatus::Success]
    );
    assert!(pass.ledger.items()[1].message.contains("not found"));
    assert_eq!(pass.ledger.percent_complete(), 100.0);
    assert_eq!(pass.report.processed(), 3);
}

#[tokio::test]
async fn test_single_pass_rejects_empty_selection() {
    let invoker = Arc::new(ScriptedInvoker::succeeding());
    let result = run_single_pass(&[], invoker.clone(), &WorkflowOptions::default(), &Canceller::new()).await;

    assert!(result.is_err());
    assert!(invoker.calls().is_empty());
}
