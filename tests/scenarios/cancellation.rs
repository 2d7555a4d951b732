//! Test: Cancellation - aborting runs before and during execution

use crate::helpers::*;
use lazypipe::core::property::resolve;
use lazypipe::core::state::RunStatus;
use lazypipe::core::{PropertyReference, ResolutionError};
use lazypipe::persistence::PersistenceBackend;
use lazypipe::{DriverError, ExecutionEvent, SchedulingStrategy};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn slow_training_harness() -> Harness {
    harness(
        vec![
            (TRAIN, JobScript::succeed().with_delay(Duration::from_secs(30))),
            (EVALUATE, evaluation_report(4.2)),
        ],
        SchedulingStrategy::Parallel,
    )
}

/// Cancelling mid-run stops the running job and cancels everything pending
#[tokio::test]
async fn test_cancel_running_pipeline() {
    let harness = slow_training_harness();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    harness
        .engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    let run_id = harness.engine.submit(abalone_graph(), Vec::new()).await.unwrap();
    harness.engine.start(run_id).await.unwrap();
    wait_until_running(&harness.engine, run_id, TRAIN).await;

    let started = Instant::now();
    harness.engine.cancel(run_id).await.unwrap();
    let status = harness.engine.wait(run_id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(status, RunStatus::Cancelled);

    let report = harness.engine.status(run_id).await.unwrap();
    assert_run_status(&report, RunStatus::Cancelled);
    assert_step_succeeded(&report, PREPROCESS);
    for step in [TRAIN, EVALUATE, CHECK, REGISTER] {
        assert_step_cancelled(&report, step);
    }
    assert!(harness.executor.requests_for(EVALUATE).is_empty());

    let events = events.lock().unwrap();
    let cancelled = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepCancelled { .. }))
        .count();
    assert_eq!(cancelled, 4);
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunCompleted {
            status: RunStatus::Cancelled,
            ..
        })
    ));
}

/// A reference to a cancelled step does not resolve
#[tokio::test]
async fn test_cancelled_step_is_unresolvable() {
    let harness = slow_training_harness();
    let run_id = harness.engine.submit(abalone_graph(), Vec::new()).await.unwrap();
    harness.engine.start(run_id).await.unwrap();
    wait_until_running(&harness.engine, run_id, TRAIN).await;
    harness.engine.cancel(run_id).await.unwrap();
    harness.engine.wait(run_id).await.unwrap();

    let run = harness.engine.snapshot(run_id).await.unwrap();
    let reference = PropertyReference::new(TRAIN, "outputs.model").unwrap();
    assert!(matches!(
        resolve(&run, &reference),
        Err(ResolutionError::Unresolvable { ref step, .. }) if step == TRAIN
    ));

    // Upstream output is still there
    let reference = PropertyReference::new(PREPROCESS, "outputs.train").unwrap();
    assert!(resolve(&run, &reference).is_ok());
}

/// A pending run is cancelled without running anything and is archived
#[tokio::test]
async fn test_cancel_before_start() {
    let harness = abalone_harness(4.2);
    let run_id = harness.engine.submit(abalone_graph(), Vec::new()).await.unwrap();

    harness.engine.cancel(run_id).await.unwrap();
    assert_eq!(harness.engine.wait(run_id).await.unwrap(), RunStatus::Cancelled);

    let report = harness.engine.status(run_id).await.unwrap();
    assert_eq!(report.counts.cancelled, 5);
    assert!(report.started_at.is_none());
    assert!(harness.executor.executed_steps().is_empty());

    let archived = harness.history.load_run(run_id).await.unwrap().unwrap();
    assert_eq!(archived.status, RunStatus::Cancelled);

    // A cancelled run cannot be started
    assert_eq!(
        harness.engine.start(run_id).await,
        Err(DriverError::AlreadyRunning(run_id))
    );
}

/// Cancelling a finished run changes nothing
#[tokio::test]
async fn test_cancel_finished_run_is_noop() {
    let harness = abalone_harness(4.2);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    harness.engine.cancel(report.run_id).await.unwrap();

    let after = harness.engine.status(report.run_id).await.unwrap();
    assert_run_status(&after, RunStatus::Succeeded);
    assert_eq!(after.counts.succeeded, 5);
    assert_eq!(after.completed_at, report.completed_at);
}
