//! Test: Conditional Branch - runtime branch selection

use crate::helpers::*;
use lazypipe::core::state::RunStatus;
use lazypipe::{ExecutionEvent, ParameterValue, SchedulingStrategy};
use serde_json::json;
use std::sync::{Arc, Mutex};

const GATED_YAML: &str = r#"
name: gated
parameters:
  - name: MinAccuracy
    type: float
    default: 0.9

steps:
  - name: Train
    type: job
    job_type: training
    outputs: [model]

  - name: Gate
    type: condition
    conditions:
      - operator: gte
        left: { step: Train, path: metrics.accuracy }
        right: { parameter: MinAccuracy }
      - operator: eq
        left: { step: Train, path: status }
        right: "Completed"
    if_steps: [Deploy]
    else_steps: [Notify]

  - name: Deploy
    type: job
    job_type: deploy
    inputs:
      model: { step: Train, path: outputs.model }

  - name: Notify
    type: job
    job_type: notify

  - name: Audit
    type: job
    job_type: audit
    depends_on: [Notify]
"#;

fn gated_harness(accuracy: f64, status: &str) -> Harness {
    let train = JobScript::succeed().with_properties(json!({
        "metrics": { "accuracy": accuracy },
        "status": status,
    }));
    harness(vec![("Train", train)], SchedulingStrategy::Parallel)
}

/// MSE above the threshold leaves the model unregistered
#[tokio::test]
async fn test_mse_above_threshold_skips_registration() {
    let harness = abalone_harness(7.0);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_run_status(&report, RunStatus::Succeeded);
    assert_step_succeeded(&report, CHECK);
    assert_step_skipped(&report, REGISTER);
    assert!(harness.executor.requests_for(REGISTER).is_empty());
    assert_eq!(report.counts.skipped, 1);
}

/// Equality satisfies `lte`
#[tokio::test]
async fn test_mse_equal_to_threshold_registers() {
    let harness = abalone_harness(6.0);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_step_succeeded(&report, REGISTER);
}

/// The same template takes a different branch under a different binding
#[tokio::test]
async fn test_threshold_binding_flips_branch() {
    let harness = abalone_harness(7.0);
    let graph = abalone_graph();

    let strict = run_to_completion(&harness, graph.clone(), vec![]).await;
    assert_step_skipped(&strict, REGISTER);

    let lenient = run_to_completion(
        &harness,
        graph.clone(),
        vec![("MseThreshold", ParameterValue::Float(8.0))],
    )
    .await;
    assert_step_succeeded(&lenient, REGISTER);

    // Integers widen to the declared float type
    let widened = run_to_completion(
        &harness,
        graph,
        vec![("MseThreshold", ParameterValue::Integer(10))],
    )
    .await;
    assert_step_succeeded(&widened, REGISTER);
    assert_eq!(widened.parameters["MseThreshold"], ParameterValue::Float(10.0));
}

/// The else branch runs and its downstream step follows
#[tokio::test]
async fn test_else_branch_runs() {
    let harness = gated_harness(0.8, "Completed");
    let report = run_to_completion(&harness, graph_from_yaml(GATED_YAML), vec![]).await;

    assert_run_status(&report, RunStatus::Succeeded);
    assert_step_skipped(&report, "Deploy");
    assert_step_succeeded(&report, "Notify");
    assert_step_succeeded(&report, "Audit");
}

/// Skipping the else branch cascades to steps that depend on it
#[tokio::test]
async fn test_skip_cascades_downstream() {
    let harness = gated_harness(0.95, "Completed");
    let report = run_to_completion(&harness, graph_from_yaml(GATED_YAML), vec![]).await;

    assert_run_status(&report, RunStatus::Succeeded);
    assert_step_succeeded(&report, "Deploy");
    assert_step_skipped(&report, "Notify");
    assert_step_skipped(&report, "Audit");
    assert_eq!(
        harness.executor.executed_steps(),
        vec!["Train".to_string(), "Deploy".to_string()]
    );
}

/// All conditions must hold for the if branch
#[tokio::test]
async fn test_conditions_are_conjunctive() {
    let harness = gated_harness(0.95, "Stopped");
    let report = run_to_completion(&harness, graph_from_yaml(GATED_YAML), vec![]).await;

    assert_step_skipped(&report, "Deploy");
    assert_step_succeeded(&report, "Notify");
}

/// The decision is announced with the members of each branch
#[tokio::test]
async fn test_condition_event() {
    let harness = gated_harness(0.8, "Completed");
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    harness
        .engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    run_to_completion(&harness, graph_from_yaml(GATED_YAML), vec![]).await;

    let events = events.lock().unwrap();
    let decision = events
        .iter()
        .find_map(|event| match event {
            ExecutionEvent::ConditionEvaluated {
                step,
                branch,
                activated,
                skipped,
                ..
            } => Some((step.clone(), branch.to_string(), activated.clone(), skipped.clone())),
            _ => None,
        })
        .expect("condition was never evaluated");

    assert_eq!(
        decision,
        (
            "Gate".to_string(),
            "else".to_string(),
            vec!["Notify".to_string()],
            vec!["Deploy".to_string()]
        )
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepSkipped { step, .. } if step == "Deploy")));
}
