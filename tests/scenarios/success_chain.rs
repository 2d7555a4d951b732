//! Test: Success Chain - every step of the abalone pipeline runs

use crate::helpers::*;
use lazypipe::core::state::{RunStatus, StepState};
use lazypipe::core::Branch;
use lazypipe::persistence::PersistenceBackend;
use serde_json::json;

/// Steps run in dependency order and the model is registered
#[tokio::test]
async fn test_abalone_success_chain() {
    let harness = abalone_harness(4.2);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_run_status(&report, RunStatus::Succeeded);
    for step in [PREPROCESS, TRAIN, EVALUATE, CHECK, REGISTER] {
        assert_step_succeeded(&report, step);
    }

    // Conditional steps never reach the executor
    assert_eq!(
        harness.executor.executed_steps(),
        vec![PREPROCESS, TRAIN, EVALUATE, REGISTER]
    );

    assert_eq!(report.counts.succeeded, 5);
    assert!(report.completed_at.is_some());
}

/// Downstream jobs receive the locations their upstream jobs produced
#[tokio::test]
async fn test_output_locations_flow_downstream() {
    let harness = abalone_harness(4.2);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;
    let run_id = report.run_id;

    let train = &harness.executor.requests_for(TRAIN)[0];
    assert_eq!(
        train.inputs["train"],
        json!(format!("{}/{}/train", run_id, PREPROCESS))
    );
    assert_eq!(
        train.inputs["validation"],
        json!(format!("{}/{}/validation", run_id, PREPROCESS))
    );
    assert_eq!(train.inputs["objective"], json!("reg:linear"));

    let evaluate = &harness.executor.requests_for(EVALUATE)[0];
    assert_eq!(
        evaluate.inputs["model"],
        json!(format!("{}/{}/model", run_id, TRAIN))
    );

    let register = &harness.executor.requests_for(REGISTER)[0];
    assert_eq!(register.inputs["model"], evaluate.inputs["model"]);
}

/// Parameter defaults and bindings reach the jobs that consume them
#[tokio::test]
async fn test_parameters_flow_into_jobs() {
    let harness = abalone_harness(4.2);
    run_to_completion(
        &harness,
        abalone_graph(),
        vec![(
            "InputDataUrl",
            lazypipe::ParameterValue::String("s3://other/abalone.csv".to_string()),
        )],
    )
    .await;

    let preprocess = &harness.executor.requests_for(PREPROCESS)[0];
    assert_eq!(preprocess.inputs["input_data"], json!("s3://other/abalone.csv"));
    assert_eq!(preprocess.inputs["instance_count"], json!(1));
    assert_eq!(preprocess.spec.job_type, "processing");
}

/// The condition records its decision and the captured report
#[tokio::test]
async fn test_decision_and_property_file_recorded() {
    let harness = abalone_harness(4.2);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    match report.step(CHECK) {
        Some(StepState::Succeeded { decision, .. }) => assert_eq!(*decision, Some(Branch::If)),
        other => panic!("unexpected condition state: {:?}", other),
    }

    match report.step(EVALUATE) {
        Some(StepState::Succeeded { property_files, .. }) => {
            assert!(property_files.contains_key("AbaloneEvaluationReport"));
        }
        other => panic!("unexpected evaluation state: {:?}", other),
    }
}

/// Finished runs are archived to history
#[tokio::test]
async fn test_run_archived_to_history() {
    let harness = abalone_harness(4.2);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    let runs = harness.history.list_runs("abalone").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.run_id);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
    assert_eq!(runs[0].succeeded_steps, 5);
    assert_eq!(runs[0].total_steps, 5);
}
