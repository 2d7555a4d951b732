//! Test: Failure Handling - failures and what they do downstream

use crate::helpers::*;
use lazypipe::core::state::{FailureCause, RunStatus};
use lazypipe::SchedulingStrategy;
use serde_json::json;

/// A failed job fails everything that depends on it, directly or not
#[tokio::test]
async fn test_job_failure_cascades() {
    let harness = harness(
        vec![(TRAIN, JobScript::fail("out of memory"))],
        SchedulingStrategy::Parallel,
    );
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_run_status(&report, RunStatus::Failed);
    assert_step_succeeded(&report, PREPROCESS);
    assert_eq!(
        assert_step_failed(&report, TRAIN, "out of memory"),
        FailureCause::Execution
    );
    assert_eq!(
        assert_step_failed(&report, EVALUATE, TRAIN),
        FailureCause::UpstreamFailed {
            step: TRAIN.to_string()
        }
    );
    assert_eq!(
        assert_step_failed(&report, CHECK, EVALUATE),
        FailureCause::UpstreamFailed {
            step: EVALUATE.to_string()
        }
    );
    assert!(matches!(
        assert_step_failed(&report, REGISTER, "did not succeed"),
        FailureCause::UpstreamFailed { .. }
    ));

    assert_eq!(harness.executor.executed_steps(), vec![PREPROCESS, TRAIN]);
    assert_eq!(report.counts.failed, 4);
}

/// A report that is not JSON fails the condition, not the evaluation
#[tokio::test]
async fn test_malformed_property_file_fails_condition() {
    let evaluate = JobScript::succeed().with_file("evaluation", "evaluation.json", "mse=4.2");
    let harness = harness(vec![(EVALUATE, evaluate)], SchedulingStrategy::Parallel);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_run_status(&report, RunStatus::Failed);
    assert_step_succeeded(&report, EVALUATE);
    assert_eq!(
        assert_step_failed(&report, CHECK, "not valid JSON"),
        FailureCause::Condition
    );
    assert_eq!(
        assert_step_failed(&report, REGISTER, CHECK),
        FailureCause::UpstreamFailed {
            step: CHECK.to_string()
        }
    );
    assert!(harness.executor.requests_for(REGISTER).is_empty());
}

/// A property file the job never wrote
#[tokio::test]
async fn test_missing_property_file_fails_condition() {
    let harness = harness(vec![], SchedulingStrategy::Parallel);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_step_succeeded(&report, EVALUATE);
    assert_eq!(
        assert_step_failed(&report, CHECK, "could not be read"),
        FailureCause::Condition
    );
}

/// A path absent from the report
#[tokio::test]
async fn test_missing_path_fails_condition() {
    let report = json!({ "regression_metrics": { "rmse": { "value": 2.1 } } });
    let evaluate =
        JobScript::succeed().with_file("evaluation", "evaluation.json", report.to_string());
    let harness = harness(vec![(EVALUATE, evaluate)], SchedulingStrategy::Parallel);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_eq!(
        assert_step_failed(&report, CHECK, "not found in properties"),
        FailureCause::Condition
    );
}

/// Operands of different kinds cannot be compared
#[tokio::test]
async fn test_incomparable_operands_fail_condition() {
    let report = json!({ "regression_metrics": { "mse": { "value": "low" } } });
    let evaluate =
        JobScript::succeed().with_file("evaluation", "evaluation.json", report.to_string());
    let harness = harness(vec![(EVALUATE, evaluate)], SchedulingStrategy::Parallel);
    let report = run_to_completion(&harness, abalone_graph(), vec![]).await;

    assert_eq!(
        assert_step_failed(&report, CHECK, "cannot compare"),
        FailureCause::Condition
    );
}

const FORKED_YAML: &str = r#"
name: forked
steps:
  - name: Extract
    type: job
    outputs: [raw]

  - name: Profile
    type: job
    inputs:
      raw: { step: Extract, path: outputs.raw }
      columns: { step: Extract, path: schema.columns }

  - name: Clean
    type: job
    inputs:
      raw: { step: Extract, path: outputs.raw }
    outputs: [clean]

  - name: Publish
    type: job
    inputs:
      clean: { step: Clean, path: outputs.clean }
"#;

/// An unresolvable job input fails that job only; independent steps finish
#[tokio::test]
async fn test_resolution_failure_leaves_siblings_running() {
    let harness = harness(vec![], SchedulingStrategy::Parallel);
    let report = run_to_completion(&harness, graph_from_yaml(FORKED_YAML), vec![]).await;

    assert_run_status(&report, RunStatus::Failed);
    assert_eq!(
        assert_step_failed(&report, "Profile", "schema.columns"),
        FailureCause::Resolution
    );
    assert_step_succeeded(&report, "Clean");
    assert_step_succeeded(&report, "Publish");

    // Never handed to the executor
    assert!(harness.executor.requests_for("Profile").is_empty());
}

/// A failing branch does not stop an independent one
#[tokio::test]
async fn test_sibling_branch_continues_after_failure() {
    let extract = JobScript::succeed().with_properties(json!({ "schema": { "columns": 9 } }));
    let harness = harness(
        vec![("Extract", extract), ("Clean", JobScript::fail("disk full"))],
        SchedulingStrategy::Parallel,
    );
    let report = run_to_completion(&harness, graph_from_yaml(FORKED_YAML), vec![]).await;

    assert_run_status(&report, RunStatus::Failed);
    assert_step_succeeded(&report, "Profile");
    assert_step_failed(&report, "Clean", "disk full");
    assert_step_failed(&report, "Publish", "Clean");

    let profile = &harness.executor.requests_for("Profile")[0];
    assert_eq!(profile.inputs["columns"], json!(9));
}
