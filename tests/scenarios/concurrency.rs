//! Test: Concurrency - scheduling strategies and simultaneous runs

use crate::helpers::*;
use lazypipe::core::state::RunStatus;
use lazypipe::{ParameterValue, SchedulingStrategy};
use std::time::Duration;

const FAN_OUT_YAML: &str = r#"
name: fan-out
steps:
  - name: Source
    type: job
    outputs: [data]

  - name: ShardA
    type: job
    inputs:
      data: { step: Source, path: outputs.data }
    outputs: [part]

  - name: ShardB
    type: job
    inputs:
      data: { step: Source, path: outputs.data }
    outputs: [part]

  - name: ShardC
    type: job
    inputs:
      data: { step: Source, path: outputs.data }
    outputs: [part]

  - name: Merge
    type: job
    inputs:
      a: { step: ShardA, path: outputs.part }
      b: { step: ShardB, path: outputs.part }
      c: { step: ShardC, path: outputs.part }
"#;

fn fan_out_harness(strategy: SchedulingStrategy) -> Harness {
    let shard = JobScript::succeed().with_delay(Duration::from_millis(150));
    harness(
        vec![
            ("ShardA", shard.clone()),
            ("ShardB", shard.clone()),
            ("ShardC", shard),
        ],
        strategy,
    )
}

async fn run_fan_out(strategy: SchedulingStrategy) -> Harness {
    let harness = fan_out_harness(strategy);
    let report = run_to_completion(&harness, graph_from_yaml(FAN_OUT_YAML), vec![]).await;
    assert_run_status(&report, RunStatus::Succeeded);
    assert_eq!(report.counts.succeeded, 5);

    let executed = harness.executor.executed_steps();
    assert_eq!(executed.first().map(String::as_str), Some("Source"));
    assert_eq!(executed.last().map(String::as_str), Some("Merge"));
    harness
}

/// Independent steps run together
#[tokio::test]
async fn test_parallel_strategy() {
    let harness = run_fan_out(SchedulingStrategy::Parallel).await;
    assert_eq!(harness.executor.max_in_flight(), 3);
}

/// One step at a time
#[tokio::test]
async fn test_sequential_strategy() {
    let harness = run_fan_out(SchedulingStrategy::Sequential).await;
    assert_eq!(harness.executor.max_in_flight(), 1);
}

/// Never more than the limit
#[tokio::test]
async fn test_limited_parallel_strategy() {
    let harness = run_fan_out(SchedulingStrategy::LimitedParallel(2)).await;
    assert_eq!(harness.executor.max_in_flight(), 2);
}

/// Runs of one template share nothing but the definition
#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let harness = harness(
        vec![
            (
                TRAIN,
                JobScript::succeed().with_delay(Duration::from_millis(100)),
            ),
            (EVALUATE, evaluation_report(7.0)),
        ],
        SchedulingStrategy::Parallel,
    );
    let graph = abalone_graph();

    let strict = harness.engine.submit(graph.clone(), Vec::new()).await.unwrap();
    let lenient = harness
        .engine
        .submit(
            graph,
            vec![("MseThreshold".to_string(), ParameterValue::Float(9.5))],
        )
        .await
        .unwrap();

    harness.engine.start(strict).await.unwrap();
    harness.engine.start(lenient).await.unwrap();
    let (a, b) = tokio::join!(harness.engine.wait(strict), harness.engine.wait(lenient));
    assert_eq!(a.unwrap(), RunStatus::Succeeded);
    assert_eq!(b.unwrap(), RunStatus::Succeeded);

    let strict = harness.engine.status(strict).await.unwrap();
    let lenient = harness.engine.status(lenient).await.unwrap();
    assert_step_skipped(&strict, REGISTER);
    assert_step_succeeded(&lenient, REGISTER);

    // Each run wrote its own outputs
    let models: Vec<_> = harness
        .executor
        .requests_for(EVALUATE)
        .into_iter()
        .map(|r| r.inputs["model"].clone())
        .collect();
    assert_eq!(models.len(), 2);
    assert_ne!(models[0], models[1]);
    assert_eq!(harness.artifacts.len().await, 2);
}
