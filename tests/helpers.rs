//! Test utility functions for lazypipe
#![allow(dead_code)]

use lazypipe::artifact::InMemoryArtifactStore;
use lazypipe::core::config::PipelineConfig;
use lazypipe::core::pipeline::PipelineGraph;
use lazypipe::core::state::{FailureCause, RunStatus, StepState};
use lazypipe::core::ParameterValue;
use lazypipe::execution::{ExecutionEngine, RunReport, SchedulingStrategy};
use lazypipe::executor::{JobError, JobExecutor, JobRequest, JobResult};
use lazypipe::persistence::InMemoryPersistence;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The abalone model-building pipeline: preprocess, train, evaluate, then
/// register the model only if its MSE is within the threshold.
pub const ABALONE_YAML: &str = r#"
name: abalone
parameters:
  - name: InputDataUrl
    type: string
    default: "s3://seedcode/abalone-dataset.csv"
  - name: ProcessingInstanceCount
    type: integer
    default: 1
  - name: MseThreshold
    type: float
    default: 6.0

steps:
  - name: PreprocessAbaloneData
    type: job
    job_type: processing
    inputs:
      input_data: { parameter: InputDataUrl }
      instance_count: { parameter: ProcessingInstanceCount }
    outputs: [train, validation, test]

  - name: TrainAbaloneModel
    type: job
    job_type: training
    inputs:
      train: { step: PreprocessAbaloneData, path: outputs.train }
      validation: { step: PreprocessAbaloneData, path: "outputs['validation']" }
      objective: "reg:linear"
    outputs: [model]

  - name: EvaluateAbaloneModel
    type: job
    job_type: processing
    inputs:
      model: { step: TrainAbaloneModel, path: outputs.model }
      test: { step: PreprocessAbaloneData, path: outputs.test }
    outputs: [evaluation]
    property_files:
      - name: AbaloneEvaluationReport
        output: evaluation
        path: evaluation.json

  - name: CheckMSEAbaloneEvaluation
    type: condition
    conditions:
      - operator: lte
        left:
          step: EvaluateAbaloneModel
          property_file: AbaloneEvaluationReport
          path: regression_metrics.mse.value
        right: { parameter: MseThreshold }
    if_steps: [RegisterAbaloneModel]
    else_steps: []

  - name: RegisterAbaloneModel
    type: job
    job_type: register
    inputs:
      model: { step: TrainAbaloneModel, path: outputs.model }
"#;

pub const PREPROCESS: &str = "PreprocessAbaloneData";
pub const TRAIN: &str = "TrainAbaloneModel";
pub const EVALUATE: &str = "EvaluateAbaloneModel";
pub const CHECK: &str = "CheckMSEAbaloneEvaluation";
pub const REGISTER: &str = "RegisterAbaloneModel";

/// What the mock executor does for one step
#[derive(Debug, Clone, Default)]
pub struct JobScript {
    pub properties: serde_json::Value,
    /// (output slot, relative path, contents) written before reporting success
    pub files: Vec<(String, String, Vec<u8>)>,
    pub error: Option<String>,
    pub delay: Option<Duration>,
}

impl JobScript {
    pub fn succeed() -> Self {
        Self::default()
    }

    pub fn fail(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, slot: &str, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files
            .push((slot.to_string(), path.to_string(), contents.into()));
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Evaluation step writing the abalone evaluation report
pub fn evaluation_report(mse: f64) -> JobScript {
    let report = serde_json::json!({
        "regression_metrics": {
            "mse": { "value": mse, "standard_deviation": 0.8 }
        }
    });
    JobScript::succeed().with_file("evaluation", "evaluation.json", report.to_string())
}

/// Mock executor that follows a script per step
pub struct MockExecutor {
    scripts: HashMap<String, JobScript>,
    artifacts: InMemoryArtifactStore,
    executed: Mutex<Vec<JobRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExecutor {
    pub fn new(artifacts: InMemoryArtifactStore) -> Self {
        Self {
            scripts: HashMap::new(),
            artifacts,
            executed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(mut self, step: &str, script: JobScript) -> Self {
        self.scripts.insert(step.to_string(), script);
        self
    }

    /// Steps handed to the executor, in dispatch order
    pub fn executed_steps(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.step.clone())
            .collect()
    }

    /// Every request received for `step`
    pub fn requests_for(&self, step: &str) -> Vec<JobRequest> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.step == step)
            .cloned()
            .collect()
    }

    /// Highest number of jobs that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for MockExecutor {
    async fn execute(&self, request: JobRequest) -> Result<JobResult, JobError> {
        self.executed.lock().unwrap().push(request.clone());
        let script = self.scripts.get(&request.step).cloned().unwrap_or_default();

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = script.error {
            return Err(JobError::Failed(error));
        }

        let mut result = JobResult::new().with_properties(script.properties);
        for slot in &request.outputs {
            let location = format!("{}/{}/{}", request.run_id, request.step, slot);
            result = result.with_output(slot.clone(), location);
        }

        for (slot, path, contents) in script.files {
            let location = result.outputs.get(&slot).cloned().ok_or_else(|| {
                JobError::Internal(format!("MockExecutor: no output slot '{}'", slot))
            })?;
            self.artifacts
                .insert(&location, &path, contents)
                .await
                .map_err(|e| JobError::Internal(e.to_string()))?;
        }

        Ok(result)
    }
}

/// Engine wired to a mock executor, in-memory artifacts and in-memory history
pub struct Harness {
    pub engine: ExecutionEngine,
    pub executor: Arc<MockExecutor>,
    pub artifacts: InMemoryArtifactStore,
    pub history: Arc<InMemoryPersistence>,
}

pub fn harness(scripts: Vec<(&str, JobScript)>, strategy: SchedulingStrategy) -> Harness {
    let artifacts = InMemoryArtifactStore::new();
    let executor = scripts
        .into_iter()
        .fold(MockExecutor::new(artifacts.clone()), |executor, (step, script)| {
            executor.script(step, script)
        });
    let executor = Arc::new(executor);
    let history = Arc::new(InMemoryPersistence::new());

    let engine = ExecutionEngine::new(executor.clone(), Arc::new(artifacts.clone()), strategy)
        .with_persistence(history.clone());

    Harness {
        engine,
        executor,
        artifacts,
        history,
    }
}

/// Harness for the abalone pipeline whose evaluation reports `mse`
pub fn abalone_harness(mse: f64) -> Harness {
    harness(vec![(EVALUATE, evaluation_report(mse))], SchedulingStrategy::Parallel)
}

/// Parse a pipeline from YAML and build its graph
pub fn graph_from_yaml(yaml: &str) -> Arc<PipelineGraph> {
    let config = PipelineConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e));
    let graph = config
        .validate()
        .unwrap_or_else(|e| panic!("Invalid pipeline: {}", e));
    Arc::new(graph)
}

pub fn abalone_graph() -> Arc<PipelineGraph> {
    graph_from_yaml(ABALONE_YAML)
}

/// Submit, start and wait for a run
pub async fn run_to_completion(
    harness: &Harness,
    graph: Arc<PipelineGraph>,
    bindings: Vec<(&str, ParameterValue)>,
) -> RunReport {
    let bindings = bindings
        .into_iter()
        .map(|(name, value)| (name.to_string(), value));
    harness
        .engine
        .execute(graph, bindings)
        .await
        .unwrap_or_else(|e| panic!("Run could not be driven: {}", e))
}

fn state<'a>(report: &'a RunReport, step: &str) -> &'a StepState {
    report
        .step(step)
        .unwrap_or_else(|| panic!("Step '{}' not found in report", step))
}

/// Assert the run ended with `status`
pub fn assert_run_status(report: &RunReport, status: RunStatus) {
    assert_eq!(
        report.status, status,
        "Run should be {:?}, step states: {:#?}",
        status, report.steps
    );
}

pub fn assert_step_succeeded(report: &RunReport, step: &str) {
    let state = state(report, step);
    assert!(
        state.is_succeeded(),
        "Step '{}' should have succeeded, but was in state: {:?}",
        step,
        state
    );
}

pub fn assert_step_skipped(report: &RunReport, step: &str) {
    let state = state(report, step);
    assert!(
        matches!(state, StepState::Skipped { .. }),
        "Step '{}' should be skipped, but was in state: {:?}",
        step,
        state
    );
}

pub fn assert_step_cancelled(report: &RunReport, step: &str) {
    let state = state(report, step);
    assert!(
        matches!(state, StepState::Cancelled { .. }),
        "Step '{}' should be cancelled, but was in state: {:?}",
        step,
        state
    );
}

/// Assert a step failed with an error containing `expected_error`; returns the cause
pub fn assert_step_failed(report: &RunReport, step: &str, expected_error: &str) -> FailureCause {
    match state(report, step) {
        StepState::Failed { error, cause, .. } => {
            assert!(
                error.contains(expected_error),
                "Step '{}' error:\n{}\n\ndoes not contain:\n{}",
                step,
                error,
                expected_error
            );
            cause.clone()
        }
        other => panic!("Step '{}' should have failed, but was in state: {:?}", step, other),
    }
}

/// Poll until `step` is running; panics after two seconds
pub async fn wait_until_running(engine: &ExecutionEngine, run_id: uuid::Uuid, step: &str) {
    for _ in 0..200 {
        let report = engine.status(run_id).await.unwrap();
        if matches!(report.step(step), Some(StepState::Running { .. })) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Step '{}' never started running", step);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abalone_graph_parses() {
        let graph = abalone_graph();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.branch_owner(REGISTER), Some(CHECK));
    }

    #[tokio::test]
    async fn test_mock_executor_writes_property_files() {
        let artifacts = InMemoryArtifactStore::new();
        let executor = MockExecutor::new(artifacts.clone()).script(EVALUATE, evaluation_report(4.5));

        let request = JobRequest {
            run_id: uuid::Uuid::new_v4(),
            step: EVALUATE.to_string(),
            inputs: Default::default(),
            outputs: vec!["evaluation".to_string()],
            spec: Default::default(),
        };
        let result = executor.execute(request).await.unwrap();

        assert_eq!(artifacts.len().await, 1);
        assert!(result.outputs.contains_key("evaluation"));
        assert_eq!(executor.executed_steps(), vec![EVALUATE.to_string()]);
    }

    #[tokio::test]
    async fn test_mock_executor_failure() {
        let executor = MockExecutor::new(InMemoryArtifactStore::new()).script(TRAIN, JobScript::fail("OOM"));
        let request = JobRequest {
            run_id: uuid::Uuid::new_v4(),
            step: TRAIN.to_string(),
            inputs: Default::default(),
            outputs: vec![],
            spec: Default::default(),
        };
        assert!(matches!(executor.execute(request).await, Err(JobError::Failed(e)) if e == "OOM"));
    }
}
