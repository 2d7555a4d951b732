//! Step runner - resolves inputs, calls the executor and captures property files

use crate::{
    artifact::ArtifactStore,
    core::{
        error::ResolutionError,
        property::resolve_input,
        run::Run,
        state::{ArtifactCapture, FailureCause},
        step::Step,
    },
    executor::{JobError, JobExecutor, JobRequest, JobResult},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of running one data job
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded {
        outputs: BTreeMap<String, String>,
        properties: serde_json::Value,
        property_files: BTreeMap<String, ArtifactCapture>,
    },
    Failed {
        error: String,
        cause: FailureCause,
    },
}

/// Runs data jobs against an executor and artifact store
#[derive(Clone)]
pub struct StepRunner {
    executor: Arc<dyn JobExecutor>,
    artifacts: Arc<dyn ArtifactStore>,

    /// Applied when the step does not set its own timeout
    default_timeout_secs: Option<u64>,
}

impl StepRunner {
    pub fn new(executor: Arc<dyn JobExecutor>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            executor,
            artifacts,
            default_timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.default_timeout_secs = timeout_secs;
        self
    }

    /// Resolve every input of a step against the run
    pub fn resolve_inputs(
        step: &Step,
        run: &Run,
    ) -> Result<BTreeMap<String, serde_json::Value>, ResolutionError> {
        step.inputs
            .iter()
            .map(|(name, input)| Ok((name.clone(), resolve_input(run, input)?)))
            .collect()
    }

    /// Build the executor request for a data job
    pub fn request(
        run_id: Uuid,
        step: &Step,
        inputs: BTreeMap<String, serde_json::Value>,
    ) -> Option<JobRequest> {
        Some(JobRequest {
            run_id,
            step: step.name.clone(),
            inputs,
            outputs: step.outputs.clone(),
            spec: step.executor()?.clone(),
        })
    }

    /// Execute the job and capture its property files
    pub async fn run(&self, step: &Step, request: JobRequest) -> StepOutcome {
        let timeout_secs = request.spec.timeout_secs.or(self.default_timeout_secs);

        let result = match timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), self.executor.execute(request))
                .await
                .unwrap_or(Err(JobError::Timeout(secs))),
            None => self.executor.execute(request).await,
        };

        let result = match result.and_then(|r| Self::check_outputs(step, r)) {
            Ok(result) => result,
            Err(e) => {
                return StepOutcome::Failed {
                    error: e.to_string(),
                    cause: FailureCause::Execution,
                }
            }
        };

        let property_files = self.capture_property_files(step, &result.outputs).await;

        StepOutcome::Succeeded {
            outputs: result.outputs,
            properties: result.properties,
            property_files,
        }
    }

    /// Keep declared slots only; every declared slot must be present
    fn check_outputs(step: &Step, mut result: JobResult) -> Result<JobResult, JobError> {
        result.outputs.retain(|slot, _| {
            let declared = step.outputs.contains(slot);
            if !declared {
                warn!(step = %step.name, slot = %slot, "Dropping undeclared output");
            }
            declared
        });

        if let Some(missing) = step.outputs.iter().find(|s| !result.outputs.contains_key(*s)) {
            return Err(JobError::MissingOutput(missing.clone()));
        }

        Ok(result)
    }

    async fn capture_property_files(
        &self,
        step: &Step,
        outputs: &BTreeMap<String, String>,
    ) -> BTreeMap<String, ArtifactCapture> {
        let mut captured = BTreeMap::new();

        for file in &step.property_files {
            let capture = match outputs.get(&file.output_slot) {
                Some(location) => match self.artifacts.get(location, &file.relative_path).await {
                    Ok(bytes) => {
                        debug!(
                            step = %step.name,
                            property_file = %file.name,
                            "Captured {} bytes",
                            bytes.len()
                        );
                        ArtifactCapture::Loaded(bytes)
                    }
                    Err(e) => {
                        warn!(step = %step.name, property_file = %file.name, "Failed to read property file: {}", e);
                        ArtifactCapture::Unavailable(e.to_string())
                    }
                },
                None => ArtifactCapture::Unavailable(format!(
                    "output '{}' has no location",
                    file.output_slot
                )),
            };
            captured.insert(file.name.clone(), capture);
        }

        captured
    }
}
