//! Subprocess executor - runs a step's command as a local process

use crate::executor::{JobError, JobExecutor, JobRequest, JobResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Executes data jobs as child processes.
///
/// Resolved inputs arrive as a JSON object on stdin and as
/// `LAZYPIPE_INPUT_<NAME>` variables. Each declared output slot gets a
/// directory under the artifact root, exported as `LAZYPIPE_OUTPUT_<SLOT>`.
/// If the last line of stdout is a JSON object it becomes the step's
/// properties.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    /// Directory holding every output location
    artifact_root: PathBuf,
}

impl SubprocessExecutor {
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
        }
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    /// Location handle for an output slot, relative to the artifact root
    fn location(request: &JobRequest, slot: &str) -> String {
        format!("{}/{}/{}", request.run_id, request.step, slot)
    }

    async fn prepare_outputs(
        &self,
        request: &JobRequest,
    ) -> Result<BTreeMap<String, String>, JobError> {
        let mut outputs = BTreeMap::new();
        for slot in &request.outputs {
            let location = Self::location(request, slot);
            let dir = self.artifact_root.join(&location);
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                JobError::Internal(format!("Failed to create output dir {}: {}", dir.display(), e))
            })?;
            outputs.insert(slot.clone(), location);
        }
        Ok(outputs)
    }
}

/// `train-data` -> `TRAIN_DATA`
pub fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn env_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Last non-empty stdout line, if it is a JSON object
fn parse_properties(stdout: &str) -> serde_json::Value {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter(serde_json::Value::is_object)
        .unwrap_or(serde_json::Value::Null)
}

#[async_trait]
impl JobExecutor for SubprocessExecutor {
    async fn execute(&self, request: JobRequest) -> Result<JobResult, JobError> {
        let (program, args) = request
            .spec
            .command
            .split_first()
            .ok_or_else(|| JobError::Internal(format!("Step '{}' has no command", request.step)))?;

        let outputs = self.prepare_outputs(&request).await?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env("LAZYPIPE_RUN_ID", request.run_id.to_string())
            .env("LAZYPIPE_STEP", &request.step)
            .env("LAZYPIPE_JOB_TYPE", &request.spec.job_type)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(image) = &request.spec.image {
            command.env("LAZYPIPE_IMAGE", &image.uri);
        }
        for (name, value) in &request.inputs {
            command.env(format!("LAZYPIPE_INPUT_{}", env_key(name)), env_value(value));
        }
        for (slot, location) in &outputs {
            command.env(
                format!("LAZYPIPE_OUTPUT_{}", env_key(slot)),
                self.artifact_root.join(location),
            );
        }

        debug!(step = %request.step, program = %program, "Spawning job subprocess");

        let mut child = command.spawn().map_err(|e| {
            JobError::Internal(format!("Failed to spawn '{}': {}", program, e))
        })?;

        let payload = serde_json::to_vec(&request.inputs)
            .map_err(|e| JobError::Internal(format!("Failed to encode inputs: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            // A job that never reads stdin closes the pipe early
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(step = %request.step, "Job did not consume stdin: {}", e);
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            JobError::Internal(format!("Failed to wait for '{}': {}", program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(
                step = %request.step,
                "{} exited with code {}: {}",
                program,
                exit_code,
                stderr.trim()
            );
            return Err(JobError::Failed(format!(
                "{} exited with code {}: {}",
                program,
                exit_code,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(step = %request.step, "Job returned {} bytes of output", stdout.len());

        Ok(JobResult {
            outputs,
            properties: parse_properties(&stdout),
        })
    }
}
