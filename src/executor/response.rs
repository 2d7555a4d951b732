//! Job request and result types

use crate::core::step::ExecutorSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Error types for job execution
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job failed: {0}")]
    Failed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("declared output '{0}' was not produced")]
    MissingOutput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Everything an executor needs to run one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub run_id: Uuid,

    /// Step name
    pub step: String,

    /// Fully resolved inputs
    pub inputs: BTreeMap<String, serde_json::Value>,

    /// Declared output slots
    pub outputs: Vec<String>,

    pub spec: ExecutorSpec,
}

/// What an executor reports on success
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    /// Output slot -> location handle
    pub outputs: BTreeMap<String, String>,

    /// Job-specific properties, addressable by path
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl JobResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, slot: impl Into<String>, location: impl Into<String>) -> Self {
        self.outputs.insert(slot.into(), location.into());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}
