//! Execution state models

use crate::core::condition::Branch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has been submitted but not started
    Pending,
    /// Run is being driven
    Running,
    /// Every non-skipped step succeeded
    Succeeded,
    /// At least one step failed
    Failed,
    /// Run was aborted
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Parse the `Debug` form used when persisting
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Pending" => Some(RunStatus::Pending),
            "Running" => Some(RunStatus::Running),
            "Succeeded" => Some(RunStatus::Succeeded),
            "Failed" => Some(RunStatus::Failed),
            "Cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Why a step ended up `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    /// An input could not be resolved
    Resolution,
    /// A conditional step could not evaluate its predicate
    Condition,
    /// The external executor reported failure
    Execution,
    /// A step this one depends on failed or was cancelled
    UpstreamFailed { step: String },
}

/// Bytes of a property file captured when its producer succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactCapture {
    Loaded(Vec<u8>),
    /// The artifact store could not serve the file
    Unavailable(String),
}

/// State of a single step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepState {
    /// Waiting for dependencies
    Pending,
    /// Handed to the executor
    Running { started_at: DateTime<Utc> },
    /// Finished successfully
    Succeeded {
        /// Output slot -> location handle
        outputs: BTreeMap<String, String>,
        /// Executor-reported properties
        properties: serde_json::Value,
        /// Property file name -> captured content
        property_files: BTreeMap<String, ArtifactCapture>,
        /// Branch chosen, for conditional steps
        decision: Option<Branch>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Finished with an error (never retried)
    Failed {
        error: String,
        cause: FailureCause,
        failed_at: DateTime<Utc>,
    },
    /// Excluded by a conditional branch
    Skipped { reason: String },
    /// Aborted with the run
    Cancelled { cancelled_at: DateTime<Utc> },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded { .. }
                | StepState::Failed { .. }
                | StepState::Skipped { .. }
                | StepState::Cancelled { .. }
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepState::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running { .. } => "running",
            StepState::Succeeded { .. } => "succeeded",
            StepState::Failed { .. } => "failed",
            StepState::Skipped { .. } => "skipped",
            StepState::Cancelled { .. } => "cancelled",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-state step tallies for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StepCounts {
    pub fn tally<'a>(states: impl IntoIterator<Item = &'a StepState>) -> Self {
        let mut counts = StepCounts::default();
        for state in states {
            counts.total += 1;
            match state {
                StepState::Pending => counts.pending += 1,
                StepState::Running { .. } => counts.running += 1,
                StepState::Succeeded { .. } => counts.succeeded += 1,
                StepState::Failed { .. } => counts.failed += 1,
                StepState::Skipped { .. } => counts.skipped += 1,
                StepState::Cancelled { .. } => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Fraction of steps in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.pending - self.running) as f64 / self.total as f64
    }
}
