//! Run - one mutable execution of an immutable pipeline graph

use crate::core::{
    error::TransitionError,
    parameter::{ParameterRegistry, ParameterValue},
    state::{RunStatus, StepCounts, StepState},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Execution state for one submission of a pipeline
///
/// Holds the effective parameter values (defaults merged with bindings) and
/// the state of every step. The graph itself is never mutated by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run ID
    pub run_id: Uuid,

    /// Name of the pipeline this run executes
    pub pipeline_name: String,

    /// Effective parameter values for this run
    pub parameters: BTreeMap<String, ParameterValue>,

    /// Step name -> current state
    step_states: BTreeMap<String, StepState>,

    /// Aggregate status
    pub status: RunStatus,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a pending run with every step `Pending` and every parameter at its default
    pub fn new<S: AsRef<str>>(
        pipeline_name: &str,
        parameters: &ParameterRegistry,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.to_string(),
            parameters: parameters
                .iter()
                .map(|p| (p.name.clone(), p.default.clone()))
                .collect(),
            step_states: steps
                .into_iter()
                .map(|s| (s.as_ref().to_string(), StepState::Pending))
                .collect(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Effective value of a parameter
    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name)
    }

    /// Current state of a step
    pub fn state(&self, step: &str) -> Option<&StepState> {
        self.step_states.get(step)
    }

    /// All step states, ordered by step name
    pub fn states(&self) -> impl Iterator<Item = (&String, &StepState)> {
        self.step_states.iter()
    }

    /// Move a step to a new state.
    ///
    /// Terminal states are final, so a second terminal transition for the
    /// same step is rejected.
    pub fn transition(&mut self, step: &str, next: StepState) -> Result<(), TransitionError> {
        let current = self
            .step_states
            .get_mut(step)
            .ok_or_else(|| TransitionError::UnknownStep(step.to_string()))?;

        let allowed = match (&*current, &next) {
            (StepState::Pending, StepState::Pending) => false,
            (StepState::Pending, _) => true,
            (StepState::Running { .. }, StepState::Succeeded { .. })
            | (StepState::Running { .. }, StepState::Failed { .. })
            | (StepState::Running { .. }, StepState::Cancelled { .. }) => true,
            _ => false,
        };

        if !allowed {
            return Err(TransitionError::Illegal {
                step: step.to_string(),
                from: current.label().to_string(),
                to: next.label().to_string(),
            });
        }

        *current = next;
        Ok(())
    }

    /// Step counts by state
    pub fn counts(&self) -> StepCounts {
        StepCounts::tally(self.step_states.values())
    }

    /// Whether every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.step_states.values().all(StepState::is_terminal)
    }

    /// Mark run as started
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark run as finished with the given terminal status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Status implied by the step states.
    ///
    /// `Failed` as soon as any step failed; `Succeeded` once every step is
    /// terminal and none failed or was cancelled.
    pub fn derived_status(&self) -> RunStatus {
        let counts = self.counts();
        if counts.failed > 0 {
            RunStatus::Failed
        } else if counts.cancelled > 0 {
            RunStatus::Cancelled
        } else if self.is_complete() {
            RunStatus::Succeeded
        } else if self.started_at.is_some() {
            RunStatus::Running
        } else {
            RunStatus::Pending
        }
    }
}
