//! Core domain models
//!
//! Parameters, steps, conditional branches, property references and the
//! pipeline graph, plus the per-run state they are evaluated against.

pub mod condition;
pub mod config;
pub mod error;
pub mod parameter;
pub mod pipeline;
pub mod property;
pub mod run;
pub mod settings;
pub mod state;
pub mod step;

pub use condition::{Branch, Condition, ConditionOperator, ConditionalStep, Decision};
pub use error::{BindingError, DefinitionError, ResolutionError, TransitionError};
pub use parameter::{Parameter, ParameterRegistry, ParameterType, ParameterValue};
pub use pipeline::PipelineGraph;
pub use property::{PropertyFile, PropertyPath, PropertyReference, StepInput};
pub use run::Run;
pub use state::{ArtifactCapture, FailureCause, RunStatus, StepCounts, StepState};
pub use step::{ExecutorSpec, Step, StepKind};
