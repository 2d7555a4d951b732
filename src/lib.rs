//! lazypipe - DAG pipelines with typed parameters, deferred step properties
//! and conditional branches

pub mod artifact;
pub mod cli;
pub mod core;
pub mod execution;
pub mod executor;
pub mod persistence;

// Re-export commonly used types
pub use artifact::{ArtifactError, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use core::{
    Condition, ParameterRegistry, ParameterType, ParameterValue, PipelineGraph, PropertyFile,
    PropertyReference, Run, RunStatus, Step, StepInput, StepState,
};
pub use execution::{DriverError, ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy};
pub use executor::{JobError, JobExecutor, JobRequest, JobResult, SubprocessExecutor};
