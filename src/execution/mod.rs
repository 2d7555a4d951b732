//! Pipeline execution engine

pub mod engine;
pub mod runner;
pub mod scheduler;

pub use engine::{DriverError, EventHandler, ExecutionEngine, ExecutionEvent, RunReport, StepReport};
pub use runner::{StepOutcome, StepRunner};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
