//! Execution scheduler - determines which steps to run next

use crate::core::{pipeline::PipelineGraph, run::Run};

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    Sequential,

    /// Execute all ready steps in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

/// Scheduler for determining which steps to run
#[derive(Debug, Clone, Copy)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of steps to dispatch.
    ///
    /// Candidates come from the graph's next batch, in topological order;
    /// the strategy bounds how many may be in flight at once.
    pub fn next_steps(&self, graph: &PipelineGraph, run: &Run) -> Vec<String> {
        let ready = graph.next_batch(run);
        let running = run.counts().running;

        let limit = match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => return ready,
            SchedulingStrategy::LimitedParallel(max) => max.max(1),
        };

        ready
            .into_iter()
            .take(limit.saturating_sub(running))
            .collect()
    }
}
