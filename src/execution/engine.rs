//! Main execution engine - submits runs and drives them to completion

use crate::{
    artifact::ArtifactStore,
    core::{
        condition::{Branch, ConditionalStep},
        error::BindingError,
        parameter::ParameterValue,
        pipeline::PipelineGraph,
        run::Run,
        settings::EngineSettings,
        state::{FailureCause, RunStatus, StepCounts, StepState},
        step::{Step, StepKind},
    },
    execution::{
        runner::{StepOutcome, StepRunner},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
    executor::{JobExecutor, JobRequest},
    persistence::{PersistenceBackend, RunSummary},
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
    },
    StepStarted {
        run_id: Uuid,
        step: String,
    },
    StepSucceeded {
        run_id: Uuid,
        step: String,
    },
    StepFailed {
        run_id: Uuid,
        step: String,
        error: String,
        cause: FailureCause,
    },
    StepSkipped {
        run_id: Uuid,
        step: String,
        reason: String,
    },
    StepCancelled {
        run_id: Uuid,
        step: String,
    },
    ConditionEvaluated {
        run_id: Uuid,
        step: String,
        branch: Branch,
        activated: Vec<String>,
        skipped: Vec<String>,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Errors reported by the driver API
#[derive(Debug, Error, PartialEq)]
pub enum DriverError {
    #[error("unknown run '{0}'")]
    UnknownRun(Uuid),

    #[error("no pipeline named '{0}' has been deployed")]
    UnknownPipeline(String),

    #[error("run '{0}' has already been started")]
    AlreadyRunning(Uuid),

    #[error("run '{0}' has not finished")]
    NotFinished(Uuid),

    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// State of one step as reported by [`ExecutionEngine::status`]
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub state: StepState,
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub parameters: BTreeMap<String, ParameterValue>,
    /// Steps in topological order
    pub steps: Vec<StepReport>,
    pub counts: StepCounts,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn step(&self, name: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.state)
    }
}

/// Everything the engine keeps for one submitted run
struct RunHandle {
    graph: Arc<PipelineGraph>,
    run: RwLock<Run>,
    cancel: CancellationToken,
    status: watch::Sender<RunStatus>,
}

/// Pipeline execution engine.
///
/// Cheap to clone; clones share deployed pipelines, runs and handlers.
#[derive(Clone)]
pub struct ExecutionEngine {
    scheduler: ExecutionScheduler,
    runner: StepRunner,
    pipelines: Arc<RwLock<HashMap<String, Arc<PipelineGraph>>>>,
    runs: Arc<RwLock<HashMap<Uuid, Arc<RunHandle>>>>,
    event_handlers: Arc<RwLock<Vec<EventHandler>>>,
    persistence: Option<Arc<dyn PersistenceBackend>>,
    /// Finished runs still held in `runs`, oldest first
    finished: Arc<Mutex<VecDeque<Uuid>>>,
    retention: Option<usize>,
}

impl ExecutionEngine {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
        strategy: SchedulingStrategy,
    ) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            runner: StepRunner::new(executor, artifacts),
            pipelines: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
            event_handlers: Arc::new(RwLock::new(Vec::new())),
            persistence: None,
            finished: Arc::new(Mutex::new(VecDeque::new())),
            retention: None,
        }
    }

    /// Engine configured from settings (strategy and default step timeout)
    pub fn from_settings(
        settings: &EngineSettings,
        executor: Arc<dyn JobExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self::new(executor, artifacts, settings.scheduling_strategy())
            .with_step_timeout(settings.step_timeout_secs)
    }

    /// Replace the scheduling strategy
    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.scheduler = ExecutionScheduler::new(strategy);
        self
    }

    /// Keep at most `max_finished` finished runs (at least one); older ones
    /// are forgotten as new runs finish. Unbounded by default.
    pub fn with_retention(mut self, max_finished: usize) -> Self {
        self.retention = Some(max_finished.max(1));
        self
    }

    /// Default timeout for steps that do not set their own
    pub fn with_step_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.runner = self.runner.with_timeout(timeout_secs);
        self
    }

    /// Archive finished runs to `backend`
    pub fn with_persistence(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.persistence = Some(backend);
        self
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.write().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.read().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    async fn emit_events(&self, events: Vec<ExecutionEvent>) {
        for event in events {
            self.emit_event(event).await;
        }
    }

    /// Deploy a pipeline under its name, replacing any previous definition
    pub async fn upsert_pipeline(&self, graph: PipelineGraph) -> Arc<PipelineGraph> {
        let graph = Arc::new(graph);
        let replaced = self
            .pipelines
            .write()
            .await
            .insert(graph.name().to_string(), graph.clone());

        if replaced.is_some() {
            info!(pipeline = %graph.name(), "Pipeline definition replaced");
        } else {
            info!(pipeline = %graph.name(), "Pipeline deployed");
        }
        graph
    }

    /// Currently deployed definition of a pipeline
    pub async fn pipeline(&self, name: &str) -> Option<Arc<PipelineGraph>> {
        self.pipelines.read().await.get(name).cloned()
    }

    /// Create a pending run of `graph` with the given parameter bindings
    pub async fn submit(
        &self,
        graph: Arc<PipelineGraph>,
        bindings: impl IntoIterator<Item = (String, ParameterValue)>,
    ) -> Result<Uuid, DriverError> {
        let mut run = graph.new_run();
        for (name, value) in bindings {
            graph.parameters().bind(&mut run, &name, value)?;
        }

        let run_id = run.run_id;
        let (status, _) = watch::channel(RunStatus::Pending);
        let handle = Arc::new(RunHandle {
            graph,
            run: RwLock::new(run),
            cancel: CancellationToken::new(),
            status,
        });

        debug!(run_id = %run_id, pipeline = %handle.graph.name(), "Run submitted");
        self.runs.write().await.insert(run_id, handle);
        Ok(run_id)
    }

    /// Submit a run of a deployed pipeline
    pub async fn submit_named(
        &self,
        name: &str,
        bindings: impl IntoIterator<Item = (String, ParameterValue)>,
    ) -> Result<Uuid, DriverError> {
        let graph = self
            .pipeline(name)
            .await
            .ok_or_else(|| DriverError::UnknownPipeline(name.to_string()))?;
        self.submit(graph, bindings).await
    }

    async fn handle(&self, run_id: Uuid) -> Result<Arc<RunHandle>, DriverError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(DriverError::UnknownRun(run_id))
    }

    /// Start driving a pending run in the background
    pub async fn start(&self, run_id: Uuid) -> Result<(), DriverError> {
        let handle = self.handle(run_id).await?;
        let pipeline_name = {
            let mut run = handle.run.write().await;
            if run.status != RunStatus::Pending {
                return Err(DriverError::AlreadyRunning(run_id));
            }
            run.start();
            run.pipeline_name.clone()
        };

        info!(
            run_id = %run_id,
            pipeline = %pipeline_name,
            strategy = ?self.scheduler.strategy(),
            "Starting run"
        );
        handle.status.send_replace(RunStatus::Running);
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
        })
        .await;

        let engine = self.clone();
        tokio::spawn(async move { engine.drive(handle).await });
        Ok(())
    }

    /// Current status of a run and every step
    pub async fn status(&self, run_id: Uuid) -> Result<RunReport, DriverError> {
        let handle = self.handle(run_id).await?;
        let run = handle.run.read().await;

        let steps = handle
            .graph
            .topological_order()
            .iter()
            .filter_map(|name| {
                run.state(name).map(|state| StepReport {
                    name: name.clone(),
                    state: state.clone(),
                })
            })
            .collect();

        Ok(RunReport {
            run_id,
            pipeline_name: run.pipeline_name.clone(),
            status: run.status,
            parameters: run.parameters.clone(),
            steps,
            counts: run.counts(),
            created_at: run.created_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
        })
    }

    /// Copy of the run's current state
    pub async fn snapshot(&self, run_id: Uuid) -> Result<Run, DriverError> {
        let handle = self.handle(run_id).await?;
        let run = handle.run.read().await.clone();
        Ok(run)
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait(&self, run_id: Uuid) -> Result<RunStatus, DriverError> {
        let handle = self.handle(run_id).await?;
        let mut status = handle.status.subscribe();
        let terminal = status.wait_for(RunStatus::is_terminal).await.map(|s| *s).ok();
        match terminal {
            Some(terminal) => Ok(terminal),
            None => Ok(handle.run.read().await.status),
        }
    }

    /// Submit, start and wait for a run, returning its final report
    pub async fn execute(
        &self,
        graph: Arc<PipelineGraph>,
        bindings: impl IntoIterator<Item = (String, ParameterValue)>,
    ) -> Result<RunReport, DriverError> {
        let run_id = self.submit(graph, bindings).await?;
        self.start(run_id).await?;
        self.wait(run_id).await?;
        self.status(run_id).await
    }

    /// Abort a run.
    ///
    /// A pending run is cancelled on the spot; a running one is stopped by
    /// its drive loop. Cancelling a finished run does nothing.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), DriverError> {
        let handle = self.handle(run_id).await?;
        let mut run = handle.run.write().await;
        let status = run.status;

        match status {
            RunStatus::Pending => {
                info!(run_id = %run_id, "Cancelling run before start");
                handle.cancel.cancel();
                let events = cancel_open_steps(&handle.graph, &mut run);
                // Terminal before the lock is released so `start` cannot win
                run.finish(RunStatus::Cancelled);
                drop(run);
                self.emit_events(events).await;
                self.finish(&handle, RunStatus::Cancelled).await;
            }
            RunStatus::Running => {
                info!(run_id = %run_id, "Cancellation requested");
                handle.cancel.cancel();
            }
            _ => {
                debug!(run_id = %run_id, ?status, "Run already finished, nothing to cancel");
            }
        }

        Ok(())
    }

    /// Drop a finished run from the engine.
    ///
    /// Its archived summary, if any, stays in the persistence backend.
    pub async fn forget(&self, run_id: Uuid) -> Result<(), DriverError> {
        let mut runs = self.runs.write().await;
        let handle = runs.get(&run_id).ok_or(DriverError::UnknownRun(run_id))?;
        if !handle.status.borrow().is_terminal() {
            return Err(DriverError::NotFinished(run_id));
        }
        runs.remove(&run_id);
        drop(runs);

        self.finished.lock().await.retain(|id| *id != run_id);
        debug!(run_id = %run_id, "Run forgotten");
        Ok(())
    }

    /// Drive a started run until every step is terminal or it is cancelled
    async fn drive(&self, handle: Arc<RunHandle>) {
        let mut tasks: JoinSet<(String, StepOutcome)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if handle.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let (events, dispatch) = self.advance(&handle).await;
            self.emit_events(events).await;

            for (step, request) in dispatch {
                let runner = self.runner.clone();
                tasks.spawn(async move {
                    let outcome = AssertUnwindSafe(runner.run(&step, request))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| StepOutcome::Failed {
                            error: "executor panicked".to_string(),
                            cause: FailureCause::Execution,
                        });
                    (step.name, outcome)
                });
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((step, outcome)) => {
                        if let Some(event) = self.record(&handle, &step, outcome).await {
                            self.emit_event(event).await;
                        }
                    }
                    Err(e) => error!("Step task failed to join: {}", e),
                },
            }
        }

        if cancelled {
            tasks.shutdown().await;
            let events = {
                let mut run = handle.run.write().await;
                cancel_open_steps(&handle.graph, &mut run)
            };
            self.emit_events(events).await;
            self.finish(&handle, RunStatus::Cancelled).await;
            return;
        }

        let status = {
            let run = handle.run.read().await;
            match run.derived_status() {
                status if status.is_terminal() => status,
                status => {
                    error!(
                        run_id = %run.run_id,
                        ?status,
                        "No steps runnable and none running - run stuck"
                    );
                    RunStatus::Failed
                }
            }
        };
        self.finish(&handle, status).await;
    }

    /// Apply cascades, evaluate ready conditionals and mark ready jobs running.
    ///
    /// Repeats until a pass changes nothing; returns the events produced and
    /// the jobs to dispatch.
    async fn advance(&self, handle: &RunHandle) -> (Vec<ExecutionEvent>, Vec<(Step, JobRequest)>) {
        let graph = &handle.graph;
        let mut run = handle.run.write().await;
        let mut events = Vec::new();
        let mut dispatch = Vec::new();

        loop {
            let mut progressed = propagate(graph, &mut run, &mut events);

            for name in self.scheduler.next_steps(graph, &run) {
                let Some(step) = graph.step(&name) else {
                    continue;
                };
                if !matches!(run.state(&name), Some(StepState::Pending)) {
                    continue;
                }
                progressed = true;

                match &step.kind {
                    StepKind::Conditional(conditional) => {
                        evaluate_condition(step, conditional, &mut run, &mut events)
                    }
                    StepKind::DataJob(_) => {
                        if let Some(request) = prepare_job(step, &mut run, &mut events) {
                            dispatch.push((step.clone(), request));
                        }
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        (events, dispatch)
    }

    /// Record a finished job
    async fn record(
        &self,
        handle: &RunHandle,
        step: &str,
        outcome: StepOutcome,
    ) -> Option<ExecutionEvent> {
        let mut run = handle.run.write().await;
        let run_id = run.run_id;
        let started_at = match run.state(step) {
            Some(StepState::Running { started_at }) => *started_at,
            _ => Utc::now(),
        };

        match outcome {
            StepOutcome::Succeeded {
                outputs,
                properties,
                property_files,
            } => {
                let state = StepState::Succeeded {
                    outputs,
                    properties,
                    property_files,
                    decision: None,
                    started_at,
                    completed_at: Utc::now(),
                };
                apply(&mut run, step, state).then(|| {
                    info!(run_id = %run_id, step = %step, "Step succeeded");
                    ExecutionEvent::StepSucceeded {
                        run_id,
                        step: step.to_string(),
                    }
                })
            }
            StepOutcome::Failed { error, cause } => {
                let state = StepState::Failed {
                    error: error.clone(),
                    cause: cause.clone(),
                    failed_at: Utc::now(),
                };
                apply(&mut run, step, state).then(|| {
                    warn!(run_id = %run_id, step = %step, "Step failed: {}", error);
                    ExecutionEvent::StepFailed {
                        run_id,
                        step: step.to_string(),
                        error,
                        cause,
                    }
                })
            }
        }
    }

    /// Mark the run terminal, archive it and wake waiters
    async fn finish(&self, handle: &RunHandle, status: RunStatus) {
        let summary = {
            let mut run = handle.run.write().await;
            if !run.status.is_terminal() {
                run.finish(status);
            }
            RunSummary::from_run(&run)
        };

        info!(
            run_id = %summary.run_id,
            pipeline = %summary.pipeline_name,
            "Run finished: {:?} ({} succeeded, {} failed, {} skipped, {} cancelled)",
            status,
            summary.succeeded_steps,
            summary.failed_steps,
            summary.skipped_steps,
            summary.cancelled_steps
        );

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_run(&summary).await {
                warn!(run_id = %summary.run_id, "Failed to archive run: {:#}", e);
            }
        }

        self.emit_event(ExecutionEvent::RunCompleted {
            run_id: summary.run_id,
            status,
        })
        .await;
        self.retire(summary.run_id).await;
        handle.status.send_replace(status);
    }

    /// Forget the oldest finished runs beyond the retention bound
    async fn retire(&self, run_id: Uuid) {
        let Some(limit) = self.retention else {
            return;
        };

        let evicted: Vec<Uuid> = {
            let mut finished = self.finished.lock().await;
            finished.push_back(run_id);
            let excess = finished.len().saturating_sub(limit);
            finished.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }

        let mut runs = self.runs.write().await;
        for id in &evicted {
            runs.remove(id);
        }
        debug!(evicted = evicted.len(), "Evicted finished runs");
    }
}

/// Transition a step, logging instead of failing on an illegal move
fn apply(run: &mut Run, step: &str, state: StepState) -> bool {
    match run.transition(step, state) {
        Ok(()) => true,
        Err(e) => {
            error!(run_id = %run.run_id, "{}", e);
            false
        }
    }
}

/// Fail or skip pending steps whose dependencies cannot succeed.
///
/// A failed or cancelled dependency fails the step; otherwise a skipped
/// dependency skips it.
fn propagate(graph: &PipelineGraph, run: &mut Run, events: &mut Vec<ExecutionEvent>) -> bool {
    let run_id = run.run_id;
    let mut changed = false;

    for name in graph.topological_order() {
        if !matches!(run.state(name), Some(StepState::Pending)) {
            continue;
        }

        let mut failed = None;
        let mut skipped = None;
        for dep in graph.dependencies(name) {
            match run.state(dep) {
                Some(StepState::Failed { .. }) | Some(StepState::Cancelled { .. }) => {
                    failed = Some(dep);
                    break;
                }
                Some(StepState::Skipped { .. }) => {
                    skipped.get_or_insert(dep);
                }
                _ => {}
            }
        }

        let (state, event) = if let Some(dep) = failed {
            let error = format!("upstream step '{}' did not succeed", dep);
            let cause = FailureCause::UpstreamFailed {
                step: dep.to_string(),
            };
            (
                StepState::Failed {
                    error: error.clone(),
                    cause: cause.clone(),
                    failed_at: Utc::now(),
                },
                ExecutionEvent::StepFailed {
                    run_id,
                    step: name.clone(),
                    error,
                    cause,
                },
            )
        } else if let Some(dep) = skipped {
            let reason = format!("upstream step '{}' was skipped", dep);
            (
                StepState::Skipped {
                    reason: reason.clone(),
                },
                ExecutionEvent::StepSkipped {
                    run_id,
                    step: name.clone(),
                    reason,
                },
            )
        } else {
            continue;
        };

        if apply(run, name, state) {
            debug!(run_id = %run_id, step = %name, "Cascaded from upstream");
            events.push(event);
            changed = true;
        }
    }

    changed
}

/// Select a branch and skip the members of the other one
fn evaluate_condition(
    step: &Step,
    conditional: &ConditionalStep,
    run: &mut Run,
    events: &mut Vec<ExecutionEvent>,
) {
    let run_id = run.run_id;

    let decision = match conditional.evaluate(run) {
        Ok(decision) => decision,
        Err(e) => {
            warn!(run_id = %run_id, step = %step.name, "Condition could not be evaluated: {}", e);
            let state = StepState::Failed {
                error: e.to_string(),
                cause: FailureCause::Condition,
                failed_at: Utc::now(),
            };
            if apply(run, &step.name, state) {
                events.push(ExecutionEvent::StepFailed {
                    run_id,
                    step: step.name.clone(),
                    error: e.to_string(),
                    cause: FailureCause::Condition,
                });
            }
            return;
        }
    };

    info!(
        run_id = %run_id,
        step = %step.name,
        branch = %decision.branch,
        "Condition evaluated"
    );

    let now = Utc::now();
    let state = StepState::Succeeded {
        outputs: BTreeMap::new(),
        properties: serde_json::json!({ "branch": decision.branch }),
        property_files: BTreeMap::new(),
        decision: Some(decision.branch),
        started_at: now,
        completed_at: now,
    };
    if !apply(run, &step.name, state) {
        return;
    }

    events.push(ExecutionEvent::ConditionEvaluated {
        run_id,
        step: step.name.clone(),
        branch: decision.branch,
        activated: decision.activated.clone(),
        skipped: decision.skipped.clone(),
    });

    for member in &decision.skipped {
        if !matches!(run.state(member), Some(StepState::Pending)) {
            continue;
        }
        let reason = format!("'{}' selected the {} branch", step.name, decision.branch);
        if apply(run, member, StepState::Skipped { reason: reason.clone() }) {
            events.push(ExecutionEvent::StepSkipped {
                run_id,
                step: member.clone(),
                reason,
            });
        }
    }
}

/// Resolve a job's inputs and mark it running, or fail it
fn prepare_job(step: &Step, run: &mut Run, events: &mut Vec<ExecutionEvent>) -> Option<JobRequest> {
    let run_id = run.run_id;

    let prepared = StepRunner::resolve_inputs(step, run)
        .map_err(|e| (e.to_string(), FailureCause::Resolution))
        .and_then(|inputs| {
            StepRunner::request(run_id, step, inputs).ok_or_else(|| {
                (
                    "step has no executor binding".to_string(),
                    FailureCause::Execution,
                )
            })
        });

    match prepared {
        Ok(request) => {
            let state = StepState::Running {
                started_at: Utc::now(),
            };
            if !apply(run, &step.name, state) {
                return None;
            }
            info!(run_id = %run_id, step = %step.name, "Dispatching step");
            events.push(ExecutionEvent::StepStarted {
                run_id,
                step: step.name.clone(),
            });
            Some(request)
        }
        Err((error, cause)) => {
            warn!(run_id = %run_id, step = %step.name, "Cannot dispatch step: {}", error);
            let state = StepState::Failed {
                error: error.clone(),
                cause: cause.clone(),
                failed_at: Utc::now(),
            };
            if apply(run, &step.name, state) {
                events.push(ExecutionEvent::StepFailed {
                    run_id,
                    step: step.name.clone(),
                    error,
                    cause,
                });
            }
            None
        }
    }
}

/// Move every pending or running step to `Cancelled`
fn cancel_open_steps(graph: &PipelineGraph, run: &mut Run) -> Vec<ExecutionEvent> {
    let run_id = run.run_id;
    let now = Utc::now();
    let mut events = Vec::new();

    for name in graph.topological_order() {
        let open = matches!(
            run.state(name),
            Some(StepState::Pending) | Some(StepState::Running { .. })
        );
        if open && apply(run, name, StepState::Cancelled { cancelled_at: now }) {
            events.push(ExecutionEvent::StepCancelled {
                run_id,
                step: name.clone(),
            });
        }
    }

    events
}
