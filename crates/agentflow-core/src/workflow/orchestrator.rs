//! Orchestrator: runs a `WorkflowGraph` from schedule to result.
//!
//! # Execution flow
//!
//! 1. Resolve (or create) the session and seed the context state from it.
//! 2. Build the unit schedule (single steps and whole parallel groups).
//! 3. Run units in order. Before each unit after the first, check the
//!    workflow timeout and fold in any race-mode stragglers that settled.
//! 4. A required step failure (or a timeout, when configured) stops the
//!    loop; steps that never ran are recorded as skipped.
//! 5. Await every straggler, compensate completed steps if needed, write
//!    completed state back to the session, and publish the terminal event.
//!
//! The coordinating future owns the `WorkflowContext`. Parallel members run
//! on a `JoinSet` and hand their outcomes back; only the coordinator records
//! them.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agentflow_types::config::{EngineConfig, ExecutionConfig, RetryConfig};
use agentflow_types::event::{WorkflowEvent, WorkflowRunSummary};
use agentflow_types::workflow::{
    ParallelGroup, StepResult, StepStatus, TaskPayload, WorkflowStatus, WorkflowStep,
};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use super::context::WorkflowContext;
use super::dag::{ScheduledUnit, build_schedule};
use super::dispatch::{DispatchError, StepDispatcher};
use super::graph::{GraphError, WorkflowGraph};
use super::retry::RetryOutcome;
use super::rollback;
use crate::event::EventBus;
use crate::resilience::BreakerRegistry;
use crate::session::SessionStore;
use crate::transport::BoxTransport;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an execution did not complete.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step '{step_id}' cannot run: dependency '{dependency}' did not complete")]
    DependencyNotMet { step_id: String, dependency: String },

    #[error("step '{step_id}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        #[source]
        source: DispatchError,
    },

    #[error("workflow timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    WorkflowTimeout { elapsed_ms: u64, limit_ms: u64 },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("task in '{unit}' did not finish: {message}")]
    TaskJoin { unit: String, message: String },
}

/// A failed execution: the triggering error plus the fully populated result
/// (after rollback, if any).
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    #[source]
    pub error: ExecutorError,
    pub result: Box<WorkflowExecutionResult>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of one `Orchestrator::execute` call.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecutionResult {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub context: WorkflowContext,
    /// Step results in graph order.
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Steps whose compensation was dispatched, in dispatch order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rolled_back: Vec<String>,
}

impl WorkflowExecutionResult {
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn summary(&self) -> WorkflowRunSummary {
        WorkflowRunSummary {
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            steps: self.steps.clone(),
            duration_ms: self.duration_ms,
            error: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Async callback awaited after a step settles.
pub type StepHook = Arc<dyn Fn(StepResult) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-execution options.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Session to seed state from and write results back to.
    pub session_id: Option<String>,
    /// Extra state, layered over the session state.
    pub initial_state: TaskPayload,
    /// Overrides the graph's and the engine's workflow timeout.
    pub timeout: Option<Duration>,
    /// Treat every step as optional for this execution.
    pub continue_on_error: bool,
    pub on_step_complete: Option<StepHook>,
    pub on_step_error: Option<StepHook>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_state(mut self, state: TaskPayload) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_step_complete_hook<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StepResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_step_complete = Some(Arc::new(move |result| hook(result).boxed()));
        self
    }

    pub fn with_step_error_hook<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StepResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_step_error = Some(Arc::new(move |result| hook(result).boxed()));
        self
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("session_id", &self.session_id)
            .field("initial_state", &self.initial_state)
            .field("timeout", &self.timeout)
            .field("continue_on_error", &self.continue_on_error)
            .field("on_step_complete", &self.on_step_complete.is_some())
            .field("on_step_error", &self.on_step_error.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

type MemberOutput = (String, RetryOutcome<Value, DispatchError>);

/// State of one execution, owned by the coordinating future.
struct Run<'a> {
    graph: &'a WorkflowGraph,
    options: &'a ExecuteOptions,
    ctx: WorkflowContext,
    /// Race-mode members still running after their group resolved.
    stragglers: Vec<(String, JoinSet<MemberOutput>)>,
}

/// Executes workflow graphs against a transport.
pub struct Orchestrator {
    transport: Arc<BoxTransport>,
    breakers: Arc<BreakerRegistry>,
    dispatcher: Arc<StepDispatcher>,
    events: EventBus,
    sessions: Option<Arc<dyn SessionStore>>,
    config: ExecutionConfig,
    retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(transport: BoxTransport, config: &EngineConfig) -> Self {
        let transport = Arc::new(transport);
        let breakers = Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()));
        let dispatcher = Arc::new(StepDispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&breakers),
            config.retry.clone(),
            config.engine.default_step_timeout(),
        ));
        Self {
            transport,
            breakers,
            dispatcher,
            events: EventBus::new(config.engine.event_capacity),
            sessions: None,
            config: config.engine.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Publish lifecycle events on an existing bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Share circuit breakers with other orchestrators.
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.dispatcher = Arc::new(StepDispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&breakers),
            self.retry.clone(),
            self.config.default_step_timeout(),
        ));
        self.breakers = breakers;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run `graph` to completion or rollback.
    ///
    /// On `failed`/`rolled_back` the error is returned only after the result
    /// has been fully populated; it travels inside `ExecutionFailure`.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        options: ExecuteOptions,
    ) -> Result<WorkflowExecutionResult, ExecutionFailure> {
        let clock = Instant::now();
        let session_id = self.open_session(graph, &options);
        let mut state = self.session_state(&session_id);
        state.extend(options.initial_state.clone());

        let mut run = Run {
            graph,
            options: &options,
            ctx: WorkflowContext::new(session_id.clone(), state),
            stragglers: Vec::new(),
        };
        let workflow_id = run.ctx.workflow_id;

        tracing::info!(
            workflow_id = %workflow_id,
            workflow = graph.name(),
            session_id = session_id.as_str(),
            steps = graph.steps().len(),
            transport = self.transport.name(),
            "workflow started"
        );
        self.events.publish(WorkflowEvent::Started {
            workflow_id,
            workflow_name: graph.name().to_string(),
            session_id,
        });

        let limit = options
            .timeout
            .or(graph.timeout())
            .unwrap_or(self.config.workflow_timeout());

        let mut failure: Option<ExecutorError> = None;
        let mut needs_rollback = false;

        match build_schedule(graph) {
            Err(err) => failure = Some(err.into()),
            Ok(schedule) => {
                for (index, unit) in schedule.iter().enumerate() {
                    self.collect_stragglers(&mut run, false).await;

                    let elapsed = clock.elapsed();
                    if index > 0 && elapsed > limit {
                        tracing::warn!(
                            workflow_id = %workflow_id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            limit_ms = limit.as_millis() as u64,
                            next = unit.id(),
                            "workflow timeout reached"
                        );
                        failure = Some(ExecutorError::WorkflowTimeout {
                            elapsed_ms: elapsed.as_millis() as u64,
                            limit_ms: limit.as_millis() as u64,
                        });
                        needs_rollback = self.config.rollback_on_timeout;
                        break;
                    }

                    tracing::debug!(workflow_id = %workflow_id, unit = unit.id(), "running unit");
                    let outcome = match unit {
                        ScheduledUnit::Step(step) => self.run_step(&mut run, step).await,
                        ScheduledUnit::Group(group) => self.run_group(&mut run, group).await,
                    };
                    if let Err(err) = outcome {
                        failure = Some(err);
                        needs_rollback = true;
                        break;
                    }
                }
            }
        }

        // Stragglers settle before rollback so their completions are compensated too.
        self.collect_stragglers(&mut run, true).await;
        self.close_unfinished(&mut run);

        let rolled_back = if needs_rollback {
            rollback::compensate(graph, &run.ctx, &self.dispatcher).await
        } else {
            Vec::new()
        };

        let status = match (&failure, rolled_back.is_empty()) {
            (None, _) => WorkflowStatus::Completed,
            (Some(_), false) => WorkflowStatus::RolledBack,
            (Some(_), true) => WorkflowStatus::Failed,
        };

        self.write_back_session(&run.ctx);

        let ctx = run.ctx;
        let steps: Vec<StepResult> = graph
            .steps()
            .iter()
            .filter_map(|s| ctx.result(&s.id).cloned())
            .collect();
        let result = WorkflowExecutionResult {
            workflow_id,
            workflow_name: graph.name().to_string(),
            status,
            steps,
            started_at: ctx.started_at,
            ended_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            error: failure.as_ref().map(ToString::to_string),
            rolled_back,
            context: ctx,
        };

        let summary = result.summary();
        match status {
            WorkflowStatus::Completed => {
                tracing::info!(
                    workflow_id = %workflow_id,
                    duration_ms = result.duration_ms,
                    completed = summary.steps_completed(),
                    "workflow completed"
                );
                self.events.publish(WorkflowEvent::Completed { summary });
            }
            WorkflowStatus::Failed => {
                tracing::warn!(workflow_id = %workflow_id, error = ?result.error, "workflow failed");
                self.events.publish(WorkflowEvent::Failed { summary });
            }
            WorkflowStatus::RolledBack => {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    error = ?result.error,
                    rolled_back = result.rolled_back.len(),
                    "workflow rolled back"
                );
                self.events.publish(WorkflowEvent::RolledBack {
                    summary,
                    rolled_back: result.rolled_back.clone(),
                });
            }
        }

        match failure {
            None => Ok(result),
            Some(error) => Err(ExecutionFailure {
                error,
                result: Box::new(result),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Single steps
    // -----------------------------------------------------------------------

    async fn run_step(&self, run: &mut Run<'_>, step: &WorkflowStep) -> Result<(), ExecutorError> {
        let tolerate = step.optional || run.options.continue_on_error;

        if has_running_dependency(&run.ctx, step) {
            self.collect_stragglers(run, true).await;
        }
        if let Some(dependency) = run.ctx.unmet_dependency(step) {
            return self.fail_unmet(run, &step.id, dependency, tolerate).await;
        }

        let payload = run.ctx.build_step_task(step);
        self.start_step(run, &step.id);
        let outcome = self.dispatcher.dispatch_step(step, payload).await;
        self.settle(run, &step.id, outcome, tolerate).await
    }

    fn start_step(&self, run: &mut Run<'_>, step_id: &str) {
        let result = StepResult::running(step_id);
        run.ctx.record(result.clone());
        tracing::debug!(workflow_id = %run.ctx.workflow_id, step_id, "step started");
        self.events.publish(WorkflowEvent::StepStarted {
            workflow_id: run.ctx.workflow_id,
            result,
        });
    }

    /// Record a dispatch outcome, await the matching hook, and publish.
    async fn settle(
        &self,
        run: &mut Run<'_>,
        step_id: &str,
        outcome: RetryOutcome<Value, DispatchError>,
        tolerate: bool,
    ) -> Result<(), ExecutorError> {
        let options = run.options;
        let workflow_id = run.ctx.workflow_id;
        let base = run
            .ctx
            .result(step_id)
            .cloned()
            .unwrap_or_else(|| StepResult::running(step_id));

        match outcome.result {
            Ok(data) => {
                let result = base.complete(data, outcome.attempts);
                run.ctx.record(result.clone());
                tracing::debug!(
                    workflow_id = %workflow_id,
                    step_id,
                    attempts = outcome.attempts,
                    duration_ms = result.duration_ms(),
                    "step completed"
                );
                if let Some(hook) = &options.on_step_complete {
                    hook(result.clone()).await;
                }
                self.events.publish(WorkflowEvent::StepCompleted { workflow_id, result });
                Ok(())
            }
            Err(source) => {
                let result = base.fail(source.to_string(), outcome.attempts);
                run.ctx.record(result.clone());
                tracing::warn!(
                    workflow_id = %workflow_id,
                    step_id,
                    attempts = outcome.attempts,
                    tolerated = tolerate,
                    error = %source,
                    "step failed"
                );
                if let Some(hook) = &options.on_step_error {
                    hook(result.clone()).await;
                }
                self.events.publish(WorkflowEvent::StepFailed { workflow_id, result });
                if tolerate {
                    Ok(())
                } else {
                    Err(ExecutorError::StepFailed {
                        step_id: step_id.to_string(),
                        attempts: outcome.attempts,
                        source,
                    })
                }
            }
        }
    }

    async fn fail_unmet(
        &self,
        run: &mut Run<'_>,
        step_id: &str,
        dependency: &str,
        tolerate: bool,
    ) -> Result<(), ExecutorError> {
        let err = ExecutorError::DependencyNotMet {
            step_id: step_id.to_string(),
            dependency: dependency.to_string(),
        };
        let result = StepResult::running(step_id).fail(err.to_string(), 0);
        run.ctx.record(result.clone());
        tracing::warn!(workflow_id = %run.ctx.workflow_id, step_id, dependency, tolerated = tolerate, "dependency not met");

        if let Some(hook) = &run.options.on_step_error {
            hook(result.clone()).await;
        }
        self.events.publish(WorkflowEvent::StepFailed {
            workflow_id: run.ctx.workflow_id,
            result,
        });

        if tolerate { Ok(()) } else { Err(err) }
    }

    // -----------------------------------------------------------------------
    // Parallel groups
    // -----------------------------------------------------------------------

    async fn run_group(&self, run: &mut Run<'_>, group: &ParallelGroup) -> Result<(), ExecutorError> {
        let graph = run.graph;
        let members: Vec<&WorkflowStep> = group.step_ids.iter().filter_map(|id| graph.step(id)).collect();
        let tolerate_all = group.continue_on_error || run.options.continue_on_error;
        let tolerated: HashSet<&str> = members
            .iter()
            .filter(|s| tolerate_all || s.optional)
            .map(|s| s.id.as_str())
            .collect();

        if members.iter().any(|s| has_running_dependency(&run.ctx, s)) {
            self.collect_stragglers(run, true).await;
        }

        tracing::info!(
            workflow_id = %run.ctx.workflow_id,
            group_id = group.id.as_str(),
            members = members.len(),
            wait_for_all = group.wait_for_all,
            "dispatching parallel group"
        );
        self.events.publish(WorkflowEvent::ParallelStarted {
            workflow_id: run.ctx.workflow_id,
            group_id: group.id.clone(),
            step_ids: group.step_ids.clone(),
        });

        // Dependencies are checked for every member before anything is dispatched.
        let mut ready = Vec::with_capacity(members.len());
        for step in &members {
            match run.ctx.unmet_dependency(step) {
                None => ready.push(*step),
                Some(dependency) => {
                    let tolerate = tolerated.contains(step.id.as_str());
                    if let Err(err) = self.fail_unmet(run, &step.id, dependency, tolerate).await {
                        self.skip_unstarted(run, group);
                        self.publish_group_completed(run, group);
                        return Err(err);
                    }
                }
            }
        }

        let mut tasks = JoinSet::new();
        for step in ready {
            let payload = run.ctx.build_step_task(step);
            self.start_step(run, &step.id);
            let dispatcher = Arc::clone(&self.dispatcher);
            let step = step.clone();
            tasks.spawn(async move {
                let outcome = dispatcher.dispatch_step(&step, payload).await;
                (step.id, outcome)
            });
        }

        let outcome = if group.wait_for_all {
            self.join_all(run, group, tasks, &tolerated, tolerate_all).await
        } else {
            self.join_first(run, group, tasks, &tolerated, tolerate_all).await
        };

        self.publish_group_completed(run, group);
        outcome
    }

    async fn join_all(
        &self,
        run: &mut Run<'_>,
        group: &ParallelGroup,
        mut tasks: JoinSet<MemberOutput>,
        tolerated: &HashSet<&str>,
        tolerate_all: bool,
    ) -> Result<(), ExecutorError> {
        let mut failure = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((step_id, outcome)) => {
                    let tolerate = tolerated.contains(step_id.as_str());
                    if let Err(err) = self.settle(run, &step_id, outcome, tolerate).await {
                        failure = Some(err);
                        break;
                    }
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    tracing::warn!(group_id = group.id.as_str(), error = %err, "parallel member task failed");
                    if !tolerate_all {
                        failure = Some(ExecutorError::TaskJoin {
                            unit: group.id.clone(),
                            message: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        let aborted = failure.is_some() && !tasks.is_empty();
        if aborted {
            tracing::debug!(group_id = group.id.as_str(), remaining = tasks.len(), "aborting parallel group");
            tasks.abort_all();
            // Members that finished before the abort landed are still recorded.
            while let Some(joined) = tasks.join_next().await {
                if let Ok((step_id, outcome)) = joined {
                    let _ = self.settle(run, &step_id, outcome, true).await;
                }
            }
        }

        let workflow_id = run.ctx.workflow_id;
        for step_id in &group.step_ids {
            if run.ctx.status(step_id) == Some(StepStatus::Running) {
                let result = if aborted {
                    StepResult::skipped(step_id.as_str(), format!("aborted: parallel group '{}' failed", group.id))
                } else {
                    StepResult::running(step_id.as_str()).fail("task did not finish", 0)
                };
                run.ctx.record(result.clone());
                if result.status == StepStatus::Failed {
                    self.events.publish(WorkflowEvent::StepFailed { workflow_id, result });
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Race mode: settle the first member, leave the rest running as
    /// stragglers owned by this execution.
    async fn join_first(
        &self,
        run: &mut Run<'_>,
        group: &ParallelGroup,
        mut tasks: JoinSet<MemberOutput>,
        tolerated: &HashSet<&str>,
        tolerate_all: bool,
    ) -> Result<(), ExecutorError> {
        let mut failure = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((step_id, outcome)) => {
                    let tolerate = tolerated.contains(step_id.as_str());
                    failure = self.settle(run, &step_id, outcome, tolerate).await.err();
                    break;
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    tracing::warn!(group_id = group.id.as_str(), error = %err, "parallel member task failed");
                    if !tolerate_all {
                        failure = Some(ExecutorError::TaskJoin {
                            unit: group.id.clone(),
                            message: err.to_string(),
                        });
                    }
                    break;
                }
            }
        }

        if !tasks.is_empty() {
            tracing::debug!(
                group_id = group.id.as_str(),
                stragglers = tasks.len(),
                "race group resolved with members still running"
            );
            run.stragglers.push((group.id.clone(), tasks));
        }

        failure.map_or(Ok(()), Err)
    }

    /// Fold settled stragglers into the context. With `wait`, block until
    /// every straggler has settled.
    async fn collect_stragglers(&self, run: &mut Run<'_>, wait: bool) {
        if run.stragglers.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut run.stragglers);

        for (group_id, tasks) in pending.iter_mut() {
            loop {
                let joined = if wait {
                    tasks.join_next().await
                } else {
                    match tasks.join_next().now_or_never() {
                        Some(joined) => joined,
                        None => break,
                    }
                };
                match joined {
                    None => break,
                    Some(Ok((step_id, outcome))) => {
                        // The group already resolved; a late failure is only recorded.
                        let _ = self.settle(run, &step_id, outcome, true).await;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(group_id = group_id.as_str(), error = %err, "straggler task failed");
                    }
                }
            }
        }

        pending.retain(|(_, tasks)| !tasks.is_empty());
        run.stragglers = pending;
    }

    fn skip_unstarted(&self, run: &mut Run<'_>, group: &ParallelGroup) {
        for step_id in &group.step_ids {
            if run.ctx.status(step_id).is_none() {
                run.ctx.record(StepResult::skipped(
                    step_id.as_str(),
                    format!("aborted: parallel group '{}' failed", group.id),
                ));
            }
        }
    }

    fn publish_group_completed(&self, run: &Run<'_>, group: &ParallelGroup) {
        let results: Vec<StepResult> = group
            .step_ids
            .iter()
            .filter_map(|id| run.ctx.result(id).cloned())
            .collect();
        tracing::debug!(
            group_id = group.id.as_str(),
            completed = results.iter().filter(|r| r.is_completed()).count(),
            "parallel group resolved"
        );
        self.events.publish(WorkflowEvent::ParallelCompleted {
            workflow_id: run.ctx.workflow_id,
            group_id: group.id.clone(),
            results,
        });
    }

    // -----------------------------------------------------------------------
    // Finalization and sessions
    // -----------------------------------------------------------------------

    /// Steps that never ran are skipped; steps whose task vanished failed.
    fn close_unfinished(&self, run: &mut Run<'_>) {
        for step in run.graph.steps() {
            match run.ctx.status(&step.id) {
                None => run
                    .ctx
                    .record(StepResult::skipped(step.id.as_str(), "not executed")),
                Some(StepStatus::Running | StepStatus::Pending) => run
                    .ctx
                    .record(StepResult::running(step.id.as_str()).fail("task did not finish", 0)),
                Some(_) => {}
            }
        }
    }

    fn open_session(&self, graph: &WorkflowGraph, options: &ExecuteOptions) -> String {
        let mut metadata = Map::new();
        metadata.insert("workflow".to_string(), json!(graph.name()));

        match (&self.sessions, &options.session_id) {
            (Some(store), Some(id)) => store.create_session_with_id(id, metadata),
            (Some(store), None) => store.create_session(metadata),
            (None, Some(id)) => id.clone(),
            (None, None) => Uuid::now_v7().to_string(),
        }
    }

    fn session_state(&self, session_id: &str) -> TaskPayload {
        self.sessions
            .as_ref()
            .and_then(|store| store.get_session(session_id))
            .map(|session| session.state)
            .unwrap_or_default()
    }

    fn write_back_session(&self, ctx: &WorkflowContext) {
        let Some(store) = &self.sessions else {
            return;
        };
        for step_id in ctx.completion_order() {
            let Some(value) = ctx.state.get(step_id) else {
                continue;
            };
            if let Err(err) = store.set(&ctx.session_id, step_id, value.clone()) {
                tracing::warn!(session_id = ctx.session_id.as_str(), error = %err, "session write-back failed");
                return;
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("transport", &self.transport.name())
            .field("breakers", &self.breakers.len())
            .field("sessions", &self.sessions.is_some())
            .field("config", &self.config)
            .finish()
    }
}

fn has_running_dependency(ctx: &WorkflowContext, step: &WorkflowStep) -> bool {
    step.depends_on
        .iter()
        .any(|dep| ctx.status(dep) == Some(StepStatus::Running))
}
