//! Workflow engine core: graph building, scheduling, dispatch, and rollback.
//!
//! - `graph` -- `WorkflowGraph` builder and structural validation
//! - `dag` -- dependency-first step order and the unit schedule
//! - `definition` -- YAML definition files into graphs
//! - `context` -- per-execution state, results, and task payload merging
//! - `retry` -- exponential backoff retry policy
//! - `dispatch` -- retry, circuit breaker, and timeout around one transport call
//! - `rollback` -- reverse-order compensation of completed steps
//! - `orchestrator` -- unit-by-unit execution with parallel groups

pub mod context;
pub mod dag;
pub mod definition;
pub mod dispatch;
pub mod graph;
pub mod orchestrator;
pub mod retry;
pub mod rollback;

pub use context::WorkflowContext;
pub use dag::{ScheduledUnit, build_schedule, get_step_dependencies, resolve_execution_order};
pub use definition::{DefinitionError, into_graph, load_workflow_file, load_workflow_graph, parse_workflow_yaml};
pub use dispatch::{DispatchError, StepDispatcher};
pub use graph::{
    GraphError, GroupHandle, GroupOptions, ParallelMember, RollbackScope, StepHandle,
    WorkflowGraph, WorkflowGraphBuilder,
};
pub use orchestrator::{
    ExecuteOptions, ExecutionFailure, ExecutorError, Orchestrator, StepHook,
    WorkflowExecutionResult,
};
pub use retry::{RetryOutcome, RetryPolicy};
