//! Workflow lifecycle events.
//!
//! `WorkflowEvent` is broadcast by the orchestrator while a workflow runs.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{StepResult, WorkflowStatus};

/// Compact description of a workflow run carried by run-level events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunSummary {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    /// Step results in graph order.
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRunSummary {
    /// Number of steps that completed successfully.
    pub fn steps_completed(&self) -> usize {
        self.steps.iter().filter(|s| s.is_completed()).count()
    }
}

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow execution has started.
    Started {
        workflow_id: Uuid,
        workflow_name: String,
        session_id: String,
    },

    /// A step was dispatched.
    StepStarted { workflow_id: Uuid, result: StepResult },

    /// A step completed successfully.
    StepCompleted { workflow_id: Uuid, result: StepResult },

    /// A step failed terminally (after retries).
    StepFailed { workflow_id: Uuid, result: StepResult },

    /// A parallel group was dispatched.
    ParallelStarted {
        workflow_id: Uuid,
        group_id: String,
        step_ids: Vec<String>,
    },

    /// A parallel group resolved.
    ParallelCompleted {
        workflow_id: Uuid,
        group_id: String,
        results: Vec<StepResult>,
    },

    /// The workflow finished with every required step completed.
    Completed { summary: WorkflowRunSummary },

    /// The workflow failed and no compensation was dispatched.
    Failed { summary: WorkflowRunSummary },

    /// The workflow failed and compensations were dispatched.
    RolledBack {
        summary: WorkflowRunSummary,
        /// Steps whose compensation was dispatched, in dispatch order.
        rolled_back: Vec<String>,
    },
}

impl WorkflowEvent {
    /// The workflow execution this event belongs to.
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::Started { workflow_id, .. }
            | WorkflowEvent::StepStarted { workflow_id, .. }
            | WorkflowEvent::StepCompleted { workflow_id, .. }
            | WorkflowEvent::StepFailed { workflow_id, .. }
            | WorkflowEvent::ParallelStarted { workflow_id, .. }
            | WorkflowEvent::ParallelCompleted { workflow_id, .. } => *workflow_id,

            WorkflowEvent::Completed { summary }
            | WorkflowEvent::Failed { summary }
            | WorkflowEvent::RolledBack { summary, .. } => summary.workflow_id,
        }
    }

    /// Event name in the `step:completed` style used by log lines.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::Started { .. } => "started",
            WorkflowEvent::StepStarted { .. } => "step:started",
            WorkflowEvent::StepCompleted { .. } => "step:completed",
            WorkflowEvent::StepFailed { .. } => "step:failed",
            WorkflowEvent::ParallelStarted { .. } => "parallel:started",
            WorkflowEvent::ParallelCompleted { .. } => "parallel:completed",
            WorkflowEvent::Completed { .. } => "completed",
            WorkflowEvent::Failed { .. } => "failed",
            WorkflowEvent::RolledBack { .. } => "rolled_back",
        }
    }

    /// Whether this event ends a workflow execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::Completed { .. }
                | WorkflowEvent::Failed { .. }
                | WorkflowEvent::RolledBack { .. }
        )
    }
}
