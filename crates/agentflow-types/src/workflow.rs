//! Workflow domain types for AgentFlow.
//!
//! Defines the declarative shape of a workflow (steps, parallel groups,
//! rollback bindings) in its serializable form, plus the execution tracking
//! types (`StepResult`, `WorkflowStatus`) shared by the engine, the event bus,
//! and anything that renders a run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque key/value payload handed to an agent.
///
/// The engine never inspects it beyond shallow-merging dependency results
/// into it, so unknown fields always pass through untouched.
pub type TaskPayload = Map<String, Value>;

/// Rollback binding key that applies to any step without a more specific one.
pub const GLOBAL_ROLLBACK_KEY: &str = "*";

// ---------------------------------------------------------------------------
// Step specification
// ---------------------------------------------------------------------------

/// A compensating action dispatched for a completed step when the workflow fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackAction {
    /// Agent that performs the compensation.
    pub agent_id: String,
    /// Intent (operation name) requested of the agent.
    pub intent: String,
    /// Static task fields for the compensation.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub task: TaskPayload,
}

impl RollbackAction {
    pub fn new(agent_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            intent: intent.into(),
            task: TaskPayload::new(),
        }
    }

    /// Attach static task fields.
    pub fn with_task(mut self, task: TaskPayload) -> Self {
        self.task = task;
        self
    }
}

/// Everything needed to declare a step, minus its id.
///
/// This is both the builder input and the body of a step in a YAML
/// definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Target agent identifier.
    pub agent_id: String,
    /// Operation requested of the agent.
    pub intent: String,
    /// Static task payload.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub task: TaskPayload,
    /// Step IDs that must complete before this step runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Per-attempt timeout in milliseconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry budget (number of retries after the first attempt).
    #[serde(default)]
    pub retries: u32,
    /// A failure of an optional step does not fail the workflow.
    #[serde(default)]
    pub optional: bool,
    /// Step-local compensation; wins over any graph-level binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackAction>,
}

impl StepSpec {
    pub fn new(agent_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            intent: intent.into(),
            task: TaskPayload::new(),
            depends_on: Vec::new(),
            timeout_ms: None,
            retries: 0,
            optional: false,
            rollback: None,
        }
    }

    pub fn with_task(mut self, task: TaskPayload) -> Self {
        self.task = task;
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackAction) -> Self {
        self.rollback = Some(rollback);
        self
    }
}

/// A step as it exists inside a built graph. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within one graph.
    pub id: String,
    pub agent_id: String,
    pub intent: String,
    #[serde(default)]
    pub task: TaskPayload,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackAction>,
    /// ID of the parallel group this step belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl WorkflowStep {
    /// Materialize a step from its spec.
    pub fn from_spec(id: impl Into<String>, spec: StepSpec) -> Self {
        Self {
            id: id.into(),
            agent_id: spec.agent_id,
            intent: spec.intent,
            task: spec.task,
            depends_on: spec.depends_on,
            timeout_ms: spec.timeout_ms,
            retries: spec.retries,
            optional: spec.optional,
            rollback: spec.rollback,
            group: None,
        }
    }
}

/// A set of steps scheduled together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub id: String,
    /// Member step IDs, in declaration order.
    pub step_ids: Vec<String>,
    /// `true`: wait for every member. `false`: resolve on the first settled member.
    pub wait_for_all: bool,
    /// When waiting for all, a member failure does not abort its siblings.
    pub continue_on_error: bool,
}

// ---------------------------------------------------------------------------
// Definition file format
// ---------------------------------------------------------------------------

/// The on-disk (YAML) form of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Overall workflow timeout in seconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Sequential steps, in declaration order.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Parallel groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel: Vec<ParallelDefinition>,
    /// Rollback bindings keyed by step ID or `"*"`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rollback: HashMap<String, RollbackAction>,
}

/// A step entry in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step ID. Optional only for parallel group members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub spec: StepSpec,
}

/// A parallel group entry in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default = "default_wait_for_all")]
    pub wait_for_all: bool,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_wait_for_all() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Status of an individual step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Terminal status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Failed,
    RolledBack,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Outcome record for one step within one execution.
///
/// Created when the step begins running; finalized when it completes,
/// fails terminally, or is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch attempts made (0 if the step never reached the transport).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// A freshly started step.
    pub fn running(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            data: None,
            error: None,
            attempts: 0,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A step that never ran.
    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            data: None,
            error: Some(reason.into()),
            attempts: 0,
            started_at: None,
            completed_at: Some(now),
        }
    }

    pub fn complete(mut self, data: Value, attempts: u32) -> Self {
        self.status = StepStatus::Completed;
        self.data = Some(data);
        self.attempts = attempts;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>, attempts: u32) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.attempts = attempts;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// Wall-clock duration in milliseconds, when both timestamps are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}
