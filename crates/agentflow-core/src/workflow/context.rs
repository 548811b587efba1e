//! Per-execution workflow context.
//!
//! `WorkflowContext` is owned by exactly one `Orchestrator::execute` call.
//! Parallel members hand their results back to the coordinator, which is the
//! only writer, so the maps need no lock.

use std::collections::HashMap;

use agentflow_types::workflow::{StepResult, StepStatus, TaskPayload, WorkflowStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Key under which the execution envelope is merged into every step task.
pub const CONTEXT_ENVELOPE_KEY: &str = "_context";

/// Mutable state of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: Uuid,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// Result data by step id, plus any seeded initial/session state.
    pub state: HashMap<String, Value>,
    /// Latest result record by step id.
    pub results: HashMap<String, StepResult>,
    /// Step ids in the order they completed successfully.
    completion_order: Vec<String>,
}

impl WorkflowContext {
    pub fn new(session_id: impl Into<String>, initial_state: TaskPayload) -> Self {
        Self {
            workflow_id: Uuid::now_v7(),
            session_id: session_id.into(),
            started_at: Utc::now(),
            state: initial_state.into_iter().collect(),
            results: HashMap::new(),
            completion_order: Vec::new(),
        }
    }

    /// Record a result. Completed results also land in `state` and extend
    /// the completion order.
    pub fn record(&mut self, result: StepResult) {
        if result.status == StepStatus::Completed {
            let data = result.data.clone().unwrap_or(Value::Null);
            self.state.insert(result.step_id.clone(), data);
            if !self.completion_order.contains(&result.step_id) {
                self.completion_order.push(result.step_id.clone());
            }
        }
        self.results.insert(result.step_id.clone(), result);
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.results.get(step_id).map(|r| r.status)
    }

    /// Steps that completed, oldest first.
    pub fn completion_order(&self) -> &[String] {
        &self.completion_order
    }

    /// First dependency of `step` that has not completed.
    pub fn unmet_dependency<'a>(&self, step: &'a WorkflowStep) -> Option<&'a str> {
        step.depends_on
            .iter()
            .find(|dep| self.status(dep) != Some(StepStatus::Completed))
            .map(String::as_str)
    }

    /// The task payload sent for `step`: its static task, one
    /// `"<dep>_result"` entry per dependency, and the execution envelope.
    pub fn build_step_task(&self, step: &WorkflowStep) -> TaskPayload {
        let mut task = step.task.clone();
        for dep in &step.depends_on {
            let value = self.state.get(dep).cloned().unwrap_or(Value::Null);
            task.insert(format!("{dep}_result"), value);
        }
        task.insert(
            CONTEXT_ENVELOPE_KEY.to_string(),
            json!({
                "workflow_id": self.workflow_id.to_string(),
                "session_id": self.session_id,
                "step_id": step.id,
            }),
        );
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::workflow::StepSpec;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        let mut task = TaskPayload::new();
        task.insert("mode".to_string(), json!("fast"));
        let mut spec = StepSpec::new("agent", "run").with_task(task);
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        WorkflowStep::from_spec(id, spec)
    }

    #[test]
    fn test_record_completed_updates_state_and_order() {
        let mut ctx = WorkflowContext::new("sess", TaskPayload::new());
        ctx.record(StepResult::running("b").complete(json!(2), 1));
        ctx.record(StepResult::running("a").complete(json!(1), 1));
        ctx.record(StepResult::running("c").fail("boom", 3));

        assert_eq!(ctx.completion_order(), &["b".to_string(), "a".to_string()]);
        assert_eq!(ctx.state["a"], json!(1));
        assert!(!ctx.state.contains_key("c"));
        assert_eq!(ctx.status("c"), Some(StepStatus::Failed));
    }

    #[test]
    fn test_build_step_task_merges_dependency_results() {
        let mut ctx = WorkflowContext::new("sess-1", TaskPayload::new());
        ctx.record(StepResult::running("fetch").complete(json!({"rows": 3}), 1));

        let task = ctx.build_step_task(&step("transform", &["fetch"]));

        assert_eq!(task["mode"], json!("fast"));
        assert_eq!(task["fetch_result"], json!({"rows": 3}));
        assert_eq!(task["_context"]["step_id"], json!("transform"));
        assert_eq!(task["_context"]["session_id"], json!("sess-1"));
        assert_eq!(task["_context"]["workflow_id"], json!(ctx.workflow_id.to_string()));
    }

    #[test]
    fn test_unmet_dependency() {
        let mut ctx = WorkflowContext::new("sess", TaskPayload::new());
        ctx.record(StepResult::running("a").complete(json!(null), 1));
        ctx.record(StepResult::running("b").fail("down", 1));

        assert_eq!(ctx.unmet_dependency(&step("x", &["a"])), None);
        assert_eq!(ctx.unmet_dependency(&step("y", &["a", "b"])), Some("b"));
        assert_eq!(ctx.unmet_dependency(&step("z", &["never"])), Some("never"));
    }

    #[test]
    fn test_initial_state_seeds_context() {
        let mut initial = TaskPayload::new();
        initial.insert("tenant".to_string(), json!("acme"));
        let ctx = WorkflowContext::new("sess", initial);
        assert_eq!(ctx.state["tenant"], json!("acme"));
        assert!(ctx.results.is_empty());
    }
}
