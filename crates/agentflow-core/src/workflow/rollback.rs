//! Compensating rollback of completed steps.
//!
//! Completed steps are compensated one at a time, most recently completed
//! first. A failed compensation is logged and the walk moves on.

use agentflow_types::workflow::StepStatus;
use serde_json::{Value, json};
use thiserror::Error;

use super::context::{CONTEXT_ENVELOPE_KEY, WorkflowContext};
use super::dispatch::{DispatchError, StepDispatcher};
use super::graph::WorkflowGraph;

/// A compensation that could not be delivered. Logged, never raised.
#[derive(Debug, Error)]
#[error("rollback of step '{step_id}' via {agent_id}/{intent} failed: {source}")]
pub struct RollbackDispatchError {
    pub step_id: String,
    pub agent_id: String,
    pub intent: String,
    #[source]
    pub source: DispatchError,
}

/// Compensate every completed step that has a rollback action.
///
/// Returns the ids of steps whose compensation reached the agent, in
/// dispatch order. A compensation rejected by an open circuit never left
/// the process and is not counted.
pub async fn compensate(
    graph: &WorkflowGraph,
    ctx: &WorkflowContext,
    dispatcher: &StepDispatcher,
) -> Vec<String> {
    let mut dispatched = Vec::new();

    for step_id in ctx.completion_order().iter().rev() {
        let Some(result) = ctx.result(step_id) else {
            continue;
        };
        if result.status != StepStatus::Completed {
            continue;
        }
        let Some(action) = graph.rollback_for(step_id) else {
            tracing::debug!(step_id = step_id.as_str(), "no rollback action bound");
            continue;
        };

        let mut payload = action.task.clone();
        payload.insert("rollback_of".to_string(), Value::String(step_id.clone()));
        payload.insert(
            "original_result".to_string(),
            result.data.clone().unwrap_or(Value::Null),
        );
        payload.insert(
            CONTEXT_ENVELOPE_KEY.to_string(),
            json!({
                "workflow_id": ctx.workflow_id.to_string(),
                "session_id": ctx.session_id,
                "step_id": step_id,
            }),
        );

        tracing::info!(
            workflow_id = %ctx.workflow_id,
            step_id = step_id.as_str(),
            agent_id = action.agent_id.as_str(),
            intent = action.intent.as_str(),
            "dispatching rollback"
        );

        match dispatcher.dispatch_rollback(action, payload).await {
            Ok(_) => dispatched.push(step_id.clone()),
            Err(source) => {
                let reached_agent = !matches!(source, DispatchError::CircuitOpen(_));
                let err = RollbackDispatchError {
                    step_id: step_id.clone(),
                    agent_id: action.agent_id.clone(),
                    intent: action.intent.clone(),
                    source,
                };
                tracing::warn!(workflow_id = %ctx.workflow_id, error = %err, "rollback dispatch failed");
                if reached_agent {
                    dispatched.push(step_id.clone());
                }
            }
        }
    }

    dispatched
}
