//! Workflow definition files.
//!
//! YAML files deserialize into `WorkflowDefinition` and are turned into a
//! validated `WorkflowGraph` through the builder, so a file is held to the
//! same rules as code-built graphs.

use std::path::Path;
use std::time::Duration;

use agentflow_types::workflow::{GLOBAL_ROLLBACK_KEY, WorkflowDefinition};
use thiserror::Error;

use super::graph::{GraphError, GroupOptions, ParallelMember, RollbackScope, WorkflowGraph};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structurally readable but not a usable workflow.
    #[error("invalid definition: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document into a `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    if def.timeout_secs == Some(0) {
        return Err(DefinitionError::Invalid("timeout_secs must be > 0".to_string()));
    }
    Ok(def)
}

/// Read and parse a definition file.
pub async fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_workflow_yaml(&content)
}

/// Read a definition file and build its graph.
pub async fn load_workflow_graph(path: &Path) -> Result<WorkflowGraph, DefinitionError> {
    let def = load_workflow_file(path).await?;
    into_graph(def)
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Build a graph from a definition.
///
/// Sequential steps must carry an id; parallel members may omit theirs and
/// get `"<group>.<index>"`. Groups without an id are numbered in file order.
pub fn into_graph(def: WorkflowDefinition) -> Result<WorkflowGraph, DefinitionError> {
    let mut builder = WorkflowGraph::builder(def.name);
    if let Some(description) = def.description {
        builder.description(description);
    }
    if let Some(secs) = def.timeout_secs {
        builder.timeout(Duration::from_secs(secs));
    }

    for (index, step) in def.steps.into_iter().enumerate() {
        let Some(id) = step.id else {
            return Err(DefinitionError::Invalid(format!(
                "step #{} ({}/{}) has no id",
                index + 1,
                step.spec.agent_id,
                step.spec.intent
            )));
        };
        builder.add_step(id, step.spec)?;
    }

    for group in def.parallel {
        let mut options = GroupOptions::new();
        if let Some(id) = group.id {
            options = options.named(id);
        }
        if !group.wait_for_all {
            options = options.race();
        }
        if group.continue_on_error {
            options = options.continue_on_error();
        }
        let members = group
            .steps
            .into_iter()
            .map(|step| match step.id {
                Some(id) => ParallelMember::named(id, step.spec),
                None => ParallelMember::anonymous(step.spec),
            })
            .collect();
        builder.add_parallel_group(members, options)?;
    }

    for (key, action) in def.rollback {
        let scope = if key == GLOBAL_ROLLBACK_KEY {
            RollbackScope::Global
        } else {
            RollbackScope::Step(key)
        };
        builder.bind_rollback(scope, action);
    }

    Ok(builder.build()?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ORDER_YAML: &str = r#"
name: order-fulfilment
description: Reserve, charge and ship an order
timeout_secs: 120
steps:
  - id: reserve
    agent_id: inventory
    intent: reserve
    task:
      sku: ABC-1
  - id: charge
    agent_id: billing
    intent: charge
    depends_on: [reserve]
    retries: 2
    timeout_ms: 5000
    rollback:
      agent_id: billing
      intent: refund
parallel:
  - id: notify
    steps:
      - agent_id: email
        intent: send
        depends_on: [charge]
      - id: sms
        agent_id: sms
        intent: send
        depends_on: [charge]
        optional: true
    continue_on_error: true
rollback:
  reserve:
    agent_id: inventory
    intent: release
  "*":
    agent_id: audit
    intent: compensate
"#;

    #[test]
    fn test_parse_and_build_full_definition() {
        let def = parse_workflow_yaml(ORDER_YAML).unwrap();
        assert_eq!(def.name, "order-fulfilment");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.parallel.len(), 1);

        let graph = into_graph(def).unwrap();
        assert_eq!(graph.timeout(), Some(Duration::from_secs(120)));
        assert_eq!(graph.description(), Some("Reserve, charge and ship an order"));

        let charge = graph.step("charge").unwrap();
        assert_eq!(charge.retries, 2);
        assert_eq!(charge.timeout_ms, Some(5000));
        assert_eq!(charge.depends_on, vec!["reserve"]);

        let group = graph.group("notify").unwrap();
        assert_eq!(group.step_ids, vec!["notify.0", "sms"]);
        assert!(group.wait_for_all);
        assert!(group.continue_on_error);
        assert!(graph.step("sms").unwrap().optional);

        assert_eq!(graph.rollback_for("charge").unwrap().intent, "refund");
        assert_eq!(graph.rollback_for("reserve").unwrap().intent, "release");
        assert_eq!(graph.rollback_for("sms").unwrap().agent_id, "audit");
    }

    #[test]
    fn test_race_group_from_wait_for_all_false() {
        let yaml = r#"
name: race
parallel:
  - steps:
      - { agent_id: a, intent: search }
      - { agent_id: b, intent: search }
    wait_for_all: false
"#;
        let graph = into_graph(parse_workflow_yaml(yaml).unwrap()).unwrap();
        let group = graph.group("parallel-1").unwrap();
        assert!(!group.wait_for_all);
        assert_eq!(group.step_ids, vec!["parallel-1.0", "parallel-1.1"]);
    }

    #[test]
    fn test_sequential_step_without_id_rejected() {
        let yaml = r#"
name: bad
steps:
  - agent_id: a
    intent: run
"#;
        let err = into_graph(parse_workflow_yaml(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, DefinitionError::Invalid(msg) if msg.contains("step #1")));
    }

    #[test]
    fn test_unknown_dependency_surfaces_graph_error() {
        let yaml = r#"
name: bad
steps:
  - id: a
    agent_id: a
    intent: run
    depends_on: [ghost]
"#;
        let err = into_graph(parse_workflow_yaml(yaml).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::Graph(GraphError::UnknownDependency { dependency, .. }) if dependency == "ghost"
        ));
    }

    #[test]
    fn test_rollback_for_unknown_step_rejected() {
        let yaml = r#"
name: bad
steps:
  - { id: a, agent_id: a, intent: run }
rollback:
  nope: { agent_id: x, intent: undo }
"#;
        let err = into_graph(parse_workflow_yaml(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, DefinitionError::Graph(GraphError::UnknownRollbackTarget(id)) if id == "nope"));
    }

    #[test]
    fn test_empty_definition_rejected() {
        let err = into_graph(parse_workflow_yaml("name: nothing\n").unwrap()).unwrap_err();
        assert!(matches!(err, DefinitionError::Graph(GraphError::EmptyWorkflow(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = "name: t\ntimeout_secs: 0\nsteps:\n  - { id: a, agent_id: a, intent: run }\n";
        assert!(matches!(parse_workflow_yaml(yaml), Err(DefinitionError::Invalid(_))));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        assert!(matches!(
            parse_workflow_yaml("name: [unclosed"),
            Err(DefinitionError::Parse(_))
        ));
        assert!(matches!(
            parse_workflow_yaml("steps: []\n"),
            Err(DefinitionError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_load_workflow_graph_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ORDER_YAML.as_bytes()).unwrap();

        let graph = load_workflow_graph(file.path()).await.unwrap();
        assert_eq!(graph.name(), "order-fulfilment");
        assert_eq!(graph.steps().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_workflow_file(&dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(matches!(err, DefinitionError::Io(_)));
    }
}
