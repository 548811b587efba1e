//! CLI workflow subcommands: validate, plan, run, and agent listing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio::sync::broadcast::error::RecvError;

use agentflow_core::session::ContextStore;
use agentflow_core::transport::BoxTransport;
use agentflow_core::workflow::{
    ExecuteOptions, Orchestrator, ScheduledUnit, WorkflowExecutionResult, WorkflowGraph,
    build_schedule, get_step_dependencies, load_workflow_graph,
};
use agentflow_infra::config::load_engine_config_or_default;
use agentflow_infra::{HttpTransport, StaticAgentRegistry};
use agentflow_types::event::WorkflowEvent;
use agentflow_types::workflow::{StepStatus, TaskPayload, WorkflowStatus};

async fn load_graph(file: &Path) -> Result<WorkflowGraph> {
    load_workflow_graph(file)
        .await
        .with_context(|| format!("Failed to load workflow '{}'", file.display()))
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let graph = load_graph(file).await?;

    if json {
        let out = serde_json::json!({
            "name": graph.name(),
            "valid": true,
            "steps": graph.steps().len(),
            "groups": graph.groups().len(),
            "rollback_bindings": graph.rollback_bindings().len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Workflow '{}' is valid",
            style("*").green().bold(),
            style(graph.name()).cyan()
        );
        println!("  Steps: {}", graph.steps().len());
        println!("  Parallel groups: {}", graph.groups().len());
        if let Some(timeout) = graph.timeout() {
            println!("  Timeout: {}s", timeout.as_secs());
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Schedule as JSON, one entry per unit. `requires` is the full upstream
/// closure of a step, not just its direct dependencies.
fn plan_json(graph: &WorkflowGraph, schedule: &[ScheduledUnit<'_>]) -> serde_json::Value {
    let requires = |id: &str| get_step_dependencies(id, graph.steps());
    let units: Vec<_> = schedule
        .iter()
        .map(|unit| match unit {
            ScheduledUnit::Step(step) => serde_json::json!({
                "kind": "step",
                "id": step.id,
                "agent_id": step.agent_id,
                "intent": step.intent,
                "depends_on": step.depends_on,
                "requires": requires(&step.id),
            }),
            ScheduledUnit::Group(group) => serde_json::json!({
                "kind": "group",
                "id": group.id,
                "wait_for_all": group.wait_for_all,
                "continue_on_error": group.continue_on_error,
                "steps": group.step_ids,
                "requires": group
                    .step_ids
                    .iter()
                    .map(|id| (id.clone(), serde_json::json!(requires(id))))
                    .collect::<serde_json::Map<_, _>>(),
            }),
        })
        .collect();
    serde_json::Value::Array(units)
}

pub async fn handle_plan(file: &Path, json: bool) -> Result<()> {
    let graph = load_graph(file).await?;
    let schedule = build_schedule(&graph)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&graph, &schedule))?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Unit").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Agent / intent"),
            Cell::new("Depends on"),
            Cell::new("Requires (transitive)"),
        ]);

    for (index, unit) in schedule.iter().enumerate() {
        let unit_label = match unit {
            ScheduledUnit::Step(_) => "step".to_string(),
            ScheduledUnit::Group(group) if group.wait_for_all => format!("group {} (all)", group.id),
            ScheduledUnit::Group(group) => format!("group {} (race)", group.id),
        };
        for step_id in unit.step_ids() {
            let Some(step) = graph.step(step_id) else {
                continue;
            };
            let mut flags = Vec::new();
            if step.optional {
                flags.push("optional");
            }
            if graph.rollback_for(&step.id).is_some() {
                flags.push("rollback");
            }
            let label = if flags.is_empty() {
                step.id.clone()
            } else {
                format!("{} [{}]", step.id, flags.join(", "))
            };
            table.add_row(vec![
                Cell::new(index + 1),
                Cell::new(&unit_label),
                Cell::new(label),
                Cell::new(format!("{}/{}", step.agent_id, step.intent)),
                Cell::new(step.depends_on.join(", ")),
                Cell::new(get_step_dependencies(&step.id, graph.steps()).join(", ")),
            ]);
        }
    }

    println!();
    println!("  Plan for '{}'", style(graph.name()).cyan().bold());
    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub struct RunArgs<'a> {
    pub file: &'a Path,
    pub config: Option<&'a Path>,
    pub session: Option<String>,
    pub state: Option<String>,
    pub timeout: Option<u64>,
    pub continue_on_error: bool,
}

pub async fn handle_run(args: RunArgs<'_>, json: bool) -> Result<()> {
    let graph = load_graph(args.file).await?;
    let config = load_engine_config_or_default(args.config).await;
    if config.agents.is_empty() {
        tracing::warn!("no agents configured; every step will fail with agent not found");
    }

    let registry = StaticAgentRegistry::from_config(&config.agents);
    let store = Arc::new(ContextStore::new(config.sessions.clone()));
    let orchestrator = Orchestrator::new(BoxTransport::new(HttpTransport::new(registry)), &config)
        .with_session_store(store);

    let mut options = ExecuteOptions::new();
    if let Some(raw) = args.state.as_deref() {
        options = options.with_state(parse_state(raw)?);
    }
    if let Some(session) = args.session {
        options = options.with_session(session);
    }
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }
    if args.continue_on_error {
        options = options.continue_on_error();
    }

    let progress = (!json).then(|| {
        let mut rx = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        print_event(&event);
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let outcome = orchestrator.execute(&graph, options).await;
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let (result, error) = match outcome {
        Ok(result) => (result, None),
        Err(failure) => (*failure.result, Some(failure.error)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    match error {
        None => Ok(()),
        Some(err) => bail!("workflow '{}' {}: {err}", result.workflow_name, result.status),
    }
}

/// `--state` must be a JSON object.
pub fn parse_state(raw: &str) -> Result<TaskPayload> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Invalid JSON for --state")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--state must be a JSON object, got {other}"),
    }
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::Started { workflow_name, session_id, .. } => {
            println!();
            println!(
                "  {} Running '{}' (session {})",
                style(">").cyan().bold(),
                style(workflow_name).cyan(),
                style(session_id).dim()
            );
        }
        WorkflowEvent::StepStarted { result, .. } => {
            println!("    {} {}", style("-").dim(), result.step_id);
        }
        WorkflowEvent::StepCompleted { result, .. } => {
            let took = result.duration_ms().map(|ms| format!(" ({ms}ms)")).unwrap_or_default();
            println!("    {} {}{}", style("✓").green(), result.step_id, style(took).dim());
        }
        WorkflowEvent::StepFailed { result, .. } => {
            println!(
                "    {} {}: {}",
                style("✗").red(),
                result.step_id,
                result.error.as_deref().unwrap_or("failed")
            );
        }
        WorkflowEvent::ParallelStarted { group_id, step_ids, .. } => {
            println!(
                "    {} group {} ({} steps)",
                style("=").cyan(),
                group_id,
                step_ids.len()
            );
        }
        WorkflowEvent::ParallelCompleted { .. } => {}
        WorkflowEvent::Completed { .. } | WorkflowEvent::Failed { .. } => {}
        WorkflowEvent::RolledBack { rolled_back, .. } => {
            println!(
                "    {} compensated: {}",
                style("<").yellow(),
                rolled_back.join(", ")
            );
        }
    }
}

fn status_cell(status: StepStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::DarkGrey),
        StepStatus::Pending | StepStatus::Running => cell.fg(Color::Yellow),
    }
}

fn print_result(result: &WorkflowExecutionResult) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);
    for step in &result.steps {
        table.add_row(vec![
            Cell::new(&step.step_id),
            status_cell(step.status),
            Cell::new(step.attempts),
            Cell::new(step.duration_ms().map(|ms| format!("{ms}ms")).unwrap_or_default()),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }

    let status = match result.status {
        WorkflowStatus::Completed => style(result.status.to_string()).green().bold(),
        WorkflowStatus::Failed => style(result.status.to_string()).red().bold(),
        WorkflowStatus::RolledBack => style(result.status.to_string()).yellow().bold(),
    };

    println!();
    println!("{table}");
    println!(
        "  Workflow {} in {}ms (id {})",
        status,
        result.duration_ms,
        style(result.workflow_id).dim()
    );
    if !result.rolled_back.is_empty() {
        println!("  Rolled back: {}", result.rolled_back.join(", "));
    }
    println!();
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

pub async fn handle_agents(config: Option<&Path>, json: bool) -> Result<()> {
    let config = load_engine_config_or_default(config).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&config.agents)?);
        return Ok(());
    }

    if config.agents.is_empty() {
        println!();
        println!("  No agents configured.");
        println!(
            "  Add {} entries to your config file.",
            style("[[agents]]").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Agent").fg(Color::Cyan), Cell::new("Endpoint")]);
    for agent in &config.agents {
        table.add_row(vec![Cell::new(&agent.id), Cell::new(&agent.endpoint)]);
    }
    println!("{table}");
    Ok(())
}
