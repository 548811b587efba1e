//! Execution order resolution and schedule construction.
//!
//! `resolve_execution_order` is a depth-first topological sort: roots are
//! visited in insertion order and dependencies in declared order, so the
//! result is deterministic. A `visiting` set turns any back-edge into
//! `GraphError::CircularDependency` instead of recursing forever, even for
//! step lists that never went through the builder.
//!
//! `build_schedule` layers parallel groups on top of that order: each group
//! collapses into a single unit whose dependencies are the union of its
//! members' outside dependencies.

use std::collections::{HashMap, HashSet};

use agentflow_types::workflow::{ParallelGroup, WorkflowStep};

use super::graph::{GraphError, WorkflowGraph};

// ---------------------------------------------------------------------------
// Step-level order
// ---------------------------------------------------------------------------

/// Order `steps` so every step comes after all of its dependencies.
pub fn resolve_execution_order(steps: &[WorkflowStep]) -> Result<Vec<&WorkflowStep>, GraphError> {
    let by_id: HashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut order = Vec::with_capacity(steps.len());
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();

    for step in steps {
        visit_step(step, &by_id, &mut visited, &mut visiting, &mut order)?;
    }
    Ok(order)
}

fn visit_step<'a>(
    step: &'a WorkflowStep,
    by_id: &HashMap<&str, &'a WorkflowStep>,
    visited: &mut HashSet<&'a str>,
    visiting: &mut HashSet<&'a str>,
    order: &mut Vec<&'a WorkflowStep>,
) -> Result<(), GraphError> {
    let id = step.id.as_str();
    if visited.contains(id) {
        return Ok(());
    }
    if !visiting.insert(id) {
        return Err(GraphError::CircularDependency { step: step.id.clone() });
    }

    for dep in &step.depends_on {
        let dep_step = by_id.get(dep.as_str()).ok_or_else(|| GraphError::UnknownDependency {
            step: step.id.clone(),
            dependency: dep.clone(),
        })?;
        visit_step(dep_step, by_id, visited, visiting, order)?;
    }

    visiting.remove(id);
    visited.insert(id);
    order.push(step);
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit-level schedule
// ---------------------------------------------------------------------------

/// One entry of an execution schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduledUnit<'a> {
    Step(&'a WorkflowStep),
    Group(&'a ParallelGroup),
}

impl<'a> ScheduledUnit<'a> {
    /// Step id or group id.
    pub fn id(&self) -> &'a str {
        match self {
            ScheduledUnit::Step(step) => &step.id,
            ScheduledUnit::Group(group) => &group.id,
        }
    }

    /// Step ids covered by this unit.
    pub fn step_ids(&self) -> Vec<&'a str> {
        match self {
            ScheduledUnit::Step(step) => vec![step.id.as_str()],
            ScheduledUnit::Group(group) => group.step_ids.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum UnitKey<'a> {
    Step(&'a str),
    Group(&'a str),
}

impl UnitKey<'_> {
    fn name(&self) -> &str {
        match self {
            UnitKey::Step(id) | UnitKey::Group(id) => id,
        }
    }
}

/// Collapse parallel groups into single units and order the units.
pub fn build_schedule(graph: &WorkflowGraph) -> Result<Vec<ScheduledUnit<'_>>, GraphError> {
    let order = resolve_execution_order(graph.steps())?;

    // Outside dependencies of every unit, in declared order.
    let mut unit_deps: HashMap<UnitKey<'_>, Vec<UnitKey<'_>>> = HashMap::new();
    for step in graph.steps() {
        let unit = unit_of(step);
        let entry = unit_deps.entry(unit).or_default();
        for dep in &step.depends_on {
            let dep_step = graph.step(dep).ok_or_else(|| GraphError::UnknownDependency {
                step: step.id.clone(),
                dependency: dep.clone(),
            })?;
            let dep_unit = unit_of(dep_step);
            if dep_unit != unit && !entry.contains(&dep_unit) {
                entry.push(dep_unit);
            }
        }
    }

    let mut keys = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();
    for step in order {
        visit_unit(unit_of(step), &unit_deps, &mut visited, &mut visiting, &mut keys)?;
    }

    keys.into_iter()
        .map(|key| match key {
            UnitKey::Step(id) => graph
                .step(id)
                .map(ScheduledUnit::Step)
                .ok_or_else(|| GraphError::UnknownStep(id.to_string())),
            UnitKey::Group(id) => graph
                .group(id)
                .map(ScheduledUnit::Group)
                .ok_or_else(|| GraphError::UnknownStep(id.to_string())),
        })
        .collect()
}

fn unit_of(step: &WorkflowStep) -> UnitKey<'_> {
    match &step.group {
        Some(group) => UnitKey::Group(group.as_str()),
        None => UnitKey::Step(step.id.as_str()),
    }
}

fn visit_unit<'a>(
    unit: UnitKey<'a>,
    unit_deps: &HashMap<UnitKey<'a>, Vec<UnitKey<'a>>>,
    visited: &mut HashSet<UnitKey<'a>>,
    visiting: &mut HashSet<UnitKey<'a>>,
    keys: &mut Vec<UnitKey<'a>>,
) -> Result<(), GraphError> {
    if visited.contains(&unit) {
        return Ok(());
    }
    if !visiting.insert(unit) {
        return Err(GraphError::CircularDependency {
            step: unit.name().to_string(),
        });
    }

    if let Some(deps) = unit_deps.get(&unit) {
        for &dep in deps {
            visit_unit(dep, unit_deps, visited, visiting, keys)?;
        }
    }

    visiting.remove(&unit);
    visited.insert(unit);
    keys.push(unit);
    Ok(())
}

// ---------------------------------------------------------------------------
// Transitive dependency closure
// ---------------------------------------------------------------------------

/// All direct and indirect dependencies of `step_id`, in `steps` order.
///
/// Returns an empty vec if `step_id` is not found.
pub fn get_step_dependencies<'a>(step_id: &str, steps: &'a [WorkflowStep]) -> Vec<&'a str> {
    let step_map: HashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut visited = HashSet::new();
    let mut stack = vec![step_id];

    while let Some(current) = stack.pop() {
        if let Some(step) = step_map.get(current) {
            for dep in &step.depends_on {
                if visited.insert(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }
    }

    steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| visited.contains(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::{GroupOptions, ParallelMember};
    use agentflow_types::workflow::StepSpec;

    fn step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        let mut spec = StepSpec::new("agent", "run");
        spec.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
        WorkflowStep::from_spec(id, spec)
    }

    fn position(order: &[&WorkflowStep], id: &str) -> usize {
        order.iter().position(|s| s.id == id).unwrap()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let steps = vec![
            step("report", &["merge"]),
            step("merge", &["left", "right"]),
            step("left", &["fetch"]),
            step("right", &["fetch"]),
            step("fetch", &[]),
        ];
        let order = resolve_execution_order(&steps).unwrap();
        assert_eq!(order.len(), steps.len());
        for s in &steps {
            for dep in &s.depends_on {
                assert!(position(&order, dep) < position(&order, &s.id), "{dep} before {}", s.id);
            }
        }
    }

    #[test]
    fn test_independent_steps_keep_insertion_order() {
        let steps = vec![step("c", &[]), step("a", &[]), step("b", &[])];
        let ids: Vec<&str> = resolve_execution_order(&steps)
            .unwrap()
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_detected_without_builder() {
        let steps = vec![step("a", &["b"]), step("b", &["c"]), step("c", &["a"])];
        assert!(matches!(
            resolve_execution_order(&steps),
            Err(GraphError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency_detected_without_builder() {
        let steps = vec![step("a", &["ghost"])];
        assert_eq!(
            resolve_execution_order(&steps).unwrap_err(),
            GraphError::UnknownDependency {
                step: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_schedule_collapses_group_into_one_unit() {
        let mut b = WorkflowGraph::builder("fan");
        b.add_step("fetch", StepSpec::new("f", "fetch")).unwrap();
        b.add_parallel_group(
            vec![
                ParallelMember::named("a", StepSpec::new("x", "run").depends_on("fetch")),
                ParallelMember::named("b", StepSpec::new("y", "run").depends_on("fetch")),
            ],
            GroupOptions::new().named("score"),
        )
        .unwrap();
        b.add_step("merge", StepSpec::new("m", "merge").depends_on("a").depends_on("b"))
            .unwrap();
        let graph = b.build().unwrap();

        let schedule = build_schedule(&graph).unwrap();
        let ids: Vec<&str> = schedule.iter().map(|u| u.id()).collect();
        assert_eq!(ids, vec!["fetch", "score", "merge"]);
        assert_eq!(schedule[1].step_ids(), vec!["a", "b"]);
        assert!(matches!(schedule[1], ScheduledUnit::Group(_)));
    }

    #[test]
    fn test_group_waits_for_every_member_dependency() {
        // The group is declared first, but one member depends on a later step.
        let mut b = WorkflowGraph::builder("late-dep");
        b.add_parallel_group(
            vec![
                ParallelMember::named("a", StepSpec::new("x", "run")),
                ParallelMember::named("b", StepSpec::new("x", "run").depends_on("auth")),
            ],
            GroupOptions::new().named("g"),
        )
        .unwrap();
        b.add_step("auth", StepSpec::new("x", "login")).unwrap();
        let graph = b.build().unwrap();

        let ids: Vec<&str> = build_schedule(&graph).unwrap().iter().map(|u| u.id()).collect();
        assert_eq!(ids, vec!["auth", "g"]);
    }

    #[test]
    fn test_transitive_dependencies() {
        let steps = vec![
            step("fetch", &[]),
            step("auth", &[]),
            step("transform", &["fetch", "auth"]),
            step("notify", &["transform"]),
        ];
        assert_eq!(
            get_step_dependencies("notify", &steps),
            vec!["fetch", "auth", "transform"]
        );
        assert!(get_step_dependencies("fetch", &steps).is_empty());
        assert!(get_step_dependencies("ghost", &steps).is_empty());
    }
}
