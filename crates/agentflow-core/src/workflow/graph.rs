//! Workflow graph and its builder.
//!
//! Every `add_*` call returns a handle naming the step (or group) it created;
//! modifiers take that handle explicitly. `build()` validates the whole graph
//! and produces an immutable `WorkflowGraph`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use agentflow_types::workflow::{
    GLOBAL_ROLLBACK_KEY, ParallelGroup, RollbackAction, StepSpec, WorkflowStep,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural errors detected while building (or resolving) a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("workflow '{0}' has no steps")]
    EmptyWorkflow(String),

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("duplicate parallel group id '{0}'")]
    DuplicateGroup(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("circular dependency involving '{step}'")]
    CircularDependency { step: String },

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("rollback bound to unknown step '{0}'")]
    UnknownRollbackTarget(String),

    #[error("step '{step}' depends on '{dependency}' from the same parallel group '{group}'")]
    IntraGroupDependency {
        group: String,
        step: String,
        dependency: String,
    },

    #[error("step '{step}' already belongs to parallel group '{group}'")]
    StepInMultipleGroups { step: String, group: String },
}

// ---------------------------------------------------------------------------
// Handles and options
// ---------------------------------------------------------------------------

/// Names a step added to a builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepHandle {
    id: String,
}

impl StepHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Names a parallel group and its member steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    id: String,
    members: Vec<StepHandle>,
}

impl GroupHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[StepHandle] {
        &self.members
    }

    pub fn member(&self, index: usize) -> Option<&StepHandle> {
        self.members.get(index)
    }
}

/// One entry passed to `add_parallel_group`.
#[derive(Debug, Clone)]
pub enum ParallelMember {
    /// A new step with an explicit id.
    Named { id: String, spec: StepSpec },
    /// A new step whose id is synthesized as `"<group_id>.<index>"`.
    Anonymous(StepSpec),
    /// A step already added to the builder.
    Existing(StepHandle),
}

impl ParallelMember {
    pub fn named(id: impl Into<String>, spec: StepSpec) -> Self {
        ParallelMember::Named {
            id: id.into(),
            spec,
        }
    }

    pub fn anonymous(spec: StepSpec) -> Self {
        ParallelMember::Anonymous(spec)
    }

    pub fn existing(handle: &StepHandle) -> Self {
        ParallelMember::Existing(handle.clone())
    }
}

/// Wait and error semantics of a parallel group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOptions {
    pub id: Option<String>,
    pub wait_for_all: bool,
    pub continue_on_error: bool,
}

impl GroupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Resolve the group as soon as its first member settles.
    pub fn race(mut self) -> Self {
        self.wait_for_all = false;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            id: None,
            wait_for_all: true,
            continue_on_error: false,
        }
    }
}

/// Where a graph-level rollback binding applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackScope {
    Step(String),
    /// Any completed step without a more specific action.
    Global,
}

impl RollbackScope {
    fn key(&self) -> &str {
        match self {
            RollbackScope::Step(id) => id,
            RollbackScope::Global => GLOBAL_ROLLBACK_KEY,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// A validated, immutable workflow.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    description: Option<String>,
    steps: Vec<WorkflowStep>,
    index: HashMap<String, usize>,
    groups: Vec<ParallelGroup>,
    rollback_bindings: HashMap<String, RollbackAction>,
    timeout: Option<Duration>,
}

impl WorkflowGraph {
    pub fn builder(name: impl Into<String>) -> WorkflowGraphBuilder {
        WorkflowGraphBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Steps in insertion order.
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn groups(&self) -> &[ParallelGroup] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&ParallelGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Overall workflow timeout, if one was set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn rollback_bindings(&self) -> &HashMap<String, RollbackAction> {
        &self.rollback_bindings
    }

    /// Compensation for `step_id`: the step's own action, then a binding for
    /// its id, then the global binding.
    pub fn rollback_for(&self, step_id: &str) -> Option<&RollbackAction> {
        self.step(step_id)
            .and_then(|s| s.rollback.as_ref())
            .or_else(|| self.rollback_bindings.get(step_id))
            .or_else(|| self.rollback_bindings.get(GLOBAL_ROLLBACK_KEY))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incrementally assembles a `WorkflowGraph`.
#[derive(Debug, Clone)]
pub struct WorkflowGraphBuilder {
    name: String,
    description: Option<String>,
    steps: Vec<WorkflowStep>,
    index: HashMap<String, usize>,
    groups: Vec<ParallelGroup>,
    rollback_bindings: HashMap<String, RollbackAction>,
    timeout: Option<Duration>,
}

impl WorkflowGraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            index: HashMap::new(),
            groups: Vec::new(),
            rollback_bindings: HashMap::new(),
            timeout: None,
        }
    }

    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    /// Overall workflow timeout.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn add_step(&mut self, id: impl Into<String>, spec: StepSpec) -> Result<StepHandle, GraphError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateStep(id));
        }
        self.index.insert(id.clone(), self.steps.len());
        self.steps.push(WorkflowStep::from_spec(id.clone(), spec));
        Ok(StepHandle { id })
    }

    /// Add a step that depends on `previous`.
    pub fn chain_from(
        &mut self,
        previous: &StepHandle,
        id: impl Into<String>,
        mut spec: StepSpec,
    ) -> Result<StepHandle, GraphError> {
        self.step_index(previous)?;
        if !spec.depends_on.contains(&previous.id) {
            spec.depends_on.push(previous.id.clone());
        }
        self.add_step(id, spec)
    }

    /// Add a group of steps that are scheduled together.
    pub fn add_parallel_group(
        &mut self,
        members: Vec<ParallelMember>,
        options: GroupOptions,
    ) -> Result<GroupHandle, GraphError> {
        let group_id = options
            .id
            .clone()
            .unwrap_or_else(|| format!("parallel-{}", self.groups.len() + 1));
        if self.groups.iter().any(|g| g.id == group_id) {
            return Err(GraphError::DuplicateGroup(group_id));
        }

        // Validate every member before mutating anything.
        let mut member_ids = Vec::with_capacity(members.len());
        let mut seen = HashSet::new();
        for (index, member) in members.iter().enumerate() {
            let id = match member {
                ParallelMember::Named { id, .. } => {
                    if self.index.contains_key(id) {
                        return Err(GraphError::DuplicateStep(id.clone()));
                    }
                    id.clone()
                }
                ParallelMember::Anonymous(_) => {
                    let id = format!("{group_id}.{index}");
                    if self.index.contains_key(&id) {
                        return Err(GraphError::DuplicateStep(id));
                    }
                    id
                }
                ParallelMember::Existing(handle) => {
                    let i = self.step_index(handle)?;
                    if let Some(group) = &self.steps[i].group {
                        return Err(GraphError::StepInMultipleGroups {
                            step: handle.id.clone(),
                            group: group.clone(),
                        });
                    }
                    handle.id.clone()
                }
            };
            if !seen.insert(id.clone()) {
                return Err(GraphError::DuplicateStep(id));
            }
            member_ids.push(id);
        }

        for (member, id) in members.into_iter().zip(&member_ids) {
            match member {
                ParallelMember::Named { spec, .. } | ParallelMember::Anonymous(spec) => {
                    self.add_step(id.clone(), spec)?;
                }
                ParallelMember::Existing(_) => {}
            }
            let i = self.index[id.as_str()];
            self.steps[i].group = Some(group_id.clone());
        }

        self.groups.push(ParallelGroup {
            id: group_id.clone(),
            step_ids: member_ids.clone(),
            wait_for_all: options.wait_for_all,
            continue_on_error: options.continue_on_error,
        });

        Ok(GroupHandle {
            id: group_id,
            members: member_ids.into_iter().map(|id| StepHandle { id }).collect(),
        })
    }

    pub fn depends_on(&mut self, step: &StepHandle, dependency: &StepHandle) -> Result<&mut Self, GraphError> {
        let i = self.step_index(step)?;
        self.step_index(dependency)?;
        let deps = &mut self.steps[i].depends_on;
        if !deps.contains(&dependency.id) {
            deps.push(dependency.id.clone());
        }
        Ok(self)
    }

    pub fn retries(&mut self, step: &StepHandle, retries: u32) -> Result<&mut Self, GraphError> {
        let i = self.step_index(step)?;
        self.steps[i].retries = retries;
        Ok(self)
    }

    pub fn optional(&mut self, step: &StepHandle) -> Result<&mut Self, GraphError> {
        let i = self.step_index(step)?;
        self.steps[i].optional = true;
        Ok(self)
    }

    /// Per-attempt timeout for one step.
    pub fn step_timeout(&mut self, step: &StepHandle, timeout: Duration) -> Result<&mut Self, GraphError> {
        let i = self.step_index(step)?;
        self.steps[i].timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        Ok(self)
    }

    /// Step-local compensation; wins over graph-level bindings.
    pub fn rollback(&mut self, step: &StepHandle, action: RollbackAction) -> Result<&mut Self, GraphError> {
        let i = self.step_index(step)?;
        self.steps[i].rollback = Some(action);
        Ok(self)
    }

    /// Graph-level compensation, checked against the step set at build time.
    pub fn bind_rollback(&mut self, scope: RollbackScope, action: RollbackAction) -> &mut Self {
        self.rollback_bindings.insert(scope.key().to_string(), action);
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<WorkflowGraph, GraphError> {
        if self.steps.is_empty() {
            return Err(GraphError::EmptyWorkflow(self.name));
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !self.index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut targets: Vec<&String> = self.rollback_bindings.keys().collect();
        targets.sort();
        for target in targets {
            if target != GLOBAL_ROLLBACK_KEY && !self.index.contains_key(target) {
                return Err(GraphError::UnknownRollbackTarget(target.clone()));
            }
        }

        for group in &self.groups {
            for member in &group.step_ids {
                let step = &self.steps[self.index[member.as_str()]];
                if let Some(dep) = step.depends_on.iter().find(|d| group.step_ids.contains(d)) {
                    return Err(GraphError::IntraGroupDependency {
                        group: group.id.clone(),
                        step: member.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        detect_cycle(&self.steps, &self.index)?;

        let graph = WorkflowGraph {
            name: self.name,
            description: self.description,
            steps: self.steps,
            index: self.index,
            groups: self.groups,
            rollback_bindings: self.rollback_bindings,
            timeout: self.timeout,
        };

        // Group-level cycles only show up once members are collapsed into units.
        dag::build_schedule(&graph)?;

        tracing::debug!(
            workflow = graph.name.as_str(),
            steps = graph.steps.len(),
            groups = graph.groups.len(),
            "workflow graph built"
        );
        Ok(graph)
    }

    fn step_index(&self, handle: &StepHandle) -> Result<usize, GraphError> {
        self.index
            .get(&handle.id)
            .copied()
            .ok_or_else(|| GraphError::UnknownStep(handle.id.clone()))
    }
}

/// Step-level cycle check with `petgraph`.
fn detect_cycle(steps: &[WorkflowStep], index: &HashMap<String, usize>) -> Result<(), GraphError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for (to, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let from = index[dep.as_str()];
            graph.add_edge(nodes[from], nodes[to], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| GraphError::CircularDependency {
        step: graph[cycle.node_id()].to_string(),
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
