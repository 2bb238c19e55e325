//! Job graph construction.
//!
//! Every job template expands into one instance, or one per matrix
//! combination, and instances are linked along `needs`. The graph is the
//! arena the scheduler works on: instances are addressed by [`JobKey`] and
//! their statuses only ever move forward.

use crate::matrix::MatrixExpander;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use tollgate_core::guard::{Guard, GuardScope, Truth, interpolate};
use tollgate_core::run::{JobReport, JobStatus, SkipReason, TriggerContext};
use tollgate_core::workflow::{GateKind, JobDefinition, Platform, WorkflowDefinition};
use tollgate_core::{Error, JobKey, Result};
use tracing::debug;

/// One node of the job graph.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub key: JobKey,
    pub display_name: String,
    pub platform: Option<Platform>,
    pub matrix: BTreeMap<String, String>,
    /// Workflow variables overlaid with the job's own, interpolated.
    pub variables: HashMap<String, String>,
    pub guard: Option<Guard>,
    pub gate: Option<GateKind>,
    pub run: Option<String>,
    pub shell: String,
    pub timeout_minutes: Option<u32>,
    status: JobStatus,
    skip_reason: Option<SkipReason>,
    exit_code: Option<i32>,
    duration_ms: Option<u64>,
    error: Option<String>,
}

impl JobInstance {
    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }

    pub fn is_gate(&self) -> bool {
        self.gate.is_some()
    }

    /// Whether the implicit `success()` applies to this instance.
    pub fn fails_fast(&self) -> bool {
        !self.is_gate()
            && !self
                .guard
                .as_ref()
                .is_some_and(|guard| guard.uses_status_functions())
    }

    pub fn to_report(&self) -> JobReport {
        JobReport {
            key: self.key.clone(),
            display_name: self.display_name.clone(),
            platform: self.platform,
            status: self.status,
            skip_reason: self.skip_reason.clone(),
            exit_code: self.exit_code,
            duration_ms: self.duration_ms,
            error: self.error.clone(),
        }
    }
}

/// Directed acyclic graph of job instances.
#[derive(Debug)]
pub struct JobGraph {
    workflow: String,
    trigger: TriggerContext,
    variables: HashMap<String, String>,
    graph: DiGraph<JobInstance, ()>,
    key_to_index: HashMap<JobKey, NodeIndex>,
    // Map template name to all its expanded nodes
    name_to_nodes: HashMap<String, Vec<NodeIndex>>,
    order: Vec<NodeIndex>,
}

impl JobGraph {
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn trigger(&self) -> &TriggerContext {
        &self.trigger
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All instances in topological order.
    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.order.iter().map(|&idx| &self.graph[idx])
    }

    pub fn instance(&self, key: &JobKey) -> Option<&JobInstance> {
        self.key_to_index.get(key).map(|&idx| &self.graph[idx])
    }

    /// Instances expanded from one job template.
    pub fn instances_of(&self, job: &str) -> Vec<&JobInstance> {
        self.name_to_nodes
            .get(job)
            .map(|indices| indices.iter().map(|&idx| &self.graph[idx]).collect())
            .unwrap_or_default()
    }

    /// Instances that must be terminal before `key` can be settled.
    pub fn dependencies_of(&self, key: &JobKey) -> Vec<&JobInstance> {
        let Some(&idx) = self.key_to_index.get(key) else {
            return Vec::new();
        };
        let mut deps: Vec<&JobInstance> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        deps.sort_by(|a, b| a.key.cmp(&b.key));
        deps
    }

    /// Whether every instance reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.graph.node_weights().all(|i| i.status.is_terminal())
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.instances().map(JobInstance::to_report).collect()
    }

    pub(crate) fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub(crate) fn node(&self, idx: NodeIndex) -> &JobInstance {
        &self.graph[idx]
    }

    pub(crate) fn dependency_indices(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect()
    }

    pub(crate) fn index_of(&self, key: &JobKey) -> Option<NodeIndex> {
        self.key_to_index.get(key).copied()
    }

    /// Move an instance to a new status.
    pub(crate) fn transition(&mut self, idx: NodeIndex, next: JobStatus) -> Result<()> {
        let instance = &mut self.graph[idx];
        if !instance.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job: instance.key.to_string(),
                from: instance.status,
                to: next,
            });
        }
        instance.status = next;
        Ok(())
    }

    pub(crate) fn skip(&mut self, idx: NodeIndex, reason: SkipReason) -> Result<()> {
        self.transition(idx, JobStatus::Skipped)?;
        self.graph[idx].skip_reason = Some(reason);
        Ok(())
    }

    pub(crate) fn complete(
        &mut self,
        idx: NodeIndex,
        status: JobStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
        error: Option<String>,
    ) -> Result<()> {
        self.transition(idx, status)?;
        let instance = &mut self.graph[idx];
        instance.exit_code = exit_code;
        instance.duration_ms = Some(duration_ms);
        instance.error = error;
        Ok(())
    }
}

/// Builder for constructing job graphs.
pub struct GraphBuilder {
    expander: MatrixExpander,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            expander: MatrixExpander::new(),
        }
    }

    /// Build the instance graph of a workflow for one trigger context.
    pub fn build(&self, workflow: &WorkflowDefinition, trigger: &TriggerContext) -> Result<JobGraph> {
        if workflow.jobs.is_empty() {
            return Err(Error::EmptyWorkflow);
        }

        self.validate(workflow)?;
        self.check_cycles(workflow)?;

        let mut graph = DiGraph::new();
        let mut key_to_index = HashMap::new();
        let mut name_to_nodes: HashMap<String, Vec<NodeIndex>> = HashMap::new();

        for job in &workflow.jobs {
            for instance in self.expand(workflow, job, trigger)? {
                let key = instance.key.clone();
                let idx = graph.add_node(instance);
                key_to_index.insert(key, idx);
                name_to_nodes.entry(job.name.clone()).or_default().push(idx);
            }
        }

        for job in &workflow.jobs {
            for &idx in &name_to_nodes[&job.name] {
                for dep in &job.needs {
                    for dep_idx in self.matching_instances(&graph, idx, dep, &name_to_nodes[dep])? {
                        graph.add_edge(dep_idx, idx, ());
                    }
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| Error::CyclicDependency {
            cycle: vec![graph[cycle.node_id()].key.to_string()],
        })?;

        debug!(
            workflow = %workflow.name,
            instances = graph.node_count(),
            edges = graph.edge_count(),
            "Built job graph"
        );

        Ok(JobGraph {
            workflow: workflow.name.clone(),
            trigger: trigger.clone(),
            variables: workflow.variables.clone(),
            graph,
            key_to_index,
            name_to_nodes,
            order,
        })
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let mut seen = HashSet::new();
        for job in &workflow.jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(Error::InvalidWorkflow(format!("duplicate job '{}'", job.name)));
            }
        }

        for job in &workflow.jobs {
            if job.is_gate() && job.run.is_some() {
                return Err(Error::InvalidWorkflow(format!(
                    "gate job '{}' cannot have a run body",
                    job.name
                )));
            }
            if job.is_gate() && job.matrix.is_some() {
                return Err(Error::InvalidWorkflow(format!(
                    "gate job '{}' cannot have a matrix",
                    job.name
                )));
            }
            for dep in &job.needs {
                if !seen.contains(dep.as_str()) {
                    return Err(Error::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Cycle check on the template graph. Instance edges only follow template
    /// edges, so an acyclic template graph yields an acyclic instance graph.
    fn check_cycles(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index = HashMap::new();
        for job in &workflow.jobs {
            index.insert(job.name.as_str(), graph.add_node(job.name.as_str()));
        }
        for job in &workflow.jobs {
            for dep in &job.needs {
                graph.add_edge(index[dep.as_str()], index[job.name.as_str()], ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(Error::CyclicDependency {
                cycle: cycle_path(&graph, cycle.node_id()),
            }),
        }
    }

    fn expand(
        &self,
        workflow: &WorkflowDefinition,
        job: &JobDefinition,
        trigger: &TriggerContext,
    ) -> Result<Vec<JobInstance>> {
        let guard = job
            .condition
            .as_ref()
            .map(Guard::from_condition)
            .transpose()
            .map_err(|source| Error::GuardEvaluation {
                job: job.name.clone(),
                source,
            })?
            .flatten();

        let combinations: Vec<(JobKey, String, BTreeMap<String, String>)> =
            match self.expander.expand(job)? {
                Some(combos) => combos
                    .into_iter()
                    .map(|c| (JobKey::matrixed(&job.name, c.index), c.display_name, c.values))
                    .collect(),
                None => vec![(JobKey::single(&job.name), job.label().to_string(), BTreeMap::new())],
            };

        combinations
            .into_iter()
            .map(|(key, display_name, matrix)| -> Result<JobInstance> {
                let scope = GuardScope::new(trigger, &workflow.variables, &matrix);
                let resolve = |field: &str, value: &str| {
                    interpolate(value, &scope).map_err(|e| {
                        Error::InvalidWorkflow(format!("{} of job '{}': {}", field, key, e))
                    })
                };

                let platform = match &job.runs_on {
                    Some(label) => Some(resolve("runs_on", label)?.parse::<Platform>().map_err(
                        |e| Error::InvalidWorkflow(format!("runs_on of job '{}': {}", key, e)),
                    )?),
                    None => None,
                };

                let mut variables = workflow.variables.clone();
                for (name, value) in &job.variables {
                    variables.insert(name.clone(), resolve("variable", value)?);
                }

                let run = job.run.as_deref().map(|body| resolve("run", body)).transpose()?;

                let (status, skip_reason) = if !trigger.applicable {
                    (JobStatus::Skipped, Some(SkipReason::TriggerNotApplicable))
                } else if let Some(guard) = &guard {
                    let truth = guard.evaluate(&scope).map_err(|source| Error::GuardEvaluation {
                        job: job.name.clone(),
                        source,
                    })?;
                    match truth {
                        Truth::False => (
                            JobStatus::Skipped,
                            Some(SkipReason::GuardFalse {
                                guard: guard.source().to_string(),
                            }),
                        ),
                        Truth::True | Truth::Unknown => (JobStatus::Pending, None),
                    }
                } else {
                    (JobStatus::Pending, None)
                };

                Ok(JobInstance {
                    key,
                    display_name,
                    platform,
                    matrix,
                    variables,
                    guard: guard.clone(),
                    gate: job.gate,
                    run,
                    shell: job.shell.clone(),
                    timeout_minutes: job.timeout_minutes,
                    status,
                    skip_reason,
                    exit_code: None,
                    duration_ms: None,
                    error: None,
                })
            })
            .collect()
    }

    /// Instances of a dependency that `idx` depends on.
    ///
    /// A matrixed instance only waits for dependency instances that agree on
    /// every dimension both share. When none share a dimension (or the
    /// dependency is not matrixed) it waits for all of them. Sharing a
    /// dimension without any agreeing instance is an error.
    fn matching_instances(
        &self,
        graph: &DiGraph<JobInstance, ()>,
        idx: NodeIndex,
        dependency: &str,
        candidates: &[NodeIndex],
    ) -> Result<Vec<NodeIndex>> {
        let matrix = &graph[idx].matrix;
        let mut shares_dimension = false;
        let matched: Vec<NodeIndex> = candidates
            .iter()
            .copied()
            .filter(|&dep| {
                let mut shared = graph[dep]
                    .matrix
                    .iter()
                    .filter_map(|(k, v)| matrix.get(k).map(|own| own == v))
                    .peekable();
                if shared.peek().is_none() {
                    return false;
                }
                shares_dimension = true;
                shared.all(|eq| eq)
            })
            .collect();

        match (matched.is_empty(), shares_dimension) {
            (false, _) => Ok(matched),
            (true, false) => Ok(candidates.to_vec()),
            (true, true) => Err(Error::InvalidWorkflow(format!(
                "'{}' needs '{}' but no instance of it has the same matrix values",
                graph[idx].display_name, dependency
            ))),
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Names along one cycle through `start`, closed with `start` again.
fn cycle_path(graph: &DiGraph<&str, ()>, start: NodeIndex) -> Vec<String> {
    let component: HashSet<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    walk_cycle(graph, &component, start, start, &mut path, &mut visited);

    let mut names: Vec<String> = path.iter().map(|&idx| graph[idx].to_string()).collect();
    names.push(graph[start].to_string());
    names
}

fn walk_cycle(
    graph: &DiGraph<&str, ()>,
    component: &HashSet<NodeIndex>,
    start: NodeIndex,
    current: NodeIndex,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
) -> bool {
    for next in graph.neighbors_directed(current, Direction::Outgoing) {
        if next == start {
            return true;
        }
        if component.contains(&next) && visited.insert(next) {
            path.push(next);
            if walk_cycle(graph, component, start, next, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}
