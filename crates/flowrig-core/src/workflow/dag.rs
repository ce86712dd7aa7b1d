//! Step dependency graph, cycle detection, and execution planning.
//!
//! Steps are nodes in a `petgraph` arena addressed by index; an edge runs
//! from a dependency to its dependent. Topological sort detects cycles, and
//! a breadth-first walk from the offending node recovers the cycle path for
//! the error message. Depth grouping yields the layers used by `plan`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use flowrig_types::workflow::{StepDef, Workflow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;

use super::definition::WorkflowError;

/// Per-step duration estimate used by plans.
pub const ESTIMATED_STEP_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// StepGraph
// ---------------------------------------------------------------------------

/// Dependency graph over the step templates of one workflow.
///
/// Node weights are indices into the slice the graph was built from.
#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
    order: Vec<usize>,
}

impl StepGraph {
    /// Build the graph and reject unknown dependencies and cycles.
    pub fn build(steps: &[StepDef]) -> Result<Self, WorkflowError> {
        let name_to_idx: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
        let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();

        for (to, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                let from = name_to_idx.get(dep.step.as_str()).ok_or_else(|| {
                    WorkflowError::UnknownDependency(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name, dep.step
                    ))
                })?;
                graph.add_edge(nodes[*from], nodes[to], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let path = cycle_path(&graph, cycle.node_id())
                .into_iter()
                .map(|n| steps[graph[n]].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            WorkflowError::CycleDetected(path)
        })?;

        Ok(Self {
            order: sorted.into_iter().map(|n| graph[n]).collect(),
            graph,
            nodes,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Step indices in a valid topological order.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// Indices of steps that depend directly on `idx`.
    pub fn dependents(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(self.nodes[idx], Direction::Outgoing)
            .map(|n| self.graph[n])
    }

    /// Number of distinct direct dependencies of `idx`.
    pub fn in_degree(&self, idx: usize) -> usize {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[idx], Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps.len()
    }

    /// Group steps into layers: every step's dependencies lie in earlier layers.
    pub fn layers(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.nodes.len()];
        for &idx in &self.order {
            let d = self
                .graph
                .neighbors_directed(self.nodes[idx], Direction::Incoming)
                .map(|n| depth[self.graph[n]] + 1)
                .max()
                .unwrap_or(0);
            depth[idx] = d;
        }
        let max = depth.iter().copied().max();
        let mut layers = vec![Vec::new(); max.map_or(0, |m| m + 1)];
        for (idx, d) in depth.into_iter().enumerate() {
            layers[d].push(idx);
        }
        layers
    }
}

/// Shortest path from `start` back to itself.
fn cycle_path(graph: &DiGraph<usize, ()>, start: NodeIndex) -> Vec<NodeIndex> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if next == start {
                let mut path = vec![start];
                let mut cur = node;
                while cur != start {
                    path.push(cur);
                    cur = parent[&cur];
                }
                path.push(start);
                let last = path.len() - 1;
                path[1..last].reverse();
                return path;
            }
            if !parent.contains_key(&next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }
    vec![start]
}

/// Validate that steps form a DAG (no cycles, all references exist).
pub fn validate_dag(steps: &[StepDef]) -> Result<(), WorkflowError> {
    StepGraph::build(steps).map(|_| ())
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// One step in a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub name: String,
    pub plugin: String,
    pub action: String,
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Loop source as written, for looped steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_over: Option<String>,
    pub continue_on_error: bool,
    pub estimated_secs: u64,
}

/// What `apply` would do, without executing anything.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub flow: String,
    /// Steps in one layer may run concurrently.
    pub layers: Vec<Vec<PlannedStep>>,
    /// Sum over layers of the longest estimate in each.
    pub estimated_secs: u64,
}

impl ExecutionPlan {
    pub fn step_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_secs)
    }

    /// Distinct plugin names referenced by the plan, sorted.
    pub fn plugins(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .layers
            .iter()
            .flatten()
            .map(|s| s.plugin.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Build the plan for a validated workflow.
pub fn plan_workflow(wf: &Workflow) -> Result<ExecutionPlan, WorkflowError> {
    let graph = StepGraph::build(&wf.steps)?;
    let layers: Vec<Vec<PlannedStep>> = graph
        .layers()
        .into_iter()
        .map(|layer| layer.into_iter().map(|i| planned(&wf.steps[i])).collect())
        .collect();
    let estimated_secs = layers
        .iter()
        .map(|l| l.iter().map(|s| s.estimated_secs).max().unwrap_or(0))
        .sum();
    Ok(ExecutionPlan {
        flow: wf.name.clone(),
        layers,
        estimated_secs,
    })
}

fn planned(step: &StepDef) -> PlannedStep {
    PlannedStep {
        name: step.name.clone(),
        plugin: step.plugin.clone(),
        action: step.action.clone(),
        depends_on: step.depends_on.iter().map(|d| d.step.clone()).collect(),
        condition: step.condition.clone(),
        loop_over: step.loop_spec.as_ref().map(|l| match &l.over {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        continue_on_error: step.continue_on.error,
        estimated_secs: ESTIMATED_STEP_SECS,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
