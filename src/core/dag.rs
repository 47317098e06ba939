//! Task graph for dependency management.
//!
//! [`TaskGraph`] owns copies of a submission's task specs as petgraph nodes.
//! Nodes are inserted in submission order and never removed, so a node's
//! index doubles as its submission position; planning stages use that for
//! stable tie-breaking. Edges point from a dependency to its dependent.

use crate::core::task::{ExecutorId, TaskId, TaskSpec};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why one task must finish before another starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EdgeKind {
    /// Declared in the submission.
    #[default]
    Declared,
    /// Injected to serialize holders of an exclusive resource.
    Serialized {
        /// The contended resource tag.
        resource: String,
    },
    /// Injected to serialize tasks on a single-writer executor.
    SameIdentity {
        /// The single-writer executor.
        executor: ExecutorId,
    },
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Declared => write!(f, "declared"),
            EdgeKind::Serialized { resource } => write!(f, "serialized: {}", resource),
            EdgeKind::SameIdentity { executor } => write!(f, "same identity: {}", executor),
        }
    }
}

/// Dependency graph over one submission.
#[derive(Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskSpec, EdgeKind>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Build a graph from a submission, copying every spec.
    ///
    /// # Errors
    /// Rejects the whole submission on a duplicate id or on a dependency
    /// that does not name a task in the submission.
    pub fn from_tasks(tasks: &[TaskSpec]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut task_index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if task_index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id.clone()));
            }
            let index = graph.add_node(task.clone());
            task_index.insert(task.id.clone(), index);
        }

        for task in tasks {
            let to = task_index[&task.id];
            for dep in &task.dependencies {
                let from = task_index
                    .get(dep)
                    .ok_or_else(|| Error::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    })?;
                graph.add_edge(*from, to, EdgeKind::Declared);
            }
        }

        Ok(Self { graph, task_index })
    }

    /// Get the number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get the number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    pub fn node_index(&self, id: &TaskId) -> Option<NodeIndex> {
        self.task_index.get(id).copied()
    }

    /// Position of a task in the original submission.
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.node_index(id).map(NodeIndex::index)
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn task_at(&self, index: NodeIndex) -> &TaskSpec {
        &self.graph[index]
    }

    /// Tasks in submission order, with dependencies reflecting every
    /// injected or removed edge.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.graph.node_weights()
    }

    /// Consume the graph, returning the resolved task copies in submission order.
    pub fn into_tasks(self) -> Vec<TaskSpec> {
        let (nodes, _) = self.graph.into_nodes_edges();
        nodes.into_iter().map(|node| node.weight).collect()
    }

    /// Node indices in submission order.
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    /// Check whether `task` depends directly on `on`.
    pub fn has_dependency(&self, task: &TaskId, on: &TaskId) -> bool {
        match (self.task_index.get(on), self.task_index.get(task)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    pub fn edge_kind(&self, task: &TaskId, on: &TaskId) -> Option<&EdgeKind> {
        let from = self.task_index.get(on)?;
        let to = self.task_index.get(task)?;
        let edge = self.graph.find_edge(*from, *to)?;
        self.graph.edge_weight(edge)
    }

    /// Would making `task` depend on `on` close a cycle?
    pub fn would_create_cycle(&self, task: &TaskId, on: &TaskId) -> bool {
        match (self.task_index.get(on), self.task_index.get(task)) {
            (Some(&from), Some(&to)) => {
                from == to || has_path_connecting(&self.graph, to, from, None)
            }
            _ => false,
        }
    }

    /// Make `task` depend on `on`.
    ///
    /// Returns `Ok(false)` when the edge already exists.
    ///
    /// # Errors
    /// Returns an error if either task is unknown or if the edge would
    /// create a cycle; the graph is left unchanged in both cases.
    pub fn add_dependency(&mut self, task: &TaskId, on: &TaskId, kind: EdgeKind) -> Result<bool> {
        let from = self
            .node_index(on)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", on)))?;
        let to = self
            .node_index(task)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", task)))?;

        if self.graph.find_edge(from, to).is_some() {
            return Ok(false);
        }
        if self.would_create_cycle(task, on) {
            return Err(Error::Validation(format!(
                "Making {} depend on {} would create a cycle",
                task, on
            )));
        }

        self.graph.add_edge(from, to, kind);
        self.graph[to].dependencies.insert(on.clone());
        Ok(true)
    }

    /// Drop the edge that makes `task` depend on `on`. Returns whether it existed.
    pub fn remove_dependency(&mut self, task: &TaskId, on: &TaskId) -> bool {
        let (Some(from), Some(to)) = (self.node_index(on), self.node_index(task)) else {
            return false;
        };
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                self.graph[to].dependencies.remove(on);
                true
            }
            None => false,
        }
    }

    /// Direct dependents of a node, in submission order.
    pub fn dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(index, Direction::Outgoing)
    }

    /// Direct dependencies of a node, in submission order.
    pub fn dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(index, Direction::Incoming)
    }

    fn sorted_neighbors(&self, index: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(index, dir).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Get the underlying graph for advanced operations.
    pub fn graph(&self) -> &DiGraph<TaskSpec, EdgeKind> {
        &self.graph
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
