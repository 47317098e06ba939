//! Conflict detection over a validated task graph.
//!
//! Detection is a pure function of its input snapshot. Checks run in a
//! fixed order and the output is sorted by conflict kind, then by the
//! lowest implicated task id, so identical input always yields an
//! identical conflict list.
//!
//! ## Checks
//!
//! - **Resource contention**: a resource tag touched by more than one task
//!   when the tag is exclusive, either by [`ResourcePolicy`] or because one
//!   of the tasks declares it exclusive.
//! - **Circular dependency**: an iterative DFS with an explicit stack; any
//!   edge back into a node on the current path is a cycle.
//! - **Exclusive operation**: two or more tasks owned by the same
//!   single-writer executor identity.
//! - **Capacity exceeded**: an executor owning more tasks than its
//!   `max_concurrent` (only when a [`CapacityRegistry`] is supplied).

use crate::core::dag::TaskGraph;
use crate::core::task::{ExecutorId, TaskId, TaskSpec};
use crate::orchestration::capacity::CapacityRegistry;
use crate::util::Deadline;
use crate::Result;
use petgraph::graph::NodeIndex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kinds of conflict, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ResourceContention,
    CircularDependency,
    ExclusiveOperation,
    CapacityExceeded,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::ResourceContention => write!(f, "resource_contention"),
            ConflictKind::CircularDependency => write!(f, "circular_dependency"),
            ConflictKind::ExclusiveOperation => write!(f, "exclusive_operation"),
            ConflictKind::CapacityExceeded => write!(f, "capacity_exceeded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Suggested way to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Chain the implicated tasks in submission order.
    Serialize,
    /// Chain the implicated tasks by priority, then submission order.
    SerializeSameIdentity,
    /// Drop one edge of the cycle.
    BreakDependencyChain,
    /// Leave it to the packer's per-batch capacity rule.
    SpreadAcrossBatches,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionStrategy::Serialize => write!(f, "serialize"),
            ResolutionStrategy::SerializeSameIdentity => write!(f, "serialize_same_identity"),
            ResolutionStrategy::BreakDependencyChain => write!(f, "break_dependency_chain"),
            ResolutionStrategy::SpreadAcrossBatches => write!(f, "spread_across_batches"),
        }
    }
}

/// A detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Implicated tasks. Submission order, except for cycles, which list
    /// the path in traversal order.
    pub tasks: Vec<TaskId>,
    pub resolution: ResolutionStrategy,
    pub severity: Severity,
    /// Contended resource tag, for resource contention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Executor identity, for exclusive-operation and capacity conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorId>,
}

impl Conflict {
    fn lowest_task(&self) -> Option<&TaskId> {
        self.tasks.iter().min()
    }
}

/// How a resource tag may be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAccess {
    Exclusive,
    Shared,
}

/// Static exclusivity table for resource tags. Unlisted tags are shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePolicy {
    table: BTreeMap<String, ResourceAccess>,
}

impl ResourcePolicy {
    pub fn new(table: BTreeMap<String, ResourceAccess>) -> Self {
        Self { table }
    }

    pub fn with(mut self, tag: &str, access: ResourceAccess) -> Self {
        self.table.insert(tag.to_string(), access);
        self
    }

    pub fn is_exclusive(&self, tag: &str) -> bool {
        self.table.get(tag) == Some(&ResourceAccess::Exclusive)
    }

    /// Tags `task` must hold alone: its declared exclusive tags plus any
    /// required tag the table marks exclusive.
    pub fn exclusive_tags<'a>(&self, task: &'a TaskSpec) -> BTreeSet<&'a str> {
        task.exclusive_resources
            .iter()
            .chain(
                task.required_resources
                    .iter()
                    .filter(|tag| self.is_exclusive(tag)),
            )
            .map(String::as_str)
            .collect()
    }
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self::new(BTreeMap::new())
            .with("git_operations", ResourceAccess::Exclusive)
            .with("database", ResourceAccess::Shared)
            .with("file_system", ResourceAccess::Shared)
            .with("network", ResourceAccess::Shared)
    }
}

/// Executor identities that may only run one task at a time per plan.
#[derive(Debug, Clone)]
pub struct SingleWriterSet {
    patterns: Vec<Regex>,
}

impl SingleWriterSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn matches(&self, executor: &ExecutorId) -> bool {
        self.patterns.iter().any(|p| p.is_match(executor.as_str()))
    }
}

impl Default for SingleWriterSet {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_SINGLE_WRITERS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

/// Identities treated as single-writer when nothing is configured.
pub const DEFAULT_SINGLE_WRITERS: &[&str] = &["^git[-_]ops"];

/// A cycle found by DFS: the path and the edge that closed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FoundCycle {
    pub path: Vec<NodeIndex>,
    /// `(dependency, dependent)` of the back edge.
    pub closing: (NodeIndex, NodeIndex),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Find cycles with an iterative DFS over dependency-to-dependent edges.
///
/// Roots and neighbors are visited in submission order. The explicit stack
/// never grows past the task count. With `first_only` the scan stops at the
/// first back edge.
pub(crate) fn find_cycles(
    graph: &TaskGraph,
    deadline: &Deadline,
    first_only: bool,
) -> Result<Vec<FoundCycle>> {
    let mut marks = vec![Mark::Unvisited; graph.len()];
    let mut cycles = Vec::new();

    for root in graph.indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        deadline.check("cycle detection")?;

        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
        marks[root.index()] = Mark::OnPath;
        stack.push((root, graph.dependents(root), 0));

        while let Some((node, next, cursor)) = stack.last_mut() {
            let node = *node;
            if *cursor == next.len() {
                marks[node.index()] = Mark::Done;
                stack.pop();
                continue;
            }
            let child = next[*cursor];
            *cursor += 1;

            match marks[child.index()] {
                Mark::Unvisited => {
                    marks[child.index()] = Mark::OnPath;
                    let children = graph.dependents(child);
                    stack.push((child, children, 0));
                }
                Mark::OnPath => {
                    let start = stack
                        .iter()
                        .position(|(n, _, _)| *n == child)
                        .unwrap_or(0);
                    let path = stack[start..].iter().map(|(n, _, _)| *n).collect();
                    cycles.push(FoundCycle {
                        path,
                        closing: (node, child),
                    });
                    if first_only {
                        return Ok(cycles);
                    }
                }
                Mark::Done => {}
            }
        }
    }

    Ok(cycles)
}

/// Detects conflicts in a task graph.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    policy: ResourcePolicy,
    single_writers: SingleWriterSet,
}

impl ConflictDetector {
    pub fn new(policy: ResourcePolicy, single_writers: SingleWriterSet) -> Self {
        Self {
            policy,
            single_writers,
        }
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    /// Detect every conflict in `graph`.
    pub fn detect(&self, graph: &TaskGraph) -> Vec<Conflict> {
        // An unbounded deadline never expires.
        self.detect_within(graph, None, &Deadline::unbounded())
            .unwrap_or_default()
    }

    /// Detect conflicts under a planning deadline, including capacity
    /// overruns when a registry is given.
    pub fn detect_within(
        &self,
        graph: &TaskGraph,
        registry: Option<&CapacityRegistry>,
        deadline: &Deadline,
    ) -> Result<Vec<Conflict>> {
        let mut conflicts = self.resource_contention(graph);
        deadline.check("conflict detection")?;
        conflicts.extend(self.circular_dependencies(graph, deadline)?);
        conflicts.extend(self.exclusive_operations(graph));
        if let Some(registry) = registry {
            conflicts.extend(capacity_overruns(graph, registry));
        }

        conflicts.sort_by(|a, b| {
            (a.kind, a.lowest_task(), &a.resource, &a.executor, &a.tasks).cmp(&(
                b.kind,
                b.lowest_task(),
                &b.resource,
                &b.executor,
                &b.tasks,
            ))
        });

        for conflict in &conflicts {
            tracing::debug!(
                kind = %conflict.kind,
                tasks = ?conflict.tasks,
                resolution = %conflict.resolution,
                "conflict detected"
            );
        }
        Ok(conflicts)
    }

    fn resource_contention(&self, graph: &TaskGraph) -> Vec<Conflict> {
        let mut users: BTreeMap<&str, (Vec<&TaskId>, bool)> = BTreeMap::new();
        for task in graph.tasks() {
            for tag in task.resource_tags() {
                let entry = users.entry(tag.as_str()).or_default();
                entry.0.push(&task.id);
                entry.1 |= task.exclusive_resources.contains(tag);
            }
        }

        users
            .into_iter()
            .filter(|(tag, (ids, declared))| ids.len() > 1 && (*declared || self.policy.is_exclusive(tag)))
            .map(|(tag, (ids, _))| Conflict {
                kind: ConflictKind::ResourceContention,
                tasks: ids.into_iter().cloned().collect(),
                resolution: ResolutionStrategy::Serialize,
                severity: Severity::High,
                resource: Some(tag.to_string()),
                executor: None,
            })
            .collect()
    }

    fn circular_dependencies(&self, graph: &TaskGraph, deadline: &Deadline) -> Result<Vec<Conflict>> {
        Ok(find_cycles(graph, deadline, false)?
            .into_iter()
            .map(|cycle| Conflict {
                kind: ConflictKind::CircularDependency,
                tasks: cycle
                    .path
                    .iter()
                    .map(|&i| graph.task_at(i).id.clone())
                    .collect(),
                resolution: ResolutionStrategy::BreakDependencyChain,
                severity: Severity::Critical,
                resource: None,
                executor: None,
            })
            .collect())
    }

    fn exclusive_operations(&self, graph: &TaskGraph) -> Vec<Conflict> {
        group_by_executor(graph)
            .into_iter()
            .filter(|(executor, ids)| ids.len() > 1 && self.single_writers.matches(executor))
            .map(|(executor, ids)| Conflict {
                kind: ConflictKind::ExclusiveOperation,
                tasks: ids.into_iter().cloned().collect(),
                resolution: ResolutionStrategy::SerializeSameIdentity,
                severity: Severity::High,
                resource: None,
                executor: Some(executor.clone()),
            })
            .collect()
    }
}

fn capacity_overruns(graph: &TaskGraph, registry: &CapacityRegistry) -> Vec<Conflict> {
    group_by_executor(graph)
        .into_iter()
        .filter(|(executor, ids)| ids.len() > registry.max_concurrent(executor))
        .map(|(executor, ids)| Conflict {
            kind: ConflictKind::CapacityExceeded,
            tasks: ids.into_iter().cloned().collect(),
            resolution: ResolutionStrategy::SpreadAcrossBatches,
            severity: Severity::Medium,
            resource: None,
            executor: Some(executor.clone()),
        })
        .collect()
}

fn group_by_executor(graph: &TaskGraph) -> BTreeMap<&ExecutorId, Vec<&TaskId>> {
    let mut groups: BTreeMap<&ExecutorId, Vec<&TaskId>> = BTreeMap::new();
    for task in graph.tasks() {
        groups.entry(&task.executor).or_default().push(&task.id);
    }
    groups
}
