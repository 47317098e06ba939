//! Conflict resolution by rewriting the dependency graph.
//!
//! Resolution never touches the caller's graph: it clones it and injects or
//! removes ordering edges on the copy. Cycles are broken first so that the
//! serialization passes check new edges against an acyclic graph.

use crate::core::dag::{EdgeKind, TaskGraph};
use crate::core::task::{ExecutorId, TaskId};
use crate::orchestration::detection::{
    find_cycles, Conflict, ConflictKind, ResolutionStrategy,
};
use crate::util::Deadline;
use crate::Result;
use serde::{Deserialize, Serialize};

/// A single dependency edge: `task` depends on `depends_on`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub task: TaskId,
    pub depends_on: TaskId,
}

impl Edge {
    fn new(task: &TaskId, depends_on: &TaskId) -> Self {
        Self {
            task: task.clone(),
            depends_on: depends_on.clone(),
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.depends_on, self.task)
    }
}

/// What resolving one conflict did to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ResolutionOutcome {
    /// Ordering edges were injected.
    EdgesAdded { edges: Vec<Edge> },
    /// A cycle edge was dropped.
    EdgeRemoved { edge: Edge },
    /// Nothing to change; an earlier resolution already covered it.
    AlreadySatisfied,
    /// Left to the packer's per-batch capacity rule.
    DeferredToPacker,
    /// The strategy could not be applied in full. `edges` lists the
    /// ordering edges that were still injected.
    Unresolved {
        reason: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        edges: Vec<Edge>,
    },
}

/// Record of one resolution step, kept on the plan for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResolution {
    pub conflict: ConflictKind,
    pub strategy: ResolutionStrategy,
    pub tasks: Vec<TaskId>,
    #[serde(flatten)]
    pub outcome: ResolutionOutcome,
}

impl AppliedResolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self.outcome, ResolutionOutcome::Unresolved { .. })
    }
}

/// A resolved copy of the graph plus the steps that produced it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub graph: TaskGraph,
    pub applied: Vec<AppliedResolution>,
}

/// Resolve `conflicts` on a copy of `graph`.
pub fn resolve(graph: &TaskGraph, conflicts: &[Conflict]) -> Resolution {
    // An unbounded deadline never expires.
    resolve_within(graph, conflicts, &Deadline::unbounded()).unwrap_or_else(|_| Resolution {
        graph: graph.clone(),
        applied: Vec::new(),
    })
}

/// Resolve `conflicts` on a copy of `graph` under a planning deadline.
///
/// After the per-conflict strategies run, any cycle that survived (for
/// example one sharing nodes with a cycle whose chosen edge was elsewhere)
/// is broken at its DFS closing edge, so the returned graph is acyclic.
pub fn resolve_within(
    graph: &TaskGraph,
    conflicts: &[Conflict],
    deadline: &Deadline,
) -> Result<Resolution> {
    let mut graph = graph.clone();
    let mut applied = Vec::with_capacity(conflicts.len());

    let (cycles, others): (Vec<&Conflict>, Vec<&Conflict>) = conflicts
        .iter()
        .partition(|c| c.resolution == ResolutionStrategy::BreakDependencyChain);

    for conflict in cycles.into_iter().chain(others) {
        deadline.check("conflict resolution")?;
        let outcome = match conflict.resolution {
            ResolutionStrategy::BreakDependencyChain => break_chain(&mut graph, &conflict.tasks),
            ResolutionStrategy::Serialize => {
                let resource = conflict.resource.clone().unwrap_or_default();
                serialize_chain(&mut graph, &conflict.tasks, EdgeKind::Serialized { resource })
            }
            ResolutionStrategy::SerializeSameIdentity => {
                let ranked = rank_by_priority(&graph, &conflict.tasks);
                let executor = conflict
                    .executor
                    .clone()
                    .unwrap_or_else(|| graph_executor(&graph, &ranked));
                serialize_chain(&mut graph, &ranked, EdgeKind::SameIdentity { executor })
            }
            ResolutionStrategy::SpreadAcrossBatches => ResolutionOutcome::DeferredToPacker,
        };

        if let ResolutionOutcome::Unresolved { reason, .. } = &outcome {
            tracing::warn!(
                kind = %conflict.kind,
                tasks = ?conflict.tasks,
                reason = %reason,
                "conflict left unresolved"
            );
        }
        applied.push(AppliedResolution {
            conflict: conflict.kind,
            strategy: conflict.resolution,
            tasks: conflict.tasks.clone(),
            outcome,
        });
    }

    // Each pass removes one edge, so the sweep is bounded by the edge count.
    for _ in 0..=graph.dependency_count() {
        deadline.check("cycle sweep")?;
        let Some(cycle) = find_cycles(&graph, deadline, true)?.pop() else {
            break;
        };
        let (from, to) = cycle.closing;
        let edge = Edge::new(&graph.task_at(to).id, &graph.task_at(from).id);
        graph.remove_dependency(&edge.task, &edge.depends_on);
        tracing::warn!(edge = %edge, "removed residual cycle edge");
        applied.push(AppliedResolution {
            conflict: ConflictKind::CircularDependency,
            strategy: ResolutionStrategy::BreakDependencyChain,
            tasks: cycle
                .path
                .iter()
                .map(|&i| graph.task_at(i).id.clone())
                .collect(),
            outcome: ResolutionOutcome::EdgeRemoved { edge },
        });
    }

    Ok(Resolution { graph, applied })
}

/// Drop the edge from the last cycle member (by submission order) back to
/// the first. When the cycle does not run through that edge, drop the edge
/// that closed the cycle during detection instead.
fn break_chain(graph: &mut TaskGraph, cycle: &[TaskId]) -> ResolutionOutcome {
    let (Some(first_in_path), Some(last_in_path)) = (cycle.first(), cycle.last()) else {
        return ResolutionOutcome::AlreadySatisfied;
    };

    let still_closed = cycle
        .iter()
        .zip(cycle.iter().cycle().skip(1))
        .all(|(from, to)| graph.has_dependency(to, from));
    if !still_closed {
        return ResolutionOutcome::AlreadySatisfied;
    }

    let by_position = |id: &&TaskId| graph.position(id).unwrap_or(usize::MAX);
    let first = cycle.iter().min_by_key(by_position).unwrap_or(first_in_path);
    let last = cycle.iter().max_by_key(by_position).unwrap_or(last_in_path);

    let edge = if graph.has_dependency(first, last) {
        Edge::new(first, last)
    } else {
        Edge::new(first_in_path, last_in_path)
    };

    if graph.remove_dependency(&edge.task, &edge.depends_on) {
        tracing::debug!(edge = %edge, "broke dependency cycle");
        ResolutionOutcome::EdgeRemoved { edge }
    } else {
        ResolutionOutcome::Unresolved {
            reason: format!("edge {} not found in cycle", edge),
            edges: Vec::new(),
        }
    }
}

/// Make each task depend on its predecessor in `ordered`. An edge that
/// would close a cycle is skipped and the rest are kept; the conflict is
/// then reported unresolved.
fn serialize_chain(graph: &mut TaskGraph, ordered: &[TaskId], kind: EdgeKind) -> ResolutionOutcome {
    let mut added = Vec::new();
    let mut skipped = Vec::new();

    for pair in ordered.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        match graph.add_dependency(cur, prev, kind.clone()) {
            Ok(true) => added.push(Edge::new(cur, prev)),
            Ok(false) => {}
            Err(err) => {
                tracing::debug!(edge = %Edge::new(cur, prev), error = %err, "skipped ordering edge");
                skipped.push(Edge::new(cur, prev));
            }
        }
    }

    if !skipped.is_empty() {
        let skipped: Vec<String> = skipped.iter().map(Edge::to_string).collect();
        return ResolutionOutcome::Unresolved {
            reason: format!("would create a cycle: {}", skipped.join(", ")),
            edges: added,
        };
    }
    if added.is_empty() {
        ResolutionOutcome::AlreadySatisfied
    } else {
        tracing::debug!(edges = added.len(), kind = %kind, "serialized tasks");
        ResolutionOutcome::EdgesAdded { edges: added }
    }
}

/// Order tasks by priority, then submission order.
fn rank_by_priority(graph: &TaskGraph, ids: &[TaskId]) -> Vec<TaskId> {
    let mut ranked: Vec<TaskId> = ids.to_vec();
    ranked.sort_by_key(|id| {
        (
            graph.task(id).map(|t| t.priority),
            graph.position(id).unwrap_or(usize::MAX),
        )
    });
    ranked
}

fn graph_executor(graph: &TaskGraph, ids: &[TaskId]) -> ExecutorId {
    ids.first()
        .and_then(|id| graph.task(id))
        .map(|t| t.executor.clone())
        .unwrap_or_else(|| ExecutorId::new(""))
}
