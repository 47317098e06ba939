//! Topological ordering of a resolved task graph.

use crate::core::dag::TaskGraph;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Order tasks so every dependency precedes its dependents.
///
/// Uses Kahn's algorithm with a FIFO queue. The queue is seeded with the
/// zero in-degree tasks in submission order, and tasks released by a
/// completed node are enqueued in submission order too, so equal input
/// always gives an equal order.
///
/// # Errors
/// Returns [`Error::Cycle`] naming the tasks that never became ready when
/// the graph still contains a cycle.
pub fn topological_order(graph: &TaskGraph) -> Result<Vec<TaskId>> {
    let mut in_degree: Vec<usize> = graph
        .indices()
        .map(|i| graph.dependencies(i).len())
        .collect();

    let mut queue: VecDeque<_> = graph.indices().filter(|i| in_degree[i.index()] == 0).collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = queue.pop_front() {
        order.push(graph.task_at(node).id.clone());
        for dependent in graph.dependents(node) {
            let degree = &mut in_degree[dependent.index()];
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() < graph.len() {
        let stuck = graph
            .indices()
            .filter(|i| in_degree[i.index()] > 0)
            .map(|i| graph.task_at(i).id.clone())
            .collect();
        return Err(Error::Cycle { tasks: stuck });
    }

    Ok(order)
}
