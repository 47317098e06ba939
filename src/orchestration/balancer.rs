//! Workload balancing ahead of submission.
//!
//! Decides which pending tasks each executor takes on this cycle. Pure:
//! nothing is executed and the registry is only read.

use crate::core::task::{ExecutorId, TaskSpec};
use crate::orchestration::capacity::CapacityRegistry;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Admitted tasks per executor, plus everything that has to wait.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceOutcome {
    pub admitted: BTreeMap<ExecutorId, Vec<TaskSpec>>,
    pub deferred: Vec<TaskSpec>,
}

impl BalanceOutcome {
    pub fn admitted_count(&self) -> usize {
        self.admitted.values().map(Vec::len).sum()
    }
}

/// Group `pending` by executor and admit up to each executor's
/// `max_concurrent`.
///
/// Within a group tasks are ranked by priority (Critical first), then by
/// longer estimated duration, then by submission order. Critical and High
/// tasks therefore claim slots before anything else; remaining slots go to
/// the best-ranked of the rest. Tasks past capacity are deferred, never
/// dropped.
pub fn balance(pending: &[TaskSpec], registry: &CapacityRegistry) -> BalanceOutcome {
    let mut groups: BTreeMap<&ExecutorId, Vec<&TaskSpec>> = BTreeMap::new();
    for task in pending {
        groups.entry(&task.executor).or_default().push(task);
    }

    let mut outcome = BalanceOutcome::default();
    for (executor, mut tasks) in groups {
        // Stable sort keeps submission order among equal keys.
        tasks.sort_by_key(|t| (t.priority, Reverse(t.estimated_duration)));

        let capacity = registry.max_concurrent(executor);
        let split = capacity.min(tasks.len());
        let deferred = tasks.split_off(split);
        if !deferred.is_empty() {
            tracing::debug!(
                executor = %executor,
                capacity,
                deferred = deferred.len(),
                "executor oversubscribed"
            );
        }

        if !tasks.is_empty() {
            outcome
                .admitted
                .insert(executor.clone(), tasks.into_iter().cloned().collect());
        }
        outcome.deferred.extend(deferred.into_iter().cloned());
    }
    outcome
}
