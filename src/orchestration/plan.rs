//! The execution plan handed from planning to the engine.

use crate::core::task::{ExecutorId, TaskId, TaskSpec};
use crate::orchestration::detection::Conflict;
use crate::orchestration::packer::{Batch, Packing};
use crate::orchestration::resolver::AppliedResolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// An ordered sequence of batches, ready to run.
///
/// Besides the batches, a plan carries the resolved task copies it was
/// packed from, so the engine runs exactly what was planned. The plan is
/// consumed by value when executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub batches: Vec<Batch>,
    pub resource_allocation: BTreeMap<String, BTreeSet<ExecutorId>>,
    pub estimated_total_time_ms: u64,
    pub conflicts_detected: Vec<Conflict>,
    pub optimizations_applied: Vec<AppliedResolution>,
    /// Resolved task copies in submission order.
    pub tasks: Vec<TaskSpec>,
}

impl ExecutionPlan {
    pub fn new(
        packing: Packing,
        tasks: Vec<TaskSpec>,
        conflicts_detected: Vec<Conflict>,
        optimizations_applied: Vec<AppliedResolution>,
    ) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            created_at: Utc::now(),
            batches: packing.batches,
            resource_allocation: packing.resource_allocation,
            estimated_total_time_ms: packing.estimated_total.as_millis() as u64,
            conflicts_detected,
            optimizations_applied,
            tasks,
        }
    }

    pub fn task_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Index of the batch holding `id`.
    pub fn batch_of(&self, id: &TaskId) -> Option<usize> {
        self.batches.iter().position(|b| b.contains(id))
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Batches as plain id lists.
    pub fn batch_ids(&self) -> Vec<Vec<&str>> {
        self.batches
            .iter()
            .map(|b| b.tasks.iter().map(TaskId::as_str).collect())
            .collect()
    }
}
