//! Batch packing.
//!
//! The packer walks a topological order once and greedily fills the current
//! batch. A task joins the open batch only if:
//!
//! 1. every dependency sits in a strictly earlier, closed batch,
//! 2. its executor still has a free slot in this batch (`max_concurrent`,
//!    or a single slot for a single-writer identity),
//! 3. it holds no exclusive tag another member touches, and touches no tag
//!    another member holds exclusively.
//!
//! Otherwise the batch is closed and the task opens the next one. A soft
//! size cap closes batches early. A task that cannot join even an empty
//! batch (an executor with zero capacity) is placed alone so packing always
//! makes progress.

use crate::core::dag::TaskGraph;
use crate::core::task::{ExecutorId, TaskId, TaskSpec};
use crate::error::{Error, Result};
use crate::orchestration::capacity::CapacityRegistry;
use crate::orchestration::detection::{ResourcePolicy, SingleWriterSet};
use crate::util::{duration_ms, Deadline};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Default soft cap on tasks per batch.
pub const DEFAULT_BATCH_SIZE_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerConfig {
    pub batch_size_cap: usize,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            batch_size_cap: DEFAULT_BATCH_SIZE_CAP,
        }
    }
}

/// A set of tasks that are safe to run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub tasks: Vec<TaskId>,
    /// Longest member estimate: members run in parallel.
    #[serde(rename = "estimated_ms", with = "duration_ms")]
    pub estimated: Duration,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains(id)
    }
}

/// Output of one packing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub batches: Vec<Batch>,
    /// Resource tag to the executors observed using it.
    pub resource_allocation: BTreeMap<String, BTreeSet<ExecutorId>>,
    /// Sum of batch estimates.
    pub estimated_total: Duration,
    /// Tasks that were placed alone because they fit no batch.
    pub forced: Vec<TaskId>,
}

/// The batch being filled.
#[derive(Default)]
struct OpenBatch<'a> {
    tasks: Vec<TaskId>,
    estimated: Duration,
    per_executor: HashMap<&'a ExecutorId, usize>,
    used_tags: BTreeSet<&'a str>,
    held_tags: BTreeSet<&'a str>,
}

impl<'a> OpenBatch<'a> {
    fn admit(&mut self, task: &'a TaskSpec, exclusive: BTreeSet<&'a str>) {
        self.tasks.push(task.id.clone());
        self.estimated = self.estimated.max(task.estimated_duration);
        *self.per_executor.entry(&task.executor).or_default() += 1;
        self.used_tags.extend(task.resource_tags().map(String::as_str));
        self.held_tags.extend(exclusive);
    }

    fn close(self) -> Batch {
        Batch {
            tasks: self.tasks,
            estimated: self.estimated,
        }
    }
}

/// Packs a topological order into batches.
#[derive(Debug, Clone, Default)]
pub struct BatchPacker {
    config: PackerConfig,
    policy: ResourcePolicy,
    single_writers: SingleWriterSet,
}

impl BatchPacker {
    pub fn new(config: PackerConfig, policy: ResourcePolicy) -> Self {
        Self {
            config,
            policy,
            single_writers: SingleWriterSet::default(),
        }
    }

    /// Identities limited to one task per batch, whatever their capacity.
    pub fn with_single_writers(mut self, single_writers: SingleWriterSet) -> Self {
        self.single_writers = single_writers;
        self
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    pub fn pack(
        &self,
        graph: &TaskGraph,
        order: &[TaskId],
        registry: &CapacityRegistry,
    ) -> Result<Packing> {
        self.pack_within(graph, order, registry, &Deadline::unbounded())
    }

    /// Pack `order` under a planning deadline.
    ///
    /// # Errors
    /// Fails if `order` names a task missing from `graph`, or places a task
    /// before one of its dependencies.
    pub fn pack_within(
        &self,
        graph: &TaskGraph,
        order: &[TaskId],
        registry: &CapacityRegistry,
        deadline: &Deadline,
    ) -> Result<Packing> {
        let cap = self.config.batch_size_cap.max(1);
        let mut batches: Vec<Batch> = Vec::new();
        let mut placed: HashMap<&TaskId, usize> = HashMap::with_capacity(order.len());
        let mut open = OpenBatch::default();
        let mut forced = Vec::new();

        for id in order {
            deadline.check("batch packing")?;
            let task = graph
                .task(id)
                .ok_or_else(|| Error::UnknownTask(id.clone()))?;
            let exclusive = self.policy.exclusive_tags(task);

            if !self.fits(task, &exclusive, &open, &placed, batches.len(), registry)? {
                if !open.tasks.is_empty() {
                    batches.push(std::mem::take(&mut open).close());
                }
                if !self.fits(task, &exclusive, &open, &placed, batches.len(), registry)? {
                    tracing::warn!(
                        task = %task.id,
                        executor = %task.executor,
                        "task fits no batch; placing it alone"
                    );
                    open.admit(task, exclusive);
                    placed.insert(&task.id, batches.len());
                    batches.push(std::mem::take(&mut open).close());
                    forced.push(task.id.clone());
                    continue;
                }
            }

            open.admit(task, exclusive);
            placed.insert(&task.id, batches.len());
            if open.tasks.len() >= cap {
                batches.push(std::mem::take(&mut open).close());
            }
        }
        if !open.tasks.is_empty() {
            batches.push(open.close());
        }

        let estimated_total: Duration = batches.iter().map(|b| b.estimated).sum();
        tracing::debug!(
            batches = batches.len(),
            tasks = order.len(),
            estimated_ms = estimated_total.as_millis() as u64,
            "packed plan"
        );

        Ok(Packing {
            batches,
            resource_allocation: resource_allocation(graph),
            estimated_total,
            forced,
        })
    }

    /// Whether `task` may join `open`, which will become batch `current`.
    fn fits(
        &self,
        task: &TaskSpec,
        exclusive: &BTreeSet<&str>,
        open: &OpenBatch<'_>,
        placed: &HashMap<&TaskId, usize>,
        current: usize,
        registry: &CapacityRegistry,
    ) -> Result<bool> {
        for dep in &task.dependencies {
            match placed.get(dep) {
                Some(&batch) if batch < current => {}
                Some(_) => return Ok(false),
                None => {
                    return Err(Error::Validation(format!(
                        "order is not topological: {} comes before its dependency {}",
                        task.id, dep
                    )))
                }
            }
        }

        let mut slots = registry.max_concurrent(&task.executor);
        if self.single_writers.matches(&task.executor) {
            slots = slots.min(1);
        }
        let running = open.per_executor.get(&task.executor).copied().unwrap_or(0);
        if running >= slots {
            return Ok(false);
        }

        if exclusive.iter().any(|tag| open.used_tags.contains(tag)) {
            return Ok(false);
        }
        Ok(!task
            .resource_tags()
            .any(|tag| open.held_tags.contains(tag.as_str())))
    }
}

fn resource_allocation(graph: &TaskGraph) -> BTreeMap<String, BTreeSet<ExecutorId>> {
    let mut allocation: BTreeMap<String, BTreeSet<ExecutorId>> = BTreeMap::new();
    for task in graph.tasks() {
        for tag in task.resource_tags() {
            allocation
                .entry(tag.clone())
                .or_default()
                .insert(task.executor.clone());
        }
    }
    allocation
}
