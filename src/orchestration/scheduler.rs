//! Scheduler facade tying planning and execution together.
//!
//! The [`Scheduler`] borrows a [`CapacityRegistry`] for the length of one
//! cycle and owns the settings for every stage. [`Scheduler::plan`] runs the
//! planning pipeline; [`Scheduler::run`] plans and then executes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskweave::core::TaskSpec;
//! use taskweave::orchestration::{CapacityRegistry, Scheduler, TaskOutput};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = CapacityRegistry::new();
//! let scheduler = Scheduler::new(&registry);
//! let tasks = vec![TaskSpec::new("build", "builder")];
//!
//! let plan = scheduler.plan(&tasks)?;
//! let runner = Arc::new(|_task, _cancel| async { TaskOutput::success("done") });
//! let summary = scheduler.execute(plan, runner, CancellationToken::new()).await?;
//! ```

use crate::config::Config;
use crate::core::dag::TaskGraph;
use crate::core::task::TaskSpec;
use crate::error::Result;
use crate::orchestration::balancer::{balance, BalanceOutcome};
use crate::orchestration::capacity::CapacityRegistry;
use crate::orchestration::dependency::topological_order;
use crate::orchestration::detection::ConflictDetector;
use crate::orchestration::engine::{
    EngineConfig, ExecutionEngine, ExecutionEvent, ExecutionSummary, TaskRunner,
};
use crate::orchestration::packer::BatchPacker;
use crate::orchestration::plan::ExecutionPlan;
use crate::orchestration::resolver::resolve_within;
use crate::util::Deadline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One planning and execution cycle against a capacity snapshot.
#[derive(Debug, Clone)]
pub struct Scheduler<'a> {
    /// Capacity snapshot, read-only for the cycle.
    registry: &'a CapacityRegistry,
    detector: ConflictDetector,
    packer: BatchPacker,
    engine: ExecutionEngine,
    /// Wall-clock budget for planning, if any.
    planning_budget: Option<Duration>,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler with default settings.
    pub fn new(registry: &'a CapacityRegistry) -> Self {
        Self {
            registry,
            detector: ConflictDetector::default(),
            packer: BatchPacker::default(),
            engine: ExecutionEngine::default(),
            planning_budget: None,
        }
    }

    /// Create a scheduler with every stage configured from `config`.
    ///
    /// # Errors
    /// Fails if a configured single-writer pattern is not a valid regex.
    pub fn from_config(registry: &'a CapacityRegistry, config: &Config) -> Result<Self> {
        let single_writers = config.single_writers()?;
        Ok(Self {
            registry,
            detector: ConflictDetector::new(config.resource_policy(), single_writers.clone()),
            packer: BatchPacker::new(config.packer_config(), config.resource_policy())
                .with_single_writers(single_writers),
            engine: ExecutionEngine::new(config.engine_config()),
            planning_budget: config.planning_budget(),
        })
    }

    pub fn with_detector(mut self, detector: ConflictDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_packer(mut self, packer: BatchPacker) -> Self {
        self.packer = packer;
        self
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine = ExecutionEngine::new(config);
        self
    }

    pub fn with_planning_budget(mut self, budget: Duration) -> Self {
        self.planning_budget = Some(budget);
        self
    }

    /// Stream execution events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.engine = self.engine.with_events(tx);
        self
    }

    pub fn registry(&self) -> &CapacityRegistry {
        self.registry
    }

    /// Turn a submission into an execution plan.
    ///
    /// Validates the submission, detects and resolves conflicts on a copy,
    /// orders the resolved graph and packs it into batches. The caller's
    /// specs are never modified.
    ///
    /// # Errors
    /// - validation errors for duplicate ids or dangling dependencies
    /// - [`Error::Cycle`](crate::Error::Cycle) if a cycle survives resolution
    /// - [`Error::PlanningTimeout`](crate::Error::PlanningTimeout) when the
    ///   planning budget runs out
    pub fn plan(&self, tasks: &[TaskSpec]) -> Result<ExecutionPlan> {
        let deadline = Deadline::new(self.planning_budget);
        let graph = TaskGraph::from_tasks(tasks)?;

        let conflicts = self
            .detector
            .detect_within(&graph, Some(self.registry), &deadline)?;
        let resolution = resolve_within(&graph, &conflicts, &deadline)?;
        let order = topological_order(&resolution.graph)?;
        let packing = self
            .packer
            .pack_within(&resolution.graph, &order, self.registry, &deadline)?;

        let plan = ExecutionPlan::new(
            packing,
            resolution.graph.into_tasks(),
            conflicts,
            resolution.applied,
        );
        tracing::info!(
            plan_id = %plan.plan_id,
            tasks = plan.task_count(),
            batches = plan.batches.len(),
            conflicts = plan.conflicts_detected.len(),
            estimated_ms = plan.estimated_total_time_ms,
            "plan created"
        );
        Ok(plan)
    }

    /// Execute a plan produced by [`Scheduler::plan`].
    pub async fn execute(
        &self,
        plan: ExecutionPlan,
        runner: Arc<dyn TaskRunner>,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        self.engine.execute(plan, runner, cancel).await
    }

    /// Plan `tasks` and execute the plan.
    pub async fn run(
        &self,
        tasks: &[TaskSpec],
        runner: Arc<dyn TaskRunner>,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let plan = self.plan(tasks)?;
        self.execute(plan, runner, cancel).await
    }

    /// Decide which pending tasks each executor takes on this cycle.
    pub fn balance(&self, pending: &[TaskSpec]) -> BalanceOutcome {
        balance(pending, self.registry)
    }
}
