//! Execution engine.
//!
//! Runs an [`ExecutionPlan`] batch by batch. Each batch gets its own
//! worker pool: a semaphore sized `min(batch len, max_workers)` and a
//! `JoinSet` of spawned attempts. A batch drains completely before the next
//! one starts. Within a batch, tasks run concurrently in no defined order.
//!
//! Every task is retried up to its `max_retries` with capped exponential
//! backoff, and each attempt is bounded by the task's timeout. A terminal
//! failure never aborts its siblings; only the opt-in critical-failure
//! policy or plan cancellation stops later work, and tasks that never
//! launched are recorded as skipped. A critical failure also stops members
//! of its own batch that are still waiting for a worker.

use crate::core::task::{Priority, TaskId, TaskSpec, TaskStatus};
use crate::error::{Error, Result, TaskExecutionError};
use crate::orchestration::plan::ExecutionPlan;
use crate::util::backoff_delay;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default worker cap per batch.
pub const DEFAULT_MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_workers: usize,
    /// Stop the rest of the plan once a Critical task exhausts its retries.
    pub stop_on_critical_failure: bool,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            stop_on_critical_failure: false,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// What one attempt of a task reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskOutput {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
}

impl TaskOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Performs the domain work for one task attempt.
///
/// Implementations must watch `cancel` and return promptly once it fires.
/// Any closure `Fn(TaskSpec, CancellationToken) -> impl Future<Output =
/// TaskOutput>` is a runner.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: TaskSpec, cancel: CancellationToken) -> BoxFuture<'static, TaskOutput>;
}

impl<F, Fut> TaskRunner for F
where
    F: Fn(TaskSpec, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutput> + Send + 'static,
{
    fn run(&self, task: TaskSpec, cancel: CancellationToken) -> BoxFuture<'static, TaskOutput> {
        Box::pin(self(task, cancel))
    }
}

/// Lifecycle events streamed while a plan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    BatchStarted {
        batch: usize,
        tasks: Vec<TaskId>,
    },
    TaskStarted {
        task_id: TaskId,
        batch: usize,
        attempt: u32,
    },
    TaskRetrying {
        task_id: TaskId,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    TaskFinished {
        task_id: TaskId,
        success: bool,
    },
    TaskSkipped {
        task_id: TaskId,
        reason: String,
    },
    BatchFinished {
        batch: usize,
        failed: usize,
    },
    PlanFinished {
        plan_id: Uuid,
        successful: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time across every attempt, backoff included.
    pub duration_ms: u64,
    /// Sum of the durations the runner reported for its attempts.
    #[serde(default)]
    pub reported_duration_ms: u64,
    pub attempts: u32,
    pub retries: u32,
    pub batch: usize,
}

impl ExecutionResult {
    fn skipped(task_id: TaskId, batch: usize, reason: &str) -> Self {
        Self {
            task_id,
            status: TaskStatus::Skipped {
                reason: reason.to_string(),
            },
            success: false,
            output: String::new(),
            error: None,
            duration_ms: 0,
            reported_duration_ms: 0,
            attempts: 0,
            retries: 0,
            batch,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TaskStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, TaskStatus::Skipped { .. })
    }
}

/// Plan-level aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub plan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub estimated_time_ms: u64,
    /// Actual minus estimated; negative when the plan beat its estimate.
    pub time_variance_ms: i64,
    pub total_tasks: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
    pub optimization_effectiveness: f64,
    pub stopped_early: bool,
    pub cancelled: bool,
    pub results: BTreeMap<TaskId, ExecutionResult>,
}

impl ExecutionSummary {
    pub fn result(&self, id: &str) -> Option<&ExecutionResult> {
        self.results.get(&TaskId::from(id))
    }
}

/// `max(0, 1 - actual / estimated)`, or 0 without an estimate.
pub fn optimization_effectiveness(actual_ms: u64, estimated_ms: u64) -> f64 {
    if estimated_ms == 0 {
        return 0.0;
    }
    (1.0 - actual_ms as f64 / estimated_ms as f64).max(0.0)
}

type EventSender = Option<mpsc::UnboundedSender<ExecutionEvent>>;

fn emit(events: &EventSender, event: ExecutionEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is listening.
        let _ = tx.send(event);
    }
}

/// Runs plans with bounded concurrency and per-task retry.
#[derive(Debug, Clone, Default)]
pub struct ExecutionEngine {
    config: EngineConfig,
    events: EventSender,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Stream [`ExecutionEvent`]s to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `plan`, consuming it.
    ///
    /// # Errors
    /// Fails before running anything if a batch names a task the plan does
    /// not carry, and fails if a worker task could not be joined. Task
    /// failures are reported in the summary, not as errors.
    pub async fn execute(
        &self,
        plan: ExecutionPlan,
        runner: Arc<dyn TaskRunner>,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let mut specs: HashMap<TaskId, TaskSpec> =
            plan.tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut batches = Vec::with_capacity(plan.batches.len());
        for batch in plan.batches {
            let tasks = batch
                .tasks
                .into_iter()
                .map(|id| specs.remove(&id).ok_or(Error::UnknownTask(id)))
                .collect::<Result<Vec<_>>>()?;
            batches.push(tasks);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut results = BTreeMap::new();
        let mut halted: Option<String> = None;

        tracing::info!(plan_id = %plan.plan_id, batches = batches.len(), "executing plan");

        for (index, tasks) in batches.into_iter().enumerate() {
            let reason = halted
                .clone()
                .or_else(|| cancel.is_cancelled().then(|| "plan cancelled".to_string()));
            if let Some(reason) = reason {
                for task in tasks {
                    emit(
                        &self.events,
                        ExecutionEvent::TaskSkipped {
                            task_id: task.id.clone(),
                            reason: reason.clone(),
                        },
                    );
                    results.insert(task.id.clone(), ExecutionResult::skipped(task.id, index, &reason));
                }
                continue;
            }

            emit(
                &self.events,
                ExecutionEvent::BatchStarted {
                    batch: index,
                    tasks: tasks.iter().map(|t| t.id.clone()).collect(),
                },
            );
            let critical: Vec<TaskId> = tasks
                .iter()
                .filter(|t| t.priority == Priority::Critical)
                .map(|t| t.id.clone())
                .collect();

            let batch_results = self.run_batch(index, tasks, &runner, &cancel).await?;
            let failed = batch_results.iter().filter(|r| r.is_failed()).count();

            if self.config.stop_on_critical_failure && !cancel.is_cancelled() {
                if let Some(result) = batch_results
                    .iter()
                    .find(|r| r.is_failed() && critical.contains(&r.task_id))
                {
                    tracing::error!(
                        task = %result.task_id,
                        "critical task failed; stopping remaining batches"
                    );
                    halted = Some(format!("critical task {} failed", result.task_id));
                }
            }

            tracing::info!(batch = index, failed, "batch finished");
            emit(&self.events, ExecutionEvent::BatchFinished { batch: index, failed });
            for result in batch_results {
                results.insert(result.task_id.clone(), result);
            }
        }

        let execution_time_ms = clock.elapsed().as_millis() as u64;
        let estimated_time_ms = plan.estimated_total_time_ms;
        let total_tasks = results.len();
        let successful = results.values().filter(|r| r.success).count();
        let failed = results.values().filter(|r| r.is_failed()).count();
        let skipped = results.values().filter(|r| r.is_skipped()).count();

        let summary = ExecutionSummary {
            plan_id: plan.plan_id,
            started_at,
            completed_at: Utc::now(),
            execution_time_ms,
            estimated_time_ms,
            time_variance_ms: execution_time_ms as i64 - estimated_time_ms as i64,
            total_tasks,
            successful,
            failed,
            skipped,
            success_rate: if total_tasks == 0 {
                1.0
            } else {
                successful as f64 / total_tasks as f64
            },
            optimization_effectiveness: optimization_effectiveness(
                execution_time_ms,
                estimated_time_ms,
            ),
            stopped_early: halted.is_some(),
            cancelled: cancel.is_cancelled(),
            results,
        };

        tracing::info!(
            plan_id = %summary.plan_id,
            successful,
            failed,
            skipped,
            execution_time_ms,
            "plan finished"
        );
        emit(
            &self.events,
            ExecutionEvent::PlanFinished {
                plan_id: summary.plan_id,
                successful,
                failed,
                skipped,
            },
        );
        Ok(summary)
    }

    async fn run_batch(
        &self,
        index: usize,
        tasks: Vec<TaskSpec>,
        runner: &Arc<dyn TaskRunner>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutionResult>> {
        let workers = tasks.len().min(self.config.max_workers).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let halt = BatchHalt::new(cancel);
        let mut set = JoinSet::new();
        let mut results = Vec::with_capacity(tasks.len());
        let mut pending = tasks.into_iter();

        while let Some(task) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = halt.token.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let reason = halt.reason(cancel);
                for task in std::iter::once(task).chain(pending.by_ref()) {
                    emit(
                        &self.events,
                        ExecutionEvent::TaskSkipped {
                            task_id: task.id.clone(),
                            reason: reason.clone(),
                        },
                    );
                    results.push(ExecutionResult::skipped(task.id, index, &reason));
                }
                break;
            };

            let attempt = Attempt {
                batch: index,
                runner: Arc::clone(runner),
                cancel: cancel.clone(),
                halt: self.config.stop_on_critical_failure.then(|| halt.clone()),
                config: self.config,
                events: self.events.clone(),
            };
            set.spawn(async move {
                let _permit = permit;
                attempt.run(task).await
            });
        }

        while let Some(joined) = set.join_next().await {
            results.push(joined.map_err(|e| Error::TaskJoin(e.to_string()))?);
        }
        Ok(results)
    }
}

/// Stops launching members of one batch once a Critical task fails.
///
/// The token is a child of the plan token, so plan cancellation trips it
/// too. In-flight attempts keep the plan token and are not interrupted.
#[derive(Clone)]
struct BatchHalt {
    token: CancellationToken,
    cause: Arc<OnceLock<TaskId>>,
}

impl BatchHalt {
    fn new(cancel: &CancellationToken) -> Self {
        Self {
            token: cancel.child_token(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    fn trip(&self, task: &TaskId) {
        let _ = self.cause.set(task.clone());
        self.token.cancel();
    }

    fn reason(&self, cancel: &CancellationToken) -> String {
        match self.cause.get() {
            Some(task) if !cancel.is_cancelled() => format!("critical task {} failed", task),
            _ => "plan cancelled".to_string(),
        }
    }
}

/// Everything a spawned worker needs to run one task to completion.
struct Attempt {
    batch: usize,
    runner: Arc<dyn TaskRunner>,
    cancel: CancellationToken,
    /// Set when the critical-failure policy is on.
    halt: Option<BatchHalt>,
    config: EngineConfig,
    events: EventSender,
}

impl Attempt {
    async fn run(self, task: TaskSpec) -> ExecutionResult {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut output = String::new();
        let mut reported = Duration::ZERO;

        let error = loop {
            attempts += 1;
            emit(
                &self.events,
                ExecutionEvent::TaskStarted {
                    task_id: task.id.clone(),
                    batch: self.batch,
                    attempt: attempts,
                },
            );

            let call = AssertUnwindSafe(self.runner.run(task.clone(), self.cancel.clone()))
                .catch_unwind();
            let error = match tokio::time::timeout(task.timeout, call).await {
                Ok(Ok(out)) if out.success => {
                    reported = reported.saturating_add(out.duration);
                    output = out.output;
                    break None;
                }
                Ok(Ok(out)) => {
                    reported = reported.saturating_add(out.duration);
                    output = out.output;
                    if self.cancel.is_cancelled() {
                        TaskExecutionError::Cancelled
                    } else {
                        TaskExecutionError::Failed(
                            out.error.unwrap_or_else(|| "task reported failure".to_string()),
                        )
                    }
                }
                Ok(Err(panic)) => TaskExecutionError::Panicked(panic_message(panic.as_ref())),
                Err(_) => TaskExecutionError::TimedOut(task.timeout),
            };

            if attempts > task.max_retries || self.cancel.is_cancelled() {
                break Some(error);
            }

            let delay = backoff_delay(attempts - 1, self.config.backoff_base, self.config.backoff_cap);
            tracing::warn!(
                task = %task.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "task attempt failed; retrying"
            );
            emit(
                &self.events,
                ExecutionEvent::TaskRetrying {
                    task_id: task.id.clone(),
                    attempt: attempts,
                    delay,
                    error: error.to_string(),
                },
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break Some(error),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let success = error.is_none();
        if let Some(err) = &error {
            tracing::error!(task = %task.id, attempts, error = %err, "task failed");
            if let Some(halt) = &self.halt {
                if task.priority == Priority::Critical && !self.cancel.is_cancelled() {
                    halt.trip(&task.id);
                }
            }
        }
        emit(
            &self.events,
            ExecutionEvent::TaskFinished {
                task_id: task.id.clone(),
                success,
            },
        );

        ExecutionResult {
            status: match &error {
                None => TaskStatus::Succeeded,
                Some(err) => TaskStatus::Failed {
                    error: err.to_string(),
                },
            },
            task_id: task.id,
            success,
            output,
            error: error.map(|e| e.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            reported_duration_ms: reported.as_millis() as u64,
            attempts,
            retries: attempts - 1,
            batch: self.batch,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
