//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building task specs and capacity registries
//! - Scripted runners that count attempts or fail on demand
//! - Fast engine settings so retries do not sleep for seconds

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskweave::core::{ExecutorId, TaskId, TaskSpec};
use taskweave::orchestration::{
    CapacityRegistry, EngineConfig, ExecutionPlan, ExecutorCapacity, TaskOutput, TaskRunner,
};

/// A task owned by the generic `worker` executor.
pub fn task(id: &str) -> TaskSpec {
    TaskSpec::new(id, "worker")
}

/// A registry from `(executor, max_concurrent)` pairs.
pub fn registry(entries: &[(&str, usize)]) -> CapacityRegistry {
    entries
        .iter()
        .map(|(id, n)| (ExecutorId::from(*id), ExecutorCapacity::new(*n)))
        .collect()
}

/// Engine settings with millisecond backoff.
pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

/// Batches of a plan as plain strings.
pub fn batches(plan: &ExecutionPlan) -> Vec<Vec<String>> {
    plan.batches
        .iter()
        .map(|b| b.tasks.iter().map(|id| id.to_string()).collect())
        .collect()
}

/// A runner scripted per task id, recording every attempt.
///
/// Tasks named in `failing` always fail; every other task succeeds.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    failing: Vec<String>,
    calls: Arc<Mutex<HashMap<TaskId, u32>>>,
    total: Arc<AtomicU32>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.push(id.to_string());
        self
    }

    /// Attempts made for `id` so far.
    pub fn calls(&self, id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&TaskId::from(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn into_runner(self) -> Arc<dyn TaskRunner> {
        Arc::new(move |task: TaskSpec, _cancel: CancellationToken| {
            *self.calls.lock().unwrap().entry(task.id.clone()).or_default() += 1;
            self.total.fetch_add(1, Ordering::SeqCst);
            let fail = self.failing.iter().any(|f| f == task.id.as_str());
            async move {
                if fail {
                    TaskOutput::failure(format!("{} failed", task.id))
                } else {
                    TaskOutput::success(format!("{} ok", task.id))
                }
            }
        })
    }
}

/// A runner that blocks until cancelled, then reports failure.
pub fn blocking_runner() -> Arc<dyn TaskRunner> {
    Arc::new(|_task: TaskSpec, cancel: CancellationToken| async move {
        cancel.cancelled().await;
        TaskOutput::failure("interrupted")
    })
}
