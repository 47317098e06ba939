//! Task data model for the scheduling pipeline.
//!
//! A [`TaskSpec`] is a declared unit of work submitted by an external
//! planning layer. Specs are immutable once accepted; every planning stage
//! works on copies held by the [`TaskGraph`](crate::core::dag::TaskGraph).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::util::duration_ms;

/// Identifier of a task, unique within one submission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical worker that owns a task (e.g. `build-agent`, `git-ops`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorId(String);

impl ExecutorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExecutorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task priority. Declaration order is rank order: `Critical` sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Critical and High tasks are admitted first when an executor is oversubscribed.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_retries() -> u32 {
    2
}

/// A declared unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Executor identity that owns this task.
    pub executor: ExecutorId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "estimated_duration_ms", with = "duration_ms", default)]
    pub estimated_duration: Duration,
    /// Resource tags this task needs. Whether a tag is exclusive is decided
    /// by the [`ResourcePolicy`](crate::orchestration::ResourcePolicy).
    #[serde(default)]
    pub required_resources: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Tags this task must hold alone, regardless of policy.
    #[serde(default)]
    pub exclusive_resources: BTreeSet<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(rename = "timeout_ms", with = "duration_ms", default = "default_timeout")]
    pub timeout: Duration,
}

impl TaskSpec {
    /// Create a task with default priority, retries and timeout.
    pub fn new(id: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            executor: ExecutorId::new(executor),
            description: String::new(),
            priority: Priority::default(),
            estimated_duration: Duration::ZERO,
            required_resources: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            exclusive_resources: BTreeSet::new(),
            max_retries: default_max_retries(),
            timeout: default_timeout(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, estimated: Duration) -> Self {
        self.estimated_duration = estimated;
        self
    }

    pub fn with_dependency(mut self, id: &str) -> Self {
        self.dependencies.insert(TaskId::from(id));
        self
    }

    pub fn with_resource(mut self, tag: &str) -> Self {
        self.required_resources.insert(tag.to_string());
        self
    }

    pub fn with_exclusive(mut self, tag: &str) -> Self {
        self.exclusive_resources.insert(tag.to_string());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every resource tag the task touches, required or exclusive.
    pub fn resource_tags(&self) -> impl Iterator<Item = &String> {
        self.required_resources.union(&self.exclusive_resources)
    }
}

/// Terminal state of a task after an execution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task succeeded, possibly after retries.
    Succeeded,
    /// Task exhausted its retries.
    Failed {
        /// Error from the final attempt.
        error: String,
    },
    /// Task was never launched.
    Skipped {
        /// Why the engine did not launch it.
        reason: String,
    },
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}
