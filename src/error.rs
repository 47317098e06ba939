use std::time::Duration;

use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Dependency cycle remains among tasks: {}", format_ids(.tasks))]
    Cycle { tasks: Vec<TaskId> },

    #[error("Planning exceeded its {budget:?} budget during {phase}")]
    PlanningTimeout { phase: &'static str, budget: Duration },

    #[error("Plan references unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Why a single task attempt failed. Recorded on the task's result, never
/// returned as `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("panicked: {0}")]
    Panicked(String),
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
