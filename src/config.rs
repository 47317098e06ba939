use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::task::{ExecutorId, TaskSpec};
use crate::orchestration::capacity::{CapacityRegistry, ExecutorCapacity};
use crate::orchestration::detection::{
    ResourceAccess, ResourcePolicy, SingleWriterSet, DEFAULT_SINGLE_WRITERS,
};
use crate::orchestration::engine::{EngineConfig, DEFAULT_MAX_WORKERS};
use crate::orchestration::packer::{PackerConfig, DEFAULT_BATCH_SIZE_CAP};
use crate::{Error, Result};

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_batch_size_cap() -> usize {
    DEFAULT_BATCH_SIZE_CAP
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_resources() -> BTreeMap<String, ResourceAccess> {
    [
        ("git_operations", ResourceAccess::Exclusive),
        ("database", ResourceAccess::Shared),
        ("file_system", ResourceAccess::Shared),
        ("network", ResourceAccess::Shared),
    ]
    .into_iter()
    .map(|(tag, access)| (tag.to_string(), access))
    .collect()
}

fn default_single_writers() -> Vec<String> {
    DEFAULT_SINGLE_WRITERS.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_batch_size_cap")]
    pub batch_size_cap: usize,
    #[serde(default)]
    pub stop_on_critical_failure: bool,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    pub planning_budget_ms: Option<u64>,
    /// Regexes matched against executor identities.
    #[serde(default = "default_single_writers")]
    pub single_writer_patterns: Vec<String>,
    #[serde(default = "default_resources")]
    pub resources: BTreeMap<String, ResourceAccess>,
    #[serde(default)]
    pub executors: BTreeMap<ExecutorId, ExecutorCapacity>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_size_cap: default_batch_size_cap(),
            stop_on_critical_failure: false,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            planning_budget_ms: None,
            single_writer_patterns: default_single_writers(),
            resources: default_resources(),
            executors: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn taskweave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskweave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskweave_dir()?.join("config.toml"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::taskweave_dir()?.join("taskweave.log"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading config");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tracing::debug!(
            max_workers = config.max_workers,
            batch_size_cap = config.batch_size_cap,
            executors = config.executors.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tracing::debug!(dir = %dir.display(), "creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn resource_policy(&self) -> ResourcePolicy {
        ResourcePolicy::new(self.resources.clone())
    }

    pub fn single_writers(&self) -> Result<SingleWriterSet> {
        SingleWriterSet::new(self.single_writer_patterns.as_slice())
    }

    pub fn packer_config(&self) -> PackerConfig {
        PackerConfig {
            batch_size_cap: self.batch_size_cap,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_workers: self.max_workers,
            stop_on_critical_failure: self.stop_on_critical_failure,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn planning_budget(&self) -> Option<Duration> {
        self.planning_budget_ms.map(Duration::from_millis)
    }

    /// Seed a capacity registry from the `[executors]` table.
    pub fn registry(&self) -> CapacityRegistry {
        self.executors
            .iter()
            .map(|(id, cap)| (id.clone(), cap.clone()))
            .collect()
    }
}

/// A batch of tasks submitted for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// Read a submission from a `.toml` file, or JSON for any other extension.
/// JSON may be either `{"tasks": [...]}` or a bare array.
pub fn load_submission(path: &Path) -> Result<Vec<TaskSpec>> {
    let text = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let tasks = if is_toml {
        toml::from_str::<Submission>(&text)?.tasks
    } else if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<TaskSpec>>(&text)?
    } else {
        serde_json::from_str::<Submission>(&text)?.tasks
    };
    tracing::debug!(path = %path.display(), tasks = tasks.len(), "submission loaded");
    Ok(tasks)
}
