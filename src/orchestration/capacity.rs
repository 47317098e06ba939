//! Per-executor capacity lookup.
//!
//! The registry is a plain owned map. It is refreshed by the caller between
//! planning cycles and only read while a cycle runs, so it carries no
//! internal synchronization.

use crate::core::task::ExecutorId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Concurrency limit applied to executors the registry has never seen.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Resource score assumed for unknown executors and unlisted resources.
pub const DEFAULT_RESOURCE_SCORE: f64 = 0.5;

const DEFAULT_RESOURCES: &[&str] = &["cpu", "memory", "io"];

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_success_rate() -> f64 {
    0.8
}

fn default_average_ms() -> u64 {
    300_000
}

/// What one executor identity can take on per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorCapacity {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-resource capacity score in `[0, 1]`.
    #[serde(default)]
    pub resource_scores: BTreeMap<String, f64>,
    /// Recent success rate in `[0, 1]`.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default = "default_average_ms")]
    pub average_execution_ms: u64,
}

impl ExecutorCapacity {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Self::default()
        }
    }

    pub fn with_resource_score(mut self, resource: &str, score: f64) -> Self {
        self.resource_scores
            .insert(resource.to_string(), score.clamp(0.0, 1.0));
        self
    }

    /// Score for a resource, falling back to a moderate default.
    pub fn resource_score(&self, resource: &str) -> f64 {
        self.resource_scores
            .get(resource)
            .copied()
            .unwrap_or(DEFAULT_RESOURCE_SCORE)
    }
}

impl Default for ExecutorCapacity {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            resource_scores: DEFAULT_RESOURCES
                .iter()
                .map(|r| (r.to_string(), DEFAULT_RESOURCE_SCORE))
                .collect(),
            success_rate: default_success_rate(),
            average_execution_ms: default_average_ms(),
        }
    }
}

/// Capacity snapshot for every known executor.
#[derive(Debug, Clone, Default)]
pub struct CapacityRegistry {
    entries: HashMap<ExecutorId, ExecutorCapacity>,
    fallback: ExecutorCapacity,
}

impl CapacityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored capacity for `executor`, or the default for unknown identities.
    pub fn get(&self, executor: &ExecutorId) -> &ExecutorCapacity {
        self.entries.get(executor).unwrap_or(&self.fallback)
    }

    pub fn max_concurrent(&self, executor: &ExecutorId) -> usize {
        self.get(executor).max_concurrent
    }

    /// Replace the entry for `executor`.
    pub fn update(&mut self, executor: ExecutorId, capacity: ExecutorCapacity) {
        tracing::debug!(
            executor = %executor,
            max_concurrent = capacity.max_concurrent,
            "capacity updated"
        );
        self.entries.insert(executor, capacity);
    }

    /// Replace the whole snapshot at the start of a cycle.
    pub fn refresh<I>(&mut self, snapshot: I)
    where
        I: IntoIterator<Item = (ExecutorId, ExecutorCapacity)>,
    {
        self.entries = snapshot.into_iter().collect();
    }

    pub fn contains(&self, executor: &ExecutorId) -> bool {
        self.entries.contains_key(executor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ExecutorId, ExecutorCapacity)> for CapacityRegistry {
    fn from_iter<I: IntoIterator<Item = (ExecutorId, ExecutorCapacity)>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.refresh(iter);
        registry
    }
}
