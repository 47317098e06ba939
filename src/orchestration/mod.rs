//! Planning and execution layer for taskweave.
//!
//! Components, leaves first: the capacity registry, conflict detection and
//! resolution, topological ordering, batch packing, the execution engine,
//! and the workload balancer. [`Scheduler`] wires them into one cycle.

pub mod balancer;
pub mod capacity;
pub mod dependency;
pub mod detection;
pub mod engine;
pub mod packer;
pub mod plan;
pub mod resolver;
mod scheduler;

pub use balancer::{balance, BalanceOutcome};
pub use capacity::{CapacityRegistry, ExecutorCapacity, DEFAULT_MAX_CONCURRENT};
pub use dependency::topological_order;
pub use detection::{
    Conflict, ConflictDetector, ConflictKind, ResolutionStrategy, ResourceAccess, ResourcePolicy,
    Severity, SingleWriterSet,
};
pub use engine::{
    EngineConfig, ExecutionEngine, ExecutionEvent, ExecutionResult, ExecutionSummary, TaskOutput,
    TaskRunner,
};
pub use packer::{Batch, BatchPacker, PackerConfig, Packing};
pub use plan::ExecutionPlan;
pub use resolver::{resolve, resolve_within, AppliedResolution, Edge, Resolution, ResolutionOutcome};
pub use scheduler::Scheduler;
