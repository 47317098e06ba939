//! Core domain models for taskweave.
//!
//! This module contains the task specification model and the dependency
//! graph every planning stage operates on.

pub mod dag;
pub mod task;

pub use dag::{EdgeKind, TaskGraph};
pub use task::{ExecutorId, Priority, TaskId, TaskSpec, TaskStatus};
