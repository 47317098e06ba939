//! Integration test suite for taskweave.
//!
//! These tests drive the public API from submission to summary and check
//! that planning and execution work together correctly.
//!
//! # Test Categories
//!
//! - `scenarios`: Reference plans for small, hand-checked submissions
//! - `execution`: Retry, cancellation and failure policies end to end
//! - `properties`: Generated submissions checked against plan invariants
//!
//! # CI Compatibility
//!
//! Runners are in-process closures with millisecond backoff, so the suite
//! needs no external services and finishes quickly.

mod fixtures;

mod execution;
mod properties;
mod scenarios;
