// src/dag/mod.rs

//! Task records and the dependency graph.
//!
//! - [`task`] holds the caller-facing [`TaskSpec`] builder, the immutable
//!   [`TaskRecord`] the graph stores, handles and execution states.
//! - [`graph`] contains the incremental topological scheduler state:
//!   per-task unresolved-dependency counters, the ready frontier, and
//!   failure poisoning.

pub mod graph;
pub mod task;

pub use graph::{DependencyGraph, StateCounts};
pub use task::{ExecutionState, TaskHandle, TaskRecord, TaskSpec};
