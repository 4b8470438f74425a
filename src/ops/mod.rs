// src/ops/mod.rs

//! Operations: the task bodies the engine schedules.
//!
//! The engine never looks inside an operation. It only needs:
//! - a stable `name` and JSON `params` (used for signatures and for shipping
//!   the operation to a remote worker as an [`OperationSpec`]),
//! - a blocking `run` that writes the task's declared outputs.
//!
//! - [`builtin`] holds the operations the CLI and remote workers know about
//!   (`command`, `parallel_commands`, `copy`, `noop`).
//! - [`closure`] wraps an arbitrary Rust closure; handy for library users and
//!   tests, but it cannot be rebuilt on a remote worker.
//! - [`registry`] maps operation names back to constructors.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod builtin;
pub mod closure;
pub mod registry;

pub use builtin::{CommandOperation, CopyOperation, NoopOperation, ParallelCommands};
pub use closure::FnOperation;
pub use registry::{OperationFactory, OperationRegistry};

/// A unit of work with a fixed `{name, params} -> result` contract.
///
/// Implementations must be pure functions of their parameters that write
/// exactly the outputs declared on the task, and must be safe to re-run.
pub trait Operation: Send + Sync + fmt::Debug {
    /// Stable operation name (e.g. `"command"`).
    fn name(&self) -> &str;

    /// Canonical parameters. Must be deterministic for identical operations.
    fn params(&self) -> Value;

    /// Execute the operation on the current thread.
    fn run(&self) -> anyhow::Result<Value>;

    /// Serialisable reference to this operation.
    fn spec(&self) -> OperationSpec {
        OperationSpec {
            name: self.name().to_string(),
            params: self.params(),
        }
    }
}

/// Wire/signature form of an operation: its name plus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}
