// src/engine/mod.rs

//! The task graph engine.
//!
//! This module ties together:
//! - the dependency graph (which tasks may run),
//! - the artifact store (which tasks need not run),
//! - an executor backend (where task bodies run).
//!
//! [`TaskGraph`] in [`scheduler`] is the single coordinator that owns all
//! graph and store mutation; [`context`] holds the per-graph resources it
//! tears down on `close()`; [`cancel`] provides cooperative cancellation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::dag::TaskHandle;

pub mod cancel;
pub mod context;
pub mod scheduler;

pub use cancel::CancelHandle;
pub use context::{GraphConfig, RunContext};
pub use scheduler::{RunSummary, TaskGraph};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The task body returned an error or panicked.
    #[error("task body failed: {message}")]
    Execution { message: String },

    /// The executor could not accept the task.
    #[error("executor unavailable after {attempts} attempt(s): {message}")]
    ExecutorUnavailable { attempts: u32, message: String },

    /// Signature or output verification failed, e.g. a declared output is
    /// missing after a reported success.
    #[error("artifact validation failed: {message}")]
    ArtifactValidation { message: String },

    /// The remote allocation ran out of wall-clock time before the task
    /// finished.
    #[error("remote allocation walltime exceeded")]
    WalltimeExceeded,

    /// A (transitive) dependency failed; the task never ran.
    #[error("upstream task '{upstream}' failed")]
    UpstreamFailed { upstream: TaskName },

    /// Cancellation was requested before the task was dispatched.
    #[error("cancelled before dispatch")]
    Cancelled,
}

impl FailureReason {
    pub fn execution(message: impl Into<String>) -> Self {
        FailureReason::Execution {
            message: message.into(),
        }
    }

    pub fn artifact_validation(message: impl Into<String>) -> Self {
        FailureReason::ArtifactValidation {
            message: message.into(),
        }
    }
}

/// Outcome of running one task body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { result: Value },
    Failed { reason: FailureReason },
}

impl TaskOutcome {
    pub fn success(result: Value) -> Self {
        TaskOutcome::Success { result }
    }

    pub fn failed(reason: FailureReason) -> Self {
        TaskOutcome::Failed { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// Completion signal sent by executors back to the coordinator.
#[derive(Debug, Clone)]
pub struct Completion {
    pub task: TaskHandle,
    pub name: TaskName,
    pub outcome: TaskOutcome,
}

/// Channel executors report completions on.
///
/// Unbounded so that an executor reporting from inside `submit` can never
/// block on the coordinator that is awaiting that same `submit`.
pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;
