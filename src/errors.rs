// src/errors.rs

//! Crate-wide error type.
//!
//! Construction-time problems (cycles, duplicate names/outputs) abort
//! `add_task` with one of these variants. Failures of individual task bodies
//! are *not* errors here; they are recorded as [`FailureReason`]s and only
//! surface at `join()` time, aggregated in [`JoinFailure`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::{FailureReason, TaskName};

#[derive(Error, Debug)]
pub enum TaskGraphError {
    #[error("cycle detected: adding task '{task}' would close a cycle through {path:?}")]
    Cycle { task: TaskName, path: Vec<TaskName> },

    #[error("duplicate task name: {0}")]
    DuplicateName(TaskName),

    #[error("output {path:?} of task '{task}' is already declared by task '{owner}'")]
    DuplicateOutput {
        task: TaskName,
        owner: TaskName,
        path: PathBuf,
    },

    #[error("task '{task}' depends on unknown task handle #{handle}")]
    UnknownDependency { task: TaskName, handle: usize },

    #[error("{0}")]
    TasksFailed(JoinFailure),

    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("workspace {0:?} is locked by another run")]
    WorkspaceLocked(PathBuf),

    #[error("task graph is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One failed task as reported by `join()`.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTask {
    pub task: TaskName,
    pub reason: FailureReason,
}

/// Summary of every task that failed during a `join()`.
///
/// Entries are in the order the coordinator observed them, so the first
/// entry is the first failure of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinFailure {
    pub failures: Vec<FailedTask>,
}

impl JoinFailure {
    pub fn first(&self) -> Option<&FailedTask> {
        self.failures.first()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures caused by the task body itself (excluding poisoned dependents).
    pub fn root_causes(&self) -> impl Iterator<Item = &FailedTask> {
        self.failures
            .iter()
            .filter(|f| !matches!(f.reason, FailureReason::UpstreamFailed { .. }))
    }
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.failures.len())?;
        for failed in &self.failures {
            write!(f, "\n  - {}: {}", failed.task, failed.reason)?;
        }
        Ok(())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskGraphError>;
