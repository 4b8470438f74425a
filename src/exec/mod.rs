// src/exec/mod.rs

//! Executor backends.
//!
//! The coordinator talks to a `dyn Executor` and never assumes where a task
//! body runs. Every backend reports back the same way: a [`Completion`] on
//! the [`CompletionSender`] it was constructed with.
//!
//! - [`sync`]: runs each body to completion inside `submit`, one at a time.
//! - [`local`]: a fixed-size pool of workers draining a job queue; bodies run
//!   on Tokio's blocking pool.
//! - [`remote`]: ships `{operation name, params}` over TCP to pre-provisioned
//!   worker processes (see [`crate::worker`]) and waits for their reply.
//! - [`wire`]: the newline-delimited JSON protocol used by `remote`.
//! - [`runner`]: runs one operation and turns its result (or panic) into a
//!   [`TaskOutcome`](crate::engine::TaskOutcome).
//!
//! [`Completion`]: crate::engine::Completion

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dag::TaskHandle;
use crate::engine::{CompletionSender, TaskName};
use crate::errors::Result;
use crate::ops::Operation;
use crate::types::ExecutorKind;

pub mod local;
pub mod remote;
pub mod runner;
pub mod sync;
pub mod wire;

pub use local::LocalExecutor;
pub use remote::{Provisioning, RemoteConfig, RemoteExecutor};
pub use runner::run_operation;
pub use sync::SynchronousExecutor;

/// One dispatched task body.
#[derive(Debug, Clone)]
pub struct Job {
    pub task: TaskHandle,
    pub name: TaskName,
    pub operation: Arc<dyn Operation>,
}

/// Trait abstracting how task bodies are executed.
///
/// `submit` only hands the job over; completion is reported asynchronously on
/// the completion channel. Completions of concurrently running jobs may
/// arrive in any order.
pub trait Executor: Send {
    fn kind(&self) -> ExecutorKind;

    /// Accept a job for execution.
    ///
    /// An `Err` means the backend could not take the job at all; the
    /// coordinator fails that task with `ExecutorUnavailable`.
    fn submit(&mut self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop accepting work and release backend resources.
    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Which backend a graph should build.
#[derive(Debug, Clone)]
pub enum ExecutorConfig {
    Synchronous,
    Local { workers: usize },
    Remote(RemoteConfig),
}

impl ExecutorConfig {
    /// Interpret a worker count the way pipeline scripts pass it:
    ///
    /// - negative: synchronous; the task body is expected to fork its own
    ///   subprocesses, so nothing is parallelised at this layer,
    /// - `0`: a single background worker,
    /// - `n > 0`: a pool of `n` workers.
    pub fn from_n_workers(n_workers: i64) -> Self {
        match n_workers {
            n if n < 0 => ExecutorConfig::Synchronous,
            0 => ExecutorConfig::Local { workers: 1 },
            n => ExecutorConfig::Local {
                workers: usize::try_from(n).unwrap_or(usize::MAX),
            },
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            ExecutorConfig::Synchronous => ExecutorKind::Sync,
            ExecutorConfig::Local { .. } => ExecutorKind::Local,
            ExecutorConfig::Remote(_) => ExecutorKind::Remote,
        }
    }

    /// Build the backend. Must be called from within a Tokio runtime.
    pub fn build(&self, completions: CompletionSender) -> Box<dyn Executor> {
        match self {
            ExecutorConfig::Synchronous => Box::new(SynchronousExecutor::new(completions)),
            ExecutorConfig::Local { workers } => {
                Box::new(LocalExecutor::new(*workers, completions))
            }
            ExecutorConfig::Remote(cfg) => Box::new(RemoteExecutor::new(cfg.clone(), completions)),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        ExecutorConfig::Local { workers }
    }
}
