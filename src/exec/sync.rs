// src/exec/sync.rs

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::engine::{Completion, CompletionSender, FailureReason, TaskOutcome};
use crate::errors::{Result, TaskGraphError};
use crate::exec::runner::run_operation;
use crate::exec::{Executor, Job};
use crate::types::ExecutorKind;

/// Runs each task body to completion inside `submit`, one at a time.
///
/// The future returned by `submit` does not resolve until the body has
/// finished, so the coordinator never has more than one body running. The
/// body itself runs on the blocking pool. Meant for debugging, and for task
/// bodies that manage their own parallelism.
pub struct SynchronousExecutor {
    completions: CompletionSender,
}

impl SynchronousExecutor {
    pub fn new(completions: CompletionSender) -> Self {
        Self { completions }
    }
}

impl Executor for SynchronousExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sync
    }

    fn submit(&mut self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let completions = self.completions.clone();

        Box::pin(async move {
            let Job {
                task,
                name,
                operation,
            } = job;
            let body_name = name.clone();
            let outcome = match tokio::task::spawn_blocking(move || {
                run_operation(&body_name, operation.as_ref())
            })
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => TaskOutcome::failed(FailureReason::execution(format!(
                    "task thread failed: {e}"
                ))),
            };

            completions
                .send(Completion {
                    task,
                    name,
                    outcome,
                })
                .map_err(|_| {
                    TaskGraphError::ExecutorUnavailable("completion channel closed".to_string())
                })
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        debug!("synchronous executor shut down");
        Box::pin(async { Ok(()) })
    }
}
