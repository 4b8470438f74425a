// src/exec/local.rs

//! Fixed-size local worker pool.

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{Completion, CompletionSender, FailureReason, TaskOutcome};
use crate::errors::{Result, TaskGraphError};
use crate::exec::runner::run_operation;
use crate::exec::{Executor, Job};
use crate::types::ExecutorKind;

type SharedQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

const WORKERS_PER_CORE: usize = 16;

/// Runs task bodies on `size` background workers.
///
/// Each worker pulls the next job from a shared queue and runs its body on
/// Tokio's blocking pool, so at most `size` bodies execute at once.
pub struct LocalExecutor {
    queue: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl LocalExecutor {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn new(size: usize, completions: CompletionSender) -> Self {
        let limit = max_workers();
        if size > limit {
            warn!(requested = size, limit, "too many local workers requested; clamping");
        }
        let size = size.clamp(1, limit);
        let (tx, rx) = mpsc::channel::<Job>(size.saturating_mul(2));
        let rx: SharedQueue = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx), completions.clone())))
            .collect();

        info!(workers = size, "local executor started");
        Self {
            queue: Some(tx),
            workers,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Upper bound on pool size: a generous multiple of the machine's cores.
pub fn max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_mul(WORKERS_PER_CORE)
}

async fn worker_loop(id: usize, queue: SharedQueue, completions: CompletionSender) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(Job {
            task,
            name,
            operation,
        }) = job
        else {
            break;
        };

        debug!(worker = id, task = %name, "worker picked up task");
        let body_name = name.clone();
        let outcome = match tokio::task::spawn_blocking(move || {
            run_operation(&body_name, operation.as_ref())
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::failed(FailureReason::execution(format!(
                "worker thread failed: {e}"
            ))),
        };

        if completions
            .send(Completion {
                task,
                name,
                outcome,
            })
            .is_err()
        {
            debug!(worker = id, "coordinator gone; stopping worker");
            break;
        }
    }

    debug!(worker = id, "local worker finished");
}

impl Executor for LocalExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Local
    }

    fn submit(&mut self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.queue.clone();

        Box::pin(async move {
            let tx = tx.ok_or_else(|| {
                TaskGraphError::ExecutorUnavailable("local executor is shut down".to_string())
            })?;
            tx.send(job).await.map_err(|_| {
                TaskGraphError::ExecutorUnavailable("local worker pool has stopped".to_string())
            })
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Closing the queue lets every worker exit after its current job.
        self.queue.take();
        let workers = mem::take(&mut self.workers);

        Box::pin(async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!(error = %e, "local worker ended abnormally");
                }
            }
            info!("local executor shut down");
            Ok(())
        })
    }
}
