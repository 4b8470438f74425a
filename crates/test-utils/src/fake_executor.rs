use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use taskgraph::engine::{Completion, CompletionSender, FailureReason, TaskOutcome};
use taskgraph::errors::{Result, TaskGraphError};
use taskgraph::exec::{Executor, Job};
use taskgraph::types::ExecutorKind;

/// A fake executor that:
/// - records which tasks were "run" without invoking their operation,
/// - immediately reports a completion for each submitted job: failure for
///   names in `failing`, success otherwise.
pub struct FakeExecutor {
    completions: CompletionSender,
    executed: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
}

impl FakeExecutor {
    pub fn new(completions: CompletionSender, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            completions,
            executed,
            failing: HashSet::new(),
        }
    }

    pub fn failing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(names.into_iter().map(Into::into));
        self
    }
}

impl Executor for FakeExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Local
    }

    fn submit(&mut self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.completions.clone();
        let executed = Arc::clone(&self.executed);
        let fails = self.failing.contains(&job.name);

        Box::pin(async move {
            {
                let mut guard = executed.lock().unwrap();
                guard.push(job.name.clone());
            }

            let outcome = if fails {
                TaskOutcome::failed(FailureReason::execution(format!("{} failed", job.name)))
            } else {
                TaskOutcome::success(serde_json::Value::Null)
            };

            tx.send(Completion {
                task: job.task,
                name: job.name,
                outcome,
            })
            .map_err(|_| TaskGraphError::ExecutorUnavailable("completion channel closed".into()))
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
