// src/exec/runner.rs

//! Run a single operation and capture its result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{info, warn};

use crate::engine::{FailureReason, TaskOutcome};
use crate::ops::Operation;

/// Execute `operation` on the current thread.
///
/// Errors and panics from the body both become `FailureReason::Execution`,
/// so a misbehaving operation can never take down its worker.
pub fn run_operation(task: &str, operation: &dyn Operation) -> TaskOutcome {
    let started = Instant::now();
    info!(task = %task, operation = %operation.name(), "starting task body");

    let result = panic::catch_unwind(AssertUnwindSafe(|| operation.run()));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(value)) => {
            info!(task = %task, elapsed_ms, "task body finished");
            TaskOutcome::success(value)
        }
        Ok(Err(err)) => {
            let message = format!("{err:#}");
            warn!(task = %task, elapsed_ms, error = %message, "task body failed");
            TaskOutcome::failed(FailureReason::execution(message))
        }
        Err(payload) => {
            let message = format!("task body panicked: {}", panic_message(payload.as_ref()));
            warn!(task = %task, elapsed_ms, error = %message, "task body panicked");
            TaskOutcome::failed(FailureReason::execution(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ops::FnOperation;

    #[test]
    fn captures_return_value() {
        let op = FnOperation::new("answer", json!({}), || Ok(json!(42)));
        assert_eq!(run_operation("t", &op), TaskOutcome::success(json!(42)));
    }

    #[test]
    fn panics_become_failures() {
        let op = FnOperation::new("explode", json!({}), || panic!("disk on fire"));
        match run_operation("t", &op) {
            TaskOutcome::Failed {
                reason: FailureReason::Execution { message },
            } => assert!(message.contains("disk on fire"), "{message}"),
            other => panic!("expected execution failure, got {other:?}"),
        }
    }
}
