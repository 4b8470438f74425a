// src/dag/task.rs

//! Task metadata and per-task execution state.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::engine::TaskName;
use crate::ops::{NoopOperation, Operation};

/// Opaque reference to a task submitted to a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub(crate) usize);

impl TaskHandle {
    /// Submission index of the task (0-based).
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution state of a task.
///
/// Transitions only move forward:
/// `Pending -> Ready -> Running -> {Succeeded, Failed}`, with the shortcuts
/// `Ready -> Skipped` (outputs already valid) and `Pending | Ready -> Failed`
/// (poisoned by an upstream failure or cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExecutionState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Skipped
        )
    }

    /// Whether dependents may proceed once a dependency is in this state.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, ExecutionState::Succeeded | ExecutionState::Skipped)
    }

    fn rank(self) -> u8 {
        match self {
            ExecutionState::Pending => 0,
            ExecutionState::Ready => 1,
            ExecutionState::Running => 2,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Skipped => 3,
        }
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ExecutionState::Skipped => self == ExecutionState::Ready,
            ExecutionState::Succeeded => self == ExecutionState::Running,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Caller-facing description of a task, built fluently:
///
/// ```
/// use taskgraph::dag::TaskSpec;
/// use taskgraph::ops::CopyOperation;
///
/// let spec = TaskSpec::new("copy dem", CopyOperation::new("dem.tif", "out/dem.tif"))
///     .input("dem.tif")
///     .output("out/dem.tif")
///     .priority(10);
/// assert_eq!(spec.name, "copy dem");
/// ```
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: TaskName,
    pub operation: Arc<dyn Operation>,
    /// Files the operation reads. Inputs produced by another task create an
    /// inferred dependency on it.
    pub inputs: Vec<PathBuf>,
    /// Files the operation writes. Must not overlap any other task's outputs.
    pub outputs: Vec<PathBuf>,
    /// Inputs excluded from dependency inference and from the signature.
    pub ignore_paths: Vec<PathBuf>,
    pub depends_on: Vec<TaskHandle>,
    /// Higher priority tasks are dispatched first among ready tasks.
    pub priority: i32,
    /// Never record a signature; always re-run.
    pub transient: bool,
    /// Keep the operation's return value alongside its signature.
    pub store_result: bool,
}

impl TaskSpec {
    pub fn new(name: impl Into<TaskName>, operation: impl Operation + 'static) -> Self {
        Self::from_arc(name, Arc::new(operation))
    }

    pub fn from_arc(name: impl Into<TaskName>, operation: Arc<dyn Operation>) -> Self {
        Self {
            name: name.into(),
            operation,
            inputs: Vec::new(),
            outputs: Vec::new(),
            ignore_paths: Vec::new(),
            depends_on: Vec::new(),
            priority: 0,
            transient: false,
            store_result: false,
        }
    }

    /// Task with no body, used to group dependencies.
    pub fn noop(name: impl Into<TaskName>) -> Self {
        Self::new(name, NoopOperation)
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.inputs.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn outputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.outputs.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn ignore_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignore_paths.push(path.into());
        self
    }

    pub fn depends_on(mut self, handle: TaskHandle) -> Self {
        self.depends_on.push(handle);
        self
    }

    pub fn depends_on_all<I>(mut self, handles: I) -> Self
    where
        I: IntoIterator<Item = TaskHandle>,
    {
        self.depends_on.extend(handles);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    pub fn store_result(mut self, store: bool) -> Self {
        self.store_result = store;
        self
    }
}

/// Immutable record of a submitted task, owned by the graph.
///
/// Paths are normalised and de-duplicated; `inputs` no longer contains
/// ignored paths.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub name: TaskName,
    pub operation: Arc<dyn Operation>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub explicit_deps: Vec<TaskHandle>,
    pub priority: i32,
    pub transient: bool,
    pub store_result: bool,
}

impl TaskRecord {
    pub(crate) fn from_spec(spec: TaskSpec) -> Self {
        let ignored: Vec<PathBuf> = spec.ignore_paths.iter().map(|p| normalize(p)).collect();
        let inputs = dedup(
            spec.inputs
                .iter()
                .map(|p| normalize(p))
                .filter(|p| !ignored.contains(p)),
        );
        let outputs = dedup(spec.outputs.iter().map(|p| normalize(p)));
        let mut explicit_deps = spec.depends_on;
        explicit_deps.sort();
        explicit_deps.dedup();

        Self {
            name: spec.name,
            operation: spec.operation,
            inputs,
            outputs,
            explicit_deps,
            priority: spec.priority,
            transient: spec.transient,
            store_result: spec.store_result,
        }
    }
}

/// Lexically normalise a path so `./a/b` and `a//b/` compare equal.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn dedup(paths: impl Iterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for p in paths {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}
