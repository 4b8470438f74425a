// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::dag::task::{ExecutionState, TaskHandle, TaskRecord, TaskSpec, normalize};
use crate::engine::{FailureReason, TaskName};
use crate::errors::{Result, TaskGraphError};

/// Internal node: the immutable record plus mutable scheduling state.
#[derive(Debug)]
struct TaskNode {
    record: TaskRecord,
    state: ExecutionState,
    /// Dependencies that have not yet reached `Succeeded` or `Skipped`.
    unresolved: usize,
    failure: Option<FailureReason>,
}

/// Number of tasks in each execution state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.succeeded + self.failed + self.skipped
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

impl fmt::Display for StateCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} ready={} running={} succeeded={} skipped={} failed={}",
            self.pending, self.ready, self.running, self.succeeded, self.skipped, self.failed
        )
    }
}

/// Directed acyclic graph of submitted tasks.
///
/// Readiness is maintained incrementally: each task keeps a counter of
/// unresolved dependencies, and a task whose counter reaches zero while
/// `Pending` joins the ready frontier. Completing a task therefore only
/// touches its direct dependents instead of re-sorting the whole graph.
///
/// Dependencies come from three places:
/// - explicit `depends_on` handles,
/// - inputs of the new task that are outputs of an existing task,
/// - outputs of the new task that are inputs of an existing *pending* task
///   (the existing task gains the new one as a dependency).
///
/// The last rule is the only way a cycle can be requested; it is detected
/// before anything is mutated.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<TaskNode>,
    /// Edge direction: dependency -> dependent.
    edges: DiGraphMap<TaskHandle, ()>,
    by_name: HashMap<TaskName, TaskHandle>,
    /// Output path -> producing task.
    producers: HashMap<PathBuf, TaskHandle>,
    /// Input path -> tasks reading it.
    consumers: HashMap<PathBuf, Vec<TaskHandle>>,
    /// Pending tasks with no unresolved dependencies, highest priority first,
    /// then submission order.
    frontier: BTreeSet<(Reverse<i32>, TaskHandle)>,
    /// Tasks that moved to `Failed` since the last `drain_failed`.
    failure_log: Vec<TaskHandle>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: DiGraphMap::new(),
            by_name: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
            frontier: BTreeSet::new(),
            failure_log: Vec::new(),
        }
    }

    /// Register a task.
    ///
    /// Fails with `DuplicateName`, `DuplicateOutput`, `UnknownDependency` or
    /// `Cycle`; on failure the graph is left exactly as it was.
    ///
    /// A task whose dependency has already failed is registered and
    /// immediately poisoned.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskHandle> {
        let record = TaskRecord::from_spec(spec);
        let handle = TaskHandle(self.nodes.len());

        if self.by_name.contains_key(&record.name) {
            return Err(TaskGraphError::DuplicateName(record.name));
        }

        for path in &record.outputs {
            if let Some(&owner) = self.producers.get(path) {
                return Err(TaskGraphError::DuplicateOutput {
                    task: record.name.clone(),
                    owner: self.nodes[owner.0].record.name.clone(),
                    path: path.clone(),
                });
            }
        }

        for dep in &record.explicit_deps {
            if dep.0 >= self.nodes.len() {
                return Err(TaskGraphError::UnknownDependency {
                    task: record.name.clone(),
                    handle: dep.0,
                });
            }
        }

        let mut deps: BTreeSet<TaskHandle> = record.explicit_deps.iter().copied().collect();
        for input in &record.inputs {
            if let Some(&producer) = self.producers.get(input) {
                deps.insert(producer);
            }
        }

        let mut dependents: BTreeSet<TaskHandle> = BTreeSet::new();
        for output in &record.outputs {
            for &consumer in self.consumers.get(output).into_iter().flatten() {
                let node = &self.nodes[consumer.0];
                if node.state == ExecutionState::Pending {
                    dependents.insert(consumer);
                } else {
                    warn!(
                        task = %record.name,
                        consumer = %node.record.name,
                        state = %node.state,
                        "consumer already left Pending; not adding inferred dependency"
                    );
                }
            }
        }

        if let Some(path) = self.find_path_into(&dependents, &deps) {
            let mut names = Vec::with_capacity(path.len() + 2);
            names.push(record.name.clone());
            names.extend(path.iter().map(|h| self.nodes[h.0].record.name.clone()));
            names.push(record.name.clone());
            return Err(TaskGraphError::Cycle {
                task: record.name,
                path: names,
            });
        }

        // Validation done; commit.
        let mut unresolved = 0;
        let mut failed_dep: Option<TaskHandle> = None;
        for &dep in &deps {
            match self.nodes[dep.0].state {
                ExecutionState::Failed => {
                    failed_dep.get_or_insert(dep);
                }
                state if state.satisfies_dependents() => {}
                _ => unresolved += 1,
            }
        }

        self.edges.add_node(handle);
        for &dep in &deps {
            self.edges.add_edge(dep, handle, ());
        }
        for &dependent in &dependents {
            self.edges.add_edge(handle, dependent, ());
            let node = &mut self.nodes[dependent.0];
            node.unresolved += 1;
            self.frontier
                .remove(&(Reverse(node.record.priority), dependent));
        }

        for output in &record.outputs {
            self.producers.insert(output.clone(), handle);
        }
        for input in &record.inputs {
            self.consumers.entry(input.clone()).or_default().push(handle);
        }
        self.by_name.insert(record.name.clone(), handle);

        debug!(
            task = %record.name,
            handle = %handle,
            deps = deps.len(),
            inferred_dependents = dependents.len(),
            unresolved,
            "task registered"
        );

        let priority = record.priority;
        self.nodes.push(TaskNode {
            record,
            state: ExecutionState::Pending,
            unresolved,
            failure: None,
        });

        if let Some(dep) = failed_dep {
            let upstream = self.root_cause_name(dep);
            self.mark_failed(handle, FailureReason::UpstreamFailed { upstream });
        } else if unresolved == 0 {
            self.frontier.insert((Reverse(priority), handle));
        }

        Ok(handle)
    }

    /// Take every `Pending` task whose dependencies are all satisfied, mark it
    /// `Ready`, and return it. Order: priority (high first), then submission.
    pub fn ready_tasks(&mut self) -> Vec<TaskHandle> {
        let ready: Vec<TaskHandle> = mem::take(&mut self.frontier)
            .into_iter()
            .map(|(_, handle)| handle)
            .collect();

        for &handle in &ready {
            self.transition(handle, ExecutionState::Ready);
        }

        ready
    }

    /// Whether `ready_tasks` would return anything.
    pub fn has_ready(&self) -> bool {
        !self.frontier.is_empty()
    }

    /// `Ready -> Running`.
    pub fn mark_running(&mut self, handle: TaskHandle) -> bool {
        self.transition(handle, ExecutionState::Running)
    }

    /// `Running -> Succeeded`. Returns dependents that became runnable.
    pub fn mark_succeeded(&mut self, handle: TaskHandle) -> Vec<TaskHandle> {
        if !self.transition(handle, ExecutionState::Succeeded) {
            return Vec::new();
        }
        self.resolve_dependents(handle)
    }

    /// `Ready -> Skipped`. Returns dependents that became runnable.
    pub fn mark_skipped(&mut self, handle: TaskHandle) -> Vec<TaskHandle> {
        if !self.transition(handle, ExecutionState::Skipped) {
            return Vec::new();
        }
        self.resolve_dependents(handle)
    }

    /// Mark a task failed and poison every transitive dependent that has not
    /// started. Returns the poisoned dependents (not including `handle`).
    pub fn mark_failed(&mut self, handle: TaskHandle, reason: FailureReason) -> Vec<TaskHandle> {
        if !self.transition(handle, ExecutionState::Failed) {
            return Vec::new();
        }
        self.nodes[handle.0].failure = Some(reason);
        self.failure_log.push(handle);
        self.poison_dependents(handle)
    }

    /// Fail every task that has not been dispatched yet.
    pub fn cancel_pending(&mut self) -> Vec<TaskHandle> {
        self.frontier.clear();

        let mut cancelled = Vec::new();
        for idx in 0..self.nodes.len() {
            let node = &mut self.nodes[idx];
            if matches!(node.state, ExecutionState::Pending | ExecutionState::Ready) {
                node.state = ExecutionState::Failed;
                node.failure = Some(FailureReason::Cancelled);
                cancelled.push(TaskHandle(idx));
            }
        }

        self.failure_log.extend(cancelled.iter().copied());
        cancelled
    }

    /// Tasks that failed since the previous call, in the order they failed.
    pub fn drain_failed(&mut self) -> Vec<TaskHandle> {
        mem::take(&mut self.failure_log)
    }

    /// True once every task is `Succeeded`, `Skipped` or `Failed`.
    pub fn is_drained(&self) -> bool {
        self.nodes.iter().all(|n| n.state.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        (0..self.nodes.len()).map(TaskHandle)
    }

    pub fn contains(&self, handle: TaskHandle) -> bool {
        handle.0 < self.nodes.len()
    }

    pub fn handle_of(&self, name: &str) -> Option<TaskHandle> {
        self.by_name.get(name).copied()
    }

    pub fn state(&self, handle: TaskHandle) -> Option<ExecutionState> {
        self.nodes.get(handle.0).map(|n| n.state)
    }

    pub fn record(&self, handle: TaskHandle) -> Option<&TaskRecord> {
        self.nodes.get(handle.0).map(|n| &n.record)
    }

    pub fn name(&self, handle: TaskHandle) -> Option<&str> {
        self.nodes.get(handle.0).map(|n| n.record.name.as_str())
    }

    pub fn failure(&self, handle: TaskHandle) -> Option<&FailureReason> {
        self.nodes.get(handle.0).and_then(|n| n.failure.as_ref())
    }

    /// Direct dependencies, in submission order.
    pub fn dependencies_of(&self, handle: TaskHandle) -> Vec<TaskHandle> {
        self.neighbors(handle, Direction::Incoming)
    }

    /// Direct dependents, in submission order.
    pub fn dependents_of(&self, handle: TaskHandle) -> Vec<TaskHandle> {
        self.neighbors(handle, Direction::Outgoing)
    }

    /// Task declaring `path` as an output, if any.
    pub fn producer_of(&self, path: &Path) -> Option<TaskHandle> {
        self.producers.get(&normalize(path)).copied()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for node in &self.nodes {
            match node.state {
                ExecutionState::Pending => counts.pending += 1,
                ExecutionState::Ready => counts.ready += 1,
                ExecutionState::Running => counts.running += 1,
                ExecutionState::Succeeded => counts.succeeded += 1,
                ExecutionState::Failed => counts.failed += 1,
                ExecutionState::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// A full topological order of the graph (dependencies first).
    pub fn execution_order(&self) -> Result<Vec<TaskHandle>> {
        toposort(&self.edges, None).map_err(|cycle| {
            let name = self.nodes[cycle.node_id().0].record.name.clone();
            TaskGraphError::Cycle {
                task: name.clone(),
                path: vec![name],
            }
        })
    }

    fn neighbors(&self, handle: TaskHandle, dir: Direction) -> Vec<TaskHandle> {
        if !self.edges.contains_node(handle) {
            return Vec::new();
        }
        let mut out: Vec<TaskHandle> = self.edges.neighbors_directed(handle, dir).collect();
        out.sort();
        out
    }

    fn transition(&mut self, handle: TaskHandle, next: ExecutionState) -> bool {
        let Some(node) = self.nodes.get_mut(handle.0) else {
            warn!(handle = %handle, "transition for unknown task; ignoring");
            return false;
        };

        if !node.state.can_transition_to(next) {
            warn!(
                task = %node.record.name,
                from = %node.state,
                to = %next,
                "invalid state transition; ignoring"
            );
            return false;
        }

        debug!(task = %node.record.name, from = %node.state, to = %next, "state transition");
        node.state = next;
        true
    }

    fn resolve_dependents(&mut self, handle: TaskHandle) -> Vec<TaskHandle> {
        let mut unblocked = Vec::new();

        for dependent in self.dependents_of(handle) {
            let node = &mut self.nodes[dependent.0];
            node.unresolved = node.unresolved.saturating_sub(1);
            if node.unresolved == 0 && node.state == ExecutionState::Pending {
                self.frontier
                    .insert((Reverse(node.record.priority), dependent));
                unblocked.push(dependent);
            }
        }

        unblocked
    }

    fn poison_dependents(&mut self, failed: TaskHandle) -> Vec<TaskHandle> {
        let upstream = self.root_cause_name(failed);
        let mut stack = self.dependents_of(failed);
        let mut poisoned = Vec::new();

        while let Some(handle) = stack.pop() {
            let node = &mut self.nodes[handle.0];
            if !matches!(node.state, ExecutionState::Pending | ExecutionState::Ready) {
                continue;
            }

            node.state = ExecutionState::Failed;
            node.failure = Some(FailureReason::UpstreamFailed {
                upstream: upstream.clone(),
            });
            self.frontier
                .remove(&(Reverse(node.record.priority), handle));
            debug!(
                task = %node.record.name,
                upstream = %upstream,
                "poisoned by upstream failure"
            );

            self.failure_log.push(handle);
            poisoned.push(handle);
            stack.extend(self.dependents_of(handle));
        }

        poisoned
    }

    /// Name of the task whose own body failed, following poisoning back.
    fn root_cause_name(&self, handle: TaskHandle) -> TaskName {
        match &self.nodes[handle.0].failure {
            Some(FailureReason::UpstreamFailed { upstream }) => upstream.clone(),
            _ => self.nodes[handle.0].record.name.clone(),
        }
    }

    /// Breadth-first search from any of `starts` along dependency edges to
    /// any of `targets`. Returns the path (start..=target) if one exists.
    fn find_path_into(
        &self,
        starts: &BTreeSet<TaskHandle>,
        targets: &BTreeSet<TaskHandle>,
    ) -> Option<Vec<TaskHandle>> {
        if starts.is_empty() || targets.is_empty() {
            return None;
        }

        for &start in starts {
            let mut parent: HashMap<TaskHandle, TaskHandle> = HashMap::new();
            let mut seen: HashSet<TaskHandle> = HashSet::from([start]);
            let mut queue = VecDeque::from([start]);

            while let Some(current) = queue.pop_front() {
                if targets.contains(&current) {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while let Some(&prev) = parent.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }

                for next in self.edges.neighbors_directed(current, Direction::Outgoing) {
                    if seen.insert(next) {
                        parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> TaskSpec {
        TaskSpec::noop(name)
    }

    #[test]
    fn new_task_without_deps_is_immediately_ready() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(task("a")).unwrap();

        assert_eq!(graph.state(a), Some(ExecutionState::Pending));
        assert_eq!(graph.ready_tasks(), vec![a]);
        assert_eq!(graph.state(a), Some(ExecutionState::Ready));
        assert!(graph.ready_tasks().is_empty());
    }

    #[test]
    fn reverse_inference_blocks_an_existing_consumer() {
        let mut graph = DependencyGraph::new();
        let consumer = graph.add_task(task("merge").input("out1.tif")).unwrap();
        let producer = graph.add_task(task("warp").output("out1.tif")).unwrap();

        assert_eq!(graph.dependencies_of(consumer), vec![producer]);
        assert_eq!(graph.ready_tasks(), vec![producer]);
    }

    #[test]
    fn adding_a_dependent_of_a_failed_task_poisons_it() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_task(task("a").output("a.tif")).unwrap();
        graph.ready_tasks();
        graph.mark_running(a);
        graph.mark_failed(
            a,
            FailureReason::Execution {
                message: "boom".into(),
            },
        );

        let b = graph.add_task(task("b").input("a.tif")).unwrap();
        assert_eq!(graph.state(b), Some(ExecutionState::Failed));
        assert_eq!(
            graph.failure(b),
            Some(&FailureReason::UpstreamFailed {
                upstream: "a".into()
            })
        );
        assert_eq!(graph.drain_failed(), vec![a, b]);
    }
}
