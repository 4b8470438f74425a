// src/engine/scheduler.rs

//! The coordinator.
//!
//! A single `TaskGraph` owns all graph and store mutation. Task bodies run
//! inside the executor; the coordinator only reacts to their completions.
//! Every `join()` loops:
//!
//! 1. pull newly ready tasks from the graph,
//! 2. for each, compute its signature and either mark it `Skipped` (outputs
//!    already valid) or hand it to the executor,
//! 3. wait for a completion, record its outputs on success, poison its
//!    dependents on failure,
//!
//! until no task is pending, ready or running.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dag::{DependencyGraph, ExecutionState, StateCounts, TaskHandle, TaskRecord, TaskSpec};
use crate::engine::cancel::CancelHandle;
use crate::engine::context::{GraphConfig, RunContext};
use crate::engine::{Completion, CompletionReceiver, CompletionSender, FailureReason, TaskOutcome};
use crate::errors::{FailedTask, JoinFailure, Result, TaskGraphError};
use crate::exec::{Executor, Job};
use crate::store::{ArtifactStore, FingerprintCache, SignatureBuilder};

/// Outcome of a `join()` in which no task failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// 1 for the first join of a graph, 2 for the next, ...
    pub run_id: u64,
    /// State counts over the whole graph once the join finished.
    pub counts: StateCounts,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} task(s), {} succeeded, {} skipped in {:.1?}",
            self.run_id,
            self.counts.total(),
            self.counts.succeeded,
            self.counts.skipped,
            self.elapsed
        )
    }
}

pub struct TaskGraph {
    ctx: RunContext,
    completions: CompletionReceiver,
    /// Signature computed for every task that reached dispatch.
    signatures: HashMap<TaskHandle, String>,
    results: HashMap<TaskHandle, Value>,
    /// Every failure so far, in the order observed.
    failures: Vec<FailedTask>,
    /// How many entries of `failures` earlier joins already returned.
    reported: usize,
    in_flight: usize,
    cancel: CancelHandle,
    cancel_rx: watch::Receiver<bool>,
    fingerprints: FingerprintCache,
    reporting_interval: Option<Duration>,
    prune_stale: bool,
    run_id: u64,
    closed: bool,
}

impl TaskGraph {
    /// Build a graph and the executor described by `config.executor`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: GraphConfig) -> Result<Self> {
        let executor = config.executor.clone();
        Self::with_executor(config, move |completions| executor.build(completions))
    }

    /// Build a graph around a caller-supplied executor.
    ///
    /// `build` receives the channel the executor must report completions on.
    pub fn with_executor<F>(config: GraphConfig, build: F) -> Result<Self>
    where
        F: FnOnce(CompletionSender) -> Box<dyn Executor>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = RunContext::open(&config, move || build(tx))?;
        let (cancel, cancel_rx) = CancelHandle::new();

        info!(
            cache_dir = ?ctx.cache_dir(),
            executor = ?ctx.executor.kind(),
            persist = config.persist,
            records = ctx.store.len(),
            "task graph ready"
        );

        Ok(Self {
            ctx,
            completions: rx,
            signatures: HashMap::new(),
            results: HashMap::new(),
            failures: Vec::new(),
            reported: 0,
            in_flight: 0,
            cancel,
            cancel_rx,
            fingerprints: FingerprintCache::new(config.hash_algorithm),
            reporting_interval: config.reporting_interval,
            prune_stale: config.prune_stale,
            run_id: 0,
            closed: false,
        })
    }

    /// Register a task. Nothing runs until [`join`](Self::join).
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskHandle> {
        self.ensure_open()?;
        let handle = self.ctx.graph.add_task(spec)?;
        // A dependency may already have failed in an earlier join.
        self.collect_failures();
        Ok(handle)
    }

    /// Run every submitted task to a terminal state.
    ///
    /// Returns `TasksFailed` listing every task that failed since the
    /// previous join (poisoned dependents included); independent branches
    /// still run to completion first.
    pub async fn join(&mut self) -> Result<RunSummary> {
        self.ensure_open()?;
        self.run_id += 1;
        let run_id = self.run_id;
        let started = Instant::now();
        self.fingerprints.clear();

        info!(run_id, tasks = self.ctx.graph.len(), "join started");
        let mut ticker = self.reporting_interval.and_then(|period| {
            let start = tokio::time::Instant::now().checked_add(period)?;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        });
        let mut cancel_logged = false;

        loop {
            let cancelled = *self.cancel_rx.borrow();
            if cancelled {
                if !cancel_logged {
                    warn!(run_id, in_flight = self.in_flight, "cancellation requested; no further tasks will start");
                    cancel_logged = true;
                }
                self.cancel_remaining();
            } else {
                self.dispatch_ready().await;
            }

            if self.in_flight == 0 {
                if self.ctx.graph.is_drained() {
                    break;
                }
                if !cancelled && self.ctx.graph.has_ready() {
                    continue;
                }
                let counts = self.ctx.graph.counts();
                return Err(anyhow!("scheduler stalled with unfinished tasks ({counts})").into());
            }

            tokio::select! {
                completion = self.completions.recv() => match completion {
                    Some(completion) => self.handle_completion(completion),
                    None => self.executor_lost(),
                },
                _ = next_tick(&mut ticker) => self.report_progress(run_id),
                _ = self.cancel_rx.changed(), if !cancelled => {}
            }
        }

        if let Err(e) = self.ctx.store.flush() {
            warn!(error = %e, "failed to flush artifact store");
        }

        let counts = self.ctx.graph.counts();
        let failures = self.failures[self.reported..].to_vec();
        self.reported = self.failures.len();
        let summary = RunSummary {
            run_id,
            counts,
            elapsed: started.elapsed(),
        };

        if failures.is_empty() {
            info!(run_id, %counts, elapsed = ?summary.elapsed, "join finished");
            Ok(summary)
        } else {
            warn!(run_id, %counts, failed = failures.len(), "join finished with failures");
            Err(TaskGraphError::TasksFailed(JoinFailure { failures }))
        }
    }

    /// Release the executor, flush the store and unlock the workspace.
    ///
    /// Idempotent; `add_task` and `join` fail with `Closed` afterwards.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.prune_stale {
            if self.failures.is_empty() {
                let graph = &self.ctx.graph;
                self.ctx.store.prune(|name| graph.handle_of(name).is_some());
            } else {
                debug!("run had failures; keeping stale artifact records");
            }
        }
        if self.in_flight > 0 {
            warn!(in_flight = self.in_flight, "closing with tasks still running");
        }

        let result = self.ctx.teardown().await;
        info!("task graph closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn state(&self, handle: TaskHandle) -> Option<ExecutionState> {
        self.ctx.graph.state(handle)
    }

    /// Why `handle` failed, if it did.
    pub fn failure(&self, handle: TaskHandle) -> Option<&FailureReason> {
        self.ctx.graph.failure(handle)
    }

    /// Value returned by the task body. For skipped tasks this is only
    /// available when the task was submitted with `store_result`.
    pub fn result(&self, handle: TaskHandle) -> Option<&Value> {
        self.results.get(&handle)
    }

    /// A deterministic topological order of every submitted task.
    pub fn execution_order(&self) -> Result<Vec<TaskHandle>> {
        self.ctx.graph.execution_order()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn counts(&self) -> StateCounts {
        self.ctx.graph.counts()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.ctx.graph
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.ctx.store
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(TaskGraphError::Closed)
        } else {
            Ok(())
        }
    }

    async fn dispatch_ready(&mut self) {
        loop {
            let ready = self.ctx.graph.ready_tasks();
            if ready.is_empty() {
                break;
            }
            for handle in ready {
                self.dispatch(handle).await;
            }
        }
    }

    async fn dispatch(&mut self, handle: TaskHandle) {
        let Some(record) = self.ctx.graph.record(handle).cloned() else {
            return;
        };

        let signature = match self.compute_signature(handle, &record) {
            Ok(signature) => signature,
            Err(e) => {
                self.fail(
                    handle,
                    FailureReason::artifact_validation(format!("cannot compute signature: {e:#}")),
                );
                return;
            }
        };
        debug!(task = %record.name, signature = %signature, "computed signature");

        if !record.transient && self.ctx.store.is_valid(&record.name, &record.outputs, &signature)
        {
            info!(task = %record.name, "outputs up to date; skipping");
            if let Some(result) = self.ctx.store.result_of(&record.name) {
                self.results.insert(handle, result.clone());
            }
            self.signatures.insert(handle, signature);
            self.ctx.graph.mark_skipped(handle);
            return;
        }

        self.signatures.insert(handle, signature);
        self.ctx.graph.mark_running(handle);

        let job = Job {
            task: handle,
            name: record.name.clone(),
            operation: Arc::clone(&record.operation),
        };
        info!(task = %record.name, operation = %record.operation.name(), "dispatching task");

        match self.ctx.executor.submit(job).await {
            Ok(()) => self.in_flight += 1,
            Err(e) => self.fail(
                handle,
                FailureReason::ExecutorUnavailable {
                    attempts: 1,
                    message: e.to_string(),
                },
            ),
        }
    }

    /// Operation spec, declared outputs, dependency signatures, and the
    /// fingerprint of every input not covered by a dependency's signature.
    fn compute_signature(&mut self, handle: TaskHandle, record: &TaskRecord) -> anyhow::Result<String> {
        let graph = &self.ctx.graph;
        let mut builder = SignatureBuilder::new();
        builder.operation(&record.operation.spec());
        for output in &record.outputs {
            builder.output(output);
        }

        let mut upstream = Vec::new();
        for dep in graph.dependencies_of(handle) {
            let name = graph.name(dep).unwrap_or_default();
            let signature = self
                .signatures
                .get(&dep)
                .ok_or_else(|| anyhow!("dependency '{name}' has no signature"))?;
            upstream.push((name, signature.as_str()));
        }
        upstream.sort();
        for (name, signature) in upstream {
            builder.upstream(name, signature);
        }

        for input in &record.inputs {
            // Outputs of a non-transient producer are already covered by its
            // signature.
            let covered = graph
                .producer_of(input)
                .and_then(|p| graph.record(p))
                .is_some_and(|producer| !producer.transient);
            if covered {
                continue;
            }
            let fingerprint = self.fingerprints.get_or_compute(input)?;
            builder.input(input, fingerprint.as_deref());
        }

        Ok(builder.finish())
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            task: handle,
            name,
            outcome,
        } = completion;

        if self.ctx.graph.state(handle) != Some(ExecutionState::Running) {
            warn!(task = %name, "completion for a task that is not running; ignoring");
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        let Some(record) = self.ctx.graph.record(handle).cloned() else {
            return;
        };
        for output in &record.outputs {
            self.fingerprints.invalidate(output);
        }

        let result = match outcome {
            TaskOutcome::Success { result } => result,
            TaskOutcome::Failed { reason } => {
                self.fail(handle, reason);
                return;
            }
        };

        let signature = self.signatures.get(&handle).cloned().unwrap_or_default();
        let stored = if record.transient {
            self.ctx.store.verify_outputs(&record.outputs).map(|_| ())
        } else {
            let persisted = record.store_result.then(|| result.clone());
            self.ctx
                .store
                .record(&name, &record.outputs, &signature, persisted)
        };

        match stored {
            Ok(()) => {
                self.results.insert(handle, result);
                let unblocked = self.ctx.graph.mark_succeeded(handle);
                info!(task = %name, unblocked = unblocked.len(), "task succeeded");
            }
            Err(e) => self.fail(handle, FailureReason::artifact_validation(format!("{e:#}"))),
        }
    }

    fn fail(&mut self, handle: TaskHandle, reason: FailureReason) {
        let name = self.ctx.graph.name(handle).unwrap_or_default().to_string();
        warn!(task = %name, reason = %reason, "task failed");

        self.ctx.store.forget(&name);
        let poisoned = self.ctx.graph.mark_failed(handle, reason);
        if !poisoned.is_empty() {
            warn!(task = %name, poisoned = poisoned.len(), "dependents will not run");
        }
        self.collect_failures();
    }

    fn collect_failures(&mut self) {
        for handle in self.ctx.graph.drain_failed() {
            let task = self.ctx.graph.name(handle).unwrap_or_default().to_string();
            let reason = self
                .ctx
                .graph
                .failure(handle)
                .cloned()
                .unwrap_or_else(|| FailureReason::execution("unknown failure"));
            self.failures.push(FailedTask { task, reason });
        }
    }

    fn cancel_remaining(&mut self) {
        let cancelled = self.ctx.graph.cancel_pending();
        if !cancelled.is_empty() {
            info!(cancelled = cancelled.len(), "cancelled tasks that had not started");
        }
        self.collect_failures();
    }

    /// Every completion sender is gone; nothing still running will report.
    fn executor_lost(&mut self) {
        warn!(in_flight = self.in_flight, "executor stopped reporting completions");
        let running: Vec<TaskHandle> = self
            .ctx
            .graph
            .handles()
            .filter(|&h| self.ctx.graph.state(h) == Some(ExecutionState::Running))
            .collect();
        for handle in running {
            self.fail(
                handle,
                FailureReason::ExecutorUnavailable {
                    attempts: 1,
                    message: "executor stopped before reporting completion".to_string(),
                },
            );
        }
        self.in_flight = 0;
    }

    fn report_progress(&self, run_id: u64) {
        let counts = self.ctx.graph.counts();
        info!(
            run_id,
            done = counts.terminal(),
            total = counts.total(),
            %counts,
            "progress"
        );
    }
}

impl Drop for TaskGraph {
    fn drop(&mut self) {
        if !self.closed {
            warn!("task graph dropped without close(); executor was not shut down");
            if let Err(e) = self.ctx.store.flush() {
                warn!(error = %e, "failed to flush artifact store");
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
