// src/engine/context.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::dag::DependencyGraph;
use crate::errors::Result;
use crate::exec::{Executor, ExecutorConfig};
use crate::store::{ArtifactStore, WorkspaceLock};
use crate::types::HashAlgorithm;

/// Directory (inside the workspace) holding the engine's persisted state.
pub const CACHE_DIR_NAME: &str = ".taskgraph";

/// Everything a [`TaskGraph`](super::TaskGraph) needs at construction.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Where signature records and the workspace lock live.
    pub cache_dir: PathBuf,
    pub executor: ExecutorConfig,
    pub hash_algorithm: HashAlgorithm,
    /// Log per-state task counts this often while joining.
    pub reporting_interval: Option<Duration>,
    /// `false` keeps signatures in memory and takes no lock.
    pub persist: bool,
    /// Drop records of tasks not submitted in this run on a clean `close()`.
    pub prune_stale: bool,
}

impl GraphConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            executor: ExecutorConfig::default(),
            hash_algorithm: HashAlgorithm::default(),
            reporting_interval: None,
            persist: true,
            prune_stale: false,
        }
    }

    /// State kept under `<workspace>/.taskgraph`.
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::new(workspace.join(CACHE_DIR_NAME))
    }

    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Shorthand for [`ExecutorConfig::from_n_workers`].
    pub fn n_workers(self, n_workers: i64) -> Self {
        self.executor(ExecutorConfig::from_n_workers(n_workers))
    }

    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = Some(interval);
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn prune_stale(mut self, prune: bool) -> Self {
        self.prune_stale = prune;
        self
    }
}

/// Per-graph resources, created on construction and released by
/// [`teardown`](Self::teardown).
pub struct RunContext {
    pub graph: DependencyGraph,
    pub store: ArtifactStore,
    pub executor: Box<dyn Executor>,
    lock: Option<WorkspaceLock>,
    cache_dir: PathBuf,
}

impl RunContext {
    /// Lock the workspace (when persisting) and open its store.
    ///
    /// The executor is built by the caller only after this succeeds, so a
    /// locked workspace never starts worker pools.
    pub fn open<F>(config: &GraphConfig, build_executor: F) -> Result<Self>
    where
        F: FnOnce() -> Box<dyn Executor>,
    {
        let (lock, store) = if config.persist {
            let lock = WorkspaceLock::acquire(&config.cache_dir)?;
            let store = ArtifactStore::open(&config.cache_dir, config.hash_algorithm)?;
            (Some(lock), store)
        } else {
            (None, ArtifactStore::in_memory(config.hash_algorithm))
        };

        Ok(Self {
            graph: DependencyGraph::new(),
            store,
            executor: build_executor(),
            lock,
            cache_dir: config.cache_dir.clone(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Shut the executor down, flush the store and release the lock.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub async fn teardown(&mut self) -> Result<()> {
        let executor_result = self.executor.shutdown().await;
        if let Err(e) = &executor_result {
            warn!(error = %e, "executor shutdown failed");
        }

        let store_result = self.store.flush();
        if let Err(e) = &store_result {
            warn!(error = %e, "failed to flush artifact store");
        }

        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        debug!(cache_dir = ?self.cache_dir, "run context torn down");

        executor_result.and(store_result)
    }
}
