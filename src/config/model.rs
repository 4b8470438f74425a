// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::GraphConfig;
use crate::exec::{ExecutorConfig, Provisioning};
use crate::types::{ExecutorKind, HashAlgorithm};

/// Run configuration as read from a TOML file.
///
/// ```toml
/// [graph]
/// workspace = "workspace_dir"
/// n_workers = 4
/// hash_algorithm = "blake3"
/// reporting_interval = "30s"
///
/// [cluster]
/// workers = ["node1:7878", "node2:7878"]
/// walltime = "00:10:00"
/// memory = "4GB"
/// queue = "normal,hns"
/// ```
///
/// Every section and key is optional. Turn it into a [`RunConfig`] with
/// `RunConfig::try_from`, which performs validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRunConfig {
    #[serde(default)]
    pub graph: GraphSection,

    /// Required only for the remote executor.
    #[serde(default)]
    pub cluster: Option<ClusterSection>,
}

/// `[graph]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSection {
    /// Directory receiving outputs; the engine's own state lives in
    /// `<workspace>/.taskgraph`.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Negative: synchronous. `0`: one background worker. `n`: pool of `n`.
    /// Unset: one worker per CPU.
    #[serde(default)]
    pub n_workers: Option<i64>,

    /// Explicit backend; derived from `n_workers` when unset.
    #[serde(default)]
    pub executor: Option<ExecutorKind>,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Duration string such as `"30s"`.
    #[serde(default)]
    pub reporting_interval: Option<String>,

    #[serde(default = "default_true")]
    pub persist: bool,

    /// Drop records of tasks that were not submitted in this run.
    #[serde(default)]
    pub prune: bool,
}

fn default_workspace() -> PathBuf {
    PathBuf::from("workspace_dir")
}

fn default_true() -> bool {
    true
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            n_workers: None,
            executor: None,
            hash_algorithm: HashAlgorithm::default(),
            reporting_interval: None,
            persist: true,
            prune: false,
        }
    }
}

/// `[cluster]` section.
///
/// The provisioning keys (`cores`, `memory`, `queue`,
/// `job_script_prologue`) describe the allocation the workers were started
/// in. They are passed through untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    /// `host:port` of each pre-provisioned worker.
    #[serde(default)]
    pub workers: Vec<String>,

    /// `"HH:MM:SS"` or a duration string.
    #[serde(default)]
    pub walltime: Option<String>,

    #[serde(default = "default_submit_retries")]
    pub submit_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Longest silence tolerated from a worker running a task.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    #[serde(flatten)]
    pub provisioning: Provisioning,
}

fn default_submit_retries() -> u32 {
    3
}

fn default_retry_backoff() -> String {
    "500ms".to_string()
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_idle_timeout() -> String {
    "60s".to_string()
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            walltime: None,
            submit_retries: default_submit_retries(),
            retry_backoff: default_retry_backoff(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            provisioning: Provisioning::default(),
        }
    }
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workspace: PathBuf,
    pub executor: ExecutorConfig,
    pub hash_algorithm: HashAlgorithm,
    pub reporting_interval: Option<Duration>,
    pub persist: bool,
    pub prune: bool,
}

impl RunConfig {
    /// Engine settings for a graph over this run's workspace.
    pub fn graph_config(&self) -> GraphConfig {
        let mut config = GraphConfig::for_workspace(&self.workspace)
            .executor(self.executor.clone())
            .hash_algorithm(self.hash_algorithm)
            .persist(self.persist)
            .prune_stale(self.prune);
        if let Some(interval) = self.reporting_interval {
            config = config.reporting_interval(interval);
        }
        config
    }
}
