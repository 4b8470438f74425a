// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ClusterSection, RawRunConfig, RunConfig};
use crate::errors::{Result, TaskGraphError};
use crate::exec::{ExecutorConfig, RemoteConfig};
use crate::types::ExecutorKind;

impl TryFrom<RawRunConfig> for RunConfig {
    type Error = TaskGraphError;

    fn try_from(raw: RawRunConfig) -> std::result::Result<Self, Self::Error> {
        let graph = raw.graph;

        if let Some(n) = graph.n_workers.filter(|n| *n < -1) {
            return Err(TaskGraphError::Config(format!(
                "[graph].n_workers must be >= -1 (got {n})"
            )));
        }

        let reporting_interval = graph
            .reporting_interval
            .as_deref()
            .map(|s| parse_duration(s).map_err(|e| config_error("[graph].reporting_interval", e)))
            .transpose()?;

        let executor = resolve_executor(graph.executor, graph.n_workers, raw.cluster)?;

        Ok(RunConfig {
            workspace: graph.workspace,
            executor,
            hash_algorithm: graph.hash_algorithm,
            reporting_interval,
            persist: graph.persist,
            prune: graph.prune,
        })
    }
}

fn resolve_executor(
    kind: Option<ExecutorKind>,
    n_workers: Option<i64>,
    cluster: Option<ClusterSection>,
) -> Result<ExecutorConfig> {
    match kind {
        None => Ok(n_workers
            .map(ExecutorConfig::from_n_workers)
            .unwrap_or_default()),
        Some(ExecutorKind::Sync) => Ok(ExecutorConfig::Synchronous),
        Some(ExecutorKind::Local) => match n_workers {
            Some(n) if n < 0 => Err(TaskGraphError::Config(format!(
                "executor = \"local\" needs n_workers >= 0 (got {n})"
            ))),
            Some(n) => Ok(ExecutorConfig::from_n_workers(n)),
            None => Ok(ExecutorConfig::default()),
        },
        Some(ExecutorKind::Remote) => {
            let cluster = cluster.unwrap_or_default();
            remote_config(cluster).map(ExecutorConfig::Remote)
        }
    }
}

fn remote_config(cluster: ClusterSection) -> Result<RemoteConfig> {
    if cluster.workers.is_empty() {
        return Err(TaskGraphError::Config(
            "executor = \"remote\" requires at least one [cluster].workers entry".to_string(),
        ));
    }
    for worker in &cluster.workers {
        if !worker.contains(':') {
            return Err(TaskGraphError::Config(format!(
                "[cluster].workers entry '{worker}' must be host:port"
            )));
        }
    }

    let walltime = cluster
        .walltime
        .as_deref()
        .map(|s| parse_walltime(s).map_err(|e| config_error("[cluster].walltime", e)))
        .transpose()?;
    let retry_backoff = parse_duration(&cluster.retry_backoff)
        .map_err(|e| config_error("[cluster].retry_backoff", e))?;
    let connect_timeout = parse_duration(&cluster.connect_timeout)
        .map_err(|e| config_error("[cluster].connect_timeout", e))?;
    let idle_timeout = parse_duration(&cluster.idle_timeout)
        .map_err(|e| config_error("[cluster].idle_timeout", e))?;
    if idle_timeout.is_zero() {
        return Err(config_error("[cluster].idle_timeout", "must be positive".to_string()));
    }

    Ok(RemoteConfig {
        workers: cluster.workers,
        walltime,
        submit_retries: cluster.submit_retries,
        retry_backoff,
        connect_timeout,
        idle_timeout,
        provisioning: cluster.provisioning,
    })
}

fn config_error(key: &str, message: String) -> TaskGraphError {
    TaskGraphError::Config(format!("{key}: {message}"))
}

/// Parse a duration string like `"500ms"`, `"30s"`, `"10m"` or `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let too_large = || format!("duration '{s}' is too large");
    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

/// Parse a batch-queue walltime: `"HH:MM:SS"`, `"MM:SS"`, or anything
/// [`parse_duration`] accepts.
pub fn parse_walltime(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if !s.contains(':') {
        return parse_duration(s);
    }

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 {
        return Err(format!("invalid walltime '{s}'; expected HH:MM:SS"));
    }

    let mut seconds: u64 = 0;
    for part in parts {
        let value: u64 = part
            .parse()
            .map_err(|e| format!("invalid walltime component '{part}' in '{s}': {e}"))?;
        seconds = seconds
            .checked_mul(60)
            .and_then(|secs| secs.checked_add(value))
            .ok_or_else(|| format!("walltime '{s}' is too large"))?;
    }
    Ok(Duration::from_secs(seconds))
}
