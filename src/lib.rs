// src/lib.rs

//! Dependency-aware task execution.
//!
//! Submit [`TaskSpec`]s to a [`TaskGraph`]; `join()` runs them in dependency
//! order on the configured executor, skipping tasks whose outputs are still
//! valid from an earlier run, and `close()` releases the executor and the
//! workspace.

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod ops;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub use crate::dag::{ExecutionState, TaskHandle, TaskSpec};
pub use crate::engine::{CancelHandle, FailureReason, GraphConfig, RunSummary, TaskGraph};
pub use crate::errors::{FailedTask, JoinFailure, TaskGraphError};
pub use crate::exec::{Executor, ExecutorConfig};

use crate::cli::{CliArgs, Command, RunArgs, WorkerArgs};
use crate::config::{ClusterSection, InputData, RawRunConfig, RunConfig, load_input, load_or_default};
use crate::ops::OperationRegistry;
use crate::pipeline::{RasterJob, WarpOptions};
use crate::types::{ExecutorKind, PipelineMode};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(run_args) => run_pipeline(run_args).await,
        Command::Worker(worker_args) => run_worker(worker_args).await,
    }
}

/// `taskgraph run`: load config + input, build the raster graph, join, close.
///
/// The graph is always closed, even when `join()` fails.
async fn run_pipeline(args: RunArgs) -> Result<()> {
    let mut raw = load_or_default(&args.config)?;
    let input = load_input(&args.input, &args.bbox_key)?;
    apply_overrides(&mut raw, &args, &input);
    let cfg = RunConfig::try_from(raw)?;

    let jobs = pipeline::plan_rasters(&input, &cfg.workspace);
    if jobs.is_empty() {
        warn!(input = ?args.input, "input lists no rasters");
    }
    let mut options = WarpOptions::new(input.bbox);
    options.pixel_size = args.pixel_size;
    options.resample = args.resample.clone();

    let graph_config = if args.dry_run {
        // Nothing runs: no lock, no store writes, no worker pool.
        cfg.graph_config()
            .persist(false)
            .executor(ExecutorConfig::Synchronous)
    } else {
        std::fs::create_dir_all(&cfg.workspace)
            .with_context(|| format!("creating workspace {:?}", cfg.workspace))?;
        cfg.graph_config()
    };

    let mut graph = TaskGraph::new(graph_config)?;
    let outcome = build_and_join(&mut graph, &args, &jobs, &options, &cfg.workspace).await;
    let closed = graph.close().await;

    outcome?;
    closed?;
    Ok(())
}

async fn build_and_join(
    graph: &mut TaskGraph,
    args: &RunArgs,
    jobs: &[RasterJob],
    options: &WarpOptions,
    workspace: &Path,
) -> Result<()> {
    match args.mode {
        PipelineMode::Multi => {
            pipeline::add_warp_tasks(graph, jobs, options)?;
        }
        PipelineMode::Single => {
            pipeline::add_align_stack_task(graph, jobs, options, jobs.len())?;
        }
    }
    if let Some(name) = &args.mosaic {
        pipeline::add_mosaic_task(graph, jobs, workspace, name)?;
    }

    if args.dry_run {
        print_dry_run(graph)?;
        return Ok(());
    }

    // Ctrl-C → stop dispatching; running tasks finish.
    let cancel = graph.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        warn!("Ctrl-C received; cancelling tasks that have not started");
        cancel.cancel();
    });

    let result = graph.join().await;
    ctrl_c.abort();

    let summary = result?;
    info!(%summary, "pipeline finished");
    Ok(())
}

/// CLI flags win over the config file. Worker count defaults follow the
/// pipeline shape: one worker per raster for `multi`, synchronous for
/// `single` (its task runs its own processes).
fn apply_overrides(raw: &mut RawRunConfig, args: &RunArgs, input: &InputData) {
    if let Some(workspace) = &args.workspace {
        raw.graph.workspace = workspace.clone();
    }

    if let Some(kind) = args.executor {
        raw.graph.executor = Some(kind);
    }
    if !args.workers.is_empty() {
        raw.cluster
            .get_or_insert_with(ClusterSection::default)
            .workers = args.workers.clone();
        if raw.graph.executor.is_none() {
            raw.graph.executor = Some(ExecutorKind::Remote);
        }
    }

    if let Some(n) = args.n_workers {
        raw.graph.n_workers = Some(n);
    } else if raw.graph.n_workers.is_none() {
        // Single mode's -1 selects the synchronous executor, so it only
        // applies when no executor was chosen.
        raw.graph.n_workers = match args.mode {
            PipelineMode::Multi => Some(i64::try_from(input.data.len()).unwrap_or(i64::MAX)),
            PipelineMode::Single if raw.graph.executor.is_none() => Some(-1),
            PipelineMode::Single => None,
        };
    }

    if let Some(algorithm) = args.hash_algorithm {
        raw.graph.hash_algorithm = algorithm;
    }
}

/// Simple dry-run output: print tasks in execution order.
fn print_dry_run(graph: &TaskGraph) -> Result<()> {
    let order = graph.execution_order()?;
    let dag = graph.graph();

    println!("taskgraph dry-run");
    println!("tasks ({}):", order.len());
    for handle in order {
        let Some(record) = dag.record(handle) else {
            continue;
        };
        println!("  - {}", record.name);
        println!("      operation: {}", record.operation.name());
        println!("      params: {}", record.operation.params());
        if !record.outputs.is_empty() {
            println!("      outputs: {:?}", record.outputs);
        }
        let deps: Vec<&str> = dag
            .dependencies_of(handle)
            .into_iter()
            .filter_map(|d| dag.name(d))
            .collect();
        if !deps.is_empty() {
            println!("      after: {:?}", deps);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

/// `taskgraph worker`: serve remote tasks until Ctrl-C.
async fn run_worker(args: WorkerArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding worker to {}", args.listen))?;
    let registry = Arc::new(OperationRegistry::with_builtins());

    tokio::select! {
        served = worker::serve(listener, registry, args.heartbeat) => served?,
        _ = tokio::signal::ctrl_c() => info!("worker shutting down"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::exec::ExecutorConfig;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = CliArgs::try_parse_from(argv.iter().copied()).unwrap();
        match cli.command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    fn input(n: usize) -> InputData {
        InputData {
            data: (0..n).map(|i| format!("https://example.org/{i}.tif")).collect(),
            bbox: [0.0, 0.0, 1.0, 1.0],
        }
    }

    fn resolved(argv: &[&str], n_inputs: usize) -> RunConfig {
        let args = run_args(argv);
        let mut raw = RawRunConfig::default();
        apply_overrides(&mut raw, &args, &input(n_inputs));
        RunConfig::try_from(raw).unwrap()
    }

    #[test]
    fn single_mode_defaults_to_synchronous() {
        let config = resolved(&["taskgraph", "run", "--mode", "single"], 3);
        assert!(matches!(config.executor, ExecutorConfig::Synchronous));
    }

    #[test]
    fn single_mode_keeps_an_explicit_local_executor() {
        let config = resolved(
            &["taskgraph", "run", "--mode", "single", "--executor", "local"],
            3,
        );
        assert!(matches!(config.executor, ExecutorConfig::Local { .. }));
    }

    #[test]
    fn multi_mode_sizes_the_pool_from_the_inputs() {
        let config = resolved(&["taskgraph", "run", "--mode", "multi"], 3);
        assert!(matches!(config.executor, ExecutorConfig::Local { workers: 3 }));
    }
}
