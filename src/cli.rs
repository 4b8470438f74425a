// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::{ExecutorKind, HashAlgorithm, PipelineMode};

/// Command-line arguments for `taskgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskgraph",
    version,
    about = "Dependency-aware task execution for raster pipelines.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKGRAPH_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Warp every input raster onto the bounding box.
    Run(RunArgs),
    /// Serve tasks for coordinators using the remote executor.
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the config file (TOML). Missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "TaskGraph.toml")]
    pub config: PathBuf,

    /// JSON file listing the input rasters and bounding boxes.
    #[arg(long, value_name = "PATH", default_value = "input_data.json")]
    pub input: PathBuf,

    /// Key of the bounding box inside the input file.
    #[arg(long, value_name = "KEY", default_value = crate::config::DEFAULT_BBOX_KEY)]
    pub bbox_key: String,

    /// Output directory; overrides `[graph].workspace`.
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// `multi`: one task per raster. `single`: one task for the stack.
    #[arg(long, value_name = "MODE", default_value = "multi")]
    pub mode: PipelineMode,

    /// Worker count; negative runs tasks synchronously.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub n_workers: Option<i64>,

    /// Executor backend (sync, local, remote).
    #[arg(long, value_name = "KIND")]
    pub executor: Option<ExecutorKind>,

    /// Remote worker address (host:port); repeatable.
    #[arg(long = "worker", value_name = "ADDR")]
    pub workers: Vec<String>,

    /// Target pixel size as `X,Y`.
    #[arg(long, value_name = "X,Y", value_parser = parse_pixel_size)]
    pub pixel_size: Option<(f64, f64)>,

    /// gdalwarp resampling method.
    #[arg(long, value_name = "METHOD", default_value = "near")]
    pub resample: String,

    /// Also build a VRT mosaic with this file name.
    #[arg(long, value_name = "NAME")]
    pub mosaic: Option<String>,

    /// Fingerprint algorithm (sizetimestamp, blake3).
    #[arg(long, value_name = "ALGO")]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Print the tasks and their order, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Address to listen on.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:7878")]
    pub listen: String,

    /// Period between heartbeats sent while a task runs (e.g. `10s`).
    #[arg(long, value_name = "DURATION", default_value = "10s", value_parser = crate::config::parse_duration)]
    pub heartbeat: Duration,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_pixel_size(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("invalid X '{x}': {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("invalid Y '{y}': {e}"))?;
    Ok((x, y))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_negative_workers_and_repeated_endpoints() {
        let args = CliArgs::try_parse_from([
            "taskgraph",
            "run",
            "--n-workers",
            "-1",
            "--worker",
            "a:1",
            "--worker",
            "b:2",
            "--pixel-size",
            "0.5,-0.5",
            "--mode",
            "single",
        ])
        .unwrap();

        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.n_workers, Some(-1));
        assert_eq!(run.workers, ["a:1", "b:2"]);
        assert_eq!(run.pixel_size, Some((0.5, -0.5)));
        assert_eq!(run.mode, PipelineMode::Single);
    }

    #[test]
    fn worker_has_default_listen_address() {
        let args = CliArgs::try_parse_from(["taskgraph", "--log-level", "debug", "worker"]).unwrap();
        match args.command {
            Command::Worker(w) => {
                assert_eq!(w.listen, "0.0.0.0:7878");
                assert_eq!(w.heartbeat, Duration::from_secs(10));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
