// src/ops/builtin.rs

//! Built-in operations.
//!
//! Raster work is delegated to external programs (GDAL's `gdalwarp`,
//! `gdalbuildvrt`, ...) through [`CommandOperation`]; the engine treats them
//! as opaque. Processes run on `tokio::process`; the blocking `run` drives
//! them on the runtime the task body was started from.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::Operation;

/// Number of trailing stderr lines kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Run an external program with fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOperation {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandOperation {
    pub const NAME: &'static str = "command";

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable command line, for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    async fn execute(&self) -> Result<i32> {
        debug!(cmd = %self.display(), "spawning process");

        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawning `{}`", self.program))?;

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            bail!("`{}` exited with code {code}: {tail}", self.display());
        }

        Ok(code)
    }
}

impl Operation for CommandOperation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Value {
        json!({
            "program": self.program,
            "args": self.args,
            "env": self.env,
        })
    }

    fn run(&self) -> Result<Value> {
        let code = block_on(self.execute())??;
        Ok(json!({ "exit_code": code }))
    }
}

/// Several commands run by one task body with its own parallelism.
///
/// This is the "let the task fork its own subprocesses" shape: pair it with a
/// synchronous executor so the engine does not parallelise on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelCommands {
    pub commands: Vec<CommandOperation>,
    /// Maximum concurrently running commands; `0` means one per CPU.
    #[serde(default)]
    pub max_parallel: usize,
}

impl ParallelCommands {
    pub const NAME: &'static str = "parallel_commands";

    pub fn new(commands: Vec<CommandOperation>, max_parallel: usize) -> Self {
        Self {
            commands,
            max_parallel,
        }
    }

    fn effective_parallelism(&self) -> usize {
        let limit = if self.max_parallel == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.max_parallel
        };
        limit.min(self.commands.len()).max(1)
    }
}

impl Operation for ParallelCommands {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Value {
        json!({
            "commands": self.commands.iter().map(|c| c.params()).collect::<Vec<_>>(),
            "max_parallel": self.max_parallel,
        })
    }

    fn run(&self) -> Result<Value> {
        let parallelism = self.effective_parallelism();
        info!(
            commands = self.commands.len(),
            parallelism, "running command batch"
        );

        let errors = block_on(run_batch(self.commands.clone(), parallelism))?;
        if !errors.is_empty() {
            bail!(
                "{} of {} commands failed:\n{}",
                errors.len(),
                self.commands.len(),
                errors.join("\n")
            );
        }

        Ok(json!({ "completed": self.commands.len() }))
    }
}

/// Run `commands` with at most `parallelism` processes alive at once.
/// Returns one message per failed command.
async fn run_batch(commands: Vec<CommandOperation>, parallelism: usize) -> Vec<String> {
    let permits = Arc::new(Semaphore::new(parallelism));
    let mut set = JoinSet::new();

    for cmd in commands {
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await?;
            cmd.execute().await
        });
    }

    let mut errors = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => errors.push(format!("{e:#}")),
            Err(e) => {
                warn!(error = %e, "command task ended abnormally");
                errors.push(format!("command task failed: {e}"));
            }
        }
    }
    errors
}

/// Drive `fut` to completion from a blocking task body.
///
/// Task bodies run on the runtime's blocking pool, where the current handle
/// is available. Called outside any runtime, a private one is started.
fn block_on<F: Future>(fut: F) -> Result<F::Output> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(fut)),
        Err(_) => {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .context("starting runtime for command")?;
            Ok(runtime.block_on(fut))
        }
    }
}

/// Copy one file to another location, creating parent directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOperation {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl CopyOperation {
    pub const NAME: &'static str = "copy";

    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl Operation for CopyOperation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Value {
        json!({ "source": self.source, "target": self.target })
    }

    fn run(&self) -> Result<Value> {
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {:?}", parent))?;
        }
        let bytes = fs::copy(&self.source, &self.target)
            .with_context(|| format!("copying {:?} to {:?}", self.source, self.target))?;
        Ok(json!({ "bytes": bytes }))
    }
}

/// Does nothing. Useful as a join point for a group of tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopOperation;

impl NoopOperation {
    pub const NAME: &'static str = "noop";
}

impl Operation for NoopOperation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn params(&self) -> Value {
        Value::Null
    }

    fn run(&self) -> Result<Value> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_params_are_stable() {
        let a = CommandOperation::new("gdalwarp").args(["-r", "near"]).env("A", "1");
        let b = CommandOperation::new("gdalwarp").args(["-r", "near"]).env("A", "1");
        assert_eq!(a.params(), b.params());
        assert_eq!(a.display(), "gdalwarp -r near");
    }

    #[test]
    fn failing_command_reports_exit_code() {
        let op = CommandOperation::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = op.run().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("code 3"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn parallel_commands_collect_every_failure() {
        let ok = CommandOperation::new("true");
        let bad = CommandOperation::new("false");
        let batch = ParallelCommands::new(vec![ok, bad.clone(), bad], 2);
        let msg = format!("{:#}", batch.run().unwrap_err());
        assert!(msg.starts_with("2 of 3 commands failed"), "{msg}");
    }

    #[test]
    fn parallel_commands_respect_the_limit() {
        let sleep = CommandOperation::new("sleep").arg("0.3");
        let batch = ParallelCommands::new(vec![sleep; 4], 2);

        let started = std::time::Instant::now();
        let result = batch.run().unwrap();
        assert_eq!(result["completed"], 4);
        // Two waves of two.
        assert!(started.elapsed() >= std::time::Duration::from_millis(550));
    }

    #[tokio::test]
    async fn commands_run_on_the_callers_runtime() {
        let batch = ParallelCommands::new(vec![CommandOperation::new("true"); 3], 2);
        let result = tokio::task::spawn_blocking(move || batch.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["completed"], 3);

        let exit = tokio::task::spawn_blocking(|| CommandOperation::new("true").run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit["exit_code"], 0);
    }

    #[test]
    fn copy_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.tif");
        fs::write(&src, b"raster").unwrap();
        let dst = dir.path().join("nested/out.tif");

        let result = CopyOperation::new(&src, &dst).run().unwrap();
        assert_eq!(result["bytes"], 6);
        assert_eq!(fs::read(&dst).unwrap(), b"raster");
    }
}
