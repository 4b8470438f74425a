#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use serde_json::json;
use taskgraph::GraphConfig;
use taskgraph::dag::TaskSpec;
use taskgraph::exec::ExecutorConfig;
use taskgraph::ops::FnOperation;

/// Shared record of which task bodies actually ran, in order.
#[derive(Debug, Clone, Default)]
pub struct ExecLog {
    names: Arc<Mutex<Vec<String>>>,
}

impl ExecLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) {
        self.names.lock().unwrap().push(name.to_string());
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names.lock().unwrap().iter().filter(|n| *n == name).count()
    }

    pub fn len(&self) -> usize {
        self.names.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of `name` in the log.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.lock().unwrap().iter().position(|n| n == name)
    }
}

/// Graph config over `workspace` with a small local pool.
pub fn graph_config(workspace: &Path) -> GraphConfig {
    GraphConfig::for_workspace(workspace).executor(ExecutorConfig::Local { workers: 2 })
}

/// Task writing `contents` to `output`.
pub fn write_task(name: &str, output: impl Into<PathBuf>, contents: &str, log: &ExecLog) -> TaskSpec {
    let output = output.into();
    let path = output.clone();
    let contents = contents.to_string();
    let log = log.clone();
    let task_name = name.to_string();

    let op = FnOperation::new(
        "write",
        json!({ "path": output, "contents": contents }),
        move || {
            log.record(&task_name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &contents).with_context(|| format!("writing {path:?}"))?;
            Ok(json!({ "bytes": contents.len() }))
        },
    );

    TaskSpec::new(name, op).output(output)
}

/// Task concatenating `inputs` into `output`. Declares the inputs, so it
/// depends on whichever tasks produce them.
pub fn concat_task(name: &str, inputs: &[PathBuf], output: impl Into<PathBuf>, log: &ExecLog) -> TaskSpec {
    let output = output.into();
    let sources = inputs.to_vec();
    let path = output.clone();
    let log = log.clone();
    let task_name = name.to_string();

    let op = FnOperation::new(
        "concat",
        json!({ "inputs": inputs, "output": output }),
        move || {
            log.record(&task_name);
            let mut merged = String::new();
            for source in &sources {
                merged.push_str(
                    &fs::read_to_string(source).with_context(|| format!("reading {source:?}"))?,
                );
            }
            fs::write(&path, &merged)?;
            Ok(json!(merged))
        },
    );

    TaskSpec::new(name, op).inputs(inputs.to_vec()).output(output)
}

/// Task whose body always fails.
pub fn failing_task(name: &str, log: &ExecLog) -> TaskSpec {
    let log = log.clone();
    let task_name = name.to_string();
    let op = FnOperation::new("fail", json!({ "task": name }), move || {
        log.record(&task_name);
        bail!("{task_name} exploded")
    });
    TaskSpec::new(name, op)
}
