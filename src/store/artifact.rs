// src/store/artifact.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::TaskName;
use crate::errors::Result;
use crate::store::fingerprint::fingerprint;
use crate::types::HashAlgorithm;

/// File (inside the workspace's `.taskgraph` directory) holding all records.
pub const DATABASE_FILENAME: &str = "taskgraph_data.json";

const DATABASE_VERSION: u32 = 1;

/// Fingerprint of one output at the time its task completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFingerprint {
    pub path: PathBuf,
    pub fingerprint: String,
}

/// What the store remembers about a task's last successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub signature: String,
    pub outputs: Vec<OutputFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Database {
    version: u32,
    #[serde(default)]
    tasks: BTreeMap<TaskName, ArtifactRecord>,
}

#[derive(Serialize)]
struct DatabaseRef<'a> {
    version: u32,
    tasks: &'a BTreeMap<TaskName, ArtifactRecord>,
}

/// Signature records keyed by task name.
///
/// A task's outputs are valid when its record exists, the recorded signature
/// equals the signature computed for the current run, and every declared
/// output still exists with the fingerprint it had when the task finished.
///
/// Persistent stores rewrite their database file after every `record`, so
/// an interrupted run resumes from the last completed task.
#[derive(Debug)]
pub struct ArtifactStore {
    /// Database file; `None` keeps records in memory only.
    path: Option<PathBuf>,
    algorithm: HashAlgorithm,
    records: BTreeMap<TaskName, ArtifactRecord>,
    dirty: bool,
}

impl ArtifactStore {
    /// Open (or create) the store persisted in `dir`.
    pub fn open(dir: &Path, algorithm: HashAlgorithm) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(DATABASE_FILENAME);
        let records = load_records(&path)?;

        info!(
            database = ?path,
            records = records.len(),
            "opened artifact store"
        );

        Ok(Self {
            path: Some(path),
            algorithm,
            records,
            dirty: false,
        })
    }

    /// Store that forgets everything when dropped.
    pub fn in_memory(algorithm: HashAlgorithm) -> Self {
        Self {
            path: None,
            algorithm,
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, task: &str) -> Option<&ArtifactRecord> {
        self.records.get(task)
    }

    pub fn signature_of(&self, task: &str) -> Option<&str> {
        self.records.get(task).map(|r| r.signature.as_str())
    }

    pub fn result_of(&self, task: &str) -> Option<&Value> {
        self.records.get(task).and_then(|r| r.result.as_ref())
    }

    /// Whether `task`'s declared outputs are present and up to date for
    /// `signature`.
    pub fn is_valid(&self, task: &str, outputs: &[PathBuf], signature: &str) -> bool {
        let Some(record) = self.records.get(task) else {
            debug!(task = %task, "no artifact record");
            return false;
        };

        if record.signature != signature {
            debug!(task = %task, "signature changed since last run");
            return false;
        }

        if record.outputs.len() != outputs.len() {
            return false;
        }

        for (recorded, path) in record.outputs.iter().zip(outputs) {
            if recorded.path != *path || !path.exists() {
                debug!(task = %task, output = ?path, "output missing or renamed");
                return false;
            }
            match fingerprint(path, self.algorithm) {
                Ok(current) if current == recorded.fingerprint => {}
                Ok(_) => {
                    debug!(task = %task, output = ?path, "output modified since it was produced");
                    return false;
                }
                Err(e) => {
                    debug!(task = %task, output = ?path, error = %e, "cannot fingerprint output");
                    return false;
                }
            }
        }

        true
    }

    /// Fingerprint every declared output, failing if any is missing.
    pub fn verify_outputs(&self, outputs: &[PathBuf]) -> anyhow::Result<Vec<OutputFingerprint>> {
        outputs
            .iter()
            .map(|path| {
                if !path.exists() {
                    bail!("declared output {:?} is missing after the task reported success", path);
                }
                let fingerprint = fingerprint(path, self.algorithm)
                    .with_context(|| format!("fingerprinting output {:?}", path))?;
                Ok(OutputFingerprint {
                    path: path.clone(),
                    fingerprint,
                })
            })
            .collect()
    }

    /// Record a successful run of `task`.
    pub fn record(
        &mut self,
        task: &str,
        outputs: &[PathBuf],
        signature: &str,
        result: Option<Value>,
    ) -> anyhow::Result<()> {
        let outputs = self.verify_outputs(outputs)?;
        self.records.insert(
            task.to_string(),
            ArtifactRecord {
                signature: signature.to_string(),
                outputs,
                result,
            },
        );
        self.dirty = true;
        debug!(task = %task, signature = %signature, "recorded artifact signature");

        self.flush()
            .with_context(|| format!("persisting artifact record for task '{task}'"))?;
        Ok(())
    }

    /// Drop the record for `task`, if any.
    pub fn forget(&mut self, task: &str) -> bool {
        let removed = self.records.remove(task).is_some();
        if removed {
            self.dirty = true;
            debug!(task = %task, "forgot artifact record");
        }
        removed
    }

    /// Remove records for tasks not matching `keep`. Returns how many were
    /// removed.
    pub fn prune<F>(&mut self, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.records.len();
        self.records.retain(|name, _| keep(name));
        let removed = before - self.records.len();
        if removed > 0 {
            self.dirty = true;
            info!(removed, "pruned stale artifact records");
        }
        removed
    }

    /// Write pending changes to disk (no-op for in-memory stores).
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(&DatabaseRef {
            version: DATABASE_VERSION,
            tasks: &self.records,
        })?;

        // Write-then-rename so a crash never leaves a truncated database.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;

        self.dirty = false;
        Ok(())
    }
}

fn load_records(path: &Path) -> Result<BTreeMap<TaskName, ArtifactRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let contents = fs::read_to_string(path)?;
    match serde_json::from_str::<Database>(&contents) {
        Ok(db) if db.version == DATABASE_VERSION => Ok(db.tasks),
        Ok(db) => {
            warn!(
                database = ?path,
                version = db.version,
                "unsupported artifact database version; starting empty"
            );
            Ok(BTreeMap::new())
        }
        Err(e) => {
            warn!(
                database = ?path,
                error = %e,
                "artifact database is unreadable; starting empty"
            );
            Ok(BTreeMap::new())
        }
    }
}
