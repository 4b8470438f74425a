// src/store/lock.rs

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{Result, TaskGraphError};

pub const LOCK_FILENAME: &str = "lock";

/// Exclusive lock on a workspace's persisted state.
///
/// Acquired by creating `<dir>/lock` with `create_new`; released on
/// [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    held: bool,
}

impl WorkspaceLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILENAME);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(TaskGraphError::WorkspaceLocked(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        debug!(lock = ?path, "acquired workspace lock");
        Ok(Self { path, held: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(lock = ?self.path, "released workspace lock"),
            Err(e) => warn!(lock = ?self.path, error = %e, "failed to remove workspace lock"),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        self.release();
    }
}
