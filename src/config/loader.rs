// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::model::{RawRunConfig, RunConfig};

/// Load a configuration file without validating it.
///
/// Callers that want to apply overrides (e.g. CLI flags) do so on the raw
/// form and then convert with `RunConfig::try_from`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRunConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {:?}", path))?;

    let config: RawRunConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing TOML config from {:?}", path))?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<RunConfig> {
    let raw = load_from_path(&path)?;
    let config = RunConfig::try_from(raw)
        .with_context(|| format!("validating config {:?}", path.as_ref()))?;
    Ok(config)
}

/// Like [`load_from_path`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<RawRunConfig> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(config = ?path, "no config file; using defaults");
        return Ok(RawRunConfig::default());
    }
    load_from_path(path)
}

/// `TaskGraph.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("TaskGraph.toml")
}
