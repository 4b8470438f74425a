// src/types.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which executor backend runs task bodies.
///
/// - `Sync`: run each task body on the coordinating thread, one at a time.
/// - `Local`: a fixed-size pool of local workers.
/// - `Remote`: pre-provisioned worker processes reached over TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[serde(alias = "synchronous")]
    Sync,
    Local,
    Remote,
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sync" | "synchronous" => Ok(ExecutorKind::Sync),
            "local" => Ok(ExecutorKind::Local),
            "remote" => Ok(ExecutorKind::Remote),
            other => Err(format!(
                "invalid executor: {other} (expected \"sync\", \"local\" or \"remote\")"
            )),
        }
    }
}

/// How artifact fingerprints are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// File size plus modification time. Cheap; the default.
    SizeTimestamp,
    /// BLAKE3 hash over the file contents.
    Blake3,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::SizeTimestamp
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sizetimestamp" => Ok(HashAlgorithm::SizeTimestamp),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(format!(
                "invalid hash_algorithm: {other} (expected \"sizetimestamp\" or \"blake3\")"
            )),
        }
    }
}

/// Shape of the raster pipeline built by `taskgraph run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// One warp task per input file.
    Multi,
    /// One task that aligns the whole stack and parallelises internally.
    Single,
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "multi" => Ok(PipelineMode::Multi),
            "single" => Ok(PipelineMode::Single),
            other => Err(format!(
                "invalid mode: {other} (expected \"multi\" or \"single\")"
            )),
        }
    }
}
