// src/store/mod.rs

//! Artifact validity tracking.
//!
//! - [`fingerprint`] computes per-file fingerprints (size+mtime or BLAKE3).
//! - [`signature`] combines an operation, its outputs and its inputs'
//!   fingerprints into a task signature.
//! - [`cache`] memoises source-input fingerprints within one join.
//! - [`artifact`] is the [`ArtifactStore`] itself: signature records keyed by
//!   task name, persisted under the workspace's `.taskgraph` directory.
//! - [`lock`] provides the single-writer workspace lock.

pub mod artifact;
pub mod cache;
pub mod fingerprint;
pub mod lock;
pub mod signature;

pub use artifact::{ArtifactRecord, ArtifactStore, OutputFingerprint, DATABASE_FILENAME};
pub use cache::FingerprintCache;
pub use fingerprint::{compute_file_hash, fingerprint};
pub use lock::WorkspaceLock;
pub use signature::SignatureBuilder;
