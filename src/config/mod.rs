// src/config/mod.rs

//! Configuration loading and validation for taskgraph.
//!
//! Responsibilities:
//! - Define the TOML-backed run configuration (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into ready-to-use engine settings (`validate.rs`).
//! - Load the JSON description of the input rasters (`input.rs`).

pub mod input;
pub mod loader;
pub mod model;
pub mod validate;

pub use input::{DEFAULT_BBOX_KEY, InputData, load_input};
pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{ClusterSection, GraphSection, RawRunConfig, RunConfig};
pub use validate::{parse_duration, parse_walltime};
