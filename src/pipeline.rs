// src/pipeline.rs

//! Raster pipelines driven by `taskgraph run`.
//!
//! Each source raster is read through GDAL's `/vsicurl/` handler and warped
//! onto the requested bounding box with `gdalwarp`. Two layouts exist:
//!
//! - [`add_warp_tasks`]: one task per raster, parallelised by the executor.
//! - [`add_align_stack_task`]: one task for the whole stack that runs its
//!   own `gdalwarp` processes; pair it with a synchronous executor.
//!
//! [`add_mosaic_task`] optionally merges the warped rasters into a VRT. It
//! declares the warped rasters as inputs and so depends on their tasks
//! without naming them.

use std::path::{Path, PathBuf};

use crate::config::InputData;
use crate::dag::{TaskHandle, TaskSpec};
use crate::engine::TaskGraph;
use crate::errors::Result;
use crate::ops::{CommandOperation, ParallelCommands};

/// Parameters shared by every warp.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpOptions {
    /// `[minx, miny, maxx, maxy]` in the sources' coordinate system.
    pub bbox: [f64; 4],
    /// Target pixel size; `None` lets `gdalwarp` keep the source resolution.
    pub pixel_size: Option<(f64, f64)>,
    pub resample: String,
}

impl WarpOptions {
    pub fn new(bbox: [f64; 4]) -> Self {
        Self {
            bbox,
            pixel_size: None,
            resample: "near".to_string(),
        }
    }
}

/// One source raster and where its warped copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterJob {
    pub url: String,
    pub source: String,
    pub target: PathBuf,
}

/// Pair every input URL with its `/vsicurl/` source and workspace target.
pub fn plan_rasters(input: &InputData, workspace: &Path) -> Vec<RasterJob> {
    input
        .data
        .iter()
        .map(|url| RasterJob {
            url: url.clone(),
            source: source_path(url),
            target: target_path(workspace, url),
        })
        .collect()
}

/// GDAL path reading `url` over HTTP. Local paths are used as-is.
pub fn source_path(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        format!("/vsicurl/{url}")
    } else {
        url.to_string()
    }
}

/// `<workspace>/<basename of url>`, ignoring any query string.
pub fn target_path(workspace: &Path, url: &str) -> PathBuf {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let basename = without_query
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(without_query);
    workspace.join(basename)
}

/// `gdalwarp` invocation for one raster.
pub fn warp_command(job: &RasterJob, options: &WarpOptions, align: bool) -> CommandOperation {
    let [minx, miny, maxx, maxy] = options.bbox;
    let mut cmd = CommandOperation::new("gdalwarp")
        .arg("-overwrite")
        .arg("-te")
        .args([minx, miny, maxx, maxy].map(|v| v.to_string()))
        .args(["-r", options.resample.as_str()]);

    if let Some((x, y)) = options.pixel_size {
        cmd = cmd.arg("-tr").args([x.to_string(), y.to_string()]);
        if align {
            cmd = cmd.arg("-tap");
        }
    }

    cmd.arg(job.source.as_str())
        .arg(job.target.to_string_lossy())
}

/// One warp task per raster. Each task declares only its own target.
pub fn add_warp_tasks(
    graph: &mut TaskGraph,
    jobs: &[RasterJob],
    options: &WarpOptions,
) -> Result<Vec<TaskHandle>> {
    jobs.iter()
        .map(|job| {
            let spec = TaskSpec::new(format!("warp {}", job.source), warp_command(job, options, false))
                .output(&job.target);
            graph.add_task(spec)
        })
        .collect()
}

/// A single task aligning and resizing the whole stack.
///
/// The task body runs up to `parallelism` `gdalwarp` processes at once
/// (`0` means one per CPU).
pub fn add_align_stack_task(
    graph: &mut TaskGraph,
    jobs: &[RasterJob],
    options: &WarpOptions,
    parallelism: usize,
) -> Result<TaskHandle> {
    let commands = jobs
        .iter()
        .map(|job| warp_command(job, options, true))
        .collect();
    let spec = TaskSpec::new(
        "align_and_resize_raster_stack",
        ParallelCommands::new(commands, parallelism),
    )
    .outputs(jobs.iter().map(|job| job.target.clone()));
    graph.add_task(spec)
}

/// Merge every warped raster into `<workspace>/<name>` with `gdalbuildvrt`.
pub fn add_mosaic_task(
    graph: &mut TaskGraph,
    jobs: &[RasterJob],
    workspace: &Path,
    name: &str,
) -> Result<TaskHandle> {
    let target = workspace.join(name);
    let cmd = CommandOperation::new("gdalbuildvrt")
        .arg("-overwrite")
        .arg(target.to_string_lossy())
        .args(jobs.iter().map(|job| job.target.to_string_lossy().into_owned()));

    let spec = TaskSpec::new(format!("mosaic {name}"), cmd)
        .inputs(jobs.iter().map(|job| job.target.clone()))
        .output(target)
        .priority(-1);
    graph.add_task(spec)
}
