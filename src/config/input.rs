// src/config/input.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;

/// Key holding the bounding box when none is given.
pub const DEFAULT_BBOX_KEY: &str = "bbox_stanford";

/// Rasters to process and the box to clip them to.
#[derive(Debug, Clone, PartialEq)]
pub struct InputData {
    /// URLs (or local paths) of the source rasters.
    pub data: Vec<String>,
    /// `[minx, miny, maxx, maxy]`.
    pub bbox: [f64; 4],
}

/// Load an input description such as:
///
/// ```json
/// {"data": ["https://example.org/a.tif"], "bbox_stanford": [-122.2, 37.4, -122.1, 37.5]}
/// ```
pub fn load_input(path: impl AsRef<Path>, bbox_key: &str) -> Result<InputData> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading input description at {:?}", path))?;
    let doc: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parsing JSON input description from {:?}", path))?;
    parse_input(&doc, bbox_key).with_context(|| format!("invalid input description {:?}", path))
}

fn parse_input(doc: &Value, bbox_key: &str) -> Result<InputData> {
    let data = doc
        .get("data")
        .ok_or_else(|| anyhow!("missing \"data\" list"))?;
    let data: Vec<String> =
        serde_json::from_value(data.clone()).context("\"data\" must be a list of strings")?;

    let bbox = doc
        .get(bbox_key)
        .ok_or_else(|| anyhow!("missing bounding box \"{bbox_key}\""))?;
    let bbox: Vec<f64> = serde_json::from_value(bbox.clone())
        .with_context(|| format!("\"{bbox_key}\" must be a list of numbers"))?;
    let bbox: [f64; 4] = bbox
        .try_into()
        .map_err(|v: Vec<f64>| anyhow!("\"{bbox_key}\" must have 4 numbers, got {}", v.len()))?;

    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
        bail!("\"{bbox_key}\" must be [minx, miny, maxx, maxy], got {bbox:?}");
    }

    Ok(InputData { data, bbox })
}
