//! Suggested prediction parameters from a trained model's metadata sidecar.
//!
//! Training leaves a JSON file next to the model. Its optional `test_metrics`
//! object maps model file names to their evaluation results, from which the
//! best threshold and resolution are read. None of this is needed to run a
//! job; it only supplies defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::MetadataError;

/// Used when a model has no usable metadata.
pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_RESOLUTION: u8 = 1;

const CHECKPOINT_SUFFIX: &str = "best-ckp.h5";
const MODEL_SUFFIX: &str = ".h5";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestParameters {
    pub threshold: f64,
    pub resolution: u8,
}

/// Parameters found in a sidecar for the final model and its best checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub source: PathBuf,
    pub model: Option<BestParameters>,
    pub checkpoint: Option<BestParameters>,
}

impl ModelInfo {
    /// Parameters matching `model_path`: the checkpoint entry for a
    /// `*best-ckp.h5` file, the final model entry otherwise.
    pub fn for_model(&self, model_path: &Path) -> Option<BestParameters> {
        let is_checkpoint = model_path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(CHECKPOINT_SUFFIX));
        if is_checkpoint { self.checkpoint } else { self.model }
    }
}

#[derive(Debug, Deserialize)]
struct Sidecar {
    #[serde(default)]
    test_metrics: Option<BTreeMap<String, MetricsEntry>>,
}

#[derive(Debug, Deserialize)]
struct MetricsEntry {
    #[serde(default)]
    best_binary_iou_parameters: Option<IouParameters>,
}

#[derive(Debug, Deserialize)]
struct IouParameters {
    best_threshold: Option<Value>,
    best_resolution: Option<Value>,
}

impl IouParameters {
    fn parse(&self) -> Option<BestParameters> {
        let threshold = match self.best_threshold.as_ref()? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        // Stored as e.g. "factor_2"; only the trailing digit matters.
        let resolution = match self.best_resolution.as_ref()? {
            Value::Number(n) => u8::try_from(n.as_u64()?).ok()?,
            Value::String(s) => s.trim().chars().last()?.to_digit(10)? as u8,
            _ => return None,
        };
        Some(BestParameters { threshold, resolution })
    }
}

/// The sidecar for `model_path`: `<model>.json` when present, otherwise the
/// first `.json` file (by name) in the model's directory.
pub fn find_sidecar(model_path: &Path) -> Option<PathBuf> {
    let same_name = model_path.with_extension("json");
    if same_name.is_file() {
        return Some(same_name);
    }
    let dir = model_path.parent()?;
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Parse a sidecar file.
pub fn read_sidecar(path: &Path) -> Result<ModelInfo, MetadataError> {
    let sidecar: Sidecar = serde_json::from_str(&fs::read_to_string(path)?)?;
    let mut info = ModelInfo {
        source: path.to_path_buf(),
        model: None,
        checkpoint: None,
    };
    let Some(metrics) = sidecar.test_metrics else {
        debug!(file = %path.display(), "No test_metrics in metadata");
        return Ok(info);
    };
    for (name, entry) in metrics {
        let params = entry.best_binary_iou_parameters.as_ref().and_then(IouParameters::parse);
        if name.ends_with(CHECKPOINT_SUFFIX) {
            info.checkpoint = params;
        } else if name.ends_with(MODEL_SUFFIX) {
            info.model = params;
        } else {
            trace!(key = %name, "Ignoring metrics key without .h5 ending");
        }
    }
    Ok(info)
}

/// Locate and parse the sidecar belonging to `model_path`.
pub fn model_info(model_path: &Path) -> Result<ModelInfo, MetadataError> {
    let path = find_sidecar(model_path).ok_or_else(|| MetadataError::NotFound(model_path.to_path_buf()))?;
    read_sidecar(&path)
}

/// Threshold and resolution to use for `model_path` when the caller gave none.
pub fn suggested_parameters(model_path: &Path) -> BestParameters {
    let fallback = BestParameters {
        threshold: DEFAULT_THRESHOLD,
        resolution: DEFAULT_RESOLUTION,
    };
    match model_info(model_path) {
        Ok(info) => info.for_model(model_path).unwrap_or(fallback),
        Err(e) => {
            debug!(model = %model_path.display(), error = %e, "Using default prediction parameters");
            fallback
        }
    }
}
