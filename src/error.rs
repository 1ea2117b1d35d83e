use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while preparing, running or importing a segmentation job.
///
/// Every variant maps onto one [`FailureKind`] via [`JobError::kind`], so a
/// caller can decide how to present the failure without matching on messages.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Runner is not configured: {0}")]
    Configuration(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Export failed for image <{image}>: {reason}")]
    ExportFailed { image: String, reason: String },

    #[error("Image <{image}> resolves to {count} source locations, which is not supported")]
    MultipleSourceLocations { image: String, count: usize },

    #[error("Not enough training images: at least 3 are required, but only {found} were given")]
    InsufficientTrainingData { found: usize },

    #[error("Training data is already split into train/val/test sub-folders: {}", format_dirs(dirs))]
    AlreadySplitData { dirs: Vec<PathBuf> },

    #[error("Failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("External process failed: {0}")]
    ProcessRuntime(String),

    #[error("Job was cancelled")]
    Interrupted,

    #[error("Could not load mask {}: {reason}", path.display())]
    MaskLoad { path: PathBuf, reason: String },

    #[error("Could not save annotations for image <{image}>: {reason}")]
    PersistFailure { image: String, reason: String },
}

impl JobError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JobError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Configuration(_) => FailureKind::Configuration,
            JobError::Io { .. } => FailureKind::Io,
            JobError::ExportFailed { .. } => FailureKind::ExportFailed,
            JobError::MultipleSourceLocations { .. } => FailureKind::MultipleSourceLocations,
            JobError::InsufficientTrainingData { .. } => FailureKind::InsufficientTrainingData,
            JobError::AlreadySplitData { .. } => FailureKind::AlreadySplitData,
            JobError::ProcessLaunch { .. } => FailureKind::ProcessLaunch,
            JobError::ProcessRuntime(_) => FailureKind::ProcessRuntime,
            JobError::Interrupted => FailureKind::Interrupted,
            JobError::MaskLoad { .. } => FailureKind::MaskLoad,
            JobError::PersistFailure { .. } => FailureKind::PersistFailure,
        }
    }
}

fn format_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tag identifying the kind of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Configuration,
    Io,
    ExportFailed,
    MultipleSourceLocations,
    InsufficientTrainingData,
    AlreadySplitData,
    ProcessLaunch,
    ProcessRuntime,
    Interrupted,
    MaskLoad,
    PersistFailure,
}

impl FailureKind {
    /// Whether this kind aborts a whole job, as opposed to skipping one image.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FailureKind::MultipleSourceLocations | FailureKind::MaskLoad | FailureKind::PersistFailure
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Configuration => "ConfigurationError",
            FailureKind::Io => "IoError",
            FailureKind::ExportFailed => "ExportFailed",
            FailureKind::MultipleSourceLocations => "MultipleSourceLocations",
            FailureKind::InsufficientTrainingData => "InsufficientTrainingData",
            FailureKind::AlreadySplitData => "AlreadySplitData",
            FailureKind::ProcessLaunch => "ProcessLaunchError",
            FailureKind::ProcessRuntime => "ProcessRuntimeError",
            FailureKind::Interrupted => "Interrupted",
            FailureKind::MaskLoad => "MaskLoadError",
            FailureKind::PersistFailure => "PersistFailure",
        };
        write!(f, "{name}")
    }
}

/// Invalid or missing fields in a job request.
#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    #[error("A job needs at least one input image")]
    EmptyImages,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Model file does not exist: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Resolution must be 1, 2 or 3, got {0}")]
    InvalidResolution(u8),

    #[error("Threshold must lie within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("Number of epochs must be greater than zero")]
    InvalidEpochs,

    #[error("Unknown base model: {0} (expected one of b0, b1, b2, b3, s, m, l)")]
    UnknownBaseModel(String),

    #[error("Class name for {0} must not be empty")]
    EmptyClassName(&'static str),
}

/// Failures reported by an [`ImageStore`](crate::store::ImageStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Region {region} lies outside of image <{image}>")]
    RegionOutOfBounds { image: String, region: String },
}

/// Failures reading a model's metadata sidecar.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("No metadata file next to {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metadata JSON: {0}")]
    Json(#[from] serde_json::Error),
}
