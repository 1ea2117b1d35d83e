//! Turns label masks written by the tool back into annotations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contour::{LabelMask, trace_label};
use crate::error::JobError;
use crate::geometry::Annotation;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::{ImageRecord, ImageStore};

/// Label id to annotation class.
pub type ClassMap = BTreeMap<u16, String>;

/// Options applied to every imported mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// One annotation per connected component instead of one per label.
    pub split: bool,
    /// Drop the image's existing annotations first.
    pub remove_existing: bool,
}

/// What one mask added to its image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    /// Annotations created, per class.
    pub per_class: BTreeMap<String, usize>,
    /// Labels from the class map that had no pixels in the mask.
    pub empty_labels: Vec<u16>,
}

impl ImportResult {
    pub fn created(&self) -> usize {
        self.per_class.values().sum()
    }
}

/// Totals of a batch import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub images: usize,
    pub annotations: usize,
    /// Images that were not imported, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Read `mask_path`, trace every label in `classes` and store the result on `image`.
pub fn import_mask(
    store: &dyn ImageStore,
    mask_path: &Path,
    image: &ImageRecord,
    classes: &ClassMap,
    options: ImportOptions,
) -> Result<ImportResult, JobError> {
    let mask = load_label_mask(mask_path)?;
    let expected = store.dimensions(image).map_err(|e| JobError::MaskLoad {
        path: mask_path.to_path_buf(),
        reason: format!("cannot read dimensions of <{image}>: {e}"),
    })?;
    if mask.dimensions() != expected {
        return Err(JobError::MaskLoad {
            path: mask_path.to_path_buf(),
            reason: format!(
                "mask is {}x{} but image <{image}> is {}x{}",
                mask.width(),
                mask.height(),
                expected.0,
                expected.1
            ),
        });
    }

    let mut annotations = if options.remove_existing {
        Vec::new()
    } else {
        store.read_annotations(image).map_err(|e| persist_failure(image, e))?
    };

    let mut result = ImportResult::default();
    for (&label, class) in classes {
        let traced = trace_label(&mask, label);
        if traced.is_empty() {
            debug!(image = %image, label, class = %class, "No pixels for label");
            result.empty_labels.push(label);
            continue;
        }
        let created = if options.split {
            let parts = traced.split();
            let count = parts.len();
            annotations.extend(parts.into_iter().map(|g| Annotation::new(Some(class.clone()), g)));
            count
        } else {
            annotations.push(Annotation::new(Some(class.clone()), traced));
            1
        };
        *result.per_class.entry(class.clone()).or_default() += created;
    }

    store
        .write_annotations(image, &annotations)
        .map_err(|e| persist_failure(image, e))?;
    info!(image = %image, created = result.created(), "Imported mask");
    Ok(result)
}

/// Import the prediction of every exported image.
///
/// A missing prediction or a failing image is logged and recorded in the
/// summary; the batch always runs to the end unless cancelled.
pub fn import_predictions(
    store: &dyn ImageStore,
    predictions: &BTreeMap<ImageRecord, PathBuf>,
    classes: &ClassMap,
    options: ImportOptions,
    cancel: &CancellationToken,
    sink: &ProgressSink,
) -> Result<ImportSummary, JobError> {
    let mut summary = ImportSummary::default();
    for (image, path) in predictions {
        if cancel.is_cancelled() {
            return Err(JobError::Interrupted);
        }
        if !path.is_file() {
            warn!(image = %image, file = %path.display(), "Prediction missing, skipping image");
            summary
                .skipped
                .push((image.to_string(), format!("no prediction at {}", path.display())));
            sink.emit(ProgressEvent::ImageSkipped {
                image: image.to_string(),
                reason: "prediction missing".to_string(),
            });
            continue;
        }
        match import_mask(store, path, image, classes, options) {
            Ok(result) => {
                summary.images += 1;
                summary.annotations += result.created();
                sink.emit(ProgressEvent::Imported {
                    image: image.to_string(),
                    annotations: result.created(),
                });
            }
            Err(e) => {
                warn!(image = %image, error = %e, "Import failed, skipping image");
                sink.emit(ProgressEvent::ImageSkipped {
                    image: image.to_string(),
                    reason: e.to_string(),
                });
                summary.skipped.push((image.to_string(), e.to_string()));
            }
        }
    }
    Ok(summary)
}

/// Load a mask keeping its raw label values.
pub fn load_label_mask(path: &Path) -> Result<LabelMask, JobError> {
    let mask_load = |reason: String| JobError::MaskLoad {
        path: path.to_path_buf(),
        reason,
    };
    let raster = ImageReader::open(path)
        .map_err(|e| mask_load(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| mask_load(e.to_string()))?
        .decode()
        .map_err(|e| mask_load(e.to_string()))?;

    Ok(match raster {
        DynamicImage::ImageLuma16(mask) => mask,
        DynamicImage::ImageLuma8(mask) => {
            let (w, h) = mask.dimensions();
            LabelMask::from_fn(w, h, |x, y| image::Luma([mask.get_pixel(x, y)[0] as u16]))
        }
        // Multi-channel masks carry the label in the first channel.
        other => {
            let rgb = other.to_rgb16();
            let shift = if other.color().bytes_per_pixel() / other.color().channel_count().max(1) == 1 {
                8
            } else {
                0
            };
            let (w, h) = rgb.dimensions();
            LabelMask::from_fn(w, h, |x, y| image::Luma([rgb.get_pixel(x, y)[0] >> shift]))
        }
    })
}

fn persist_failure(image: &ImageRecord, e: impl std::fmt::Display) -> JobError {
    JobError::PersistFailure {
        image: image.to_string(),
        reason: e.to_string(),
    }
}
