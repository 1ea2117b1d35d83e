//! Materializes images from the store as files the external tool can read.
//!
//! Everything is written as uncompressed TIFF. Each function appends the
//! paths it wrote to a caller-owned ledger, so a job that stops half way can
//! still remove exactly what it created.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::geometry::{Annotation, Point, Region};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::{ImageRecord, ImageStore};
use crate::workspace::{TIF_EXTENSION, Workspace};

/// Result of staging images for prediction.
#[derive(Debug, Default)]
pub struct PredictExport {
    /// Exported file per image, keyed by image.
    pub files: BTreeMap<ImageRecord, PathBuf>,
    /// Images that could not be exported.
    pub skipped: Vec<(ImageRecord, JobError)>,
}

/// One image/mask pair written for training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingPair {
    pub image: PathBuf,
    pub mask: PathBuf,
}

pub struct Exporter {
    store: Arc<dyn ImageStore>,
    workspace: Workspace,
}

impl Exporter {
    pub fn new(store: Arc<dyn ImageStore>, workspace: Workspace) -> Self {
        Self { store, workspace }
    }

    /// Write every image at full resolution into `temp/`.
    ///
    /// Unreadable images and images with several source locations are
    /// skipped and reported; failing to write into the workspace aborts.
    pub fn export_for_predict(
        &self,
        images: &[ImageRecord],
        cancel: &CancellationToken,
        sink: &ProgressSink,
        written: &mut Vec<PathBuf>,
    ) -> Result<PredictExport, JobError> {
        let mut export = PredictExport::default();
        let total = images.len();

        for (index, image) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Interrupted);
            }
            if export.files.contains_key(image) {
                debug!(image = %image, "Image listed twice, exporting once");
                continue;
            }

            let raster = match self.read_single_source(image) {
                Ok(raster) => raster,
                Err(e) => {
                    warn!(image = %image, error = %e, "Skipping image");
                    sink.emit(ProgressEvent::ImageSkipped {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                    export.skipped.push((image.clone(), e));
                    continue;
                }
            };

            let path = unique_path(
                self.workspace.temp_dir(),
                &image.base_name(),
                &[self.workspace.predictions_dir()],
            );
            write_tiff(&tiff_compatible(raster), &path)?;
            written.push(path.clone());
            debug!(image = %image, file = %path.display(), "Exported for prediction");

            export.files.insert(image.clone(), path);
            sink.emit(ProgressEvent::Exported {
                image: image.to_string(),
                completed: index + 1,
                total,
            });
        }

        info!(exported = export.files.len(), skipped = export.skipped.len(), "Prediction export finished");
        Ok(export)
    }

    /// Write image crops into `images/` with matching binary masks into `masks/`.
    ///
    /// One crop per `crop_class` annotation, or the full image when there is
    /// none. Mask pixels under any `fg_class` annotation are 1, the rest 0.
    /// Any failure aborts: a partial training set is never handed on.
    pub fn export_for_train(
        &self,
        images: &[ImageRecord],
        crop_class: Option<&str>,
        fg_class: &str,
        cancel: &CancellationToken,
        sink: &ProgressSink,
        written: &mut Vec<PathBuf>,
    ) -> Result<Vec<TrainingPair>, JobError> {
        let mut pairs = Vec::new();
        let mut seen = Vec::new();
        let total = images.len();

        for (index, image) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Interrupted);
            }
            if seen.contains(&image) {
                continue;
            }
            seen.push(image);

            let raster = self.read_single_source(image)?;
            let annotations = self
                .store
                .read_annotations(image)
                .map_err(|e| export_failed(image, e))?;
            let regions = crop_regions(&annotations, crop_class, raster.width(), raster.height());
            let foreground: Vec<&Annotation> = annotations.iter().filter(|a| a.has_class(fg_class)).collect();
            let base = image.base_name();

            for (i, region) in regions.iter().enumerate() {
                let stem = if regions.len() == 1 {
                    base.clone()
                } else {
                    format!("{base}_{}", i + 1)
                };
                let image_path = unique_path(self.workspace.images_dir(), &stem, &[self.workspace.masks_dir()]);
                let stem = image_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or(stem);
                let mask_path = self.workspace.masks_dir().join(format!("{stem}.{TIF_EXTENSION}"));

                let crop = raster.crop_imm(region.x, region.y, region.width, region.height);
                write_tiff(&tiff_compatible(crop), &image_path)?;
                written.push(image_path.clone());
                let mask = DynamicImage::ImageLuma8(render_mask(*region, &foreground));
                write_tiff(&mask, &mask_path)?;
                written.push(mask_path.clone());

                debug!(image = %image, region = %region, file = %image_path.display(), "Exported training pair");
                pairs.push(TrainingPair {
                    image: image_path,
                    mask: mask_path,
                });
            }

            sink.emit(ProgressEvent::Exported {
                image: image.to_string(),
                completed: index + 1,
                total,
            });
        }

        info!(pairs = pairs.len(), images = seen.len(), "Training export finished");
        Ok(pairs)
    }

    fn read_single_source(&self, image: &ImageRecord) -> Result<DynamicImage, JobError> {
        let locations = self
            .store
            .resolve_source_locations(image)
            .map_err(|e| export_failed(image, e))?;
        if locations.len() > 1 {
            return Err(JobError::MultipleSourceLocations {
                image: image.to_string(),
                count: locations.len(),
            });
        }
        self.store.read_raster(image, None).map_err(|e| export_failed(image, e))
    }
}

fn export_failed(image: &ImageRecord, e: impl std::fmt::Display) -> JobError {
    JobError::ExportFailed {
        image: image.to_string(),
        reason: e.to_string(),
    }
}

/// Crop regions for one image: the bounds of each `crop_class` annotation,
/// or the whole image.
pub fn crop_regions(annotations: &[Annotation], crop_class: Option<&str>, width: u32, height: u32) -> Vec<Region> {
    let regions: Vec<Region> = match crop_class {
        Some(class) => annotations
            .iter()
            .filter(|a| a.has_class(class))
            .filter_map(|a| a.geometry.bounds())
            .map(|b| Region::covering(b, width, height))
            .filter(|r| !r.is_empty())
            .collect(),
        None => Vec::new(),
    };
    if regions.is_empty() {
        vec![Region::full(width, height)]
    } else {
        regions
    }
}

/// Binary mask of `region`: 1 where the pixel centre lies in any annotation.
pub fn render_mask(region: Region, foreground: &[&Annotation]) -> GrayImage {
    let (rx, ry) = (region.x as f64, region.y as f64);
    let (rx1, ry1) = (rx + region.width as f64, ry + region.height as f64);
    let relevant: Vec<&Annotation> = foreground
        .iter()
        .copied()
        .filter(|a| {
            a.geometry
                .bounds()
                .is_some_and(|b| b.max_x > rx && b.min_x < rx1 && b.max_y > ry && b.min_y < ry1)
        })
        .collect();

    GrayImage::from_fn(region.width, region.height, |x, y| {
        let centre = Point::new(rx + x as f64 + 0.5, ry + y as f64 + 0.5);
        if relevant.iter().any(|a| a.geometry.contains(centre)) {
            Luma([1])
        } else {
            Luma([0])
        }
    })
}

/// `<dir>/<stem>.tif`, or `<stem>_2.tif`, `<stem>_3.tif`, ... when that name is
/// already taken in `dir` or any of `also_check`.
pub fn unique_path(dir: &Path, stem: &str, also_check: &[&Path]) -> PathBuf {
    let taken = |name: &str| dir.join(name).exists() || also_check.iter().any(|d| d.join(name).exists());
    let mut name = format!("{stem}.{TIF_EXTENSION}");
    let mut counter = 2;
    while taken(&name) {
        name = format!("{stem}_{counter}.{TIF_EXTENSION}");
        counter += 1;
    }
    dir.join(name)
}

// The TIFF encoder covers 8/16-bit gray, RGB and RGBA.
fn tiff_compatible(raster: DynamicImage) -> DynamicImage {
    match raster {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => raster,
        DynamicImage::ImageLumaA8(_) => DynamicImage::ImageLuma8(raster.to_luma8()),
        DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLuma16(raster.to_luma16()),
        other => DynamicImage::ImageRgb16(other.to_rgb16()),
    }
}

fn write_tiff(raster: &DynamicImage, path: &Path) -> Result<(), JobError> {
    raster
        .save_with_format(path, ImageFormat::Tiff)
        .map_err(|e| JobError::io(path, std::io::Error::other(e)))
}
