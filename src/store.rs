//! Access to the project's images and their annotation sets.
//!
//! The orchestrator only talks to the [`ImageStore`] trait. [`FsImageStore`]
//! is the directory-backed implementation used by the command line: raster
//! files live at the top level of the project folder, annotations are kept as
//! JSON under `annotations/`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::geometry::{Annotation, Region};

const ANNOTATIONS_DIR: &str = "annotations";
const IMAGE_EXTENSIONS: &[&str] = &["png", "tif", "tiff", "jpg", "jpeg"];

/// Stable reference to one image in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRecord {
    name: String,
}

impl ImageRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File stem of the image name, with any leading directories removed.
    pub fn base_name(&self) -> String {
        base_name(Path::new(&self.name))
    }
}

impl fmt::Display for ImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// File stem of `path` (`dir/slide.ome.tif` -> `slide.ome`).
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read/write capability over the host's image catalog.
pub trait ImageStore: Send + Sync {
    /// Read the image at full resolution, optionally cropped to `region`.
    fn read_raster(&self, image: &ImageRecord, region: Option<Region>) -> Result<DynamicImage, StoreError>;

    /// Width and height of the image at full resolution.
    fn dimensions(&self, image: &ImageRecord) -> Result<(u32, u32), StoreError>;

    fn read_annotations(&self, image: &ImageRecord) -> Result<Vec<Annotation>, StoreError>;

    /// Replace the image's annotation set.
    fn write_annotations(&self, image: &ImageRecord, annotations: &[Annotation]) -> Result<(), StoreError>;

    /// Every file backing the image. More than one is not supported by the exporter.
    fn resolve_source_locations(&self, image: &ImageRecord) -> Result<Vec<PathBuf>, StoreError>;
}

/// Directory-backed [`ImageStore`].
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All raster files at the top level of the project, sorted by name.
    pub fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let mut images = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file()
                && has_image_extension(&path)
                && let Some(name) = path.file_name()
            {
                images.push(ImageRecord::new(name.to_string_lossy()));
            }
        }
        images.sort();
        Ok(images)
    }

    fn image_path(&self, image: &ImageRecord) -> Result<PathBuf, StoreError> {
        let path = self.root.join(image.name());
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreError::NotFound(image.name().to_string()))
        }
    }

    fn annotations_path(&self, image: &ImageRecord) -> PathBuf {
        self.root
            .join(ANNOTATIONS_DIR)
            .join(format!("{}.json", image.name()))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl ImageStore for FsImageStore {
    fn read_raster(&self, image: &ImageRecord, region: Option<Region>) -> Result<DynamicImage, StoreError> {
        let raster = image::open(self.image_path(image)?)?;
        match region {
            None => Ok(raster),
            Some(r) => {
                if r.is_empty() || r.x + r.width > raster.width() || r.y + r.height > raster.height() {
                    return Err(StoreError::RegionOutOfBounds {
                        image: image.name().to_string(),
                        region: r.to_string(),
                    });
                }
                Ok(raster.crop_imm(r.x, r.y, r.width, r.height))
            }
        }
    }

    fn dimensions(&self, image: &ImageRecord) -> Result<(u32, u32), StoreError> {
        Ok(image::image_dimensions(self.image_path(image)?)?)
    }

    fn read_annotations(&self, image: &ImageRecord) -> Result<Vec<Annotation>, StoreError> {
        self.image_path(image)?;
        let path = self.annotations_path(image);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_annotations(&self, image: &ImageRecord, annotations: &[Annotation]) -> Result<(), StoreError> {
        self.image_path(image)?;
        let path = self.annotations_path(image);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Temp file first, then renamed into place.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(annotations)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn resolve_source_locations(&self, image: &ImageRecord) -> Result<Vec<PathBuf>, StoreError> {
        Ok(vec![self.image_path(image)?])
    }
}
