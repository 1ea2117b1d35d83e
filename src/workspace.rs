//! On-disk layout shared with the external tool.
//!
//! ```text
//! <project>/<workspace_dir>/      training root (models/ is created by the tool)
//!     images/                     training images
//!     masks/                      training label masks
//!     temp/                       rasters staged for prediction
//!     predictions/                masks written by the tool
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::JobError;

/// Names of the sub-folders the tool creates when it splits a training set.
pub const SPLIT_DIRS: [&str; 3] = ["train", "val", "test"];

pub const TIF_EXTENSION: &str = "tif";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    training_root: PathBuf,
    images: PathBuf,
    masks: PathBuf,
    temp: PathBuf,
    predictions: PathBuf,
}

impl Workspace {
    /// Create every workspace directory below `project_root` that does not exist yet.
    pub fn ensure(project_root: &Path, workspace_dir: &str) -> Result<Self, JobError> {
        let training_root = project_root.join(workspace_dir);
        let ws = Self {
            images: training_root.join("images"),
            masks: training_root.join("masks"),
            temp: training_root.join("temp"),
            predictions: training_root.join("predictions"),
            training_root,
        };
        for dir in [&ws.training_root, &ws.images, &ws.masks, &ws.temp, &ws.predictions] {
            if !dir.is_dir() {
                fs::create_dir_all(dir).map_err(|e| JobError::io(dir, e))?;
                debug!(dir = %dir.display(), "Created workspace directory");
            }
        }
        Ok(ws)
    }

    pub fn training_root(&self) -> &Path {
        &self.training_root
    }

    pub fn images_dir(&self) -> &Path {
        &self.images
    }

    pub fn masks_dir(&self) -> &Path {
        &self.masks
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    pub fn predictions_dir(&self) -> &Path {
        &self.predictions
    }

    /// Directory the tool writes a trained model named `name` into.
    pub fn model_dir(&self, name: &str) -> PathBuf {
        self.training_root.join("models").join(name)
    }

    /// True when `images/` or `masks/` already hold `.tif` files.
    pub fn has_residual_data(&self) -> Result<bool, JobError> {
        Ok(!self.residual_files()?.is_empty())
    }

    /// Top-level `.tif` files in `images/` and `masks/`.
    pub fn residual_files(&self) -> Result<Vec<PathBuf>, JobError> {
        let mut files = tif_files(&self.images)?;
        files.extend(tif_files(&self.masks)?);
        Ok(files)
    }

    /// Delete the top-level files of `images/` and `masks/`. Sub-folders are left alone.
    pub fn delete_residual_data(&self) -> Result<usize, JobError> {
        let mut deleted = 0;
        for dir in [&self.images, &self.masks] {
            for entry in fs::read_dir(dir).map_err(|e| JobError::io(dir, e))? {
                let path = entry.map_err(|e| JobError::io(dir, e))?.path();
                if path.is_file() {
                    fs::remove_file(&path).map_err(|e| JobError::io(&path, e))?;
                    deleted += 1;
                }
            }
        }
        info!(deleted, "Deleted residual training data");
        Ok(deleted)
    }

    /// True when a `train`, `val` or `test` folder exists under `images/` or `masks/`.
    pub fn has_split_data(&self) -> bool {
        !self.split_dirs().is_empty()
    }

    pub fn split_dirs(&self) -> Vec<PathBuf> {
        [&self.images, &self.masks]
            .iter()
            .flat_map(|dir| SPLIT_DIRS.iter().map(move |s| dir.join(s)))
            .filter(|p| p.is_dir())
            .collect()
    }

    /// Remove files this crate wrote. Missing files are not an error, so this can run twice.
    pub fn remove_files(&self, files: &[PathBuf]) -> usize {
        let mut removed = 0;
        for file in files {
            match fs::remove_file(file) {
                Ok(()) => {
                    removed += 1;
                    debug!(file = %file.display(), "Deleted job file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %file.display(), error = %e, "Could not delete job file"),
            }
        }
        removed
    }
}

/// Top-level `.tif` files of `dir`; a missing directory has none.
pub fn tif_files(dir: &Path) -> Result<Vec<PathBuf>, JobError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| JobError::io(dir, e))? {
        let path = entry.map_err(|e| JobError::io(dir, e))?.path();
        let is_tif = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(TIF_EXTENSION));
        if path.is_file() && is_tif {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::ensure(dir.path(), "ws").unwrap();
        (dir, ws)
    }

    #[test]
    fn ensure_creates_layout_and_is_idempotent() {
        let (dir, ws) = workspace();
        for d in [ws.images_dir(), ws.masks_dir(), ws.temp_dir(), ws.predictions_dir()] {
            assert!(d.is_dir());
        }
        fs::write(ws.images_dir().join("keep.tif"), b"x").unwrap();

        let again = Workspace::ensure(dir.path(), "ws").unwrap();
        assert_eq!(again, ws);
        assert!(ws.images_dir().join("keep.tif").exists());
    }

    #[cfg(unix)]
    #[test]
    fn ensure_fails_on_read_only_parent() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let result = Workspace::ensure(&locked, "ws");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        // Running as root ignores directory permissions.
        if let Err(err) = result {
            assert_eq!(err.kind(), crate::error::FailureKind::Io);
        }
    }

    #[test]
    fn residual_data_detects_top_level_tifs_only() {
        let (_dir, ws) = workspace();
        assert!(!ws.has_residual_data().unwrap());

        fs::create_dir(ws.images_dir().join("nested")).unwrap();
        fs::write(ws.images_dir().join("nested").join("a.tif"), b"x").unwrap();
        fs::write(ws.masks_dir().join("notes.txt"), b"x").unwrap();
        assert!(!ws.has_residual_data().unwrap());

        fs::write(ws.masks_dir().join("a.tif"), b"x").unwrap();
        assert!(ws.has_residual_data().unwrap());
    }

    #[test]
    fn delete_residual_data_keeps_subfolders() {
        let (_dir, ws) = workspace();
        fs::write(ws.images_dir().join("a.tif"), b"x").unwrap();
        fs::write(ws.masks_dir().join("a.tif"), b"x").unwrap();
        fs::create_dir(ws.images_dir().join("train")).unwrap();
        fs::write(ws.images_dir().join("train").join("b.tif"), b"x").unwrap();

        assert_eq!(ws.delete_residual_data().unwrap(), 2);
        assert!(!ws.has_residual_data().unwrap());
        assert!(ws.images_dir().join("train").join("b.tif").exists());
    }

    #[test]
    fn split_data_in_images_or_masks() {
        let (_dir, ws) = workspace();
        assert!(!ws.has_split_data());

        fs::create_dir(ws.masks_dir().join("val")).unwrap();
        assert!(ws.has_split_data());
        assert_eq!(ws.split_dirs(), vec![ws.masks_dir().join("val")]);

        fs::create_dir(ws.images_dir().join("train")).unwrap();
        assert_eq!(ws.split_dirs().len(), 2);
    }

    #[test]
    fn remove_files_twice_is_harmless() {
        let (_dir, ws) = workspace();
        let a = ws.temp_dir().join("a.tif");
        let b = ws.predictions_dir().join("a.tif");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();

        let files = vec![a.clone(), b.clone()];
        assert_eq!(ws.remove_files(&files), 2);
        assert_eq!(ws.remove_files(&files), 0);
        assert!(tif_files(ws.temp_dir()).unwrap().is_empty());
        assert!(tif_files(ws.predictions_dir()).unwrap().is_empty());
    }
}
