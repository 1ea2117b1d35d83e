use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::store::ImageRecord;

/// Base architectures the external tool can train from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseModel {
    B0,
    B1,
    B2,
    B3,
    S,
    M,
    L,
}

impl BaseModel {
    pub const ALL: [BaseModel; 7] = [
        BaseModel::B0,
        BaseModel::B1,
        BaseModel::B2,
        BaseModel::B3,
        BaseModel::S,
        BaseModel::M,
        BaseModel::L,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaseModel::B0 => "b0",
            BaseModel::B1 => "b1",
            BaseModel::B2 => "b2",
            BaseModel::B3 => "b3",
            BaseModel::S => "s",
            BaseModel::M => "m",
            BaseModel::L => "l",
        }
    }
}

impl FromStr for BaseModel {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        BaseModel::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| SpecError::UnknownBaseModel(s.to_string()))
    }
}

impl fmt::Display for BaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Predict,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Predict => write!(f, "predict"),
        }
    }
}

/// Unvalidated job description, as collected by a UI or read from a job file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRequest {
    pub mode: Option<Mode>,
    #[serde(default)]
    pub images: Vec<String>,
    // predict
    pub model_path: Option<PathBuf>,
    pub resolution: Option<u8>,
    pub threshold: Option<f64>,
    pub target_class: Option<String>,
    // train
    pub base_model: Option<String>,
    pub epochs: Option<u32>,
    pub crop_class: Option<String>,
    pub foreground_class: Option<String>,
    pub model_name: Option<String>,
    // post-processing
    #[serde(default)]
    pub split: bool,
    #[serde(default)]
    pub remove_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictParams {
    pub model_path: PathBuf,
    pub resolution: u8,
    pub threshold: f64,
    pub target_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainParams {
    pub base_model: BaseModel,
    pub epochs: u32,
    pub crop_class: Option<String>,
    pub foreground_class: String,
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobParams {
    Predict(PredictParams),
    Train(TrainParams),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostProcessing {
    pub split: bool,
    pub remove_existing: bool,
}

/// Validated, immutable description of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    images: Vec<ImageRecord>,
    params: JobParams,
    post: PostProcessing,
}

impl JobSpec {
    /// Validate `request` field by field; nothing missing is silently defaulted.
    pub fn new(request: JobRequest) -> Result<Self, SpecError> {
        if request.images.is_empty() {
            return Err(SpecError::EmptyImages);
        }
        let images = request.images.into_iter().map(ImageRecord::new).collect();
        let params = match request.mode.ok_or(SpecError::MissingField("mode"))? {
            Mode::Predict => {
                let model_path = request.model_path.ok_or(SpecError::MissingField("model_path"))?;
                if !model_path.is_file() {
                    return Err(SpecError::ModelNotFound(model_path));
                }
                let resolution = request.resolution.ok_or(SpecError::MissingField("resolution"))?;
                if !(1..=3).contains(&resolution) {
                    return Err(SpecError::InvalidResolution(resolution));
                }
                let threshold = request.threshold.ok_or(SpecError::MissingField("threshold"))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(SpecError::InvalidThreshold(threshold));
                }
                let target_class = non_empty(request.target_class, "target_class")?;
                JobParams::Predict(PredictParams {
                    model_path,
                    resolution,
                    threshold,
                    target_class,
                })
            }
            Mode::Train => {
                let base_model: BaseModel = request
                    .base_model
                    .ok_or(SpecError::MissingField("base_model"))?
                    .parse()?;
                let epochs = request.epochs.ok_or(SpecError::MissingField("epochs"))?;
                if epochs == 0 {
                    return Err(SpecError::InvalidEpochs);
                }
                let crop_class = match request.crop_class {
                    Some(c) if c.trim().is_empty() => None,
                    other => other,
                };
                JobParams::Train(TrainParams {
                    base_model,
                    epochs,
                    crop_class,
                    foreground_class: non_empty(request.foreground_class, "foreground_class")?,
                    model_name: non_empty(request.model_name, "model_name")?,
                })
            }
        };
        Ok(Self {
            images,
            params,
            post: PostProcessing {
                split: request.split,
                remove_existing: request.remove_existing,
            },
        })
    }

    pub fn mode(&self) -> Mode {
        match self.params {
            JobParams::Predict(_) => Mode::Predict,
            JobParams::Train(_) => Mode::Train,
        }
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    /// Number of distinct images in the input set.
    pub fn distinct_images(&self) -> usize {
        self.images.iter().collect::<BTreeSet<_>>().len()
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn post_processing(&self) -> PostProcessing {
        self.post
    }

    pub fn model_path(&self) -> Option<&Path> {
        match &self.params {
            JobParams::Predict(p) => Some(&p.model_path),
            JobParams::Train(_) => None,
        }
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, SpecError> {
    let value = value.ok_or(SpecError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(SpecError::EmptyClassName(field));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn predict_request(model: &Path) -> JobRequest {
        JobRequest {
            mode: Some(Mode::Predict),
            images: vec!["A.png".into(), "B.png".into()],
            model_path: Some(model.to_path_buf()),
            resolution: Some(1),
            threshold: Some(0.5),
            target_class: Some("Region".into()),
            ..Default::default()
        }
    }

    fn train_request() -> JobRequest {
        JobRequest {
            mode: Some(Mode::Train),
            images: vec!["a.png".into(), "b.png".into(), "c.png".into()],
            base_model: Some("B2".into()),
            epochs: Some(10),
            foreground_class: Some("Tumor".into()),
            model_name: Some("unet_b2".into()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_predict_request() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("M.h5");
        std::fs::write(&model, b"weights").unwrap();

        let spec = JobSpec::new(predict_request(&model)).unwrap();
        assert_eq!(spec.mode(), Mode::Predict);
        assert_eq!(spec.images().len(), 2);
        assert_eq!(spec.model_path(), Some(model.as_path()));
        assert!(!spec.post_processing().split);
    }

    #[test]
    fn predict_rejects_bad_fields() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("M.h5");
        std::fs::write(&model, b"weights").unwrap();

        let mut req = predict_request(&model);
        req.resolution = Some(4);
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::InvalidResolution(4));

        let mut req = predict_request(&model);
        req.threshold = Some(1.5);
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::InvalidThreshold(1.5));

        let mut req = predict_request(&model);
        req.threshold = None;
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::MissingField("threshold"));

        let req = predict_request(&dir.path().join("missing.h5"));
        assert!(matches!(JobSpec::new(req), Err(SpecError::ModelNotFound(_))));

        let mut req = predict_request(&model);
        req.target_class = Some("  ".into());
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::EmptyClassName("target_class"));
    }

    #[test]
    fn valid_train_request_normalises_base_model() {
        let spec = JobSpec::new(train_request()).unwrap();
        match spec.params() {
            JobParams::Train(t) => {
                assert_eq!(t.base_model, BaseModel::B2);
                assert_eq!(t.epochs, 10);
                assert!(t.crop_class.is_none());
            }
            other => panic!("expected train params, got {other:?}"),
        }
    }

    #[test]
    fn train_rejects_bad_fields() {
        let mut req = train_request();
        req.epochs = Some(0);
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::InvalidEpochs);

        let mut req = train_request();
        req.base_model = Some("b7".into());
        assert_eq!(
            JobSpec::new(req).unwrap_err(),
            SpecError::UnknownBaseModel("b7".into())
        );

        let mut req = train_request();
        req.model_name = None;
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::MissingField("model_name"));
    }

    #[test]
    fn empty_images_and_missing_mode() {
        let mut req = train_request();
        req.images.clear();
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::EmptyImages);

        let mut req = train_request();
        req.mode = None;
        assert_eq!(JobSpec::new(req).unwrap_err(), SpecError::MissingField("mode"));
    }

    #[test]
    fn distinct_images_ignores_duplicates() {
        let mut req = train_request();
        req.images = vec!["a.png".into(), "a.png".into(), "b.png".into()];
        assert_eq!(JobSpec::new(req).unwrap().distinct_images(), 2);
    }

    #[test]
    fn request_deserializes_from_toml() {
        let req: JobRequest = toml::from_str(
            r#"
            mode = "train"
            images = ["a.png", "b.png", "c.png"]
            base_model = "s"
            epochs = 25
            crop_class = "ROI"
            foreground_class = "Tumor"
            model_name = "EfficientV2UNet_s_epochs25"
            "#,
        )
        .unwrap();
        let spec = JobSpec::new(req).unwrap();
        assert_eq!(spec.mode(), Mode::Train);
    }
}
