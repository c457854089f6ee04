use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::model::RawDetection;
use super::source::Frame;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const UPLOAD_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Model file {0:?} is missing and no model_url is configured")]
    ModelMissing(PathBuf),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Inference service unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Detector has not been loaded")]
    NotLoaded,
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Prepares the model. A failure here ends the camera loop.
    async fn load(&mut self) -> Result<(), DetectionError>;
    /// Runs inference; boxes are in the frame's own coordinates.
    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError>;
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    detections: Vec<RawDetection>,
}

/// Object detection through a local inference sidecar speaking HTTP.
///
/// The sidecar reads the model from the shared cache directory; [`load`](Detector::load)
/// makes sure the file is there before checking that the service answers.
pub struct HttpDetector {
    client: Client,
    base_url: String,
    model_file: PathBuf,
    model_url: Option<String>,
    loaded: bool,
}

impl HttpDetector {
    pub fn new(
        base_url: impl Into<String>,
        model_file: impl Into<PathBuf>,
        model_url: Option<String>,
    ) -> Result<Self, DetectionError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_file: model_file.into(),
            model_url,
            loaded: false,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn ensure_model(&self) -> Result<(), DetectionError> {
        if tokio::fs::try_exists(&self.model_file).await.unwrap_or(false) {
            debug!(path = ?self.model_file, "Using cached model.");
            return Ok(());
        }
        let Some(url) = &self.model_url else {
            return Err(DetectionError::ModelMissing(self.model_file.clone()));
        };

        info!(url = %url, path = ?self.model_file, "Downloading detection model.");
        let bytes = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        write_atomically(&self.model_file, &bytes).await?;
        info!(path = ?self.model_file, size = bytes.len(), "Model cached.");
        Ok(())
    }

    async fn check_health(&self) -> Result<(), DetectionError> {
        let response = self.client.get(self.endpoint("health")).send().await?;
        if !response.status().is_success() {
            return Err(DetectionError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), DetectionError> {
    let io_err = |source| DetectionError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let partial = path.with_extension("part");
    tokio::fs::write(&partial, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&partial, path).await.map_err(io_err)
}

fn scale_back(detections: Vec<RawDetection>, sx: f32, sy: f32) -> Vec<RawDetection> {
    detections
        .into_iter()
        .map(|d| RawDetection {
            bbox: d.bbox.scaled(sx, sy),
            ..d
        })
        .collect()
}

#[async_trait]
impl Detector for HttpDetector {
    async fn load(&mut self) -> Result<(), DetectionError> {
        self.ensure_model().await?;
        self.check_health().await?;
        self.loaded = true;
        info!(url = %self.base_url, "Detector ready.");
        Ok(())
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
        if !self.loaded {
            return Err(DetectionError::NotLoaded);
        }
        let (resized, sx, sy) = frame.for_analysis();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, UPLOAD_QUALITY).encode_image(&resized)?;

        let model = self
            .model_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let form = Form::new().text("model", model).part(
            "image",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let response = self
            .client
            .post(self.endpoint("detect"))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DetectionError::Unavailable(format!(
                "detect returned {status}: {body}"
            )));
        }
        let parsed: DetectResponse = response.json().await?;
        Ok(scale_back(parsed.detections, sx, sy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::model::BoundingBox;

    #[test]
    fn boxes_are_scaled_to_source_coordinates() {
        let detections = vec![RawDetection {
            class_id: 0,
            confidence: 0.8,
            bbox: BoundingBox::new(100.0, 100.0, 200.0, 300.0),
        }];
        // A 1920x1080 source analysed at 1280x720.
        let scaled = scale_back(detections, 1.5, 1.5);
        assert_eq!(scaled[0].bbox, BoundingBox::new(150.0, 150.0, 300.0, 450.0));
        assert_eq!(scaled[0].confidence, 0.8);
    }

    #[test]
    fn sidecar_response_shape() {
        let body = r#"{"detections":[{"class_id":16,"confidence":0.71,
            "bbox":{"x1":1.0,"y1":2.0,"x2":3.0,"y2":4.0}}]}"#;
        let parsed: DetectResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.detections[0].class_id, 16);
    }

    #[tokio::test]
    async fn missing_model_without_url_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector =
            HttpDetector::new("http://127.0.0.1:1", dir.path().join("model.pt"), None).unwrap();
        assert!(matches!(
            detector.load().await,
            Err(DetectionError::ModelMissing(_))
        ));
    }

    #[tokio::test]
    async fn cached_model_is_used_and_unreachable_sidecar_fails() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.pt");
        std::fs::write(&model, b"weights").unwrap();
        let mut detector = HttpDetector::new(
            "http://127.0.0.1:1/",
            &model,
            Some("http://127.0.0.1:1/model.pt".to_string()),
        )
        .unwrap();
        // The cached file short-circuits the download; the health check then fails.
        assert!(matches!(detector.load().await, Err(DetectionError::Http(_))));
        assert_eq!(std::fs::read(&model).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn detect_requires_load() {
        let dir = tempfile::tempdir().unwrap();
        let detector =
            HttpDetector::new("http://127.0.0.1:1", dir.path().join("m.pt"), None).unwrap();
        let frame = Frame {
            image: image::RgbImage::new(4, 4),
            jpeg: Vec::new(),
        };
        assert!(matches!(
            detector.detect(&frame).await,
            Err(DetectionError::NotLoaded)
        ));
    }
}
