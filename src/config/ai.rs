use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::detection::model::Category;

const DEFAULT_DETECTION_INTERVAL_SECS: f64 = 2.0;

/// Global settings of the camera detection add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub global_enabled: bool,
    /// File name of the model inside the persistent model cache.
    pub model_path: String,
    /// Seconds between analysed frames.
    pub detection_interval: f64,
    pub max_concurrent_cameras: usize,
    pub save_images: bool,
    pub save_path: PathBuf,
    /// JPEG quality of snapshots, 1-100.
    pub snapshot_quality: u8,
    /// Base URL of the inference sidecar.
    pub detector_url: String,
    /// Where to download `model_path` from when it is not cached yet.
    pub model_url: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            global_enabled: false,
            model_path: "yolov10m-human.pt".to_string(),
            detection_interval: DEFAULT_DETECTION_INTERVAL_SECS,
            max_concurrent_cameras: 4,
            save_images: true,
            save_path: PathBuf::from("/var/lib/ssh_monitor/snapshots"),
            snapshot_quality: 100,
            detector_url: "http://127.0.0.1:8500".to_string(),
            model_url: None,
        }
    }
}

impl AiConfig {
    pub fn detection_interval(&self) -> Duration {
        if self.detection_interval.is_finite() && self.detection_interval > 0.0 {
            Duration::from_secs_f64(self.detection_interval)
        } else {
            Duration::from_secs_f64(DEFAULT_DETECTION_INTERVAL_SECS)
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.snapshot_quality.clamp(1, 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryToggles {
    pub people: bool,
    pub objects: bool,
    pub animals: bool,
}

impl CategoryToggles {
    pub fn is_enabled(&self, category: Category) -> bool {
        match category {
            Category::People => self.people,
            Category::Objects => self.objects,
            Category::Animals => self.animals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub name: String,
    pub rtsp_url: String,
    pub enabled: bool,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub categories: CategoryToggles,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            rtsp_url: String::new(),
            enabled: false,
            confidence_threshold: 0.5,
            iou_threshold: 0.3,
            categories: CategoryToggles::default(),
        }
    }
}

impl CameraConfig {
    pub fn display_name(&self, camera_id: &str) -> String {
        if self.name.trim().is_empty() {
            format!("Camera {camera_id}")
        } else {
            self.name.clone()
        }
    }
}

/// Cameras keyed by their identifier.
pub type CamerasConfig = BTreeMap<String, CameraConfig>;
