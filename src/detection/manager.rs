use ab_glyph::FontArc;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::camera::{CameraPhase, CameraTask};
use super::detector::{DetectionError, Detector, HttpDetector};
use super::source::{FfmpegSource, FrameSource};
use crate::config::{AiConfig, CameraConfig, CamerasConfig, JsonConfigStore};
use crate::notifications::NotificationSink;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const RESTART_PAUSE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("AI detection is not enabled on this deployment")]
    Unavailable,
    #[error("Unknown camera: {0}")]
    UnknownCamera(String),
    #[error("Camera {0} is already running")]
    AlreadyRunning(String),
    #[error("Concurrent camera limit of {0} reached")]
    CapacityReached(usize),
    #[error("Failed to create detector: {0}")]
    Detector(#[from] DetectionError),
}

/// Builds the video source and detector for one camera.
pub trait CameraBackend: Send + Sync {
    fn source(&self, camera: &CameraConfig) -> Box<dyn FrameSource>;
    fn detector(&self, ai: &AiConfig) -> Result<Box<dyn Detector>, DetectionError>;
    /// Font for snapshot labels; `None` draws boxes only.
    fn label_font(&self) -> Option<FontArc> {
        None
    }
}

/// RTSP through ffmpeg, inference through the HTTP sidecar.
pub struct LiveBackend {
    models_dir: PathBuf,
    label_font: Option<FontArc>,
}

impl LiveBackend {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            label_font: None,
        }
    }

    pub fn with_label_font(mut self, font: Option<FontArc>) -> Self {
        self.label_font = font;
        self
    }
}

impl CameraBackend for LiveBackend {
    fn source(&self, camera: &CameraConfig) -> Box<dyn FrameSource> {
        Box::new(FfmpegSource::new(camera.rtsp_url.clone()))
    }

    fn detector(&self, ai: &AiConfig) -> Result<Box<dyn Detector>, DetectionError> {
        let detector = HttpDetector::new(
            ai.detector_url.clone(),
            self.models_dir.join(&ai.model_path),
            ai.model_url.clone(),
        )?;
        Ok(Box::new(detector))
    }

    fn label_font(&self) -> Option<FontArc> {
        self.label_font.clone()
    }
}

struct RunningCamera {
    name: String,
    handle: JoinHandle<()>,
    stop: watch::Sender<()>,
    phase: watch::Receiver<CameraPhase>,
}

impl RunningCamera {
    fn is_running(&self) -> bool {
        !self.handle.is_finished() && *self.phase.borrow() != CameraPhase::Stopped
    }

    fn status_label(&self) -> &'static str {
        if self.handle.is_finished() {
            CameraPhase::Stopped.status_label()
        } else {
            self.phase.borrow().status_label()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    pub camera_id: String,
    pub name: String,
    pub running: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionStatus {
    pub ai_enabled: bool,
    pub total_cameras: usize,
    pub active_cameras: Vec<CameraStatus>,
}

/// Owns the detection loops of all cameras.
pub struct DetectionManager {
    backend: Arc<dyn CameraBackend>,
    ai_store: JsonConfigStore<AiConfig>,
    cameras_store: JsonConfigStore<CamerasConfig>,
    sink: Arc<dyn NotificationSink>,
    locale: String,
    /// Deployment-level switch, independent of the stored `global_enabled`.
    available: bool,
    cameras: DashMap<String, RunningCamera>,
}

impl DetectionManager {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        ai_store: JsonConfigStore<AiConfig>,
        cameras_store: JsonConfigStore<CamerasConfig>,
        sink: Arc<dyn NotificationSink>,
        locale: impl Into<String>,
        available: bool,
    ) -> Self {
        Self {
            backend,
            ai_store,
            cameras_store,
            sink,
            locale: locale.into(),
            available,
            cameras: DashMap::new(),
        }
    }

    fn running_count(&self) -> usize {
        self.cameras.iter().filter(|entry| entry.is_running()).count()
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.cameras
            .get(camera_id)
            .is_some_and(|entry| entry.is_running())
    }

    pub fn start_camera(&self, camera_id: &str) -> Result<(), ManagerError> {
        if !self.available {
            return Err(ManagerError::Unavailable);
        }
        let ai = self.ai_store.load();
        let cameras = self.cameras_store.load();
        let camera = cameras
            .get(camera_id)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownCamera(camera_id.to_string()))?;
        self.spawn_camera(camera_id, camera, ai)
    }

    fn spawn_camera(
        &self,
        camera_id: &str,
        camera: CameraConfig,
        ai: AiConfig,
    ) -> Result<(), ManagerError> {
        if self.is_running(camera_id) {
            return Err(ManagerError::AlreadyRunning(camera_id.to_string()));
        }
        let limit = ai.max_concurrent_cameras;
        if self.running_count() >= limit {
            return Err(ManagerError::CapacityReached(limit));
        }

        let detector = self.backend.detector(&ai)?;
        let source = self.backend.source(&camera);
        let name = camera.display_name(camera_id);
        let (phase_tx, phase_rx) = watch::channel(CameraPhase::Initializing);
        let (stop_tx, stop_rx) = watch::channel(());

        let task = CameraTask::new(
            camera_id,
            camera,
            ai,
            source,
            detector,
            Arc::clone(&self.sink),
            self.locale.clone(),
            phase_tx,
        )
        .with_label_font(self.backend.label_font());
        let handle = tokio::spawn(task.run(stop_rx));
        self.cameras.insert(
            camera_id.to_string(),
            RunningCamera {
                name: name.clone(),
                handle,
                stop: stop_tx,
                phase: phase_rx,
            },
        );
        info!(camera = %camera_id, name = %name, "Camera detection started.");
        Ok(())
    }

    /// Signals the camera loop and waits for it. Returns `false` if no such
    /// camera was registered.
    pub async fn stop_camera(&self, camera_id: &str) -> bool {
        let Some((_, mut camera)) = self.cameras.remove(camera_id) else {
            return false;
        };
        let _ = camera.stop.send(());
        match tokio::time::timeout(STOP_TIMEOUT, &mut camera.handle).await {
            Ok(Ok(())) => info!(camera = %camera_id, "Camera stopped."),
            Ok(Err(e)) => warn!(camera = %camera_id, error = %e, "Camera task ended abnormally."),
            Err(_) => {
                warn!(
                    camera = %camera_id,
                    timeout = ?STOP_TIMEOUT,
                    "Camera did not stop in time, aborting."
                );
                camera.handle.abort();
            }
        }
        true
    }

    /// Starts every enabled camera. Returns how many were started.
    pub fn start_all(&self) -> usize {
        if !self.available {
            info!("AI detection not enabled for this deployment (ENABLE_AI_DETECTION).");
            return 0;
        }
        let ai = self.ai_store.load();
        if !ai.global_enabled {
            info!("AI detection globally disabled.");
            return 0;
        }

        let mut started = 0;
        for (camera_id, camera) in self.cameras_store.load() {
            if !camera.enabled {
                continue;
            }
            match self.spawn_camera(&camera_id, camera, ai.clone()) {
                Ok(()) => started += 1,
                Err(ManagerError::AlreadyRunning(_)) => {}
                Err(e @ ManagerError::CapacityReached(_)) => {
                    warn!(camera = %camera_id, error = %e, "Not starting remaining cameras.");
                    break;
                }
                Err(e) => error!(camera = %camera_id, error = %e, "Failed to start camera."),
            }
        }
        info!(started, "Camera detection started for enabled cameras.");
        started
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.cameras.iter().map(|entry| entry.key().clone()).collect();
        for camera_id in ids {
            self.stop_camera(&camera_id).await;
        }
    }

    pub async fn restart_all(&self) -> usize {
        self.stop_all().await;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start_all()
    }

    pub fn status(&self) -> DetectionStatus {
        let mut active_cameras: Vec<CameraStatus> = self
            .cameras
            .iter()
            .map(|entry| CameraStatus {
                camera_id: entry.key().clone(),
                name: entry.name.clone(),
                running: entry.is_running(),
                status: entry.status_label().to_string(),
            })
            .collect();
        active_cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));

        DetectionStatus {
            ai_enabled: self.available && self.ai_store.load().global_enabled,
            total_cameras: self.cameras.len(),
            active_cameras,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::camera::testing::{people_camera, FakeDetector, FakeSource, FakeControls};
    use crate::notifications::testing::RecordingSink;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct FakeBackend {
        controls: Arc<FakeControls>,
        fail_detector: AtomicBool,
    }

    impl CameraBackend for FakeBackend {
        fn source(&self, _camera: &CameraConfig) -> Box<dyn FrameSource> {
            Box::new(FakeSource(self.controls.clone()))
        }

        fn detector(&self, _ai: &AiConfig) -> Result<Box<dyn Detector>, DetectionError> {
            if self.fail_detector.load(Ordering::SeqCst) {
                return Err(DetectionError::NotLoaded);
            }
            Ok(Box::new(FakeDetector(self.controls.clone())))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        backend: Arc<FakeBackend>,
        manager: DetectionManager,
    }

    fn fixture(available: bool, ai: serde_json::Value, cameras: serde_json::Value) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ai_path = dir.path().join("ai_config.json");
        let cameras_path = dir.path().join("cameras_config.json");
        std::fs::write(&ai_path, ai.to_string()).unwrap();
        std::fs::write(&cameras_path, cameras.to_string()).unwrap();

        let backend = Arc::new(FakeBackend::default());
        let manager = DetectionManager::new(
            backend.clone(),
            JsonConfigStore::new(ai_path),
            JsonConfigStore::new(cameras_path),
            Arc::new(RecordingSink::default()),
            "en",
            available,
        );
        Fixture {
            _dir: dir,
            backend,
            manager,
        }
    }

    fn three_cameras() -> serde_json::Value {
        let camera = serde_json::to_value(people_camera()).unwrap();
        let mut disabled = camera.clone();
        disabled["enabled"] = json!(false);
        json!({"a": camera.clone(), "b": camera, "c": disabled})
    }

    #[tokio::test(start_paused = true)]
    async fn deployment_gate_blocks_everything() {
        let f = fixture(false, json!({"global_enabled": true}), three_cameras());
        assert_eq!(f.manager.start_all(), 0);
        assert!(matches!(f.manager.start_camera("a"), Err(ManagerError::Unavailable)));
        assert!(!f.manager.status().ai_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn globally_disabled_starts_nothing() {
        let f = fixture(true, json!({"global_enabled": false}), three_cameras());
        assert_eq!(f.manager.start_all(), 0);
        assert_eq!(f.manager.status().total_cameras, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_all_runs_enabled_cameras_only() {
        let f = fixture(true, json!({"global_enabled": true}), three_cameras());
        assert_eq!(f.manager.start_all(), 2);
        sleep(Duration::from_millis(10)).await;

        let status = f.manager.status();
        assert!(status.ai_enabled);
        assert_eq!(status.total_cameras, 2);
        let ids: Vec<&str> = status.active_cameras.iter().map(|c| c.camera_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(status.active_cameras.iter().all(|c| c.running && c.status == "running"));
        assert_eq!(status.active_cameras[0].name, "Garden");

        // Already running cameras are left alone.
        assert_eq!(f.manager.start_all(), 0);
        f.manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_camera_limit_is_enforced() {
        let f = fixture(
            true,
            json!({"global_enabled": true, "max_concurrent_cameras": 1}),
            three_cameras(),
        );
        assert_eq!(f.manager.start_all(), 1);
        assert!(matches!(
            f.manager.start_camera("b"),
            Err(ManagerError::CapacityReached(1))
        ));
        f.manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_camera_errors() {
        let f = fixture(true, json!({"global_enabled": true}), three_cameras());
        assert!(matches!(
            f.manager.start_camera("missing"),
            Err(ManagerError::UnknownCamera(_))
        ));
        f.manager.start_camera("a").unwrap();
        assert!(matches!(
            f.manager.start_camera("a"),
            Err(ManagerError::AlreadyRunning(_))
        ));

        f.backend.fail_detector.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.manager.start_camera("b"),
            Err(ManagerError::Detector(_))
        ));
        f.manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_camera_joins_and_unregisters() {
        let f = fixture(true, json!({"global_enabled": true}), three_cameras());
        f.manager.start_camera("a").unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(f.manager.stop_camera("a").await);
        assert!(!f.manager.is_running("a"));
        assert_eq!(f.manager.status().total_cameras, 0);
        assert!(!f.manager.stop_camera("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_camera_reports_stopped_and_can_be_restarted() {
        let f = fixture(true, json!({"global_enabled": true}), three_cameras());
        f.backend.controls.fail_open.store(true, Ordering::SeqCst);
        f.manager.start_camera("a").unwrap();
        sleep(Duration::from_millis(10)).await;

        let status = f.manager.status();
        assert_eq!(status.total_cameras, 1);
        assert!(!status.active_cameras[0].running);
        assert_eq!(status.active_cameras[0].status, "stopped");

        f.backend.controls.fail_open.store(false, Ordering::SeqCst);
        f.manager.start_camera("a").unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(f.manager.is_running("a"));
        f.manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_all_pauses_between_stop_and_start() {
        let f = fixture(true, json!({"global_enabled": true}), three_cameras());
        f.manager.start_all();
        let started_at = tokio::time::Instant::now();
        assert_eq!(f.manager.restart_all().await, 2);
        assert!(started_at.elapsed() >= RESTART_PAUSE);
        f.manager.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_document_shape() {
        let f = fixture(true, json!({"global_enabled": true}), three_cameras());
        f.manager.start_camera("a").unwrap();
        sleep(Duration::from_millis(10)).await;

        let document = serde_json::to_value(f.manager.status()).unwrap();
        assert_eq!(
            document,
            json!({
                "ai_enabled": true,
                "total_cameras": 1,
                "active_cameras": [
                    {"camera_id": "a", "name": "Garden", "running": true, "status": "running"}
                ]
            })
        );
        f.manager.stop_all().await;
    }
}
