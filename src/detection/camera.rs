//! The per-camera detection loop.
use ab_glyph::FontArc;
use chrono::Local;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::detector::Detector;
use super::model::{classify, Detection};
use super::scene::is_new_scene;
use super::snapshot::{annotate, detection_message, encode_jpeg, save_snapshot};
use super::source::{Frame, FrameSource};
use crate::config::{AiConfig, CameraConfig};
use crate::notifications::{deliver_photo_or_text, deliver_text, NotificationSink};

/// Minimum gap between two notifications from the same camera.
pub const NOTIFICATION_COOLDOWN: Duration = Duration::from_secs(10);
/// Pause after a failed frame read.
pub const FRAME_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPhase {
    Initializing,
    Connected,
    Running,
    Stopped,
}

impl CameraPhase {
    /// The coarse status reported to operators.
    pub fn status_label(self) -> &'static str {
        match self {
            CameraPhase::Initializing | CameraPhase::Connected => "starting",
            CameraPhase::Running => "running",
            CameraPhase::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneDecision {
    /// Nothing detected; scene memory was reset.
    Empty,
    Notify,
    SameScene,
    CoolingDown,
}

/// Scene memory of one camera.
#[derive(Debug, Default)]
pub struct CameraRuntimeState {
    previous: Vec<Detection>,
    last_notification: Option<Instant>,
}

impl CameraRuntimeState {
    /// Records this tick's detections and decides whether to notify.
    ///
    /// The detections always replace the stored scene. A `Notify` decision
    /// also starts a new cooldown period at `now`.
    pub fn observe(
        &mut self,
        detections: &[Detection],
        iou_threshold: f32,
        now: Instant,
    ) -> SceneDecision {
        if detections.is_empty() {
            self.previous.clear();
            return SceneDecision::Empty;
        }

        let new_scene = is_new_scene(detections, &self.previous, iou_threshold);
        let cooled_down = self
            .last_notification
            .map_or(true, |last| now.duration_since(last) >= NOTIFICATION_COOLDOWN);
        self.previous = detections.to_vec();

        if !new_scene {
            SceneDecision::SameScene
        } else if !cooled_down {
            SceneDecision::CoolingDown
        } else {
            self.last_notification = Some(now);
            SceneDecision::Notify
        }
    }
}

/// Everything one camera loop owns.
pub struct CameraTask {
    camera_id: String,
    camera: CameraConfig,
    ai: AiConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    sink: Arc<dyn NotificationSink>,
    locale: String,
    phase: watch::Sender<CameraPhase>,
    label_font: Option<FontArc>,
}

impl CameraTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: impl Into<String>,
        camera: CameraConfig,
        ai: AiConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        sink: Arc<dyn NotificationSink>,
        locale: impl Into<String>,
        phase: watch::Sender<CameraPhase>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            camera,
            ai,
            source,
            detector,
            sink,
            locale: locale.into(),
            phase,
            label_font: None,
        }
    }

    pub fn with_label_font(mut self, font: Option<FontArc>) -> Self {
        self.label_font = font;
        self
    }

    fn set_phase(&self, phase: CameraPhase) {
        self.phase.send_replace(phase);
        debug!(camera = %self.camera_id, ?phase, "Camera phase changed.");
    }

    async fn initialize(&mut self) -> bool {
        if let Err(e) = self.detector.load().await {
            error!(camera = %self.camera_id, error = %e, "Failed to load detection model.");
            return false;
        }
        if let Err(e) = self.source.open().await {
            error!(camera = %self.camera_id, error = %e, "Failed to open video source.");
            return false;
        }
        true
    }

    /// Runs until stopped, an initialization failure, or an iteration panics.
    pub async fn run(mut self, mut stop_rx: watch::Receiver<()>) {
        self.set_phase(CameraPhase::Initializing);
        if !self.initialize().await {
            self.set_phase(CameraPhase::Stopped);
            return;
        }
        self.set_phase(CameraPhase::Connected);
        info!(camera = %self.camera_id, url = %self.camera.rtsp_url, "Camera connected.");

        self.set_phase(CameraPhase::Running);
        let mut state = CameraRuntimeState::default();
        loop {
            if stop_rx.has_changed().unwrap_or(true) {
                break;
            }

            let pause = match AssertUnwindSafe(self.iteration(&mut state)).catch_unwind().await {
                Ok(pause) => pause,
                Err(_) => {
                    error!(
                        camera = %self.camera_id,
                        "Detection iteration panicked, stopping camera."
                    );
                    break;
                }
            };

            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        self.set_phase(CameraPhase::Stopped);
        info!(camera = %self.camera_id, "Camera detection stopped.");
    }

    /// One capture-detect-decide pass. Returns the pause before the next one.
    async fn iteration(&mut self, state: &mut CameraRuntimeState) -> Duration {
        let frame = match self.source.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(camera = %self.camera_id, error = %e, "Frame read failed, retrying.");
                return FRAME_RETRY_DELAY;
            }
        };

        let detections = match self.detector.detect(&frame).await {
            Ok(raw) => classify(raw, &self.camera),
            Err(e) => {
                warn!(camera = %self.camera_id, error = %e, "Inference failed.");
                Vec::new()
            }
        };

        match state.observe(&detections, self.camera.iou_threshold, Instant::now()) {
            SceneDecision::Notify => self.notify(&frame, &detections).await,
            decision => debug!(
                camera = %self.camera_id,
                ?decision,
                count = detections.len(),
                "No notification."
            ),
        }
        self.ai.detection_interval()
    }

    async fn notify(&self, frame: &Frame, detections: &[Detection]) {
        let now = Local::now();
        let name = self.camera.display_name(&self.camera_id);
        let caption = detection_message(&name, detections, now, &self.locale);
        info!(camera = %self.camera_id, count = detections.len(), "New scene detected.");

        let annotated = annotate(frame, detections, self.label_font.as_ref(), now);
        let jpeg = match encode_jpeg(&annotated, self.ai.jpeg_quality()) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(
                    camera = %self.camera_id,
                    error = %e,
                    "Failed to encode snapshot, sending text only."
                );
                deliver_text(self.sink.as_ref(), &caption).await;
                return;
            }
        };

        if self.ai.save_images {
            if let Err(e) = save_snapshot(&self.ai.save_path, &name, now, &jpeg).await {
                warn!(camera = %self.camera_id, error = %e, "Failed to save snapshot.");
            }
        }
        deliver_photo_or_text(self.sink.as_ref(), jpeg, &caption).await;
    }
}
