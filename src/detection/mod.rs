//! Optional camera detection add-on: per-camera loops that capture frames, run
//! object detection and notify when the observed scene changes.
pub mod camera;
pub mod detector;
pub mod manager;
pub mod model;
pub mod scene;
pub mod snapshot;
pub mod source;

pub use camera::{CameraPhase, CameraRuntimeState, SceneDecision};
pub use manager::{CameraBackend, DetectionManager, DetectionStatus, LiveBackend, ManagerError};
pub use model::{Category, Detection};
