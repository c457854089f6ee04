use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::commands::{run_command, CommandError};

const GRAB_TIMEOUT: Duration = Duration::from_secs(15);
/// Frames are analysed and annotated at this size.
pub const ANALYSIS_WIDTH: u32 = 1280;
pub const ANALYSIS_HEIGHT: u32 = 720;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Video source is not open")]
    NotOpen,
    #[error("Frame grab failed: {0}")]
    Grab(#[from] CommandError),
    #[error("Frame could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Video source returned no data")]
    Empty,
}

/// One decoded video frame together with the encoded bytes it came from.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub jpeg: Vec<u8>,
}

impl Frame {
    pub fn from_jpeg(jpeg: Vec<u8>) -> Result<Self, CaptureError> {
        if jpeg.is_empty() {
            return Err(CaptureError::Empty);
        }
        let image = image::load_from_memory(&jpeg)?.to_rgb8();
        Ok(Self { image, jpeg })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The frame scaled to the analysis size, plus the factors mapping analysis
    /// coordinates back to source coordinates.
    pub fn for_analysis(&self) -> (RgbImage, f32, f32) {
        let (width, height) = self.dimensions();
        let resized = imageops::resize(
            &self.image,
            ANALYSIS_WIDTH,
            ANALYSIS_HEIGHT,
            FilterType::Triangle,
        );
        (
            resized,
            width as f32 / ANALYSIS_WIDTH as f32,
            height as f32 / ANALYSIS_HEIGHT as f32,
        )
    }
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Connects to the source. A failure here ends the camera loop.
    async fn open(&mut self) -> Result<(), CaptureError>;
    /// Returns the most recent frame.
    async fn capture(&mut self) -> Result<Frame, CaptureError>;
}

/// Pulls single frames from an RTSP stream with an `ffmpeg` child process.
pub struct FfmpegSource {
    url: String,
    opened: bool,
}

impl FfmpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            opened: false,
        }
    }

    async fn grab(&self) -> Result<Frame, CaptureError> {
        let args = [
            "-loglevel",
            "error",
            "-rtsp_transport",
            "tcp",
            "-i",
            self.url.as_str(),
            "-frames:v",
            "1",
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-",
        ];
        let output = run_command("ffmpeg", &args, GRAB_TIMEOUT).await?;
        Frame::from_jpeg(output.stdout)
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&mut self) -> Result<(), CaptureError> {
        // A stream that cannot produce one frame now is treated as unreachable.
        let frame = self.grab().await?;
        let (width, height) = frame.dimensions();
        info!(width, height, "Connected to video source.");
        self.opened = true;
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpen);
        }
        let frame = self.grab().await?;
        debug!("Captured frame.");
        Ok(frame)
    }
}
