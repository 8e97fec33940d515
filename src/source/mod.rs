mod synthetic;

#[cfg(all(feature = "camera", target_os = "linux"))]
mod camera;

pub use synthetic::{MotionWindow, SyntheticSource};

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use camera::CameraSource;

use crate::error::Result;
use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use std::time::SystemTime;

/// A full-resolution image published by a video source
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Monotonic per-source frame counter; a new id means new data is ready
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Shared image data
    pub image: Arc<RgbaImage>,
}

impl SourceFrame {
    pub fn new(id: u64, image: RgbaImage) -> Self {
        Self {
            id,
            timestamp: SystemTime::now(),
            image: Arc::new(image),
        }
    }
}

/// Live frame provider polled by the sampler.
///
/// The pipeline never owns the device lifetime beyond `open`/`close`; a source
/// may be shared with encoders that read the same frames.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Acquire the device. Permission and availability failures surface here.
    async fn open(&self) -> Result<()>;

    /// Release the device
    async fn close(&self) -> Result<()>;

    /// The most recent frame, or `None` if the source has not produced one yet.
    /// Callers compare `SourceFrame::id` to decide whether data is new.
    fn latest_frame(&self) -> Result<Option<SourceFrame>>;
}
