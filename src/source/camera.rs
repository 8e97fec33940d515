use super::{SourceFrame, VideoSource};
use crate::config::CameraConfig;
use crate::error::{Result, SourceError};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use image::RgbaImage;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// V4L2 camera read through a GStreamer pipeline into RGBA frames.
///
/// The latest frame is kept for the sampler and every frame is also broadcast
/// so encoders can consume the same video.
pub struct CameraSource {
    config: CameraConfig,
    device: String,
    latest: Arc<Mutex<Option<SourceFrame>>>,
    frame_counter: Arc<AtomicU64>,
    frames_tx: broadcast::Sender<SourceFrame>,
    pipeline: Mutex<Option<Pipeline>>,
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Self {
        let device = format!("/dev/video{}", config.index);
        let (frames_tx, _) = broadcast::channel(8);

        Self {
            config,
            device,
            latest: Arc::new(Mutex::new(None)),
            frame_counter: Arc::new(AtomicU64::new(0)),
            frames_tx,
            pipeline: Mutex::new(None),
        }
    }

    /// Subscribe to every captured frame
    pub fn frames(&self) -> broadcast::Receiver<SourceFrame> {
        self.frames_tx.subscribe()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.config.resolution
    }

    pub fn fps(&self) -> u32 {
        self.config.fps
    }

    /// Open the device node once so permission problems are reported distinctly
    fn check_device(&self) -> Result<()> {
        match std::fs::OpenOptions::new().read(true).open(&self.device) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(SourceError::PermissionDenied {
                    device: self.device.clone(),
                }
                .into())
            }
            Err(e) => Err(SourceError::Unavailable {
                device: self.device.clone(),
                details: e.to_string(),
            }
            .into()),
        }
    }

    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} do-timestamp=true ! \
             videoconvert ! videoscale ! videorate ! \
             video/x-raw,format=RGBA,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=2 drop=true",
            self.device, width, height, self.config.fps
        )
    }

    fn sample_to_frame(
        sample: &gstreamer::Sample,
        frame_counter: &AtomicU64,
    ) -> std::result::Result<SourceFrame, String> {
        let caps = sample.caps().ok_or("sample has no caps")?;
        let info = VideoInfo::from_caps(caps).map_err(|e| e.to_string())?;
        let buffer = sample.buffer().ok_or("sample has no buffer")?;
        let map = buffer.map_readable().map_err(|e| e.to_string())?;

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * 4;
        let stride = info.stride()[0] as usize;
        let data = map.as_slice();

        let pixels = if stride == row_bytes {
            data[..row_bytes * height as usize].to_vec()
        } else {
            let mut packed = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                packed.extend_from_slice(&data[start..start + row_bytes]);
            }
            packed
        };

        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or("frame size does not match caps")?;
        let id = frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SourceFrame::new(id, image))
    }
}

#[async_trait]
impl VideoSource for CameraSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn open(&self) -> Result<()> {
        if self.pipeline.lock().is_some() {
            return Ok(());
        }

        self.check_device()?;

        gstreamer::init().map_err(|e| SourceError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating camera pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| SourceError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| SourceError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| SourceError::Configuration {
                details: "Failed to get appsink element".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| SourceError::Configuration {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        let latest = Arc::clone(&self.latest);
        let frame_counter = Arc::clone(&self.frame_counter);
        let frames_tx = self.frames_tx.clone();

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;

                    match Self::sample_to_frame(&sample, &frame_counter) {
                        Ok(frame) => {
                            trace!("Camera frame {} captured", frame.id);
                            *latest.lock() = Some(frame.clone());
                            // No subscribers simply means no encoder is running
                            let _ = frames_tx.send(frame);
                        }
                        Err(e) => warn!("Dropping unreadable camera sample: {}", e),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            error!("Failed to start camera pipeline: {}", e);
            SourceError::Unavailable {
                device: self.device.clone(),
                details: format!("pipeline refused to start: {}", e),
            }
        })?;

        info!("Camera '{}' streaming from {}", self.config.name, self.device);
        *self.pipeline.lock() = Some(pipeline);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pipeline) = self.pipeline.lock().take() {
            debug!("Stopping camera pipeline");
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop camera pipeline cleanly: {}", e);
            }
        }
        *self.latest.lock() = None;
        Ok(())
    }

    fn latest_frame(&self) -> Result<Option<SourceFrame>> {
        Ok(self.latest.lock().clone())
    }
}
