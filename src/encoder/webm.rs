use super::{EncoderFactory, EncoderRole, SegmentEncoder};
use crate::config::{Codec, EncoderConfig};
use crate::error::{EncoderError, Result};
use crate::segment::{webm_header_len, Segment, SEGMENT_DURATION};
use crate::source::{CameraSource, SourceFrame};
use async_trait::async_trait;
use bytes::BytesMut;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::{AppSink, AppSrc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Seconds to wait for the muxer to drain after end-of-stream
const EOS_TIMEOUT_SECS: u64 = 5;

/// Pick the encoder element, preferring VP9 when the plugin is installed
fn resolve_codec(preference: Codec) -> Result<&'static str> {
    let available = |name: &str| gstreamer::ElementFactory::find(name).is_some();

    let element = match preference {
        Codec::Vp9 => "vp9enc",
        Codec::Vp8 => "vp8enc",
        Codec::Auto if available("vp9enc") => "vp9enc",
        Codec::Auto => "vp8enc",
    };

    if !available(element) {
        return Err(EncoderError::Initialization {
            details: format!("GStreamer element '{}' is not installed", element),
        }
        .into());
    }
    Ok(element)
}

/// GStreamer WebM encoder fed with frames broadcast by the camera source.
///
/// Muxer output accumulates between ticks; every second the accumulated
/// bytes become one segment.
pub struct WebmEncoder {
    role: EncoderRole,
    config: EncoderConfig,
    camera: Arc<CameraSource>,
    pipeline: Option<Pipeline>,
    feeder: Option<JoinHandle<()>>,
    segmenter: Option<JoinHandle<()>>,
    feeder_token: Option<CancellationToken>,
    segmenter_token: Option<CancellationToken>,
}

impl WebmEncoder {
    pub fn new(role: EncoderRole, config: EncoderConfig, camera: Arc<CameraSource>) -> Self {
        Self {
            role,
            config,
            camera,
            pipeline: None,
            feeder: None,
            segmenter: None,
            feeder_token: None,
            segmenter_token: None,
        }
    }

    fn build_pipeline_string(&self, element: &str) -> String {
        let (width, height) = self.camera.resolution();
        let fps = self.camera.fps();
        let encoder = match element {
            "vp9enc" => format!(
                "vp9enc deadline=1 cpu-used=8 row-mt=true target-bitrate={} keyframe-max-dist={}",
                self.config.bitrate, fps
            ),
            _ => format!(
                "vp8enc deadline=1 cpu-used=8 target-bitrate={} keyframe-max-dist={}",
                self.config.bitrate, fps
            ),
        };

        format!(
            "appsrc name=src is-live=true format=time do-timestamp=true \
             caps=video/x-raw,format=RGBA,width={},height={},framerate={}/1 ! \
             videoconvert ! video/x-raw,format=I420 ! \
             {} ! \
             webmmux streamable=true ! \
             appsink name=sink sync=false",
            width, height, fps, encoder
        )
    }

    fn pipeline_error(&self, details: String) -> EncoderError {
        error!("[{}] {}", self.role, details);
        EncoderError::Initialization { details }
    }
}

#[async_trait]
impl SegmentEncoder for WebmEncoder {
    fn role(&self) -> EncoderRole {
        self.role
    }

    async fn start(&mut self, segments: mpsc::UnboundedSender<Segment>) -> Result<()> {
        if self.pipeline.is_some() {
            return Err(EncoderError::AlreadyRunning.into());
        }

        gstreamer::init()
            .map_err(|e| self.pipeline_error(format!("Failed to initialize GStreamer: {}", e)))?;

        let element = resolve_codec(self.config.codec)?;
        let pipeline_desc = self.build_pipeline_string(element);
        info!("Creating {} encoder pipeline ({})", self.role, element);
        debug!("Pipeline ({}): {}", self.role, pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| self.pipeline_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| self.pipeline_error("Failed to downcast to Pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| self.pipeline_error("Failed to get appsrc element".to_string()))?
            .downcast::<AppSrc>()
            .map_err(|_| self.pipeline_error("Failed to downcast to AppSrc".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| self.pipeline_error("Failed to get appsink element".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| self.pipeline_error("Failed to downcast to AppSink".to_string()))?;

        let pending = Arc::new(Mutex::new(BytesMut::new()));
        let sink_pending = Arc::clone(&pending);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        let map = buffer
                            .map_readable()
                            .map_err(|_| gstreamer::FlowError::Error)?;
                        sink_pending.lock().extend_from_slice(map.as_slice());
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| self.pipeline_error(format!("Failed to start pipeline: {}", e)))?;

        let feeder_token = CancellationToken::new();
        let segmenter_token = CancellationToken::new();
        self.feeder = Some(tokio::spawn(feed_frames(
            self.role,
            appsrc,
            self.camera.frames(),
            feeder_token.clone(),
        )));
        self.segmenter = Some(tokio::spawn(cut_segments(
            self.role,
            pending,
            segments,
            segmenter_token.clone(),
        )));
        self.feeder_token = Some(feeder_token);
        self.segmenter_token = Some(segmenter_token);
        self.pipeline = Some(pipeline);

        info!("Started {} encoder", self.role);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let pipeline = self.pipeline.take().ok_or(EncoderError::NotRunning)?;

        // Stop feeding first so end-of-stream follows the last frame
        if let Some(token) = self.feeder_token.take() {
            token.cancel();
        }
        if let Some(feeder) = self.feeder.take() {
            if let Err(e) = feeder.await {
                warn!("[{}] Frame feeder ended abnormally: {}", self.role, e);
            }
        }

        let role = self.role;
        let drain = tokio::task::spawn_blocking(move || drain_pipeline(role, pipeline));
        match drain.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[{}] {}", role, e),
            Err(e) => warn!("[{}] Pipeline drain task failed: {}", role, e),
        }

        // The segmenter flushes the remaining muxer output once cancelled
        if let Some(token) = self.segmenter_token.take() {
            token.cancel();
        }
        if let Some(segmenter) = self.segmenter.take() {
            segmenter.await.map_err(|e| EncoderError::Pipeline {
                details: format!("segmenter task failed: {}", e),
            })?;
        }

        info!("Stopped {} encoder", self.role);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.pipeline.is_some()
    }
}

async fn feed_frames(
    role: EncoderRole,
    appsrc: AppSrc,
    mut frames: broadcast::Receiver<SourceFrame>,
    token: CancellationToken,
) {
    let mut pushed = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let buffer = gstreamer::Buffer::from_mut_slice(frame.image.as_raw().clone());
                    if let Err(e) = appsrc.push_buffer(buffer) {
                        warn!("[{}] Encoder refused frame: {:?}", role, e);
                        break;
                    }
                    pushed += 1;
                    trace!("[{}] Pushed frame {}", role, frame.id);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("[{}] Encoder skipped {} frames", role, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    if let Err(e) = appsrc.end_of_stream() {
        warn!("[{}] Failed to signal EOS: {:?}", role, e);
    }
    debug!("[{}] Frame feeder done after {} frames", role, pushed);
}

async fn cut_segments(
    role: EncoderRole,
    pending: Arc<Mutex<BytesMut>>,
    segments: mpsc::UnboundedSender<Segment>,
    token: CancellationToken,
) {
    let started = tokio::time::Instant::now();
    let mut interval = tokio::time::interval_at(started + SEGMENT_DURATION, SEGMENT_DURATION);
    let mut sequence = 0u64;
    let mut last_cut = started;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let payload = pending.lock().split().freeze();
                if payload.is_empty() {
                    trace!("[{}] No muxer output this second", role);
                    continue;
                }
                last_cut = tokio::time::Instant::now();
                let mut segment = Segment::new(sequence, payload);
                if sequence == 0 {
                    let header_len = webm_header_len(&segment.payload);
                    segment = segment.with_header(header_len);
                }
                if segments.send(segment).is_err() {
                    debug!("[{}] Segment receiver closed", role);
                    return;
                }
                sequence += 1;
            }
        }
    }

    // Pipeline has drained by now; everything left is the tail of the stream
    let payload = pending.lock().split().freeze();
    if !payload.is_empty() {
        let elapsed = last_cut.elapsed().min(SEGMENT_DURATION);
        if segments
            .send(Segment::partial(sequence, payload, elapsed))
            .is_err()
        {
            warn!("[{}] Final segment dropped, receiver closed", role);
        }
    }
}

/// Block until the muxer has written its tail, then tear the pipeline down
fn drain_pipeline(role: EncoderRole, pipeline: Pipeline) -> std::result::Result<(), String> {
    let result = match pipeline.bus() {
        Some(bus) => {
            let mut outcome = Err(format!("Timed out waiting for {} encoder EOS", role));
            for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => {
                        outcome = Ok(());
                        break;
                    }
                    gstreamer::MessageView::Error(err) => {
                        outcome = Err(format!(
                            "Encoder pipeline error: {} ({})",
                            err.error(),
                            err.debug().unwrap_or_default()
                        ));
                        break;
                    }
                    _ => {}
                }
            }
            outcome
        }
        None => Err("Encoder pipeline has no bus".to_string()),
    };

    if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
        warn!("[{}] Failed to stop encoder pipeline: {}", role, e);
    }
    result
}

/// Creates WebM encoders reading from a shared camera
pub struct WebmEncoderFactory {
    config: EncoderConfig,
    camera: Arc<CameraSource>,
}

impl WebmEncoderFactory {
    pub fn new(config: EncoderConfig, camera: Arc<CameraSource>) -> Self {
        Self { config, camera }
    }
}

impl EncoderFactory for WebmEncoderFactory {
    fn create(&self, role: EncoderRole) -> Result<Box<dyn SegmentEncoder>> {
        gstreamer::init().map_err(|e| EncoderError::Initialization {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;
        // Fail at creation when no VP8/VP9 plugin is present
        resolve_codec(self.config.codec)?;

        Ok(Box::new(WebmEncoder::new(
            role,
            self.config.clone(),
            Arc::clone(&self.camera),
        )))
    }
}
