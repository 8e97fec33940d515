use super::event::{event_filename, MotionEvent};
use super::sink::EventSink;
use crate::encoder::{EncoderFactory, EncoderRole, SegmentEncoder};
use crate::error::{MotionCamError, Result};
use crate::events::{EventBus, EventFilter, PipelineEvent, SuppressReason};
use crate::ring_buffer::{PreRoll, SegmentRingBuffer};
use crate::segment::Segment;
use crate::settings::MotionSettings;

use bytes::BytesMut;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State shared between the trigger listener and the capture task
struct AssemblerShared {
    camera_name: String,
    factory: Arc<dyn EncoderFactory>,
    ring_buffer: Arc<SegmentRingBuffer>,
    settings: watch::Receiver<MotionSettings>,
    recording: watch::Receiver<bool>,
    event_bus: Arc<EventBus>,
    sinks: Vec<Arc<dyn EventSink>>,
    in_flight: AtomicBool,
    last_completed: Mutex<Option<Instant>>,
    events_captured: AtomicU64,
    current_capture: Mutex<Option<JoinHandle<()>>>,
}

/// Turns rising edges into finished events: pre-roll snapshot, timed
/// post-roll capture, concatenation and delivery to sinks.
///
/// At most one capture runs at a time. Edges arriving during a capture, or
/// within `cooldown_seconds` of the last completed one, are suppressed.
pub struct EventAssembler {
    shared: Arc<AssemblerShared>,
    listener: Option<JoinHandle<()>>,
    cancellation_token: Option<CancellationToken>,
}

impl EventAssembler {
    pub fn new(
        camera_name: String,
        factory: Arc<dyn EncoderFactory>,
        ring_buffer: Arc<SegmentRingBuffer>,
        settings: watch::Receiver<MotionSettings>,
        recording: watch::Receiver<bool>,
        event_bus: Arc<EventBus>,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            shared: Arc::new(AssemblerShared {
                camera_name,
                factory,
                ring_buffer,
                settings,
                recording,
                event_bus,
                sinks,
                in_flight: AtomicBool::new(false),
                last_completed: Mutex::new(None),
                events_captured: AtomicU64::new(0),
                current_capture: Mutex::new(None),
            }),
            listener: None,
            cancellation_token: None,
        }
    }

    /// Begin listening for rising edges on the event bus
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_some() {
            warn!("Event assembler is already running");
            return Ok(());
        }

        info!(
            "Starting event assembler for '{}' with {} sink(s)",
            self.shared.camera_name,
            self.shared.sinks.len()
        );

        let mut triggers = self.shared.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["motion_triggered"]),
            "event_assembler",
        );
        let token = CancellationToken::new();
        let listener_token = token.clone();
        let shared = Arc::clone(&self.shared);

        self.listener = Some(tokio::spawn(async move {
            debug!("Event assembler listener started");
            loop {
                tokio::select! {
                    _ = listener_token.cancelled() => break,
                    event = triggers.recv() => match event {
                        Ok(PipelineEvent::MotionTriggered { score, .. }) => {
                            AssemblerShared::on_trigger(&shared, score).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Event assembler stopped receiving triggers: {}", e);
                            break;
                        }
                    }
                }
            }
            debug!("Event assembler listener ended");
        }));
        self.cancellation_token = Some(token);
        Ok(())
    }

    /// Stop listening. A capture already in flight runs to completion first.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancellation_token.take() {
            token.cancel();
        }
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                error!("Error stopping event assembler listener: {}", e);
            }
        }

        let capture = self.shared.current_capture.lock().take();
        if let Some(capture) = capture {
            info!("Waiting for in-flight capture to finish");
            if let Err(e) = capture.await {
                error!("In-flight capture task failed: {}", e);
            }
        }

        info!("Event assembler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    pub fn capture_in_progress(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn events_captured(&self) -> u64 {
        self.shared.events_captured.load(Ordering::Relaxed)
    }
}

impl AssemblerShared {
    async fn on_trigger(shared: &Arc<Self>, score: f64) {
        let triggered = Instant::now();

        if let Some(reason) = shared.suppression_reason(triggered) {
            info!("Ignoring motion trigger: {:?}", reason);
            shared
                .publish(PipelineEvent::TriggerSuppressed {
                    reason,
                    timestamp: SystemTime::now(),
                })
                .await;
            return;
        }

        if shared
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        // Pre-roll ends at the rising edge, not when the task gets scheduled
        let pre_roll = shared.ring_buffer.snapshot();

        let task_shared = Arc::clone(shared);
        let handle = tokio::spawn(async move {
            if let Err(e) = task_shared.capture(score, triggered, pre_roll).await {
                error!("Event capture failed: {}", e);
                task_shared
                    .publish(PipelineEvent::SystemError {
                        component: "event_assembler".to_string(),
                        error: e.to_string(),
                    })
                    .await;
            }
            task_shared.in_flight.store(false, Ordering::SeqCst);
        });
        *shared.current_capture.lock() = Some(handle);
    }

    fn suppression_reason(&self, now: Instant) -> Option<SuppressReason> {
        if self.in_flight.load(Ordering::SeqCst) {
            return Some(SuppressReason::CaptureInProgress);
        }

        if !*self.recording.borrow() {
            return Some(SuppressReason::NotRecording);
        }

        let cooldown = self.settings.borrow().cooldown();
        let last_completed = *self.last_completed.lock();
        if let Some(completed) = last_completed {
            let since = now.saturating_duration_since(completed);
            if since < cooldown {
                return Some(SuppressReason::Cooldown {
                    remaining_ms: (cooldown - since).as_millis() as u64,
                });
            }
        }

        None
    }

    async fn capture(&self, score: f64, triggered: Instant, pre_roll: PreRoll) -> Result<()> {
        // Everything below uses the settings as they were at the trigger
        let settings = self.settings.borrow().clone();
        let triggered_at = Utc::now();
        let event_id = Uuid::new_v4();

        info!(
            "Capturing event {} ({} pre-roll segments, {}s post-roll)",
            event_id,
            pre_roll.len(),
            settings.post_roll_seconds
        );
        self.publish(PipelineEvent::CaptureStarted {
            event_id: event_id.to_string(),
            pre_roll_segments: pre_roll.len(),
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut encoder = self.start_post_roll_encoder(tx).await?;

        // Post-roll is timed from the trigger, not from encoder start
        tokio::time::sleep_until(triggered + settings.post_roll()).await;

        if let Err(e) = encoder.stop().await {
            warn!("Post-roll encoder did not stop cleanly: {}", e);
        }
        drop(encoder);

        let mut post_roll = Vec::new();
        while let Some(segment) = rx.recv().await {
            post_roll.push(segment);
        }

        let completed = Utc::now();
        let event = MotionEvent {
            id: event_id,
            timestamp: completed,
            triggered_at,
            filename: event_filename(completed),
            duration_seconds: settings.event_duration_seconds(),
            motion_score: score,
            camera_name: self.camera_name.clone(),
            pre_roll_segments: pre_roll.len(),
            post_roll_segments: post_roll.len(),
            payload: concatenate(&pre_roll, &post_roll),
        };

        *self.last_completed.lock() = Some(Instant::now());
        self.events_captured.fetch_add(1, Ordering::Relaxed);
        info!(
            "Event {} assembled: {} ({} segments, {} bytes)",
            event.id,
            event.filename,
            event.segment_count(),
            event.size_bytes()
        );

        self.deliver(&event).await;

        self.publish(PipelineEvent::CaptureCompleted {
            event_id: event.id.to_string(),
            filename: event.filename.clone(),
            segment_count: event.segment_count(),
        })
        .await;
        Ok(())
    }

    async fn start_post_roll_encoder(
        &self,
        tx: mpsc::UnboundedSender<Segment>,
    ) -> Result<Box<dyn SegmentEncoder>> {
        let mut encoder = self.factory.create(EncoderRole::PostRoll).map_err(|e| {
            MotionCamError::component(
                "event_assembler",
                format!("Post-roll encoder unavailable: {}", e),
            )
        })?;
        encoder.start(tx).await.map_err(|e| {
            MotionCamError::component(
                "event_assembler",
                format!("Post-roll encoder failed to start: {}", e),
            )
        })?;
        Ok(encoder)
    }

    async fn deliver(&self, event: &MotionEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event).await {
                warn!("Sink '{}' rejected event {}: {}", sink.name(), event.id, e);
                self.publish(PipelineEvent::SystemError {
                    component: format!("sink:{}", sink.name()),
                    error: e.to_string(),
                })
                .await;
            } else {
                debug!("Event {} delivered to '{}'", event.id, sink.name());
            }
        }
    }

    async fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            error!("Failed to publish assembler event: {}", e);
        }
    }
}

/// Pre-roll then post-roll, each in sequence order.
///
/// A pre-roll whose first segment was cut mid-run gets its run's header
/// written in front. The post-roll run keeps its own header and follows as
/// a second stream.
fn concatenate(pre_roll: &PreRoll, post_roll: &[Segment]) -> bytes::Bytes {
    let header = pre_roll.missing_header();
    let segments = pre_roll.segments.iter().chain(post_roll);
    let total = header.map_or(0, |h| h.len())
        + segments.clone().map(Segment::len).sum::<usize>();

    let mut payload = BytesMut::with_capacity(total);
    if let Some(header) = header {
        payload.extend_from_slice(header);
    }
    for segment in segments {
        payload.extend_from_slice(&segment.payload);
    }
    payload.freeze()
}

/// Builder for EventAssembler
#[derive(Default)]
pub struct EventAssemblerBuilder {
    camera_name: Option<String>,
    factory: Option<Arc<dyn EncoderFactory>>,
    ring_buffer: Option<Arc<SegmentRingBuffer>>,
    settings: Option<watch::Receiver<MotionSettings>>,
    recording: Option<watch::Receiver<bool>>,
    event_bus: Option<Arc<EventBus>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventAssemblerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera_name(mut self, camera_name: impl Into<String>) -> Self {
        self.camera_name = Some(camera_name.into());
        self
    }

    pub fn encoder_factory(mut self, factory: Arc<dyn EncoderFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn ring_buffer(mut self, ring_buffer: Arc<SegmentRingBuffer>) -> Self {
        self.ring_buffer = Some(ring_buffer);
        self
    }

    pub fn settings(mut self, settings: watch::Receiver<MotionSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn recording_state(mut self, recording: watch::Receiver<bool>) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<EventAssembler> {
        let factory = self.factory.ok_or_else(|| {
            MotionCamError::component("event_assembler_builder", "Encoder factory is required")
        })?;
        let ring_buffer = self.ring_buffer.ok_or_else(|| {
            MotionCamError::component("event_assembler_builder", "Ring buffer is required")
        })?;
        let settings = self.settings.ok_or_else(|| {
            MotionCamError::component("event_assembler_builder", "Settings receiver is required")
        })?;
        let recording = self.recording.ok_or_else(|| {
            MotionCamError::component("event_assembler_builder", "Recording state is required")
        })?;
        let event_bus = self.event_bus.ok_or_else(|| {
            MotionCamError::component("event_assembler_builder", "Event bus is required")
        })?;

        Ok(EventAssembler::new(
            self.camera_name.unwrap_or_else(|| "GoPro".to_string()),
            factory,
            ring_buffer,
            settings,
            recording,
            event_bus,
            self.sinks,
        ))
    }
}
