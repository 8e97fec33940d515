use super::types::{Component, ComponentState, ShutdownHandle, ShutdownReason};
use crate::analyzer::{DetectionLoop, DetectionLoopBuilder, MotionSignal};
use crate::capture::{DirectorySink, EventAssembler, EventAssemblerBuilder, EventLog, EventSink};
use crate::config::MotionCamConfig;
use crate::encoder::EncoderFactory;
use crate::error::{MotionCamError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::recorder::ContinuousRecorder;
use crate::ring_buffer::RingBufferBuilder;
use crate::settings::{MotionSettings, SettingsStore, SettingsUpdate};
use crate::source::VideoSource;
use crate::status::PipelineStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application coordinator that wires the capture pipeline together
pub struct MotionCamOrchestrator {
    pub(super) config: MotionCamConfig,
    pub(super) source: Arc<dyn VideoSource>,
    pub(super) source_open: bool,
    pub(super) settings: SettingsStore,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) event_log: Arc<EventLog>,

    // Components
    pub(super) recorder: ContinuousRecorder,
    pub(super) detection: DetectionLoop,
    pub(super) assembler: EventAssembler,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<Component, ComponentState>>>,
    pub(super) shutdown_handle: ShutdownHandle,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl MotionCamOrchestrator {
    /// Create a new orchestrator over the given source and encoder factory
    pub fn new(
        config: MotionCamConfig,
        source: Arc<dyn VideoSource>,
        encoder_factory: Arc<dyn EncoderFactory>,
    ) -> Result<Self> {
        let settings = SettingsStore::new(config.detection.clone())?;
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let ring_buffer = Arc::new(
            RingBufferBuilder::new()
                .capacity(settings.snapshot().pre_roll_capacity())
                .build()?,
        );
        let event_log = Arc::new(EventLog::new(config.system.event_log_capacity));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let recorder = ContinuousRecorder::new(
            Arc::clone(&encoder_factory),
            Arc::clone(&ring_buffer),
            settings.subscribe(),
            Arc::clone(&event_bus),
        );

        let detection = DetectionLoopBuilder::new()
            .source(Arc::clone(&source))
            .settings(settings.subscribe())
            .event_bus(Arc::clone(&event_bus))
            .tick_hz(config.analysis.tick_hz)
            .build()?;

        let mut assembler = EventAssemblerBuilder::new()
            .camera_name(config.camera.name.clone())
            .encoder_factory(encoder_factory)
            .ring_buffer(ring_buffer)
            .settings(settings.subscribe())
            .recording_state(recorder.recording_state())
            .event_bus(Arc::clone(&event_bus))
            .sink(Arc::clone(&event_log) as Arc<dyn EventSink>);

        if config.storage.save_payloads || config.storage.save_metadata {
            assembler = assembler.sink(Arc::new(DirectorySink::new(
                &config.storage.path,
                config.storage.save_payloads,
                config.storage.save_metadata,
            )));
        }

        Ok(Self {
            config,
            source,
            source_open: false,
            settings,
            event_bus,
            event_log,
            recorder,
            detection,
            assembler: assembler.build()?,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_handle: ShutdownHandle::new(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Open the source, then bring up recording, event assembly and detection.
    ///
    /// A source that cannot be opened fails the whole start with nothing
    /// running. A continuous encoder that cannot start is reported and the
    /// pipeline continues without pre-roll capture.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting motioncam pipeline for '{}'", self.config.camera.name);

        self.set_component_state(Component::Source, ComponentState::Starting)
            .await;
        if let Err(e) = self.source.open().await {
            self.set_component_state(Component::Source, ComponentState::Failed)
                .await;
            error!("Failed to open video source '{}': {}", self.source.name(), e);
            self.publish_error(format!("Failed to open video source: {}", e))
                .await;
            return Err(e);
        }
        self.source_open = true;
        self.set_component_state(Component::Source, ComponentState::Running)
            .await;

        if let Err(e) = self.start_recording().await {
            warn!("Continuing without continuous recording: {}", e);
        }

        self.set_component_state(Component::Assembler, ComponentState::Starting)
            .await;
        self.assembler.start().await?;
        self.set_component_state(Component::Assembler, ComponentState::Running)
            .await;

        self.start_detection().await?;

        info!("motioncam pipeline started");
        Ok(())
    }

    pub async fn start_detection(&mut self) -> Result<()> {
        self.require_source(Component::Detection)?;

        self.set_component_state(Component::Detection, ComponentState::Starting)
            .await;
        match self.detection.start().await {
            Ok(()) => {
                self.set_component_state(Component::Detection, ComponentState::Running)
                    .await;
                Ok(())
            }
            Err(e) => {
                self.set_component_state(Component::Detection, ComponentState::Failed)
                    .await;
                error!("Failed to start detection: {}", e);
                Err(e)
            }
        }
    }

    /// Stop detection; trigger state and the published signal reset to idle
    pub async fn stop_detection(&mut self) -> Result<()> {
        self.set_component_state(Component::Detection, ComponentState::Stopping)
            .await;
        self.detection.stop().await?;
        self.set_component_state(Component::Detection, ComponentState::Stopped)
            .await;
        Ok(())
    }

    pub async fn start_recording(&mut self) -> Result<()> {
        self.require_source(Component::Recording)?;

        self.set_component_state(Component::Recording, ComponentState::Starting)
            .await;
        match self.recorder.start().await {
            Ok(()) => {
                self.set_component_state(Component::Recording, ComponentState::Running)
                    .await;
                Ok(())
            }
            Err(e) => {
                self.set_component_state(Component::Recording, ComponentState::Failed)
                    .await;
                Err(e)
            }
        }
    }

    /// Stop the continuous encoder; the pre-roll buffer is discarded
    pub async fn stop_recording(&mut self) -> Result<()> {
        self.set_component_state(Component::Recording, ComponentState::Stopping)
            .await;
        self.recorder.stop().await?;
        self.set_component_state(Component::Recording, ComponentState::Stopped)
            .await;
        Ok(())
    }

    /// Apply a partial settings change. Invalid values are rejected and the
    /// previous settings stay in effect.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<MotionSettings> {
        if update.is_empty() {
            return Ok(self.settings.snapshot());
        }

        let updated = self.settings.update(update).map_err(|e| {
            warn!("Rejected settings update: {}", e);
            MotionCamError::from(e)
        })?;
        info!("Detection settings updated: {:?}", updated);
        Ok(updated)
    }

    pub fn settings(&self) -> MotionSettings {
        self.settings.snapshot()
    }

    pub fn status(&self) -> PipelineStatus {
        let signal = self.detection.current_signal();
        let settings = self.settings.snapshot();

        PipelineStatus {
            camera_name: self.config.camera.name.clone(),
            recording: self.recorder.is_recording(),
            detecting: self.detection.is_running(),
            motion_detected: signal.motion,
            motion_score: signal.score,
            trigger_state: self.detection.metrics().trigger_state,
            capture_in_progress: self.assembler.capture_in_progress(),
            events_captured: self.assembler.events_captured(),
            buffered_segments: self.recorder.ring_buffer().len(),
            pre_roll_capacity: settings.pre_roll_capacity(),
        }
    }

    /// Completed events retained in memory
    pub fn events(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Receiver for the per-tick motion signal
    pub fn signal(&self) -> watch::Receiver<MotionSignal> {
        self.detection.signal()
    }

    pub fn config(&self) -> &MotionCamConfig {
        &self.config
    }

    /// Handle that stops `run` from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    fn require_source(&self, component: Component) -> Result<()> {
        if self.source_open {
            Ok(())
        } else {
            Err(MotionCamError::component(
                component.as_str(),
                "Video source is not open",
            ))
        }
    }

    pub(super) async fn publish_error(&self, message: String) {
        if let Err(e) = self
            .event_bus
            .publish(PipelineEvent::SystemError {
                component: "orchestrator".to_string(),
                error: message,
            })
            .await
        {
            error!("Failed to publish system error: {}", e);
        }
    }
}
