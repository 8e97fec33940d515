use crate::analyzer::motion::MotionScorer;
use crate::analyzer::trigger::{TriggerState, TriggerStateMachine};
use crate::error::{MotionCamError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::sampler::FrameSampler;
use crate::settings::MotionSettings;
use crate::source::VideoSource;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Latest debounced detection output, refreshed on every scored tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MotionSignal {
    pub motion: bool,
    pub score: f64,
}

/// Counters about the detection loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionMetrics {
    pub frames_sampled: u64,
    pub frames_scored: u64,
    pub ticks_skipped: u64,
    pub triggers: u64,
    pub trigger_state: TriggerState,
}

/// Drives sampler, scorer and trigger state machine on a fixed tick
pub struct DetectionLoop {
    source: Arc<dyn VideoSource>,
    settings: watch::Receiver<MotionSettings>,
    event_bus: Arc<EventBus>,
    tick_hz: u32,
    signal_tx: watch::Sender<MotionSignal>,
    metrics: Arc<Mutex<DetectionMetrics>>,
    task: Option<JoinHandle<()>>,
    cancellation_token: Option<CancellationToken>,
}

impl DetectionLoop {
    pub fn new(
        source: Arc<dyn VideoSource>,
        settings: watch::Receiver<MotionSettings>,
        event_bus: Arc<EventBus>,
        tick_hz: u32,
    ) -> Self {
        let (signal_tx, _) = watch::channel(MotionSignal::default());

        Self {
            source,
            settings,
            event_bus,
            tick_hz: tick_hz.max(1),
            signal_tx,
            metrics: Arc::new(Mutex::new(DetectionMetrics::default())),
            task: None,
            cancellation_token: None,
        }
    }

    /// Start ticking. Sampler, scorer and trigger begin from a clean state.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Detection loop is already running");
            return Ok(());
        }

        info!("Starting detection loop at {} Hz", self.tick_hz);

        let token = CancellationToken::new();
        let worker = DetectionWorker {
            sampler: FrameSampler::new(Arc::clone(&self.source)),
            scorer: MotionScorer::new(),
            trigger: TriggerStateMachine::new(),
            settings: self.settings.clone(),
            event_bus: Arc::clone(&self.event_bus),
            signal_tx: self.signal_tx.clone(),
            metrics: Arc::clone(&self.metrics),
            read_failing: false,
        };

        *self.metrics.lock() = DetectionMetrics::default();
        self.task = Some(tokio::spawn(worker.run(
            tick_period(self.tick_hz),
            token.clone(),
        )));
        self.cancellation_token = Some(token);

        if let Err(e) = self
            .event_bus
            .publish(PipelineEvent::DetectionStarted {
                timestamp: SystemTime::now(),
            })
            .await
        {
            error!("Failed to publish detection started event: {}", e);
        }

        Ok(())
    }

    /// Stop ticking and reset all detection state
    pub async fn stop(&mut self) -> Result<()> {
        let Some(token) = self.cancellation_token.take() else {
            debug!("Detection loop is not running");
            return Ok(());
        };

        info!("Stopping detection loop");
        token.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Error stopping detection task: {}", e);
            }
        }

        self.signal_tx.send_replace(MotionSignal::default());
        self.metrics.lock().trigger_state = TriggerState::Idle;

        if let Err(e) = self
            .event_bus
            .publish(PipelineEvent::DetectionStopped {
                timestamp: SystemTime::now(),
            })
            .await
        {
            error!("Failed to publish detection stopped event: {}", e);
        }

        info!("Detection loop stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.cancellation_token.is_some()
    }

    /// Receiver for the per-tick `(motion, score)` signal
    pub fn signal(&self) -> watch::Receiver<MotionSignal> {
        self.signal_tx.subscribe()
    }

    pub fn current_signal(&self) -> MotionSignal {
        *self.signal_tx.borrow()
    }

    pub fn metrics(&self) -> DetectionMetrics {
        self.metrics.lock().clone()
    }
}

fn tick_period(tick_hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / tick_hz.max(1) as u64)
}

/// State owned by the tick task
struct DetectionWorker {
    sampler: FrameSampler,
    scorer: MotionScorer,
    trigger: TriggerStateMachine,
    settings: watch::Receiver<MotionSettings>,
    event_bus: Arc<EventBus>,
    signal_tx: watch::Sender<MotionSignal>,
    metrics: Arc<Mutex<DetectionMetrics>>,
    read_failing: bool,
}

impl DetectionWorker {
    async fn run(mut self, period: Duration, token: CancellationToken) {
        info!("Detection task started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Detection task cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Detection task ended");
    }

    async fn tick(&mut self) {
        // One snapshot per tick; updates apply from the next tick on
        let settings = self.settings.borrow().clone();

        let frame = match self.sampler.sample() {
            Ok(Some(frame)) => {
                if self.read_failing {
                    info!("Video source recovered");
                    self.read_failing = false;
                }
                frame
            }
            Ok(None) => {
                self.metrics.lock().ticks_skipped = self.sampler.ticks_skipped();
                return;
            }
            Err(e) => {
                self.report_read_error(e).await;
                return;
            }
        };

        let (sample, retired) = self.scorer.score(frame);
        if let Some(retired) = retired {
            self.sampler.recycle(retired);
        }

        let Some(sample) = sample else {
            return;
        };

        let output = self.trigger.update(sample.score, &settings);
        self.signal_tx.send_replace(MotionSignal {
            motion: output.motion,
            score: output.score,
        });

        {
            let mut metrics = self.metrics.lock();
            metrics.frames_sampled = self.sampler.frames_sampled();
            metrics.frames_scored = self.scorer.frames_scored();
            metrics.ticks_skipped = self.sampler.ticks_skipped();
            metrics.trigger_state = self.trigger.state();
            if output.rising_edge {
                metrics.triggers += 1;
            }
        }

        if output.rising_edge {
            self.publish(PipelineEvent::MotionTriggered {
                score: output.score,
                timestamp: SystemTime::now(),
            })
            .await;
        } else if output.falling_edge {
            self.publish(PipelineEvent::MotionCleared {
                timestamp: SystemTime::now(),
            })
            .await;
        }
    }

    /// Report only the first failure of a run of failed reads
    async fn report_read_error(&mut self, e: MotionCamError) {
        if self.read_failing {
            debug!("Video source still failing: {}", e);
            return;
        }

        self.read_failing = true;
        warn!("Failed to read from video source: {}", e);
        self.publish(PipelineEvent::SystemError {
            component: "detection_loop".to_string(),
            error: e.to_string(),
        })
        .await;
    }

    async fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            error!("Failed to publish detection event: {}", e);
        }
    }
}

/// Builder for DetectionLoop
#[derive(Default)]
pub struct DetectionLoopBuilder {
    source: Option<Arc<dyn VideoSource>>,
    settings: Option<watch::Receiver<MotionSettings>>,
    event_bus: Option<Arc<EventBus>>,
    tick_hz: Option<u32>,
}

impl DetectionLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: Arc<dyn VideoSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn settings(mut self, settings: watch::Receiver<MotionSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn tick_hz(mut self, tick_hz: u32) -> Self {
        self.tick_hz = Some(tick_hz);
        self
    }

    pub fn build(self) -> Result<DetectionLoop> {
        let source = self.source.ok_or_else(|| {
            MotionCamError::component("detection_loop_builder", "Video source is required")
        })?;

        let settings = self.settings.ok_or_else(|| {
            MotionCamError::component("detection_loop_builder", "Settings receiver is required")
        })?;

        let event_bus = self.event_bus.ok_or_else(|| {
            MotionCamError::component("detection_loop_builder", "Event bus is required")
        })?;

        Ok(DetectionLoop::new(
            source,
            settings,
            event_bus,
            self.tick_hz.unwrap_or(60),
        ))
    }
}
