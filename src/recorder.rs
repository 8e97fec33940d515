use crate::encoder::{EncoderFactory, EncoderRole, SegmentEncoder};
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::ring_buffer::SegmentRingBuffer;
use crate::segment::Segment;
use crate::settings::MotionSettings;

use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Keeps the continuous encoder running and its segments flowing into the ring buffer
pub struct ContinuousRecorder {
    factory: Arc<dyn EncoderFactory>,
    ring_buffer: Arc<SegmentRingBuffer>,
    settings: watch::Receiver<MotionSettings>,
    event_bus: Arc<EventBus>,
    encoder: Option<Box<dyn SegmentEncoder>>,
    pump: Option<JoinHandle<()>>,
    recording: watch::Sender<bool>,
}

impl ContinuousRecorder {
    pub fn new(
        factory: Arc<dyn EncoderFactory>,
        ring_buffer: Arc<SegmentRingBuffer>,
        settings: watch::Receiver<MotionSettings>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (recording, _) = watch::channel(false);

        Self {
            factory,
            ring_buffer,
            settings,
            event_bus,
            encoder: None,
            pump: None,
            recording,
        }
    }

    /// Start the continuous encoder.
    ///
    /// An encoder that cannot be created or started is reported and returned;
    /// recording then stays off and nothing else is affected.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            warn!("Continuous recording is already active");
            return Ok(());
        }

        info!("Starting continuous recording");

        let mut encoder = match self.factory.create(EncoderRole::Continuous) {
            Ok(encoder) => encoder,
            Err(e) => return Err(self.report_failure(e).await),
        };

        let capacity = self.settings.borrow().pre_roll_capacity();
        self.ring_buffer.set_capacity(capacity);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = encoder.start(tx).await {
            return Err(self.report_failure(e).await);
        }

        self.pump = Some(tokio::spawn(pump_segments(
            rx,
            Arc::clone(&self.ring_buffer),
            self.settings.clone(),
        )));
        self.encoder = Some(encoder);
        self.recording.send_replace(true);

        info!(
            "Continuous recording started (pre-roll capacity {} segments)",
            capacity
        );
        self.publish(PipelineEvent::RecordingStarted {
            timestamp: SystemTime::now(),
        })
        .await;
        Ok(())
    }

    /// Stop the encoder and discard the buffered pre-roll
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut encoder) = self.encoder.take() else {
            debug!("Continuous recording is not active");
            return Ok(());
        };

        info!("Stopping continuous recording");
        self.recording.send_replace(false);

        if let Err(e) = encoder.stop().await {
            warn!("Continuous encoder did not stop cleanly: {}", e);
        }
        drop(encoder);

        // Pump ends once the encoder has dropped its sender
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                error!("Error stopping segment pump: {}", e);
            }
        }

        self.ring_buffer.clear();
        info!("Continuous recording stopped, pre-roll buffer cleared");

        self.publish(PipelineEvent::RecordingStopped {
            timestamp: SystemTime::now(),
        })
        .await;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        *self.recording.borrow()
    }

    /// Receiver tracking whether recording is active
    pub fn recording_state(&self) -> watch::Receiver<bool> {
        self.recording.subscribe()
    }

    pub fn ring_buffer(&self) -> &Arc<SegmentRingBuffer> {
        &self.ring_buffer
    }

    async fn report_failure(&self, e: crate::error::MotionCamError) -> crate::error::MotionCamError {
        error!("Continuous encoder failed to start, recording disabled: {}", e);
        self.publish(PipelineEvent::SystemError {
            component: "continuous_recorder".to_string(),
            error: e.to_string(),
        })
        .await;
        e
    }

    async fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            error!("Failed to publish recorder event: {}", e);
        }
    }
}

async fn pump_segments(
    mut segments: mpsc::UnboundedReceiver<Segment>,
    ring_buffer: Arc<SegmentRingBuffer>,
    mut settings: watch::Receiver<MotionSettings>,
) {
    debug!("Segment pump started");
    let mut settings_live = true;

    loop {
        tokio::select! {
            segment = segments.recv() => match segment {
                Some(segment) => {
                    trace!("Buffering segment {}", segment.sequence);
                    ring_buffer.push(segment);
                }
                None => break,
            },
            changed = settings.changed(), if settings_live => {
                if changed.is_err() {
                    settings_live = false;
                    continue;
                }
                let capacity = settings.borrow_and_update().pre_roll_capacity();
                ring_buffer.set_capacity(capacity);
            }
        }
    }

    debug!("Segment pump ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::SyntheticEncoderFactory;
    use crate::events::EventFilter;
    use crate::settings::{SettingsStore, SettingsUpdate};
    use std::time::Duration;

    fn settings_store(pre_roll_seconds: u32) -> SettingsStore {
        SettingsStore::new(MotionSettings {
            pre_roll_seconds,
            ..MotionSettings::default()
        })
        .unwrap()
    }

    fn recorder(
        factory: SyntheticEncoderFactory,
        store: &SettingsStore,
        event_bus: Arc<EventBus>,
    ) -> ContinuousRecorder {
        ContinuousRecorder::new(
            Arc::new(factory),
            Arc::new(SegmentRingBuffer::new(1)),
            store.subscribe(),
            event_bus,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_fills_to_pre_roll_capacity() {
        let store = settings_store(10);
        let mut recorder = recorder(
            SyntheticEncoderFactory::new(),
            &store,
            Arc::new(EventBus::new(16)),
        );

        recorder.start().await.unwrap();
        assert!(recorder.is_recording());

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(recorder.ring_buffer().len(), 4);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let buffered = recorder.ring_buffer().snapshot();
        assert_eq!(buffered.len(), 10);
        assert_eq!(buffered.segments.first().unwrap().sequence, 4);
        assert_eq!(buffered.segments.last().unwrap().sequence, 13);
        // Segment 0 is gone but its header is still on hand
        assert!(buffered.missing_header().is_some());

        recorder.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_and_restart_refills_from_empty() {
        let store = settings_store(10);
        let mut recorder = recorder(
            SyntheticEncoderFactory::new(),
            &store,
            Arc::new(EventBus::new(16)),
        );

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        recorder.stop().await.unwrap();
        assert!(!recorder.is_recording());
        assert!(recorder.ring_buffer().is_empty());
        assert!(recorder.ring_buffer().stream_header().is_none());

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let buffered = recorder.ring_buffer().snapshot();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered.segments[0].sequence, 0);
        assert!(buffered.header.is_some());
        assert!(buffered.missing_header().is_none());

        recorder.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_pre_roll_trims_buffer() {
        let store = settings_store(20);
        let mut recorder = recorder(
            SyntheticEncoderFactory::new(),
            &store,
            Arc::new(EventBus::new(16)),
        );

        recorder.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(recorder.ring_buffer().len(), 15);

        store
            .update(SettingsUpdate {
                pre_roll_seconds: Some(10),
                ..Default::default()
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.ring_buffer().len(), 10);
        assert_eq!(recorder.ring_buffer().capacity(), 10);

        recorder.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_encoder_failure_leaves_recording_off() {
        let store = settings_store(10);
        let event_bus = Arc::new(EventBus::new(16));
        let mut errors =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["system_error"]), "test");
        let mut recorder = recorder(
            SyntheticEncoderFactory::new().fail_on(EncoderRole::Continuous),
            &store,
            Arc::clone(&event_bus),
        );

        assert!(recorder.start().await.is_err());
        assert!(!recorder.is_recording());
        assert!(errors.try_recv().unwrap().is_some());

        // Stopping something that never started is fine
        recorder.stop().await.unwrap();
    }
}
