use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Why a rising edge did not start a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SuppressReason {
    /// A post-roll capture is already running
    CaptureInProgress,
    /// The previous event completed less than `cooldown_seconds` ago
    Cooldown { remaining_ms: u64 },
    /// Continuous recording is not active, so there is nothing to assemble
    NotRecording,
}

/// Discrete pipeline events shared between components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Rising edge: the trigger state machine entered `Detected`
    MotionTriggered { score: f64, timestamp: SystemTime },
    /// Falling edge: motion stopped being reported
    MotionCleared { timestamp: SystemTime },
    /// Detection loop started
    DetectionStarted { timestamp: SystemTime },
    /// Detection loop stopped and its state was reset
    DetectionStopped { timestamp: SystemTime },
    /// Continuous pre-roll recording started
    RecordingStarted { timestamp: SystemTime },
    /// Continuous pre-roll recording stopped and the buffer was cleared
    RecordingStopped { timestamp: SystemTime },
    /// Event assembly began for a trigger
    CaptureStarted {
        event_id: String,
        pre_roll_segments: usize,
    },
    /// Event assembly finished and the event was handed to consumers
    CaptureCompleted {
        event_id: String,
        filename: String,
        segment_count: usize,
    },
    /// A rising edge was ignored
    TriggerSuppressed {
        reason: SuppressReason,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl PipelineEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::MotionTriggered { score, .. } => {
                format!("Motion triggered (score {:.3})", score)
            }
            PipelineEvent::MotionCleared { .. } => "Motion cleared".to_string(),
            PipelineEvent::DetectionStarted { .. } => "Detection started".to_string(),
            PipelineEvent::DetectionStopped { .. } => "Detection stopped".to_string(),
            PipelineEvent::RecordingStarted { .. } => "Recording started".to_string(),
            PipelineEvent::RecordingStopped { .. } => "Recording stopped".to_string(),
            PipelineEvent::CaptureStarted {
                event_id,
                pre_roll_segments,
            } => format!(
                "Capture started: {} ({} pre-roll segments)",
                event_id, pre_roll_segments
            ),
            PipelineEvent::CaptureCompleted {
                event_id,
                filename,
                segment_count,
            } => format!(
                "Capture completed: {} -> {} ({} segments)",
                event_id, filename, segment_count
            ),
            PipelineEvent::TriggerSuppressed { reason, .. } => {
                format!("Trigger suppressed: {:?}", reason)
            }
            PipelineEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::MotionTriggered { .. } => "motion_triggered",
            PipelineEvent::MotionCleared { .. } => "motion_cleared",
            PipelineEvent::DetectionStarted { .. } => "detection_started",
            PipelineEvent::DetectionStopped { .. } => "detection_stopped",
            PipelineEvent::RecordingStarted { .. } => "recording_started",
            PipelineEvent::RecordingStopped { .. } => "recording_stopped",
            PipelineEvent::CaptureStarted { .. } => "capture_started",
            PipelineEvent::CaptureCompleted { .. } => "capture_completed",
            PipelineEvent::TriggerSuppressed { .. } => "trigger_suppressed",
            PipelineEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Broadcast bus carrying pipeline events between components
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Raw receiver seeing every event
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Named receiver that only yields events matching `filter`
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish to all current subscribers and return how many there were.
    /// Publishing with nobody listening is not an error.
    pub async fn publish(&self, event: PipelineEvent) -> Result<usize, EventBusError> {
        match &event {
            PipelineEvent::MotionTriggered { score, .. } => {
                info!("Motion triggered with score {:.3}", score);
            }
            PipelineEvent::CaptureCompleted { filename, .. } => {
                info!("Event captured: {}", filename);
            }
            PipelineEvent::TriggerSuppressed { reason, .. } => {
                debug!("Trigger suppressed: {:?}", reason);
            }
            PipelineEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            other => trace!("Publishing: {}", other.description()),
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &PipelineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<PipelineEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter.
    ///
    /// Lagging is logged and skipped over; only a closed bus ends the stream.
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<PipelineEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = PipelineEvent::MotionTriggered {
            score: 0.42,
            timestamp: SystemTime::now(),
        };

        let subscriber_count = event_bus.publish(event).await.unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            PipelineEvent::MotionTriggered { score, .. } => assert_eq!(score, 0.42),
            other => panic!("Unexpected event type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let event_bus = EventBus::new(10);
        let delivered = event_bus
            .publish(PipelineEvent::MotionCleared {
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["capture_completed"]),
            "test",
        );

        event_bus
            .publish(PipelineEvent::MotionCleared {
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();
        event_bus
            .publish(PipelineEvent::CaptureCompleted {
                event_id: "abc".to_string(),
                filename: "motion-x.webm".to_string(),
                segment_count: 3,
            })
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "capture_completed");
        assert!(receiver.try_recv().unwrap().is_none());
    }
}
