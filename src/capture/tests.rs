use super::*;
use crate::encoder::{EncoderFactory, EncoderRole, SyntheticEncoderFactory};
use crate::events::{EventBus, EventFilter, EventReceiver, PipelineEvent, SuppressReason};
use crate::recorder::ContinuousRecorder;
use crate::ring_buffer::SegmentRingBuffer;
use crate::settings::{MotionSettings, SettingsStore, SettingsUpdate};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const SEGMENT_BYTES: usize = 256;
const STREAM_HEADER: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

struct Harness {
    store: SettingsStore,
    event_bus: Arc<EventBus>,
    factory: Arc<SyntheticEncoderFactory>,
    recorder: ContinuousRecorder,
    assembler: EventAssembler,
    events: mpsc::Receiver<MotionEvent>,
}

fn test_settings() -> MotionSettings {
    MotionSettings {
        sensitivity: 0.05,
        min_duration_frames: 3,
        cooldown_seconds: 5,
        pre_roll_seconds: 10,
        post_roll_seconds: 10,
    }
}

async fn harness(factory: SyntheticEncoderFactory) -> Harness {
    let store = SettingsStore::new(test_settings()).unwrap();
    let event_bus = Arc::new(EventBus::new(64));
    let factory = Arc::new(factory);
    let ring_buffer = Arc::new(SegmentRingBuffer::new(10));

    let recorder = ContinuousRecorder::new(
        Arc::clone(&factory) as Arc<dyn EncoderFactory>,
        Arc::clone(&ring_buffer),
        store.subscribe(),
        Arc::clone(&event_bus),
    );

    let (sink, events) = ChannelSink::new(8);
    let mut assembler = EventAssemblerBuilder::new()
        .camera_name("GoPro")
        .encoder_factory(Arc::clone(&factory) as Arc<dyn EncoderFactory>)
        .ring_buffer(ring_buffer)
        .settings(store.subscribe())
        .recording_state(recorder.recording_state())
        .event_bus(Arc::clone(&event_bus))
        .sink(Arc::new(sink))
        .build()
        .unwrap();
    assembler.start().await.unwrap();

    Harness {
        store,
        event_bus,
        factory,
        recorder,
        assembler,
        events,
    }
}

async fn trigger(event_bus: &EventBus, score: f64) {
    event_bus
        .publish(PipelineEvent::MotionTriggered {
            score,
            timestamp: SystemTime::now(),
        })
        .await
        .unwrap();
}

fn suppressed(event_bus: &EventBus) -> EventReceiver {
    event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["trigger_suppressed"]), "test")
}

async fn next_event(events: &mut mpsc::Receiver<MotionEvent>) -> MotionEvent {
    timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("event within a minute")
        .expect("sink channel open")
}

#[tokio::test(start_paused = true)]
async fn test_full_buffer_event_has_pre_plus_post_segments() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(12_500)).await;

    trigger(&h.event_bus, 0.42).await;
    let event = next_event(&mut h.events).await;

    assert_eq!(event.pre_roll_segments, 10);
    assert_eq!(event.post_roll_segments, 10);
    assert_eq!(event.segment_count(), 20);
    assert_eq!(event.duration_seconds, 20);
    // Segment 0 was evicted, so its header is written ahead of the pre-roll
    assert_eq!(event.payload.len(), STREAM_HEADER.len() + 20 * SEGMENT_BYTES);
    assert_eq!(event.motion_score, 0.42);
    assert_eq!(event.camera_name, "GoPro");

    // Pre-roll first, then the post-roll stream with its own header
    assert!(event.payload.starts_with(&STREAM_HEADER));
    assert_eq!(event.payload[4], b'C');
    let post_start = STREAM_HEADER.len() + 10 * SEGMENT_BYTES;
    assert_eq!(&event.payload[post_start..post_start + 4], &STREAM_HEADER);
    assert_eq!(event.payload[post_start + 4], b'P');

    assert!(event.filename.starts_with("motion-"));
    assert!(!event.filename.contains(':'));
    assert_eq!(event.filename.matches('.').count(), 1);
    assert!(event.timestamp >= event.triggered_at);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.assembler.events_captured(), 1);
    assert!(!h.assembler.capture_in_progress());

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_partial_buffer_keeps_declared_duration() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(3_500)).await;

    trigger(&h.event_bus, 0.2).await;
    let event = next_event(&mut h.events).await;

    assert_eq!(event.pre_roll_segments, 3);
    assert_eq!(event.post_roll_segments, 10);
    assert_eq!(event.duration_seconds, 20);

    // Segment 0 is still buffered and opens the stream itself
    assert_eq!(event.payload.len(), 13 * SEGMENT_BYTES);
    assert!(event.payload.starts_with(&STREAM_HEADER));
    assert_eq!(event.payload[4], b'C');

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wrapped_buffer_payload_starts_with_stream_header() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(25_500)).await;

    trigger(&h.event_bus, 0.3).await;
    let event = next_event(&mut h.events).await;
    let payload = &event.payload;

    assert!(payload.starts_with(&STREAM_HEADER));
    // Oldest buffered segment follows the restored header: role, then sequence
    assert_eq!(payload[4], b'C');
    assert_eq!(&payload[5..13], &15u64.to_be_bytes());

    // One header per encoder run: continuous and post-roll
    let headers = payload
        .windows(STREAM_HEADER.len())
        .filter(|w| *w == STREAM_HEADER)
        .count();
    assert_eq!(headers, 2);

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trigger_during_capture_is_ignored() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    let mut suppressed = suppressed(&h.event_bus);
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(12_500)).await;

    trigger(&h.event_bus, 0.3).await;
    sleep(Duration::from_secs(2)).await;
    assert!(h.assembler.capture_in_progress());
    trigger(&h.event_bus, 0.9).await;

    let event = next_event(&mut h.events).await;
    assert_eq!(event.motion_score, 0.3);

    match suppressed.try_recv().unwrap() {
        Some(PipelineEvent::TriggerSuppressed { reason, .. }) => {
            assert_eq!(reason, SuppressReason::CaptureInProgress);
        }
        other => panic!("expected suppressed trigger, got {:?}", other),
    }

    // Continuous encoder plus a single post-roll encoder
    assert_eq!(h.factory.encoders_created(), 2);
    sleep(Duration::from_secs(15)).await;
    assert!(h.events.try_recv().is_err());

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_after_completed_event() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    let mut suppressed = suppressed(&h.event_bus);
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(12_500)).await;

    trigger(&h.event_bus, 0.3).await;
    next_event(&mut h.events).await;

    sleep(Duration::from_secs(2)).await;
    trigger(&h.event_bus, 0.3).await;
    sleep(Duration::from_millis(10)).await;

    match suppressed.try_recv().unwrap() {
        Some(PipelineEvent::TriggerSuppressed {
            reason: SuppressReason::Cooldown { remaining_ms },
            ..
        }) => {
            assert!(remaining_ms > 0 && remaining_ms <= 3_000);
        }
        other => panic!("expected cooldown suppression, got {:?}", other),
    }

    // Past the cooldown the next edge starts a new capture
    sleep(Duration::from_secs(4)).await;
    trigger(&h.event_bus, 0.5).await;
    let second = next_event(&mut h.events).await;
    assert_eq!(second.motion_score, 0.5);
    assert_eq!(h.assembler.events_captured(), 2);

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trigger_without_recording_is_suppressed() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    let mut suppressed = suppressed(&h.event_bus);

    trigger(&h.event_bus, 0.3).await;
    sleep(Duration::from_millis(10)).await;

    match suppressed.try_recv().unwrap() {
        Some(PipelineEvent::TriggerSuppressed { reason, .. }) => {
            assert_eq!(reason, SuppressReason::NotRecording);
        }
        other => panic!("expected suppressed trigger, got {:?}", other),
    }
    assert!(h.events.try_recv().is_err());

    h.assembler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_post_roll_encoder_failure_releases_capture() {
    let mut h = harness(
        SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES).fail_on(EncoderRole::PostRoll),
    )
    .await;
    let mut errors =
        h.event_bus
            .subscribe_filtered(EventFilter::EventTypes(vec!["system_error"]), "test");
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(5_500)).await;

    trigger(&h.event_bus, 0.3).await;
    sleep(Duration::from_millis(10)).await;

    assert!(errors.try_recv().unwrap().is_some());
    assert!(!h.assembler.capture_in_progress());
    assert_eq!(h.assembler.events_captured(), 0);
    assert!(h.events.try_recv().is_err());

    // Recording itself keeps going
    assert!(h.recorder.is_recording());

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_settings_change_mid_capture_does_not_alter_event() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(12_500)).await;

    trigger(&h.event_bus, 0.3).await;
    sleep(Duration::from_secs(1)).await;
    h.store
        .update(SettingsUpdate {
            post_roll_seconds: Some(30),
            ..Default::default()
        })
        .unwrap();

    let event = next_event(&mut h.events).await;
    assert_eq!(event.duration_seconds, 20);
    assert_eq!(event.post_roll_segments, 10);

    h.assembler.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_capture() {
    let mut h = harness(SyntheticEncoderFactory::with_segment_bytes(SEGMENT_BYTES)).await;
    h.recorder.start().await.unwrap();
    sleep(Duration::from_millis(10_500)).await;

    trigger(&h.event_bus, 0.3).await;
    sleep(Duration::from_secs(1)).await;

    h.assembler.stop().await.unwrap();
    assert!(!h.assembler.capture_in_progress());
    assert!(h.events.try_recv().is_ok());

    h.recorder.stop().await.unwrap();
}
