pub mod analyzer;
pub mod app;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod recorder;
pub mod ring_buffer;
pub mod sampler;
pub mod segment;
pub mod settings;
pub mod source;
pub mod status;

pub use analyzer::{
    DetectionLoop, DetectionLoopBuilder, MotionScorer, MotionSignal, TriggerState,
    TriggerStateMachine,
};
pub use app::{Component, ComponentState, MotionCamOrchestrator, ShutdownHandle, ShutdownReason};
pub use capture::{
    ChannelSink, DirectorySink, EventAssembler, EventAssemblerBuilder, EventLog, EventMetadata,
    EventSink, MotionEvent,
};
pub use config::MotionCamConfig;
pub use encoder::{EncoderFactory, EncoderRole, SegmentEncoder};
pub use error::{MotionCamError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, PipelineEvent, SuppressReason};
pub use frame::Frame;
pub use recorder::ContinuousRecorder;
pub use ring_buffer::{PreRoll, RingBufferBuilder, SegmentRingBuffer};
pub use sampler::FrameSampler;
pub use segment::Segment;
pub use settings::{MotionSettings, SettingsStore, SettingsUpdate};
pub use source::{SourceFrame, VideoSource};
pub use status::PipelineStatus;
