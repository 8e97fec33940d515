mod motion;
mod orchestrator;
mod trigger;

pub use motion::{frame_difference, MotionSample, MotionScorer, PIXEL_DIFF_THRESHOLD};
pub use orchestrator::{
    DetectionLoop, DetectionLoopBuilder, DetectionMetrics, MotionSignal,
};
pub use trigger::{TriggerOutput, TriggerState, TriggerStateMachine};
