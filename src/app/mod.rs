mod orchestrator;
mod runtime;
mod shutdown;
mod state;
mod types;


pub use orchestrator::MotionCamOrchestrator;
pub use types::{Component, ComponentState, ShutdownHandle, ShutdownReason};
