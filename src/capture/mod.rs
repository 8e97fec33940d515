mod assembler;
mod event;
mod sink;
#[cfg(test)]
mod tests;

pub use assembler::{EventAssembler, EventAssemblerBuilder};
pub use event::{event_filename, EventMetadata, MotionEvent};
pub use sink::{ChannelSink, DirectorySink, EventLog, EventSink};
