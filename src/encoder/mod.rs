mod synthetic;

#[cfg(all(feature = "camera", target_os = "linux"))]
mod webm;

pub use synthetic::{SyntheticEncoder, SyntheticEncoderFactory};

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use webm::{WebmEncoder, WebmEncoderFactory};

use crate::error::Result;
use crate::segment::Segment;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// What an encoder instance is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EncoderRole {
    /// Long-running encoder feeding the pre-roll ring buffer
    Continuous,
    /// Short-lived encoder capturing video after a trigger
    PostRoll,
}

impl fmt::Display for EncoderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderRole::Continuous => write!(f, "continuous"),
            EncoderRole::PostRoll => write!(f, "post-roll"),
        }
    }
}

/// Compresses the live video into one-second segments.
///
/// Segments are delivered on the channel passed to `start`, in order, on the
/// encoder's own schedule. `stop` flushes the pending partial segment before
/// returning; the sender is dropped once the encoder has stopped.
#[async_trait]
pub trait SegmentEncoder: Send {
    fn role(&self) -> EncoderRole;

    async fn start(&mut self, segments: mpsc::UnboundedSender<Segment>) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Creates encoders bound to the shared video source
pub trait EncoderFactory: Send + Sync {
    fn create(&self, role: EncoderRole) -> Result<Box<dyn SegmentEncoder>>;
}
