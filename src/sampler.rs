use crate::error::Result;
use crate::frame::Frame;
use crate::source::VideoSource;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Pulls the latest source image once per tick and resamples it to analysis resolution.
///
/// Holds one spare buffer: the frame the scorer retires each tick comes back
/// through [`FrameSampler::recycle`] and becomes the next destination.
pub struct FrameSampler {
    source: Arc<dyn VideoSource>,
    last_frame_id: u64,
    spare: Option<Frame>,
    frames_sampled: u64,
    ticks_skipped: u64,
}

impl FrameSampler {
    pub fn new(source: Arc<dyn VideoSource>) -> Self {
        Self {
            source,
            last_frame_id: 0,
            spare: None,
            frames_sampled: 0,
            ticks_skipped: 0,
        }
    }

    /// Sample the source. `Ok(None)` means no new frame was ready this tick.
    pub fn sample(&mut self) -> Result<Option<Frame>> {
        let source_frame = match self.source.latest_frame()? {
            Some(frame) => frame,
            None => {
                self.ticks_skipped += 1;
                trace!("Source has no frame yet, skipping tick");
                return Ok(None);
            }
        };

        if source_frame.id < self.last_frame_id {
            warn!(
                "Detected frame ID reset ({} -> {}), resetting sampling cursor",
                self.last_frame_id, source_frame.id
            );
            self.last_frame_id = 0;
        }

        if source_frame.id == self.last_frame_id {
            self.ticks_skipped += 1;
            trace!("Frame {} already sampled, skipping tick", source_frame.id);
            return Ok(None);
        }

        self.last_frame_id = source_frame.id;

        // Nothing to resample; the spare buffer still holds an old frame
        if source_frame.image.width() == 0 || source_frame.image.height() == 0 {
            self.ticks_skipped += 1;
            debug!("Source frame {} is empty, skipping tick", source_frame.id);
            return Ok(None);
        }

        let mut frame = self.spare.take().unwrap_or_default();
        frame.resample_from(&source_frame.image);
        self.frames_sampled += 1;

        trace!(
            "Sampled source frame {} ({}x{})",
            source_frame.id,
            source_frame.image.width(),
            source_frame.image.height()
        );
        Ok(Some(frame))
    }

    /// Return a retired frame so its buffer is reused on the next sample
    pub fn recycle(&mut self, frame: Frame) {
        self.spare = Some(frame);
    }

    /// Forget the sampling cursor; the next available frame counts as new
    pub fn reset(&mut self) {
        self.last_frame_id = 0;
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped
    }

    pub fn source(&self) -> &Arc<dyn VideoSource> {
        &self.source
    }
}
