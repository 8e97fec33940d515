use crate::frame::{Frame, ANALYSIS_CHANNELS};
use tracing::{debug, trace};

/// Per-pixel intensity change (0-255 scale) above which a pixel counts as changed
pub const PIXEL_DIFF_THRESHOLD: u8 = 30;

/// Channel compared between frames (red)
const SCORED_CHANNEL: usize = 0;

/// Fraction of changed pixels between two consecutive frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// In `[0, 1]`
    pub score: f64,
}

/// Fraction of pixels whose red channel moved by more than [`PIXEL_DIFF_THRESHOLD`].
///
/// Frames always share the analysis resolution, so the result is in `[0, 1]`.
pub fn frame_difference(current: &Frame, previous: &Frame) -> f64 {
    let pixels = current.pixel_count();
    if pixels == 0 {
        return 0.0;
    }

    let changed = current
        .as_raw()
        .chunks_exact(ANALYSIS_CHANNELS)
        .zip(previous.as_raw().chunks_exact(ANALYSIS_CHANNELS))
        .filter(|(c, p)| c[SCORED_CHANNEL].abs_diff(p[SCORED_CHANNEL]) > PIXEL_DIFF_THRESHOLD)
        .count();

    changed as f64 / pixels as f64
}

/// Scores each sampled frame against the one before it
#[derive(Debug, Default)]
pub struct MotionScorer {
    previous: Option<Frame>,
    frames_scored: u64,
    last_score: f64,
}

impl MotionScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `current` against the previous frame, then keep `current` as the new previous.
    ///
    /// Returns the sample (none for the very first frame) and the retired
    /// previous buffer so the caller can reuse it.
    pub fn score(&mut self, current: Frame) -> (Option<MotionSample>, Option<Frame>) {
        let sample = self.previous.as_ref().map(|previous| MotionSample {
            score: frame_difference(&current, previous),
        });

        match sample {
            Some(s) => {
                self.frames_scored += 1;
                self.last_score = s.score;
                trace!("Frame pair scored {:.4}", s.score);
            }
            None => debug!("First frame after start, no score yet"),
        }

        let retired = self.previous.replace(current);
        (sample, retired)
    }

    /// Drop the previous frame and zero the score
    pub fn reset(&mut self) {
        self.previous = None;
        self.last_score = 0.0;
        self.frames_scored = 0;
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    pub fn last_score(&self) -> f64 {
        self.last_score
    }

    pub fn frames_scored(&self) -> u64 {
        self.frames_scored
    }
}
