use super::{SourceFrame, VideoSource};
use crate::error::{Result, SourceError};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const BACKGROUND: Rgba<u8> = Rgba([64, 64, 64, 255]);

/// Interval of simulated activity, measured from `open`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionWindow {
    /// Activity between two offsets
    Between { start: Duration, end: Duration },
    /// Activity for `lasting` at the start of every `every` period
    Periodic { every: Duration, lasting: Duration },
}

impl MotionWindow {
    fn contains(&self, t: Duration) -> bool {
        match *self {
            MotionWindow::Between { start, end } => t >= start && t < end,
            MotionWindow::Periodic { every, lasting } => {
                if every.is_zero() {
                    return false;
                }
                let phase = t.as_nanos() % every.as_nanos();
                phase < lasting.as_nanos()
            }
        }
    }
}

/// Generated test pattern source.
///
/// Frames are a flat grey field; inside a motion window every frame is filled
/// with fresh deterministic noise, so consecutive frames differ almost
/// everywhere. Time is read from the tokio clock, so paused-time tests can
/// drive it precisely.
pub struct SyntheticSource {
    name: String,
    resolution: (u32, u32),
    fps: u32,
    windows: Vec<MotionWindow>,
    available: bool,
    opened_at: Mutex<Option<Instant>>,
    cached: Mutex<Option<SourceFrame>>,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, resolution: (u32, u32), fps: u32) -> Self {
        Self {
            name: name.into(),
            resolution,
            fps: fps.max(1),
            windows: Vec::new(),
            available: true,
            opened_at: Mutex::new(None),
            cached: Mutex::new(None),
        }
    }

    /// A source whose device cannot be opened
    pub fn disconnected(name: impl Into<String>) -> Self {
        let mut source = Self::new(name, (320, 180), 30);
        source.available = false;
        source
    }

    pub fn with_motion(mut self, window: MotionWindow) -> Self {
        self.windows.push(window);
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.lock().is_some()
    }

    fn frame_index(&self, elapsed: Duration) -> u64 {
        (elapsed.as_millis() as u64 * self.fps as u64) / 1000
    }

    fn render(&self, index: u64) -> RgbaImage {
        let frame_time = Duration::from_millis(index * 1000 / self.fps as u64);
        let (width, height) = self.resolution;

        if !self.windows.iter().any(|w| w.contains(frame_time)) {
            return RgbaImage::from_pixel(width, height, BACKGROUND);
        }

        RgbaImage::from_fn(width, height, |x, y| {
            let seed = index
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(((y as u64) << 32) | x as u64);
            let v = splitmix64(seed);
            Rgba([v as u8, (v >> 8) as u8, (v >> 16) as u8, 255])
        })
    }
}

#[async_trait]
impl VideoSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        if !self.available {
            return Err(SourceError::Unavailable {
                device: self.name.clone(),
                details: "synthetic device is disconnected".to_string(),
            }
            .into());
        }

        let mut opened_at = self.opened_at.lock();
        if opened_at.is_none() {
            *opened_at = Some(Instant::now());
            info!(
                "Opened synthetic source '{}' ({}x{} @ {}fps)",
                self.name, self.resolution.0, self.resolution.1, self.fps
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.opened_at.lock() = None;
        *self.cached.lock() = None;
        debug!("Closed synthetic source '{}'", self.name);
        Ok(())
    }

    fn latest_frame(&self) -> Result<Option<SourceFrame>> {
        let opened_at = match *self.opened_at.lock() {
            Some(at) => at,
            None => {
                return Err(SourceError::Read {
                    details: format!("source '{}' is not open", self.name),
                }
                .into())
            }
        };

        let index = self.frame_index(opened_at.elapsed());
        let id = index + 1;

        let mut cached = self.cached.lock();
        if let Some(frame) = cached.as_ref() {
            if frame.id == id {
                return Ok(Some(frame.clone()));
            }
        }

        let frame = SourceFrame::new(id, self.render(index));
        *cached = Some(frame.clone());
        Ok(Some(frame))
    }
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_frames_advance_with_clock() {
        let source = SyntheticSource::new("test", (64, 36), 10);
        source.open().await.unwrap();

        let first = source.latest_frame().unwrap().unwrap();
        let again = source.latest_frame().unwrap().unwrap();
        assert_eq!(first.id, again.id);

        tokio::time::advance(Duration::from_millis(100)).await;
        let next = source.latest_frame().unwrap().unwrap();
        assert_eq!(next.id, first.id + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_window_changes_pixels() {
        let source = SyntheticSource::new("test", (64, 36), 10).with_motion(MotionWindow::Between {
            start: Duration::from_secs(1),
            end: Duration::from_secs(2),
        });
        source.open().await.unwrap();

        let still = source.latest_frame().unwrap().unwrap();
        assert!(still.image.pixels().all(|p| *p == BACKGROUND));

        tokio::time::advance(Duration::from_millis(1500)).await;
        let moving = source.latest_frame().unwrap().unwrap();
        assert!(moving.image.pixels().any(|p| *p != BACKGROUND));
    }

    #[tokio::test]
    async fn test_disconnected_source_fails_to_open() {
        let source = SyntheticSource::disconnected("gone");
        let err = source.open().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::MotionCamError::Source(SourceError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_unopened_source_reports_error() {
        let source = SyntheticSource::new("test", (64, 36), 10);
        assert!(source.latest_frame().is_err());
    }

    #[test]
    fn test_periodic_window() {
        let window = MotionWindow::Periodic {
            every: Duration::from_secs(10),
            lasting: Duration::from_secs(2),
        };
        assert!(window.contains(Duration::from_secs(0)));
        assert!(window.contains(Duration::from_millis(11_500)));
        assert!(!window.contains(Duration::from_secs(5)));
    }
}
