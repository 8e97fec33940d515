use crate::error::{MotionCamError, Result};
use image::{Rgba, RgbaImage};

/// Analysis resolution every sampled frame is resampled to
pub const ANALYSIS_WIDTH: u32 = 320;
pub const ANALYSIS_HEIGHT: u32 = 180;
/// RGBA
pub const ANALYSIS_CHANNELS: usize = 4;

/// Fixed-size analysis frame (320x180 RGBA).
///
/// Frames carry no metadata. The sampler fills one, the scorer keeps it as
/// `previous` for a tick and then hands the buffer back for reuse.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbaImage,
}

impl Frame {
    /// All-black, fully opaque frame
    pub fn blank() -> Self {
        Self::filled([0, 0, 0, 255])
    }

    /// Frame with every pixel set to `rgba`
    pub fn filled(rgba: [u8; 4]) -> Self {
        Self {
            image: RgbaImage::from_pixel(ANALYSIS_WIDTH, ANALYSIS_HEIGHT, Rgba(rgba)),
        }
    }

    /// Wrap an image that is already at analysis resolution
    pub fn from_image(image: RgbaImage) -> Result<Self> {
        if image.dimensions() != (ANALYSIS_WIDTH, ANALYSIS_HEIGHT) {
            return Err(MotionCamError::component(
                "frame",
                &format!(
                    "Expected {}x{} analysis frame, got {}x{}",
                    ANALYSIS_WIDTH,
                    ANALYSIS_HEIGHT,
                    image.width(),
                    image.height()
                ),
            ));
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.image.width() as usize * self.image.height() as usize
    }

    /// Raw RGBA bytes, row-major
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Overwrite this frame with a nearest-neighbour resample of `source`.
    ///
    /// Reuses the existing buffer. The mapping is pure integer arithmetic, so a
    /// given source always produces the same frame. An empty source leaves the
    /// frame untouched; callers must not treat that as a new sample.
    pub fn resample_from(&mut self, source: &RgbaImage) {
        let (src_w, src_h) = source.dimensions();
        if src_w == 0 || src_h == 0 {
            return;
        }

        if (src_w, src_h) == self.image.dimensions() {
            self.image.copy_from_slice(source.as_raw());
            return;
        }

        let (dst_w, dst_h) = self.image.dimensions();
        for y in 0..dst_h {
            let sy = (y as u64 * src_h as u64 / dst_h as u64) as u32;
            for x in 0..dst_w {
                let sx = (x as u64 * src_w as u64 / dst_w as u64) as u32;
                self.image.put_pixel(x, y, *source.get_pixel(sx, sy));
            }
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::blank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::blank();
        assert_eq!(frame.width(), ANALYSIS_WIDTH);
        assert_eq!(frame.height(), ANALYSIS_HEIGHT);
        assert_eq!(frame.pixel_count(), 320 * 180);
        assert_eq!(frame.as_raw().len(), 320 * 180 * ANALYSIS_CHANNELS);
    }

    #[test]
    fn test_from_image_rejects_wrong_size() {
        assert!(Frame::from_image(RgbaImage::new(640, 480)).is_err());
        assert!(Frame::from_image(RgbaImage::new(ANALYSIS_WIDTH, ANALYSIS_HEIGHT)).is_ok());
    }

    #[test]
    fn test_resample_downscale_is_deterministic() {
        // Left half red, right half blue
        let source = RgbaImage::from_fn(1280, 720, |x, _| {
            if x < 640 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });

        let mut a = Frame::blank();
        let mut b = Frame::filled([9, 9, 9, 9]);
        a.resample_from(&source);
        b.resample_from(&source);

        assert_eq!(a, b);
        assert_eq!(a.image().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(a.image().get_pixel(159, 90), &Rgba([255, 0, 0, 255]));
        assert_eq!(a.image().get_pixel(160, 90), &Rgba([0, 0, 255, 255]));
        assert_eq!(a.image().get_pixel(319, 179), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_resample_same_size_copies() {
        let source = RgbaImage::from_pixel(ANALYSIS_WIDTH, ANALYSIS_HEIGHT, Rgba([1, 2, 3, 4]));
        let mut frame = Frame::blank();
        frame.resample_from(&source);
        assert_eq!(frame.as_raw(), source.as_raw());
    }
}
