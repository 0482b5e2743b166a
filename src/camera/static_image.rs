use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::FramePacer;
use crate::frame::{CameraDriver, Frame, PixelFormat};

/// Repeats one frame forever, or until `limit` captures have been served.
pub struct StaticDriver {
    frame: Frame,
    limit: Option<u64>,
    captured: u64,
    pacer: FramePacer,
}

impl StaticDriver {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            limit: None,
            captured: 0,
            pacer: FramePacer::default(),
        }
    }

    /// Synthetic JPEG: horizontal red ramp, vertical green ramp, constant blue.
    pub fn test_pattern(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("test pattern needs non-zero dimensions"));
        }
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                rgb.push((x * 255 / width) as u8);
                rgb.push((y * 255 / height) as u8);
                rgb.push(96);
            }
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90).encode(
            &rgb,
            width,
            height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(Self::new(Frame::new(jpeg, width, height, PixelFormat::Jpeg)))
    }

    /// Fail every capture after the first `limit`.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Serve at most `target_fps` frames per second; 0 is unpaced.
    pub fn with_target_fps(mut self, target_fps: u32) -> Self {
        self.pacer = FramePacer::new(target_fps);
        self
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl CameraDriver for StaticDriver {
    fn name(&self) -> &'static str {
        "static"
    }

    fn capture(&mut self) -> Result<Frame> {
        if let Some(limit) = self.limit {
            if self.captured >= limit {
                return Err(anyhow!("static camera exhausted after {} frames", limit));
            }
        }
        self.pacer.wait();
        self.captured += 1;
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_ends_capture() {
        let frame = Frame::new(vec![0; 3], 1, 1, PixelFormat::Rgb888);
        let mut driver = StaticDriver::new(frame).with_limit(2);
        assert!(driver.capture().is_ok());
        assert!(driver.capture().is_ok());
        assert!(driver.capture().is_err());
    }

    #[test]
    fn zero_size_pattern_is_rejected() {
        assert!(StaticDriver::test_pattern(0, 10).is_err());
    }
}
