//! Camera drivers.
//!
//! - `static`: one in-memory frame, repeated (test pattern or fixture)
//! - `dir:<path>`: JPEG files from a local directory, cycled in name order
//! - `http(s)://`: network MJPEG/JPEG camera (feature: camera-mjpeg)
//!
//! Every driver hands out one frame at a time through `FrameSource`.

pub mod directory;
#[cfg(feature = "camera-mjpeg")]
pub mod mjpeg;
pub mod static_image;

pub use directory::DirectoryDriver;
#[cfg(feature = "camera-mjpeg")]
pub use mjpeg::MjpegDriver;
pub use static_image::StaticDriver;

use std::io::Cursor;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::config::CameraConfig;
use crate::frame::{CameraDriver, Frame, PixelFormat};

/// Build the driver named by `camera.source`.
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn CameraDriver>> {
    let source = config.source.trim();
    if source == "static" {
        return Ok(Box::new(
            StaticDriver::test_pattern(config.width, config.height)?
                .with_target_fps(config.target_fps),
        ));
    }
    if let Some(path) = source.strip_prefix("dir:") {
        return Ok(Box::new(
            DirectoryDriver::open(path)?.with_target_fps(config.target_fps),
        ));
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        #[cfg(feature = "camera-mjpeg")]
        {
            return Ok(Box::new(MjpegDriver::connect(source)?));
        }
        #[cfg(not(feature = "camera-mjpeg"))]
        {
            return Err(anyhow!(
                "network camera '{}' requires the camera-mjpeg feature",
                source
            ));
        }
    }
    Err(anyhow!(
        "unsupported camera source '{}'; expected static, dir:<path> or http(s)://",
        source
    ))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// Holds a local source to at most `target_fps` captures per second, the way
/// a sensor delivers frames. Zero leaves captures unpaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePacer {
    interval: Duration,
    last: Option<Instant>,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval: frame_interval(target_fps),
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until one interval has passed since the previous capture.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Width and height from a JPEG header without decoding pixels.
pub fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    image::ImageReader::with_format(Cursor::new(bytes), image::ImageFormat::Jpeg)
        .into_dimensions()
        .context("read jpeg header")
}

/// Wrap JPEG bytes in a frame carrying their header dimensions.
pub fn jpeg_frame(bytes: Vec<u8>) -> Result<Frame> {
    let (width, height) = jpeg_dimensions(&bytes)?;
    Ok(Frame::new(bytes, width, height, PixelFormat::Jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(source: &str) -> CameraConfig {
        CameraConfig {
            source: source.to_string(),
            width: 32,
            height: 24,
            target_fps: 0,
        }
    }

    #[test]
    fn static_source_opens_test_pattern() {
        let mut driver = open_camera(&config("static")).unwrap();
        assert_eq!(driver.name(), "static");
        let frame = driver.capture().unwrap();
        assert_eq!(frame.format, PixelFormat::Jpeg);
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(jpeg_dimensions(frame.bytes()).unwrap(), (32, 24));
    }

    #[test]
    fn unknown_source_is_rejected() {
        let err = match open_camera(&config("v4l2:/dev/video0")) {
            Err(err) => err,
            Ok(_) => panic!("unknown source accepted"),
        };
        assert!(err.to_string().contains("unsupported camera source"));
    }

    #[test]
    fn pacer_spaces_captures_by_interval() {
        assert_eq!(FramePacer::new(0).interval(), Duration::ZERO);
        assert_eq!(FramePacer::new(10).interval(), Duration::from_millis(100));
        assert_eq!(FramePacer::new(5000).interval(), Duration::from_millis(1));

        let mut pacer = FramePacer::new(25);
        let started = Instant::now();
        for _ in 0..3 {
            pacer.wait();
        }
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn configured_rate_paces_static_source() {
        let mut cfg = config("static");
        cfg.target_fps = 20;
        let mut driver = open_camera(&cfg).unwrap();
        let started = Instant::now();
        driver.capture().unwrap();
        driver.capture().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn garbage_has_no_dimensions() {
        assert!(jpeg_dimensions(b"not a jpeg").is_err());
    }
}
