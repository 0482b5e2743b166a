//! Captured frames and the single-buffer frame source.
//!
//! - `Frame`: one captured image (compressed or raw bytes plus geometry).
//! - `CameraDriver`: the capture capability a frame source wraps.
//! - `FrameSource`: acquire/release with at most one frame outstanding.
//! - `FrameGuard`: RAII handle for the outstanding frame. Dropping it releases
//!   the buffer back to the driver.
//!
//! The camera driver owns a single frame buffer. Holding a `FrameGuard` borrows
//! the source mutably, so a second `acquire()` while a frame is outstanding
//! does not compile. If a guard is leaked (`mem::forget`) the source still
//! refuses to hand out another frame and reports `FrameError::AlreadyAcquired`.

use std::fmt;
use std::ops::Deref;

use anyhow::Result;

use crate::error::FrameError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// JPEG-compressed frame.
    Jpeg,
    /// Packed 8-bit R, G, B.
    Rgb888,
    /// Packed 5-6-5, big-endian byte order as emitted by the sensor.
    Rgb565,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb888 => "rgb888",
            PixelFormat::Rgb565 => "rgb565",
        }
    }

    /// Bytes per pixel for raw formats.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Rgb565 => Some(2),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured image.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new(), 0, 0, PixelFormat::Jpeg)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Camera capture capability.
///
/// `capture` blocks until a frame is ready or the driver fails. Drivers are
/// single-buffered: the frame returned by `capture` must come back through
/// `recycle` before the next `capture`.
pub trait CameraDriver: Send {
    /// Driver identifier.
    fn name(&self) -> &'static str;

    /// Block until the next frame is ready.
    fn capture(&mut self) -> Result<Frame>;

    /// Return the frame buffer to the driver.
    fn recycle(&mut self, frame: Frame) {
        drop(frame);
    }
}

/// Acquire/release wrapper around a single-buffered camera driver.
pub struct FrameSource {
    driver: Box<dyn CameraDriver>,
    outstanding: bool,
    acquired: u64,
}

impl FrameSource {
    pub fn new<D: CameraDriver + 'static>(driver: D) -> Self {
        Self::from_boxed(Box::new(driver))
    }

    pub fn from_boxed(driver: Box<dyn CameraDriver>) -> Self {
        Self {
            driver,
            outstanding: false,
            acquired: 0,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Frames successfully acquired so far.
    pub fn acquired(&self) -> u64 {
        self.acquired
    }

    /// Block until a frame is ready. Capture failures are reported, not retried.
    pub fn acquire(&mut self) -> Result<FrameGuard<'_>, FrameError> {
        if self.outstanding {
            log::error!(
                "camera '{}': acquire called with a frame still outstanding",
                self.driver.name()
            );
            return Err(FrameError::AlreadyAcquired);
        }
        let frame = self.driver.capture().map_err(FrameError::Capture)?;
        self.outstanding = true;
        self.acquired += 1;
        Ok(FrameGuard {
            source: self,
            frame,
        })
    }

    fn release_frame(&mut self, frame: Frame) {
        self.driver.recycle(frame);
        self.outstanding = false;
    }
}

/// The outstanding frame. Released on drop or via `release()`.
pub struct FrameGuard<'a> {
    source: &'a mut FrameSource,
    frame: Frame,
}

impl FrameGuard<'_> {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Return the buffer to the driver.
    pub fn release(self) {}
}

impl Deref for FrameGuard<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let frame = std::mem::replace(&mut self.frame, Frame::empty());
        self.source.release_frame(frame);
    }
}
