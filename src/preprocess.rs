//! Frame preprocessing: decode → nearest-neighbor resize → per-channel normalize.
//!
//! The preprocessor owns two scratch buffers reused across frames:
//! - `PixelBuffer`: decoded RGB888 at the source resolution
//! - `ModelInputBuffer`: RGB888 at the model's input resolution
//!
//! Both the sampling grid and the brightness/contrast adjustment are part of
//! the model contract and must be reproduced bit-for-bit:
//!
//! - destination `(x, y)` samples source `(floor(x * src_w / W), floor(y * src_h / H))`
//! - each channel becomes `clamp(round(v * 1.1 + 10), 0, 255)`

use std::borrow::Cow;
use std::ops::Deref;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

use crate::error::{PreprocessError, StartupError};
use crate::frame::{Frame, PixelFormat};
use crate::model::TensorInfo;

pub const CHANNELS: usize = 3;
pub const CONTRAST_GAIN: f32 = 1.1;
pub const BRIGHTNESS_OFFSET: f32 = 10.0;
/// JPEG quality used when a raw frame has to be compressed for streaming.
pub const STREAM_JPEG_QUALITY: u8 = 80;

/// Normalize one channel value.
pub fn normalize_channel(v: u8) -> u8 {
    (v as f32 * CONTRAST_GAIN + BRIGHTNESS_OFFSET)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Source coordinate sampled for destination coordinate `dst`.
pub fn source_coord(dst: usize, src_len: usize, dst_len: usize) -> usize {
    dst * src_len / dst_len
}

fn normalize_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    for (v, out) in table.iter_mut().enumerate() {
        *out = normalize_channel(v as u8);
    }
    table
}

/// Decoded RGB888 scratch buffer.
#[derive(Debug, Default)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn fill(&mut self, width: u32, height: u32, fill: impl FnOnce(&mut Vec<u8>)) {
        self.data.clear();
        fill(&mut self.data);
        self.width = width;
        self.height = height;
    }
}

/// Fixed-size RGB888 buffer shaped exactly like the model input.
#[derive(Debug)]
pub struct ModelInputBuffer {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl ModelInputBuffer {
    /// `None` if the size overflows or the allocation is refused.
    pub fn try_new(width: usize, height: usize) -> Option<Self> {
        let len = width.checked_mul(height)?.checked_mul(CHANNELS)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).ok()?;
        data.resize(len, 0);
        Some(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for ModelInputBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

pub struct Preprocessor {
    pixels: PixelBuffer,
    input: ModelInputBuffer,
    table: [u8; 256],
}

impl Preprocessor {
    pub fn new(width: usize, height: usize) -> Result<Self, StartupError> {
        let input = ModelInputBuffer::try_new(width, height)
            .ok_or_else(|| StartupError::InputShape(vec![1, height, width, CHANNELS]))?;
        Ok(Self {
            pixels: PixelBuffer::default(),
            input,
            table: normalize_table(),
        })
    }

    /// Size the input buffer from an NHWC `[1, H, W, 3]` input tensor.
    pub fn for_input_tensor(info: &TensorInfo) -> Result<Self, StartupError> {
        match info.shape[..] {
            [1, height, width, CHANNELS] if height > 0 && width > 0 => Self::new(width, height),
            _ => Err(StartupError::InputShape(info.shape.clone())),
        }
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn input(&self) -> &ModelInputBuffer {
        &self.input
    }

    /// Decode a frame into the pixel scratch buffer.
    ///
    /// On failure the previous buffer contents are left untouched.
    pub fn decode(&mut self, frame: &Frame) -> Result<(u32, u32), PreprocessError> {
        if frame.format != PixelFormat::Jpeg && (frame.width == 0 || frame.height == 0) {
            return Err(PreprocessError::EmptyFrame);
        }
        match frame.format {
            PixelFormat::Jpeg => {
                let image = image::load_from_memory_with_format(frame.bytes(), ImageFormat::Jpeg)
                    .map_err(|e| PreprocessError::Decode(e.to_string()))?;
                let rgb = image.into_rgb8();
                let (width, height) = rgb.dimensions();
                if width == 0 || height == 0 {
                    return Err(PreprocessError::EmptyFrame);
                }
                self.pixels
                    .fill(width, height, |data| data.extend_from_slice(rgb.as_raw()));
            }
            PixelFormat::Rgb888 => {
                check_raw_len(frame)?;
                self.pixels.fill(frame.width, frame.height, |data| {
                    data.extend_from_slice(frame.bytes())
                });
            }
            PixelFormat::Rgb565 => {
                check_raw_len(frame)?;
                self.pixels.fill(frame.width, frame.height, |data| {
                    rgb565_to_rgb888(frame.bytes(), data)
                });
            }
        }
        Ok((self.pixels.width, self.pixels.height))
    }

    /// Resample the pixel buffer into the model input buffer and normalize.
    pub fn resize_normalize(&mut self, src_w: u32, src_h: u32) -> &ModelInputBuffer {
        resize_nearest(
            &self.pixels.data,
            src_w as usize,
            src_h as usize,
            &mut self.input.data,
            self.input.width,
            self.input.height,
            &self.table,
        );
        &self.input
    }

    /// `decode` followed by `resize_normalize`.
    pub fn process(&mut self, frame: &Frame) -> Result<&ModelInputBuffer, PreprocessError> {
        let (width, height) = self.decode(frame)?;
        Ok(self.resize_normalize(width, height))
    }
}

fn check_raw_len(frame: &Frame) -> Result<(), PreprocessError> {
    let bpp = frame.format.bytes_per_pixel().unwrap_or(CHANNELS);
    let expected = frame.width as usize * frame.height as usize * bpp;
    if frame.len() != expected {
        return Err(PreprocessError::Length {
            expected,
            actual: frame.len(),
            width: frame.width,
            height: frame.height,
            format: frame.format.as_str(),
        });
    }
    Ok(())
}

/// Nearest-neighbor resample of RGB888 `src` into `dst`, mapping every
/// channel through `table`. Samples outside `src` (short buffers) read as 0.
pub fn resize_nearest(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    dst_w: usize,
    dst_h: usize,
    table: &[u8; 256],
) {
    if src_w == 0 || src_h == 0 {
        dst.fill(table[0]);
        return;
    }
    for y in 0..dst_h {
        let sy = source_coord(y, src_h, dst_h);
        for x in 0..dst_w {
            let sx = source_coord(x, src_w, dst_w);
            let s = (sy * src_w + sx) * CHANNELS;
            let d = (y * dst_w + x) * CHANNELS;
            for c in 0..CHANNELS {
                let v = src.get(s + c).copied().unwrap_or(0);
                dst[d + c] = table[v as usize];
            }
        }
    }
}

/// Expand big-endian RGB565 into RGB888 by bit replication.
pub fn rgb565_to_rgb888(src: &[u8], dst: &mut Vec<u8>) {
    dst.reserve(src.len() / 2 * CHANNELS);
    for px in src.chunks_exact(2) {
        let v = u16::from_be_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        dst.push((r << 3) | (r >> 2));
        dst.push((g << 2) | (g >> 4));
        dst.push((b << 3) | (b >> 2));
    }
}

/// JPEG bytes for streaming. JPEG frames pass through untouched.
pub fn frame_to_jpeg(frame: &Frame, quality: u8) -> Result<Cow<'_, [u8]>, PreprocessError> {
    let rgb: Cow<'_, [u8]> = match frame.format {
        PixelFormat::Jpeg => return Ok(Cow::Borrowed(frame.bytes())),
        PixelFormat::Rgb888 => {
            check_raw_len(frame)?;
            Cow::Borrowed(frame.bytes())
        }
        PixelFormat::Rgb565 => {
            check_raw_len(frame)?;
            let mut out = Vec::new();
            rgb565_to_rgb888(frame.bytes(), &mut out);
            Cow::Owned(out)
        }
    };
    if frame.width == 0 || frame.height == 0 {
        return Err(PreprocessError::EmptyFrame);
    }
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| PreprocessError::Decode(format!("jpeg encode: {}", e)))?;
    Ok(Cow::Owned(jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, (x + y) as u8]);
            }
        }
        data
    }

    #[test]
    fn normalization_matches_formula() {
        assert_eq!(normalize_channel(0), 10);
        assert_eq!(normalize_channel(50), 65);
        assert_eq!(normalize_channel(100), 120);
        assert_eq!(normalize_channel(200), 230);
        assert_eq!(normalize_channel(223), 255);
        assert_eq!(normalize_channel(255), 255);
    }

    #[test]
    fn normalization_is_monotonic_and_bounded() {
        let mut prev = 0u8;
        for v in 0..=255u8 {
            let out = normalize_channel(v);
            assert!(out >= prev, "not monotonic at {v}");
            assert!(out >= 10);
            prev = out;
        }
    }

    #[test]
    fn sampling_grid_uses_floor() {
        assert_eq!(source_coord(0, 320, 96), 0);
        assert_eq!(source_coord(1, 320, 96), 3);
        assert_eq!(source_coord(95, 320, 96), 316);
        assert_eq!(source_coord(95, 240, 96), 237);
        assert_eq!(source_coord(5, 96, 96), 5);
    }

    #[test]
    fn resize_samples_expected_pixels() {
        let frame = Frame::new(gradient(8, 4), 8, 4, PixelFormat::Rgb888);
        let mut pre = Preprocessor::new(4, 2).unwrap();
        let input = pre.process(&frame).unwrap();
        assert_eq!(input.len(), 4 * 2 * 3);

        // dst (1, 1) -> src (2, 2)
        let d = (4 + 1) * 3;
        assert_eq!(
            &input[d..d + 3],
            &[normalize_channel(2), normalize_channel(2), normalize_channel(4)]
        );
        // dst (3, 0) -> src (6, 0)
        let d = 3 * 3;
        assert_eq!(input[d], normalize_channel(6));
    }

    #[test]
    fn resize_is_deterministic() {
        let frame = Frame::new(gradient(33, 17), 33, 17, PixelFormat::Rgb888);
        let mut a = Preprocessor::new(96, 96).unwrap();
        let mut b = Preprocessor::new(96, 96).unwrap();
        assert_eq!(
            a.process(&frame).unwrap().as_bytes(),
            b.process(&frame).unwrap().as_bytes()
        );
    }

    #[test]
    fn rgb565_expands_to_full_range() {
        let mut out = Vec::new();
        rgb565_to_rgb888(&[0xff, 0xff, 0x00, 0x00, 0xf8, 0x00], &mut out);
        assert_eq!(out, vec![255, 255, 255, 0, 0, 0, 255, 0, 0]);
    }

    #[test]
    fn malformed_jpeg_keeps_previous_pixels() {
        let mut pre = Preprocessor::new(2, 2).unwrap();
        let good = Frame::new(vec![5u8; 12], 2, 2, PixelFormat::Rgb888);
        pre.decode(&good).unwrap();

        let bad = Frame::new(vec![0xff, 0xd8, 0x00, 0x01], 2, 2, PixelFormat::Jpeg);
        assert!(matches!(pre.decode(&bad), Err(PreprocessError::Decode(_))));
        assert_eq!(pre.pixels().as_bytes(), &[5u8; 12][..]);
    }

    #[test]
    fn raw_length_is_validated() {
        let mut pre = Preprocessor::new(2, 2).unwrap();
        let short = Frame::new(vec![0u8; 5], 2, 2, PixelFormat::Rgb888);
        assert!(matches!(
            pre.decode(&short),
            Err(PreprocessError::Length {
                expected: 12,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn raw_frames_are_jpeg_encoded_for_streaming() {
        let frame = Frame::new(gradient(16, 8), 16, 8, PixelFormat::Rgb888);
        let jpeg = frame_to_jpeg(&frame, STREAM_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        let decoded = Frame::new(jpeg.into_owned(), 16, 8, PixelFormat::Jpeg);
        let mut pre = Preprocessor::new(4, 4).unwrap();
        assert_eq!(pre.decode(&decoded).unwrap(), (16, 8));
    }

    #[test]
    fn input_shape_must_be_nhwc_rgb() {
        use crate::model::schema::TensorType;
        let mut info = TensorInfo {
            name: "input".to_string(),
            dtype: TensorType::UInt8,
            shape: vec![1, 96, 96, 3],
            quantization: None,
        };
        let pre = Preprocessor::for_input_tensor(&info).unwrap();
        assert_eq!(pre.input().len(), 96 * 96 * 3);

        info.shape = vec![1, 96, 96, 1];
        assert!(matches!(
            Preprocessor::for_input_tensor(&info),
            Err(StartupError::InputShape(_))
        ));
    }

    #[test]
    fn unallocatable_input_shape_is_rejected() {
        use crate::model::schema::TensorType;
        let info = TensorInfo {
            name: "input".to_string(),
            dtype: TensorType::UInt8,
            shape: vec![1, i32::MAX as usize, i32::MAX as usize, 3],
            quantization: None,
        };
        assert!(matches!(
            Preprocessor::for_input_tensor(&info),
            Err(StartupError::InputShape(_))
        ));
        assert!(ModelInputBuffer::try_new(usize::MAX, 2).is_none());
    }
}
