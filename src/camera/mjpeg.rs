//! Network camera driver (feature: camera-mjpeg).
//!
//! Connects to an HTTP(S) camera endpoint. A `multipart/*` response is read
//! as an MJPEG stream and split on JPEG SOI/EOI markers; any other response
//! type is treated as a snapshot endpoint and re-fetched for every frame.

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::jpeg_frame;
use crate::frame::{CameraDriver, Frame};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub struct MjpegDriver {
    url: String,
    stream: HttpStream,
    frames: u64,
}

enum HttpStream {
    Mjpeg(MjpegReader),
    Snapshot,
}

impl MjpegDriver {
    pub fn connect(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).context("parse camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }
        let response = ureq::get(url)
            .call()
            .with_context(|| format!("connect to camera {}", url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        let stream = if content_type.to_ascii_lowercase().contains("multipart") {
            HttpStream::Mjpeg(MjpegReader::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        };
        log::info!(
            "MjpegDriver: connected to {} ({})",
            url,
            match stream {
                HttpStream::Mjpeg(_) => "mjpeg",
                HttpStream::Snapshot => "snapshot",
            }
        );
        Ok(Self {
            url: url.to_string(),
            stream,
            frames: 0,
        })
    }
}

impl CameraDriver for MjpegDriver {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn capture(&mut self) -> Result<Frame> {
        let jpeg = match &mut self.stream {
            HttpStream::Mjpeg(reader) => reader.read_next_jpeg()?,
            HttpStream::Snapshot => fetch_single_jpeg(&self.url)?,
        };
        self.frames += 1;
        jpeg_frame(jpeg).with_context(|| format!("camera frame {}", self.frames))
    }
}

/// Splits a multipart body into JPEG images on SOI/EOI markers.
///
/// Bytes ahead of an SOI are part headers and are dropped as soon as they
/// are seen. Once inside an image the EOI search resumes from `scanned`, so
/// each byte is examined about once however the body is chunked.
struct MjpegReader {
    reader: Box<dyn Read + Send>,
    pending: Vec<u8>,
    in_image: bool,
    scanned: usize,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(64 * 1024),
            in_image: false,
            scanned: 0,
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            if !self.in_image {
                self.seek_image_start();
            }
            if self.in_image {
                if let Some(eoi) = find_marker(&self.pending, self.scanned, EOI) {
                    let jpeg: Vec<u8> = self.pending.drain(..eoi + EOI.len()).collect();
                    self.in_image = false;
                    return Ok(jpeg);
                }
                // Step back one byte: the chunk may have ended on 0xFF.
                self.scanned = self.pending.len().saturating_sub(1).max(SOI.len());
                if self.pending.len() > MAX_JPEG_BYTES {
                    log::warn!(
                        "MjpegDriver: no EOI within {} bytes, resyncing",
                        MAX_JPEG_BYTES
                    );
                    self.pending.clear();
                    self.in_image = false;
                }
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    /// Drop everything before the next SOI, keeping a trailing 0xFF.
    fn seek_image_start(&mut self) {
        match find_marker(&self.pending, 0, SOI) {
            Some(soi) => {
                self.pending.drain(..soi);
                self.in_image = true;
                self.scanned = SOI.len();
            }
            None => {
                let keep = usize::from(self.pending.last() == Some(&0xFF));
                let discard = self.pending.len() - keep;
                self.pending.drain(..discard);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn find_marker(buffer: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|pair| pair == marker)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most one byte per read.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    fn two_part_body() -> Vec<u8> {
        let mut body = Vec::new();
        for n in 0..2u8 {
            body.extend_from_slice(b"--b\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&[0xFF, 0xD8, n, 0xFF, 0x00, 0xFF, 0xD9]);
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    #[test]
    fn marker_search_starts_at_offset() {
        let buf = [0xFF, 0xD8, 0xFF, 0xD9, 0xFF, 0xD9];
        assert_eq!(find_marker(&buf, 0, SOI), Some(0));
        assert_eq!(find_marker(&buf, 0, EOI), Some(2));
        assert_eq!(find_marker(&buf, 3, EOI), Some(4));
        assert_eq!(find_marker(&buf, 9, EOI), None);
    }

    #[test]
    fn reader_yields_consecutive_frames() {
        let mut reader = MjpegReader::new(Box::new(Cursor::new(two_part_body())));
        for n in 0..2u8 {
            assert_eq!(
                reader.read_next_jpeg().unwrap(),
                vec![0xFF, 0xD8, n, 0xFF, 0x00, 0xFF, 0xD9]
            );
        }
        assert!(reader.read_next_jpeg().is_err());
    }

    #[test]
    fn markers_split_across_reads_are_found() {
        let mut reader = MjpegReader::new(Box::new(Trickle(Cursor::new(two_part_body()))));
        for n in 0..2u8 {
            assert_eq!(
                reader.read_next_jpeg().unwrap(),
                vec![0xFF, 0xD8, n, 0xFF, 0x00, 0xFF, 0xD9]
            );
        }
    }

    #[test]
    fn headers_without_image_end_the_stream() {
        let body = b"--b\r\nContent-Type: text/plain\r\n\r\nhello".to_vec();
        let mut reader = MjpegReader::new(Box::new(Cursor::new(body)));
        assert!(reader.read_next_jpeg().is_err());
        assert!(reader.pending.is_empty());
    }
}
