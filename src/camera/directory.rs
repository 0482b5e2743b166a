//! Local JPEG directory driver.
//!
//! Files ending in `.jpg`/`.jpeg` are served in file-name order and the list
//! wraps around. Files are read on each capture so the directory can be
//! refreshed while the daemon runs; a file that disappears fails that capture.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{jpeg_frame, FramePacer};
use crate::frame::{CameraDriver, Frame};

pub struct DirectoryDriver {
    files: Vec<PathBuf>,
    next: usize,
    pacer: FramePacer,
}

impl DirectoryDriver {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut files = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("read camera directory {}", path.display()))?
        {
            let entry = entry?;
            let file = entry.path();
            if file.is_file() && is_jpeg_name(&file) {
                files.push(file);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no jpeg files in {}", path.display()));
        }
        files.sort();
        log::info!(
            "DirectoryDriver: {} frames from {}",
            files.len(),
            path.display()
        );
        Ok(Self {
            files,
            next: 0,
            pacer: FramePacer::default(),
        })
    }

    pub fn with_target_fps(mut self, target_fps: u32) -> Self {
        self.pacer = FramePacer::new(target_fps);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_jpeg_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl CameraDriver for DirectoryDriver {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn capture(&mut self) -> Result<Frame> {
        self.pacer.wait();
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        jpeg_frame(bytes).with_context(|| format!("frame {}", path.display()))
    }
}
