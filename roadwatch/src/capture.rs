//! Capture backends that feed the frame source

use crate::error::{PipelineError, Result};
use crate::types::Frame;
use image::Rgb;
use ioutrack::Bbox;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm", "webp"];

/// Identifies a capture resource: a device index or a filesystem path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceId {
    Device(i32),
    Path(PathBuf),
}

impl SourceId {
    /// Digit-only strings are device indices, anything else is a path
    pub fn parse(source: &str) -> Self {
        let trimmed = source.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = trimmed.parse::<i32>() {
                return SourceId::Device(index);
            }
        }
        SourceId::Path(PathBuf::from(trimmed))
    }
}

impl From<&str> for SourceId {
    fn from(source: &str) -> Self {
        SourceId::parse(source)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Device(index) => write!(f, "device:{}", index),
            SourceId::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An opened capture resource
pub trait CaptureDevice: Send {
    /// Next frame, or `None` at end of stream
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource. Further reads return `None`.
    fn release(&mut self);
}

/// Opens capture devices by source id
pub trait CaptureBackend: Send + Sync {
    fn open(&self, source: &SourceId) -> Result<Box<dyn CaptureDevice>>;

    fn name(&self) -> &str;
}

/// Serves still images from disk: every image in a directory in file-name
/// order, or a single image file as a one-frame stream.
#[derive(Debug, Clone, Default)]
pub struct ImageDirBackend;

impl ImageDirBackend {
    fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl CaptureBackend for ImageDirBackend {
    fn open(&self, source: &SourceId) -> Result<Box<dyn CaptureDevice>> {
        let path = match source {
            SourceId::Device(index) => {
                return Err(PipelineError::source_unavailable(format!(
                    "device {} cannot be opened by the image backend",
                    index
                )))
            }
            SourceId::Path(path) => path,
        };

        let paths = if path.is_dir() {
            Self::collect_images(path)
                .map_err(|e| PipelineError::source_unavailable(format!("{}: {}", path.display(), e)))?
        } else if path.is_file() {
            vec![path.clone()]
        } else {
            return Err(PipelineError::source_unavailable(format!(
                "{} does not exist",
                path.display()
            )));
        };

        if paths.is_empty() {
            return Err(PipelineError::source_unavailable(format!(
                "no images found in {}",
                path.display()
            )));
        }

        log::info!("Opened image source {} ({} frames)", path.display(), paths.len());
        Ok(Box::new(ImageSequence {
            paths: paths.into(),
        }))
    }

    fn name(&self) -> &str {
        "images"
    }
}

struct ImageSequence {
    paths: VecDeque<PathBuf>,
}

impl CaptureDevice for ImageSequence {
    fn read(&mut self) -> Result<Option<Frame>> {
        match self.paths.pop_front() {
            Some(path) => Ok(Some(image::open(&path)?.to_rgb8())),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.paths.clear();
    }
}

/// Renders a single rectangle sliding left to right over a flat background.
/// Any source id opens successfully.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    width: u32,
    height: u32,
    frames: u64,
    box_size: u32,
    step: i32,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32, frames: u64) -> Self {
        Self {
            width,
            height,
            frames,
            box_size: (width.min(height) / 4).max(1),
            step: 4,
        }
    }

    /// Pixels the box moves per frame
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = step;
        self
    }

    pub fn with_box_size(mut self, size: u32) -> Self {
        self.box_size = size.max(1);
        self
    }

    /// Where the rectangle sits in frame `index`
    pub fn box_at(&self, index: u64) -> Bbox {
        let size = self.box_size as i32;
        let span = (self.width as i32 - size).max(1);
        let x = (8 + self.step as i64 * index as i64).rem_euclid(span as i64) as i32;
        let y = (self.height as i32 - size) / 2;
        Bbox::new(x, y, x + size, y + size)
    }

    fn render(&self, index: u64) -> Frame {
        let mut frame = Frame::from_pixel(self.width, self.height, Rgb([90, 90, 90]));
        let b = self.box_at(index);
        for y in b.y1.max(0)..b.y2.min(self.height as i32) {
            for x in b.x1.max(0)..b.x2.min(self.width as i32) {
                frame.put_pixel(x as u32, y as u32, Rgb([200, 30, 30]));
            }
        }
        frame
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(320, 240, 100)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self, source: &SourceId) -> Result<Box<dyn CaptureDevice>> {
        log::info!("Opened synthetic source for {} ({} frames)", source, self.frames);
        Ok(Box::new(SyntheticDevice {
            backend: self.clone(),
            next: 0,
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct SyntheticDevice {
    backend: SyntheticBackend,
    next: u64,
}

impl CaptureDevice for SyntheticDevice {
    fn read(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.backend.frames {
            return Ok(None);
        }
        let frame = self.backend.render(self.next);
        self.next += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.next = self.backend.frames;
    }
}
