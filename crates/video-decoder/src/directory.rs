//! Image directories played back as a frame stream

use crate::{encode_jpeg, validate_fps, FrameSource, RawFrame, DEFAULT_JPEG_QUALITY};
use godseye_common::{ProcessingError, Result, Timestamp};
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Still images in a directory, ordered by file name, replayed at a fixed rate.
///
/// JPEG files are passed through untouched; other formats are re-encoded to
/// JPEG so every frame leaving the source has the same encoding.
#[derive(Debug)]
pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    fps: f64,
    position: usize,
}

impl DirectoryFrameSource {
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if `dir` cannot be listed, or `InvalidInput`
    /// for a non-positive frame rate
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        validate_fps(fps)?;

        let entries = std::fs::read_dir(dir).map_err(|e| {
            ProcessingError::SourceUnavailable(format!("{}: {e}", dir.display()))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ProcessingError::SourceUnavailable(format!("{}: {e}", dir.display())))?
                .path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        debug!(dir = %dir.display(), frames = files.len(), "Opened image directory");

        Ok(Self {
            files,
            fps,
            position: 0,
        })
    }

    /// Total number of frames in the directory
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectoryFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        let frame_index = self.position as u64;
        self.position += 1;

        let bytes = std::fs::read(path)?;
        let image = if is_jpeg(path) {
            bytes
        } else {
            let rgb = image::load_from_memory(&bytes)?.to_rgb8();
            let (width, height) = rgb.dimensions();
            encode_jpeg(width, height, rgb.into_raw(), DEFAULT_JPEG_QUALITY)?
        };

        Ok(Some(RawFrame {
            frame_index,
            timestamp: Timestamp::from_frame(frame_index, self.fps),
            image,
        }))
    }

    fn skip_frame(&mut self) -> Result<Option<u64>> {
        if self.position >= self.files.len() {
            return Ok(None);
        }
        let frame_index = self.position as u64;
        self.position += 1;
        Ok(Some(frame_index))
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_image(path: &Path) -> bool {
    extension(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

fn is_jpeg(path: &Path) -> bool {
    extension(path).is_some_and(|e| e == "jpg" || e == "jpeg")
}
