//! Frame sources and sampling
//!
//! A frame source is a lazy, finite, non-restartable sequence of encoded still
//! frames. Each frame carries its index in the stream and a timestamp derived
//! from the stream's frame rate (`frame_index / fps`).
//!
//! Three sources are provided:
//! 1. **`FfmpegFrameSource`** (feature `ffmpeg`): decodes a video file packet by packet
//! 2. **`DirectoryFrameSource`**: plays a directory of still images as a stream
//! 3. **`MemoryFrameSource`**: frames held in memory

pub mod directory;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source;

use godseye_common::{ProcessingError, Result, Timestamp};
use image::codecs::jpeg::JpegEncoder;
use std::collections::VecDeque;
use std::path::Path;

pub use directory::DirectoryFrameSource;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_source::FfmpegFrameSource;

/// JPEG quality used when a source has to encode frames itself
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Frame rate assumed for image directories when the caller gives none
pub const DEFAULT_DIRECTORY_FPS: f64 = 30.0;

/// One decoded frame, already encoded as a still image
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame number (0-indexed, counts every decoded frame)
    pub frame_index: u64,
    pub timestamp: Timestamp,
    /// Encoded image bytes (JPEG)
    pub image: Vec<u8>,
}

/// Sequential frame producer.
///
/// Frames are numbered consecutively from 0, whether they are read or skipped.
/// `Ok(None)` marks end-of-stream. Callers treat the first `Err` as the end of
/// the stream too; sources are not expected to recover after a decode error.
pub trait FrameSource {
    /// Frames per second of the underlying stream
    fn fps(&self) -> f64;

    /// Next frame, or `None` once the stream is exhausted
    ///
    /// # Errors
    ///
    /// Returns an error if the next frame cannot be decoded or read
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Advance past the next frame without producing its image.
    ///
    /// Returns the skipped frame's index, or `None` once the stream is
    /// exhausted. Sources that can step over a frame more cheaply than
    /// encoding it override this.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be advanced
    fn skip_frame(&mut self) -> Result<Option<u64>> {
        Ok(self.next_frame()?.map(|frame| frame.frame_index))
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        (**self).next_frame()
    }

    fn skip_frame(&mut self) -> Result<Option<u64>> {
        (**self).skip_frame()
    }
}

/// Selects every `skip`-th frame, starting with frame 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    skip: u32,
}

impl SamplingPolicy {
    /// # Errors
    ///
    /// Returns `InvalidInput` if `skip` is zero
    pub fn new(skip: u32) -> Result<Self> {
        if skip == 0 {
            return Err(ProcessingError::InvalidInput(
                "skip must be a positive integer".to_string(),
            ));
        }
        Ok(Self { skip })
    }

    #[must_use]
    pub fn skip(&self) -> u32 {
        self.skip
    }

    #[must_use]
    pub fn is_candidate(&self, frame_index: u64) -> bool {
        frame_index % u64::from(self.skip) == 0
    }

    /// Number of candidates in a stream of `total_frames` frames
    #[must_use]
    pub fn candidate_count(&self, total_frames: u64) -> u64 {
        total_frames.div_ceil(u64::from(self.skip))
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self { skip: 1 }
    }
}

/// Frames held in memory, replayed once at a fixed frame rate
#[derive(Debug, Clone)]
pub struct MemoryFrameSource {
    fps: f64,
    frames: VecDeque<Vec<u8>>,
    next_index: u64,
}

impl MemoryFrameSource {
    /// # Errors
    ///
    /// Returns `InvalidInput` if `fps` is not a positive finite number
    pub fn new(fps: f64, frames: Vec<Vec<u8>>) -> Result<Self> {
        validate_fps(fps)?;
        Ok(Self {
            fps,
            frames: frames.into(),
            next_index: 0,
        })
    }

    /// Frames not yet yielded
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemoryFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(image) = self.frames.pop_front() else {
            return Ok(None);
        };
        let frame_index = self.next_index;
        self.next_index += 1;
        Ok(Some(RawFrame {
            frame_index,
            timestamp: Timestamp::from_frame(frame_index, self.fps),
            image,
        }))
    }

    fn skip_frame(&mut self) -> Result<Option<u64>> {
        if self.frames.pop_front().is_none() {
            return Ok(None);
        }
        let frame_index = self.next_index;
        self.next_index += 1;
        Ok(Some(frame_index))
    }
}

/// Open the right source for `path`.
///
/// Directories become a [`DirectoryFrameSource`] played at `fps_hint` (or
/// [`DEFAULT_DIRECTORY_FPS`]). Files are decoded with ffmpeg, which requires the
/// `ffmpeg` feature; `fps_hint` is used there only when the container reports no
/// frame rate.
///
/// # Errors
///
/// Returns `SourceUnavailable` if the path does not exist or cannot be opened
pub fn open_source(path: &Path, fps_hint: Option<f64>) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        let source =
            DirectoryFrameSource::open(path, fps_hint.unwrap_or(DEFAULT_DIRECTORY_FPS))?;
        return Ok(Box::new(source));
    }

    if !path.is_file() {
        return Err(ProcessingError::SourceUnavailable(format!(
            "{} does not exist",
            path.display()
        )));
    }

    open_video_file(path, fps_hint)
}

#[cfg(feature = "ffmpeg")]
fn open_video_file(path: &Path, fps_hint: Option<f64>) -> Result<Box<dyn FrameSource>> {
    let source = FfmpegFrameSource::open(path, fps_hint, DEFAULT_JPEG_QUALITY)?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_file(path: &Path, _fps_hint: Option<f64>) -> Result<Box<dyn FrameSource>> {
    Err(ProcessingError::SourceUnavailable(format!(
        "{}: video decoding requires the `ffmpeg` feature",
        path.display()
    )))
}

/// Encode a packed RGB24 buffer as JPEG
///
/// # Errors
///
/// Returns an error if the buffer size does not match the dimensions or
/// encoding fails
pub fn encode_jpeg(width: u32, height: u32, rgb: Vec<u8>, quality: u8) -> Result<Vec<u8>> {
    let img = image::RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        ProcessingError::ImageError(format!(
            "RGB buffer does not match {width}x{height} frame"
        ))
    })?;

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&img)?;
    Ok(out)
}

pub(crate) fn validate_fps(fps: f64) -> Result<()> {
    if fps.is_finite() && fps > 0.0 {
        Ok(())
    } else {
        Err(ProcessingError::InvalidInput(format!(
            "frame rate must be positive, got {fps}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_policy_rejects_zero() {
        assert!(SamplingPolicy::new(0).is_err());
        assert_eq!(SamplingPolicy::new(1).unwrap().skip(), 1);
    }

    #[test]
    fn test_sampling_candidates() {
        let policy = SamplingPolicy::new(5).unwrap();
        let picked: Vec<u64> = (0..12).filter(|&i| policy.is_candidate(i)).collect();
        assert_eq!(picked, vec![0, 5, 10]);

        let every = SamplingPolicy::new(1).unwrap();
        assert!((0..10).all(|i| every.is_candidate(i)));
    }

    #[test]
    fn test_candidate_count_is_ceiling() {
        let policy = SamplingPolicy::new(5).unwrap();
        assert_eq!(policy.candidate_count(100), 20);
        assert_eq!(policy.candidate_count(101), 21);
        assert_eq!(policy.candidate_count(0), 0);

        for n in 0..50u64 {
            for k in 1..8u32 {
                let policy = SamplingPolicy::new(k).unwrap();
                let counted = (0..n).filter(|&i| policy.is_candidate(i)).count() as u64;
                assert_eq!(policy.candidate_count(n), counted, "n={n} k={k}");
            }
        }
    }

    #[test]
    fn test_memory_source_yields_in_order() {
        let mut source = MemoryFrameSource::new(30.0, vec![vec![1], vec![2], vec![3]]).unwrap();
        assert_eq!(source.remaining(), 3);

        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            seen.push((frame.frame_index, frame.timestamp.to_string(), frame.image));
        }
        assert_eq!(
            seen,
            vec![
                (0, "0:00:00.000".to_string(), vec![1]),
                (1, "0:00:00.033".to_string(), vec![2]),
                (2, "0:00:00.067".to_string(), vec![3]),
            ]
        );

        // Exhausted sources stay exhausted
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_memory_source_skip_keeps_numbering() {
        let mut source =
            MemoryFrameSource::new(10.0, vec![vec![1], vec![2], vec![3], vec![4]]).unwrap();
        assert_eq!(source.skip_frame().unwrap(), Some(0));
        assert_eq!(source.skip_frame().unwrap(), Some(1));

        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index, 2);
        assert_eq!(frame.timestamp.to_string(), "0:00:00.200");
        assert_eq!(frame.image, vec![3]);

        assert_eq!(source.skip_frame().unwrap(), Some(3));
        assert_eq!(source.skip_frame().unwrap(), None);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_memory_source_rejects_bad_fps() {
        assert!(MemoryFrameSource::new(0.0, vec![]).is_err());
        assert!(MemoryFrameSource::new(f64::INFINITY, vec![]).is_err());
    }

    #[test]
    fn test_open_source_missing_path() {
        let err = open_source(Path::new("/nonexistent/godseye/video.mp4"), None)
            .err()
            .unwrap();
        assert!(matches!(err, ProcessingError::SourceUnavailable(_)));
    }

    #[test]
    fn test_encode_jpeg() {
        let rgb = vec![128u8; 4 * 4 * 3];
        let jpeg = encode_jpeg(4, 4, rgb, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        assert!(encode_jpeg(4, 4, vec![0u8; 5], DEFAULT_JPEG_QUALITY).is_err());
    }
}
