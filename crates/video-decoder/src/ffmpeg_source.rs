//! Video file decoding with ffmpeg
//!
//! Frames are decoded lazily, one packet at a time, converted to RGB24 and
//! encoded as JPEG. Only the best video stream is decoded. Frames passed over
//! with `skip_frame` are decoded but never converted or encoded.

use crate::{encode_jpeg, FrameSource, RawFrame};
use ffmpeg_next as ffmpeg;
use godseye_common::{ProcessingError, Result, Timestamp};
use std::path::Path;
use tracing::{debug, warn};

/// Lazy decoder over one video file
pub struct FfmpegFrameSource {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    fps: f64,
    quality: u8,
    next_index: u64,
    eof_sent: bool,
    finished: bool,
}

impl FfmpegFrameSource {
    /// Open `path` and prepare a decoder for its best video stream.
    ///
    /// `fps_hint` is used only when the container reports no frame rate.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if the file cannot be opened, has no video
    /// stream, or has no usable frame rate
    pub fn open(path: &Path, fps_hint: Option<f64>, quality: u8) -> Result<Self> {
        let unavailable = |what: &str, e: &dyn std::fmt::Display| {
            ProcessingError::SourceUnavailable(format!("{}: {what}: {e}", path.display()))
        };

        ffmpeg::init().map_err(|e| unavailable("failed to initialize FFmpeg", &e))?;

        let input = ffmpeg::format::input(&path).map_err(|e| unavailable("cannot open", &e))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| {
                ProcessingError::SourceUnavailable(format!(
                    "{}: no video stream",
                    path.display()
                ))
            })?;
        let stream_index = stream.index();

        let fps = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .map(f64::from)
            .chain(fps_hint)
            .find(|r| r.is_finite() && *r > 0.0)
            .ok_or_else(|| {
                ProcessingError::SourceUnavailable(format!(
                    "{}: stream reports no frame rate",
                    path.display()
                ))
            })?;

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| unavailable("failed to create codec context", &e))?
            .decoder()
            .video()
            .map_err(|e| unavailable("failed to create decoder", &e))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| unavailable("failed to create scaler", &e))?;

        debug!(
            path = %path.display(),
            fps,
            width = decoder.width(),
            height = decoder.height(),
            "Opened video"
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            fps,
            quality,
            next_index: 0,
            eof_sent: false,
            finished: false,
        })
    }

    fn encode(&mut self, decoded: &ffmpeg::util::frame::video::Video) -> Result<Vec<u8>> {
        let mut rgb = ffmpeg::util::frame::video::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| ProcessingError::ImageError(format!("Failed to convert frame: {e}")))?;

        let width = rgb.width();
        let height = rgb.height();
        let row_len = width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data(0);

        let mut packed = Vec::with_capacity(row_len * height as usize);
        for row in plane.chunks(stride).take(height as usize) {
            packed.extend_from_slice(&row[..row_len]);
        }

        encode_jpeg(width, height, packed, self.quality)
    }
}

impl FfmpegFrameSource {
    /// Decode the next frame into `decoded` and return its index, or `None`
    /// at end of stream
    fn decode_next(&mut self, decoded: &mut ffmpeg::util::frame::video::Video) -> Option<u64> {
        loop {
            if self.finished {
                return None;
            }

            if self.decoder.receive_frame(decoded).is_ok() {
                let frame_index = self.next_index;
                self.next_index += 1;
                return Some(frame_index);
            }

            if self.eof_sent {
                self.finished = true;
                continue;
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        warn!(frame_index = self.next_index, error = %e, "Dropping undecodable packet");
                    }
                }
                None => {
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
            }
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        let Some(frame_index) = self.decode_next(&mut decoded) else {
            return Ok(None);
        };
        let image = self.encode(&decoded)?;
        Ok(Some(RawFrame {
            frame_index,
            timestamp: Timestamp::from_frame(frame_index, self.fps),
            image,
        }))
    }

    /// Skipped frames are still decoded, since later frames may reference
    /// them, but never converted or encoded
    fn skip_frame(&mut self) -> Result<Option<u64>> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        Ok(self.decode_next(&mut decoded))
    }
}
