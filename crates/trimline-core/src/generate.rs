//! Preview artifact generation: thumbnail strips and waveform strips.
//!
//! Generators run on blocking worker threads. They check the task's
//! cancellation token before and after every decode step and return
//! [`GenerationError::Cancelled`] as soon as it is set, so a superseded task
//! never produces output.

use std::fmt;

use image::{DynamicImage, RgbaImage, codecs::jpeg::JpegEncoder, imageops};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::decode::{CancellationToken, DecodeError, DecodedFrame, MediaDecoder, MediaTrack};
use crate::model::SourceRef;

pub const DEFAULT_THUMBNAIL_COUNT: usize = 8;
pub const DEFAULT_MAX_DIMENSION: u32 = 160;
pub const DEFAULT_JPEG_QUALITY: u8 = 70;
pub const DEFAULT_WAVEFORM_BUCKETS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    Thumbnails,
    Waveform,
}

impl fmt::Display for PreviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thumbnails => f.write_str("thumbnails"),
            Self::Waveform => f.write_str("waveform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    Cancelled,
    Failed(DecodeError),
}

impl From<DecodeError> for GenerationError {
    fn from(value: DecodeError) -> Self {
        Self::Failed(value)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a, O> {
    pub source: &'a SourceRef,
    pub start: f64,
    pub end: f64,
    pub options: &'a O,
}

/// Produces one artifact set for a source window.
pub trait PreviewGenerator: Send + Sync + 'static {
    type Options: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Output: fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> PreviewKind;

    fn generate(
        &self,
        request: GenerationRequest<'_, Self::Options>,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailOptions {
    pub count: usize,
    pub max_dimension: u32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            count: DEFAULT_THUMBNAIL_COUNT,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// A JPEG-encoded frame.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.jpeg.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailStrip {
    pub frames: Vec<Thumbnail>,
    pub requested_timestamps: Vec<f64>,
    /// Timestamps the decoder actually delivered, in ascending order.
    pub timestamps: Vec<f64>,
}

impl ThumbnailStrip {
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.frames.iter().map(|frame| frame.jpeg.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailGenerator<D> {
    decoder: D,
    jpeg_quality: u8,
}

impl<D: MediaDecoder> ThumbnailGenerator<D> {
    #[must_use]
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

impl<D: MediaDecoder> PreviewGenerator for ThumbnailGenerator<D> {
    type Options = ThumbnailOptions;
    type Output = ThumbnailStrip;

    fn kind(&self) -> PreviewKind {
        PreviewKind::Thumbnails
    }

    fn generate(
        &self,
        request: GenerationRequest<'_, ThumbnailOptions>,
        cancel: &CancellationToken,
    ) -> Result<ThumbnailStrip, GenerationError> {
        let info = self.decoder.probe(request.source)?;
        if !info.has_video {
            return Err(DecodeError::MissingTrack(MediaTrack::Video).into());
        }
        let (start, end) = clamp_window(request.start, request.end, info.duration_seconds)
            .ok_or_else(|| DecodeError::EmptySource(request.source.to_string()))?;

        let requested_timestamps = evenly_spaced(start, end, request.options.count.max(1));
        let mut frames = Vec::with_capacity(requested_timestamps.len());
        for &timestamp in &requested_timestamps {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            let frame = self.decoder.decode_frame(request.source, timestamp)?;
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            trace!(requested = timestamp, actual = frame.timestamp, "frame decoded");
            frames.push(encode_thumbnail(
                &frame,
                request.options.max_dimension,
                self.jpeg_quality,
            )?);
        }

        frames.sort_by(|left, right| left.timestamp.total_cmp(&right.timestamp));
        let timestamps = frames.iter().map(|frame| frame.timestamp).collect();
        debug!(
            source = %request.source,
            count = frames.len(),
            "thumbnail strip generated"
        );

        Ok(ThumbnailStrip {
            frames,
            requested_timestamps,
            timestamps,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformOptions {
    pub buckets: usize,
}

impl Default for WaveformOptions {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_WAVEFORM_BUCKETS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformStrip {
    pub sample_rate: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Peak absolute amplitude per bucket, in `[0, 1]`.
    pub peaks: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct WaveformGenerator<D> {
    decoder: D,
}

impl<D: MediaDecoder> WaveformGenerator<D> {
    #[must_use]
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }
}

impl<D: MediaDecoder> PreviewGenerator for WaveformGenerator<D> {
    type Options = WaveformOptions;
    type Output = WaveformStrip;

    fn kind(&self) -> PreviewKind {
        PreviewKind::Waveform
    }

    fn generate(
        &self,
        request: GenerationRequest<'_, WaveformOptions>,
        cancel: &CancellationToken,
    ) -> Result<WaveformStrip, GenerationError> {
        let info = self.decoder.probe(request.source)?;
        if !info.has_audio {
            return Err(DecodeError::MissingTrack(MediaTrack::Audio).into());
        }
        let (start, end) = clamp_window(request.start, request.end, info.duration_seconds)
            .ok_or_else(|| DecodeError::EmptySource(request.source.to_string()))?;

        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let decoded = self.decoder.decode_audio(request.source, start, end, cancel)?;
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        if decoded.samples.is_empty() {
            return Err(DecodeError::EmptySource(request.source.to_string()).into());
        }

        let peaks = bucket_peaks(&decoded.samples, request.options.buckets.max(1));
        debug!(
            source = %request.source,
            samples = decoded.samples.len(),
            buckets = peaks.len(),
            "waveform strip generated"
        );

        Ok(WaveformStrip {
            sample_rate: decoded.sample_rate,
            start_seconds: start,
            end_seconds: end,
            peaks,
        })
    }
}

/// Clamps `[start, end]` into `[0, duration]`. `None` when nothing decodable
/// remains.
#[must_use]
pub fn clamp_window(start: f64, end: f64, duration: f64) -> Option<(f64, f64)> {
    if !duration.is_finite() || duration <= 0.0 {
        return None;
    }
    let start = start.clamp(0.0, duration);
    let end = end.clamp(start, duration);
    if end <= start && start >= duration {
        return None;
    }
    Some((start, end))
}

/// `count` timestamps spread evenly over `[start, end]`, both ends included
/// when `count > 1`.
#[must_use]
pub fn evenly_spaced(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|index| {
                    if index == count - 1 {
                        end
                    } else {
                        start + step * index as f64
                    }
                })
                .collect()
        }
    }
}

/// Reduces `samples` to exactly `buckets` peak amplitudes.
#[must_use]
pub fn bucket_peaks(samples: &[f32], buckets: usize) -> Vec<f32> {
    if samples.is_empty() || buckets == 0 {
        return Vec::new();
    }

    let total = samples.len();
    (0..buckets)
        .map(|bucket| {
            let lo = (bucket * total / buckets).min(total - 1);
            let hi = ((bucket + 1) * total / buckets).clamp(lo + 1, total);
            samples[lo..hi]
                .iter()
                .copied()
                .map(f32::abs)
                .fold(0.0_f32, f32::max)
                .min(1.0)
        })
        .collect()
}

fn encode_thumbnail(
    frame: &DecodedFrame,
    max_dimension: u32,
    quality: u8,
) -> Result<Thumbnail, DecodeError> {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| {
            DecodeError::Rejected(format!(
                "frame buffer does not match {}x{} rgba",
                frame.width, frame.height
            ))
        })?;

    let (width, height) = fit_within(frame.width, frame.height, max_dimension.max(1));
    let scaled = if (width, height) == (frame.width, frame.height) {
        image
    } else {
        imageops::thumbnail(&image, width, height)
    };
    let rgb = DynamicImage::ImageRgba8(scaled).to_rgb8();

    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, quality))
        .map_err(|error| DecodeError::Rejected(format!("thumbnail encode failed: {error}")))?;

    Ok(Thumbnail {
        timestamp: frame.timestamp,
        width,
        height,
        jpeg,
    })
}

fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = f64::from(max_dimension) / f64::from(longest);
    let scaled = |value: u32| ((f64::from(value) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}
