use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::SourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaTrack {
    Video,
    Audio,
}

impl fmt::Display for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Why a decode capability could not produce media for a source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("source is empty: {0}")]
    EmptySource(String),
    #[error("source has no {0} track")]
    MissingTrack(MediaTrack),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("decode rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// One decoded raster frame, RGBA8, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Presentation time actually decoded; may differ from the requested one
    /// when the decoder snaps to a keyframe or frame boundary.
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Mono samples covering a decoded window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub start_seconds: f64,
    pub samples: Vec<f32>,
}

/// Injected capability that turns a source reference into frames and samples.
///
/// Implementations are called from blocking worker threads and may take a
/// long time. `decode_audio` receives the task's cancellation token so it can
/// stop between packets; whatever it returns after cancellation is discarded.
pub trait MediaDecoder: Send + Sync + 'static {
    fn probe(&self, source: &SourceRef) -> Result<MediaInfo, DecodeError>;

    fn decode_frame(&self, source: &SourceRef, timestamp: f64) -> Result<DecodedFrame, DecodeError>;

    fn decode_audio(
        &self,
        source: &SourceRef,
        start: f64,
        end: f64,
        cancel: &CancellationToken,
    ) -> Result<DecodedAudio, DecodeError>;
}

impl<D: MediaDecoder + ?Sized> MediaDecoder for Arc<D> {
    fn probe(&self, source: &SourceRef) -> Result<MediaInfo, DecodeError> {
        (**self).probe(source)
    }

    fn decode_frame(&self, source: &SourceRef, timestamp: f64) -> Result<DecodedFrame, DecodeError> {
        (**self).decode_frame(source, timestamp)
    }

    fn decode_audio(
        &self,
        source: &SourceRef,
        start: f64,
        end: f64,
        cancel: &CancellationToken,
    ) -> Result<DecodedAudio, DecodeError> {
        (**self).decode_audio(source, start, end, cancel)
    }
}

/// Cooperative cancellation flag shared between the cache and one generation
/// task. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn decode_errors_render_reason() {
        assert_eq!(
            DecodeError::MissingTrack(MediaTrack::Audio).to_string(),
            "source has no audio track"
        );
    }
}
