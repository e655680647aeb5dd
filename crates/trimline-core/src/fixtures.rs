//! Deterministic timelines and media used by the CLI demo and tests.

use std::{
    collections::HashMap,
    f32::consts::TAU,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use serde_json::json;

use crate::{
    decode::{
        CancellationToken, DecodeError, DecodedAudio, DecodedFrame, MediaDecoder, MediaInfo,
        MediaTrack,
    },
    generate::clamp_window,
    model::{ItemKind, SourceRef, TimelineItem, Track, TrackKind, TrackList},
    time::{seconds_to_frame_index, snap_to_grid},
};

pub const DEMO_VIDEO_SOURCE: &str = "clip.mp4";
pub const DEMO_VOICE_SOURCE: &str = "voice.wav";

/// One video track holding `s1` and one voiceover track holding `v1`, both
/// spanning `[0, 3)`.
#[must_use]
pub fn demo_track_list() -> TrackList {
    TrackList::new(vec![
        Track::new("video", TrackKind::Video).with_item(
            TimelineItem::new("s1", ItemKind::Video, 0.0, 3.0)
                .with_source(DEMO_VIDEO_SOURCE)
                .with_payload(json!({ "label": "Opening shot" })),
        ),
        Track::new("voice", TrackKind::Voiceover).with_item(
            TimelineItem::new("v1", ItemKind::Audio, 0.0, 3.0)
                .with_source(DEMO_VOICE_SOURCE)
                .with_payload(json!({ "volume": 1.0 })),
        ),
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    pub duration_seconds: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub tone_hz: f32,
}

impl SyntheticSource {
    #[must_use]
    pub fn video(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            has_video: true,
            has_audio: true,
            frame_rate: 24.0,
            width: 320,
            height: 180,
            sample_rate: 8_000,
            tone_hz: 220.0,
        }
    }

    #[must_use]
    pub fn audio(duration_seconds: f64) -> Self {
        Self {
            has_video: false,
            ..Self::video(duration_seconds)
        }
    }
}

/// A decode capability backed by generated media. Frame requests snap down
/// to the source's frame grid, like a decoder seeking to frame boundaries.
#[derive(Debug, Default)]
pub struct SyntheticDecoder {
    sources: HashMap<SourceRef, SyntheticSource>,
    failures: HashMap<SourceRef, DecodeError>,
    step_delay: Duration,
    probes: AtomicUsize,
    frames: AtomicUsize,
    audio_windows: AtomicUsize,
}

impl SyntheticDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `clip.mp4` (8 s, video and audio) and `voice.wav` (3 s, audio only).
    #[must_use]
    pub fn demo() -> Self {
        Self::new()
            .with_source(DEMO_VIDEO_SOURCE, SyntheticSource::video(8.0))
            .with_source(DEMO_VOICE_SOURCE, SyntheticSource::audio(3.0))
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<SourceRef>, media: SyntheticSource) -> Self {
        self.sources.insert(source.into(), media);
        self
    }

    /// Every operation on `source` fails with `error`.
    #[must_use]
    pub fn with_failure(mut self, source: impl Into<SourceRef>, error: DecodeError) -> Self {
        self.failures.insert(source.into(), error);
        self
    }

    /// Sleeps this long before every decode step.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn audio_window_count(&self) -> usize {
        self.audio_windows.load(Ordering::SeqCst)
    }

    fn lookup(&self, source: &SourceRef) -> Result<&SyntheticSource, DecodeError> {
        if let Some(error) = self.failures.get(source) {
            return Err(error.clone());
        }
        self.sources
            .get(source)
            .ok_or_else(|| DecodeError::SourceUnavailable(source.to_string()))
    }

    fn pause(&self) {
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
    }
}

impl MediaDecoder for SyntheticDecoder {
    fn probe(&self, source: &SourceRef) -> Result<MediaInfo, DecodeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let media = self.lookup(source)?;
        Ok(MediaInfo {
            duration_seconds: media.duration_seconds,
            has_video: media.has_video,
            has_audio: media.has_audio,
            sample_rate: media.has_audio.then_some(media.sample_rate),
        })
    }

    fn decode_frame(&self, source: &SourceRef, timestamp: f64) -> Result<DecodedFrame, DecodeError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        let media = self.lookup(source)?;
        if !media.has_video {
            return Err(DecodeError::MissingTrack(MediaTrack::Video));
        }
        self.pause();

        let last_frame = (media.duration_seconds - 1.0 / media.frame_rate).max(0.0);
        let snapped = snap_to_grid(timestamp.clamp(0.0, last_frame), media.frame_rate);
        let shade = ((snapped / media.duration_seconds.max(f64::EPSILON)) * 255.0) as u8;

        let mut rgba = Vec::with_capacity((media.width * media.height * 4) as usize);
        for y in 0..media.height {
            for x in 0..media.width {
                let red = (x * 255 / media.width.max(1)) as u8;
                let green = (y * 255 / media.height.max(1)) as u8;
                rgba.extend_from_slice(&[red, green, shade, 255]);
            }
        }

        Ok(DecodedFrame {
            timestamp: snapped,
            width: media.width,
            height: media.height,
            rgba,
        })
    }

    fn decode_audio(
        &self,
        source: &SourceRef,
        start: f64,
        end: f64,
        cancel: &CancellationToken,
    ) -> Result<DecodedAudio, DecodeError> {
        self.audio_windows.fetch_add(1, Ordering::SeqCst);
        let media = self.lookup(source)?;
        if !media.has_audio {
            return Err(DecodeError::MissingTrack(MediaTrack::Audio));
        }
        let (start, end) = clamp_window(start, end, media.duration_seconds)
            .ok_or_else(|| DecodeError::EmptySource(source.to_string()))?;

        let first = seconds_to_frame_index(start, media.sample_rate);
        let last = seconds_to_frame_index(end, media.sample_rate);
        let mut samples = Vec::with_capacity(last.saturating_sub(first));
        for chunk_start in (first..last).step_by(4_096) {
            if cancel.is_cancelled() {
                break;
            }
            self.pause();
            let chunk_end = (chunk_start + 4_096).min(last);
            samples.extend((chunk_start..chunk_end).map(|index| {
                let phase = index as f32 * media.tone_hz / media.sample_rate as f32;
                0.8 * (TAU * phase).sin()
            }));
        }

        Ok(DecodedAudio {
            sample_rate: media.sample_rate,
            channels: 1,
            start_seconds: start,
            samples,
        })
    }
}
