use std::{
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, instrument};

use crate::{
    decode::{
        CancellationToken, DecodeError, DecodedAudio, DecodedFrame, MediaDecoder, MediaInfo,
        MediaTrack,
    },
    model::SourceRef,
    time::{frames_to_seconds, seconds_to_frame_index},
};

const FALLBACK_SAMPLE_RATE: u32 = 48_000;

/// Decodes local audio files with symphonia. Sources are file paths, either
/// absolute, `file://` URLs, or relative to an optional media root.
#[derive(Debug, Clone, Default)]
pub struct FileAudioDecoder {
    media_root: Option<PathBuf>,
}

struct OpenedStream {
    format: Box<dyn FormatReader>,
    track_id: u32,
    params: CodecParameters,
}

impl FileAudioDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_media_root(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: Some(media_root.into()),
        }
    }

    #[must_use]
    pub fn resolve(&self, source: &SourceRef) -> PathBuf {
        let raw = source.as_str();
        let path = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
        match &self.media_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn open(&self, source: &SourceRef) -> Result<OpenedStream, DecodeError> {
        let path = self.resolve(source);
        let file = File::open(&path).map_err(|error| {
            DecodeError::SourceUnavailable(format!("{}: {error}", path.display()))
        })?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|error| map_symphonia_error(&path, error))?;
        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|track| {
                track.codec_params.codec != CODEC_TYPE_NULL
                    && track.codec_params.sample_rate.is_some()
            })
            .ok_or(DecodeError::MissingTrack(MediaTrack::Audio))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        Ok(OpenedStream {
            format,
            track_id,
            params,
        })
    }

    // Decodes from the beginning until `until_seconds` (or end of stream),
    // stopping early once `cancel` is set.
    fn decode_mono(
        &self,
        source: &SourceRef,
        until_seconds: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<DecodedAudio, DecodeError> {
        let path = self.resolve(source);
        let OpenedStream {
            mut format,
            track_id,
            params,
        } = self.open(source)?;
        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|error| map_symphonia_error(&path, error))?;

        let mut sample_rate = params.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE);
        let mut channels = params.channels.map_or(2, |value| value.count() as u16);
        let mut samples = Vec::new();

        loop {
            if cancel.is_cancelled() {
                debug!(decoded_frames = samples.len(), "audio decode cancelled");
                break;
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(DecodeError::Rejected(format!(
                        "audio stream reset required for {}",
                        path.display()
                    )));
                }
                Err(error) => return Err(map_symphonia_error(&path, error)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(error) => return Err(map_symphonia_error(&path, error)),
            };

            sample_rate = decoded.spec().rate;
            channels = decoded.spec().channels.count() as u16;
            push_mono_samples(decoded, &mut samples);

            if let Some(until) = until_seconds {
                if samples.len() >= seconds_to_frame_index(until, sample_rate) {
                    break;
                }
            }
        }

        if samples.is_empty() && !cancel.is_cancelled() {
            return Err(DecodeError::EmptySource(path.display().to_string()));
        }

        Ok(DecodedAudio {
            sample_rate,
            channels,
            start_seconds: 0.0,
            samples,
        })
    }
}

impl MediaDecoder for FileAudioDecoder {
    #[instrument(skip(self, source), fields(source = %source))]
    fn probe(&self, source: &SourceRef) -> Result<MediaInfo, DecodeError> {
        let stream = self.open(source)?;
        let sample_rate = stream.params.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE);

        let duration_seconds = match stream.params.n_frames {
            Some(frames) => frames_to_seconds(frames, sample_rate),
            None => {
                drop(stream);
                let decoded = self.decode_mono(source, None, &CancellationToken::new())?;
                frames_to_seconds(decoded.samples.len() as u64, decoded.sample_rate)
            }
        };

        Ok(MediaInfo {
            duration_seconds,
            has_video: false,
            has_audio: true,
            sample_rate: Some(sample_rate),
        })
    }

    fn decode_frame(&self, _source: &SourceRef, _timestamp: f64) -> Result<DecodedFrame, DecodeError> {
        Err(DecodeError::MissingTrack(MediaTrack::Video))
    }

    #[instrument(skip(self, source, cancel), fields(source = %source))]
    fn decode_audio(
        &self,
        source: &SourceRef,
        start: f64,
        end: f64,
        cancel: &CancellationToken,
    ) -> Result<DecodedAudio, DecodeError> {
        let mut decoded = self.decode_mono(source, Some(end), cancel)?;

        let lo = seconds_to_frame_index(start, decoded.sample_rate).min(decoded.samples.len());
        let hi = seconds_to_frame_index(end, decoded.sample_rate).clamp(lo, decoded.samples.len());
        decoded.samples.truncate(hi);
        decoded.samples.drain(..lo);
        decoded.start_seconds = frames_to_seconds(lo as u64, decoded.sample_rate);

        debug!(
            sample_rate = decoded.sample_rate,
            channels = decoded.channels,
            frames = decoded.samples.len(),
            "audio window decoded"
        );
        Ok(decoded)
    }
}

fn map_symphonia_error(path: &Path, error: SymphoniaError) -> DecodeError {
    match error {
        SymphoniaError::IoError(error) => {
            DecodeError::SourceUnavailable(format!("{}: {error}", path.display()))
        }
        SymphoniaError::Unsupported(what) => {
            DecodeError::UnsupportedCodec(format!("{}: {what}", path.display()))
        }
        other => DecodeError::Rejected(format!("{}: {other}", path.display())),
    }
}

fn push_mono_samples(decoded: AudioBufferRef<'_>, samples: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);

    for frame in sample_buffer.samples().chunks(channel_count) {
        let sum: f32 = frame.iter().copied().sum();
        samples.push(sum / channel_count as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_file_urls_and_relative_paths() {
        let decoder = FileAudioDecoder::with_media_root("/media");
        assert_eq!(
            decoder.resolve(&SourceRef::new("file:///tmp/a.wav")),
            PathBuf::from("/tmp/a.wav")
        );
        assert_eq!(
            decoder.resolve(&SourceRef::new("voice/take1.wav")),
            PathBuf::from("/media/voice/take1.wav")
        );
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let decoder = FileAudioDecoder::new();
        let result = decoder.probe(&SourceRef::new("/definitely/not/here.wav"));
        assert!(matches!(result, Err(DecodeError::SourceUnavailable(_))));
    }

    #[test]
    fn frames_are_never_available() {
        let decoder = FileAudioDecoder::new();
        assert_eq!(
            decoder.decode_frame(&SourceRef::new("any.wav"), 0.0),
            Err(DecodeError::MissingTrack(MediaTrack::Video))
        );
    }
}
