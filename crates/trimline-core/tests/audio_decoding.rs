use std::{path::Path, time::Duration};

use tempfile::tempdir;
use tokio::runtime::Handle;
use trimline_core::{
    CancellationToken, DecodeError, FileAudioDecoder, GenerationRequest, MediaDecoder,
    PreviewCache, PreviewCacheConfig, PreviewEvent, PreviewGenerator, PreviewKey, SourceRef,
    WaveformGenerator, WaveformOptions,
};

fn write_test_wav(path: &Path, seconds: f32) {
    let sample_rate = 48_000_u32;
    let frame_count = (seconds * sample_rate as f32).round() as usize;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for frame in 0..frame_count {
        let phase = frame as f32 / sample_rate as f32 * 220.0 * std::f32::consts::TAU;
        let sample = (phase.sin() * 0.5 * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(sample)
            .expect("test wav sample write should succeed");
    }
    writer.finalize().expect("test wav finalize should succeed");
}

#[test]
fn probe_and_window_decode_wav() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_test_wav(&temp.path().join("tone.wav"), 0.75);
    let decoder = FileAudioDecoder::with_media_root(temp.path());
    let source = SourceRef::new("tone.wav");

    let info = decoder.probe(&source).expect("probe should succeed");
    assert!(info.has_audio);
    assert!(!info.has_video);
    assert_eq!(info.sample_rate, Some(48_000));
    assert!((info.duration_seconds - 0.75).abs() < 0.01);

    let window = decoder
        .decode_audio(&source, 0.25, 0.5, &CancellationToken::new())
        .expect("window decode should succeed");
    assert_eq!(window.sample_rate, 48_000);
    assert_eq!(window.channels, 1);
    assert!((window.start_seconds - 0.25).abs() < 1e-3);
    assert_eq!(window.samples.len(), 12_000);
}

#[test]
fn cancelled_decode_returns_no_samples() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("tone.wav");
    write_test_wav(&path, 0.5);
    let decoder = FileAudioDecoder::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let decoded = decoder
        .decode_audio(
            &SourceRef::new(path.display().to_string()),
            0.0,
            0.5,
            &cancel,
        )
        .expect("cancelled decode is not an error");
    assert!(decoded.samples.is_empty());
}

#[test]
fn non_audio_files_are_rejected() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("notes.txt");
    std::fs::write(&path, "not audio").expect("text file should be writable");

    let result = FileAudioDecoder::new().probe(&SourceRef::new(path.display().to_string()));
    assert!(matches!(
        result,
        Err(DecodeError::UnsupportedCodec(_) | DecodeError::Rejected(_))
    ));
}

#[test]
fn waveform_peaks_follow_the_signal_level() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_test_wav(&temp.path().join("tone.wav"), 0.75);
    let generator = WaveformGenerator::new(FileAudioDecoder::with_media_root(temp.path()));
    let source = SourceRef::new("tone.wav");

    let strip = generator
        .generate(
            GenerationRequest {
                source: &source,
                start: 0.0,
                end: 2.0,
                options: &WaveformOptions { buckets: 50 },
            },
            &CancellationToken::new(),
        )
        .expect("waveform should generate");

    assert_eq!(strip.peaks.len(), 50);
    assert!((strip.end_seconds - 0.75).abs() < 0.01, "window clamps to file length");
    assert!(strip.peaks.iter().all(|peak| (0.4..=0.55).contains(peak)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waveform_cache_decodes_a_real_file() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_test_wav(&temp.path().join("voice.wav"), 1.0);
    let cache = PreviewCache::new(
        WaveformGenerator::new(FileAudioDecoder::with_media_root(temp.path())),
        PreviewCacheConfig::default(),
        Handle::current(),
    );
    let source = SourceRef::new("voice.wav");
    let key = PreviewKey::new(source.clone(), 0.5, 1.0);
    let mut events = cache.subscribe();

    assert!(
        cache
            .request_span(&source, 0.5, 0.5, WaveformOptions { buckets: 20 })
            .is_loading()
    );
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("decode should finish")
        .expect("event channel should stay open");
    assert!(matches!(event, PreviewEvent::Ready { .. }));

    let strip = cache
        .request_span(&source, 0.5, 0.5, WaveformOptions { buckets: 20 })
        .ready()
        .cloned()
        .expect("decoded waveform should be cached");
    assert_eq!(strip.peaks.len(), 20);
    assert_eq!(cache.peek(&key).map(|cached| cached.peaks.len()), Some(20));
}
