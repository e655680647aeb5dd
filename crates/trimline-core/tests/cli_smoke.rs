use std::{path::Path, process::Command};

use serde_json::Value;
use tempfile::tempdir;

fn write_test_wav(path: &Path, seconds: f32) {
    let sample_rate = 16_000_u32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    let frame_count = (seconds * sample_rate as f32).round() as usize;
    for frame in 0..frame_count {
        let phase = frame as f32 / sample_rate as f32 * 330.0 * std::f32::consts::TAU;
        let sample = (phase.sin() * 0.25 * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(sample)
            .expect("test wav sample write should succeed");
    }
    writer.finalize().expect("test wav finalize should succeed");
}

fn run_cli(work_dir: &Path, args: &[&str]) -> Value {
    let output = Command::new(env!("CARGO_BIN_EXE_trimline-cli"))
        .current_dir(work_dir)
        .env("TRIMLINE_CONFIG_PATH", work_dir.join("trimline.config.toml"))
        .env_remove("RUST_LOG")
        .arg("--log-dir")
        .arg(work_dir.join("logs"))
        .arg("--quiet")
        .args(args)
        .output()
        .expect("cli should launch");
    assert!(
        output.status.success(),
        "cli failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("cli should print JSON")
}

#[test]
fn waveform_command_prints_bucketed_peaks() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_test_wav(&temp.path().join("tone.wav"), 1.0);

    let strip = run_cli(
        temp.path(),
        &[
            "waveform",
            "--source",
            "tone.wav",
            "--duration",
            "0.5",
            "--buckets",
            "16",
        ],
    );

    let peaks = strip["peaks"].as_array().expect("peaks should be an array");
    assert_eq!(peaks.len(), 16);
    assert!(peaks.iter().all(|peak| {
        let peak = peak.as_f64().expect("peaks are numbers");
        (0.2..=0.3).contains(&peak)
    }));
    assert_eq!(strip["sample_rate"], 16_000);
}

#[test]
fn history_demo_uses_configured_history() {
    let temp = tempdir().expect("tempdir should be creatable");
    std::fs::write(
        temp.path().join("trimline.config.toml"),
        "[history]\nquiet_period_ms = 250\n",
    )
    .expect("config should be writable");

    let report = run_cli(temp.path(), &["history-demo"]);

    assert_eq!(report["quiet_period_ms"], 250);
    assert_eq!(report["record_outcome"], "Committed");
    let steps = report["steps"].as_array().expect("steps should be an array");
    let past_and_future: Vec<(i64, i64)> = steps
        .iter()
        .map(|step| {
            (
                step["past"].as_i64().expect("past is a count"),
                step["future"].as_i64().expect("future is a count"),
            )
        })
        .collect();
    assert_eq!(past_and_future, vec![(1, 0), (0, 1), (1, 0)]);
}
