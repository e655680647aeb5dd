use std::time::Duration;

use tempfile::tempdir;
use trimline_core::{CoreConfig, diagnostics::init_tracing_from_config};

#[test]
fn config_file_overrides_sections() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("trimline.config.toml");
    std::fs::write(
        &path,
        r#"
[history]
quiet_period_ms = 750
infer_value_batches = false

[preview]
capacity = 4
ttl_secs = 60
task_ceiling_secs = 15

[thumbnails]
max_dimension = 96

[waveform]
buckets = 64

[renderer]
pixels_per_second = 100.0

[diagnostics]
trace_file_prefix = "trimline-test"
"#,
    )
    .expect("config should be writable");

    let config = CoreConfig::load_from(&path).expect("config should load");

    let history = config.history_config();
    assert_eq!(history.quiet_period, Duration::from_millis(750));
    assert!(!history.infer_value_batches);
    assert_eq!(history.max_depth, 200);

    let preview = config.preview_cache_config();
    assert_eq!(preview.capacity, 4);
    assert_eq!(preview.ttl, Duration::from_secs(60));
    assert_eq!(preview.task_ceiling, Duration::from_secs(15));

    let renderer = config.renderer_config();
    assert!((renderer.pixels_per_second - 100.0).abs() < f64::EPSILON);
    assert_eq!(renderer.max_dimension, 96);
    assert_eq!(renderer.waveform_buckets, 64);
    assert_eq!(config.waveform_options().buckets, 64);
    assert_eq!(config.diagnostics.trace_file_prefix, "trimline-test");
}

#[test]
fn malformed_config_is_an_error() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("trimline.config.toml");
    std::fs::write(&path, "[preview]\ncapacity = \"lots\"\n").expect("config should be writable");

    let error = CoreConfig::load_from(&path).expect_err("bad types should fail");
    assert!(format!("{error:#}").contains("failed to parse config TOML"));
}

#[test]
fn defaults_match_documented_values() {
    let config = CoreConfig::default();
    assert_eq!(config.history.quiet_period_ms, 500);
    assert_eq!(config.preview.capacity, 10);
    assert_eq!(config.preview.ttl_secs, 300);
    assert_eq!(config.thumbnails.max_dimension, 160);
    assert_eq!(config.waveform.buckets, 200);
    assert_eq!(config.diagnostics.rust_log_filter, "info,trimline_core=trace");
}

#[test]
fn invalid_log_filter_is_reported() {
    let temp = tempdir().expect("tempdir should be creatable");
    let mut config = CoreConfig::default();
    config.diagnostics.logs_dir = temp.path().join("logs");
    config.diagnostics.rust_log_filter = "trimline_core=loud".to_string();

    if std::env::var_os("RUST_LOG").is_none() {
        let error = init_tracing_from_config(&config.diagnostics)
            .err()
            .expect("bad filter should fail");
        assert!(format!("{error:#}").contains("rust_log_filter"));
        assert!(!temp.path().join("logs").exists());
    }
}

#[test]
fn tracing_writes_a_session_log() {
    let temp = tempdir().expect("tempdir should be creatable");
    let mut config = CoreConfig::default();
    config.diagnostics.logs_dir = temp.path().join("logs");
    config.diagnostics.trace_file_prefix = "session".to_string();
    config.diagnostics.console = false;

    let guard = init_tracing_from_config(&config.diagnostics).expect("tracing should initialize");
    tracing::info!("hello from the test");
    let log_file = guard.log_file().to_path_buf();
    drop(guard);
    assert!(log_file.is_file());

    let entries: Vec<_> = std::fs::read_dir(temp.path().join("logs"))
        .expect("log dir should exist")
        .filter_map(Result::ok)
        .collect();
    assert_eq!(entries.len(), 1);
    let name = entries[0].file_name().to_string_lossy().to_string();
    assert!(name.starts_with("session-") && name.ends_with(".log"));
}
