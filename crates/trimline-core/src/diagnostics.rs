//! Tracing setup for the CLI and embedding hosts.
//!
//! Every session writes a JSON log file named `<prefix>-<timestamp>.log` under
//! the configured directory. A compact console layer on stderr is optional so
//! hosts that print JSON on stdout stay machine-readable.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_LOG_FILTER: &str = "info,trimline_core=trace";

/// Keeps the session log writer alive; logs stop flushing once this is dropped.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    log_file: PathBuf,
    _file_guard: WorkerGuard,
}

impl TelemetryGuard {
    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

pub fn init_tracing(log_dir: impl Into<PathBuf>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_from_config(&DiagnosticsConfig {
        logs_dir: log_dir.into(),
        ..DiagnosticsConfig::default()
    })
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter.
/// A second call still opens a session log but leaves the first subscriber in
/// place.
pub fn init_tracing_from_config(config: &DiagnosticsConfig) -> anyhow::Result<TelemetryGuard> {
    let filter = session_filter(&config.rust_log_filter)?;
    fs::create_dir_all(&config.logs_dir).with_context(|| {
        format!(
            "failed to create log directory: {}",
            config.logs_dir.display()
        )
    })?;

    let session_id = Uuid::new_v4();
    let file_name = format!(
        "{}-{}.log",
        config.trace_file_prefix,
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    let log_file = config.logs_dir.join(&file_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&config.logs_dir, file_name));

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(true)
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let session_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    match tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(session_layer)
        .try_init()
    {
        Ok(()) => info!(
            %session_id,
            log_file = %log_file.display(),
            console = config.console,
            "tracing initialized"
        ),
        Err(error) => warn!(?error, "global tracing subscriber already initialized"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _file_guard: file_guard,
    })
}

fn session_filter(configured: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_filter(configured),
    }
}

fn parse_filter(directives: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .with_context(|| format!("invalid rust_log_filter directives `{directives}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(parse_filter(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn unknown_level_is_rejected() {
        let error = parse_filter("trimline_core=loud").expect_err("bad level should fail");
        assert!(format!("{error:#}").contains("trimline_core=loud"));
    }
}
