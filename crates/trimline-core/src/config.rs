use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    generate::{
        DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION, DEFAULT_THUMBNAIL_COUNT,
        DEFAULT_WAVEFORM_BUCKETS, ThumbnailOptions, WaveformOptions,
    },
    history::{DEFAULT_MAX_DEPTH, DEFAULT_QUIET_PERIOD, HistoryConfig},
    preview::{
        DEFAULT_CAPACITY, DEFAULT_EVENT_BUFFER, DEFAULT_TASK_CEILING, DEFAULT_TTL,
        PreviewCacheConfig,
    },
    renderer::RendererConfig,
};

pub const CONFIG_FILE_NAME: &str = "trimline.config.toml";
pub const CONFIG_PATH_ENV: &str = "TRIMLINE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    pub history: HistorySection,
    pub preview: PreviewSection,
    pub thumbnails: ThumbnailSection,
    pub waveform: WaveformSection,
    pub renderer: RendererSection,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistorySection {
    pub quiet_period_ms: u64,
    pub max_depth: usize,
    pub infer_value_batches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreviewSection {
    pub capacity: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub task_ceiling_secs: u64,
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThumbnailSection {
    pub default_count: usize,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaveformSection {
    pub buckets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererSection {
    pub pixels_per_second: f64,
    pub thumbnail_width_px: f64,
    pub max_thumbnails: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub logs_dir: PathBuf,
    /// Mirrors events to stderr next to the JSON session log.
    pub console: bool,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            quiet_period_ms: DEFAULT_QUIET_PERIOD.as_millis() as u64,
            max_depth: DEFAULT_MAX_DEPTH,
            infer_value_batches: true,
        }
    }
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl_secs: DEFAULT_TTL.as_secs(),
            sweep_interval_secs: 30,
            task_ceiling_secs: DEFAULT_TASK_CEILING.as_secs(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Default for ThumbnailSection {
    fn default() -> Self {
        Self {
            default_count: DEFAULT_THUMBNAIL_COUNT,
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for WaveformSection {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_WAVEFORM_BUCKETS,
        }
    }
}

impl Default for RendererSection {
    fn default() -> Self {
        let defaults = RendererConfig::default();
        Self {
            pixels_per_second: defaults.pixels_per_second,
            thumbnail_width_px: defaults.thumbnail_width_px,
            max_thumbnails: defaults.max_thumbnails,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: crate::diagnostics::DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: "trimline".to_string(),
            logs_dir: PathBuf::from("logs"),
            console: true,
        }
    }
}

impl CoreConfig {
    /// Loads the discovered config file; fails if none exists.
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    /// Like [`CoreConfig::load`], but missing files yield defaults. A file
    /// that exists and fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(_) => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;
        Self::from_toml_str(&content).with_context(|| {
            format!("failed to parse config TOML from {}", config_path.display())
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(content)?;
        Ok(config)
    }

    #[must_use]
    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            quiet_period: Duration::from_millis(self.history.quiet_period_ms),
            max_depth: self.history.max_depth.max(1),
            infer_value_batches: self.history.infer_value_batches,
        }
    }

    #[must_use]
    pub fn preview_cache_config(&self) -> PreviewCacheConfig {
        PreviewCacheConfig {
            capacity: self.preview.capacity.max(1),
            ttl: Duration::from_secs(self.preview.ttl_secs),
            task_ceiling: Duration::from_secs(self.preview.task_ceiling_secs.max(1)),
            event_buffer: self.preview.event_buffer.max(1),
        }
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.preview.sweep_interval_secs.max(1))
    }

    #[must_use]
    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            count: self.thumbnails.default_count.max(1),
            max_dimension: self.thumbnails.max_dimension,
        }
    }

    #[must_use]
    pub fn waveform_options(&self) -> WaveformOptions {
        WaveformOptions {
            buckets: self.waveform.buckets.max(1),
        }
    }

    #[must_use]
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            pixels_per_second: self.renderer.pixels_per_second,
            thumbnail_width_px: self.renderer.thumbnail_width_px,
            max_thumbnails: self.renderer.max_thumbnails,
            max_dimension: self.thumbnails.max_dimension,
            waveform_buckets: self.waveform.buckets,
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
