//! Per-item presentation glue between the timeline model and the preview caches.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    decode::MediaDecoder,
    generate::{
        DEFAULT_MAX_DIMENSION, DEFAULT_WAVEFORM_BUCKETS, PreviewGenerator, ThumbnailOptions,
        ThumbnailStrip, WaveformOptions, WaveformStrip,
    },
    model::{ItemKind, TimelineItem, TrackList},
    preview::{
        PreviewCache, PreviewError, PreviewKey, PreviewState, ThumbnailCache, WaveformCache,
    },
    time::seconds_to_pixels,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub pixels_per_second: f64,
    /// Horizontal space one thumbnail occupies in the strip.
    pub thumbnail_width_px: f64,
    pub max_thumbnails: usize,
    pub max_dimension: u32,
    pub waveform_buckets: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            pixels_per_second: 50.0,
            thumbnail_width_px: 80.0,
            max_thumbnails: 24,
            max_dimension: DEFAULT_MAX_DIMENSION,
            waveform_buckets: DEFAULT_WAVEFORM_BUCKETS,
        }
    }
}

impl RendererConfig {
    /// Number of thumbnails that fit an item `width_px` wide, at least one.
    #[must_use]
    pub fn thumbnail_count(&self, width_px: f64) -> usize {
        if !width_px.is_finite() || width_px <= 0.0 || self.thumbnail_width_px <= 0.0 {
            return 1;
        }
        let fitted = (width_px / self.thumbnail_width_px).ceil() as usize;
        fitted.clamp(1, self.max_thumbnails.max(1))
    }
}

/// What an item shows in place of its preview strip.
#[derive(Debug, Clone)]
pub enum PreviewView {
    /// The item has no decodable media (text, or no source attached).
    Unavailable,
    Loading,
    Thumbnails(Arc<ThumbnailStrip>),
    Waveform(Arc<WaveformStrip>),
    Failed(PreviewError),
}

impl PreviewView {
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Thumbnails(_) | Self::Waveform(_))
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Loading => "loading",
            Self::Thumbnails(_) => "thumbnails",
            Self::Waveform(_) => "waveform",
            Self::Failed(_) => "failed",
        }
    }
}

fn thumbnail_view(state: PreviewState<ThumbnailStrip>) -> PreviewView {
    match state {
        PreviewState::Ready(strip) => PreviewView::Thumbnails(strip),
        PreviewState::Loading => PreviewView::Loading,
        PreviewState::Failed(error) => PreviewView::Failed(error),
    }
}

fn waveform_view(state: PreviewState<WaveformStrip>) -> PreviewView {
    match state {
        PreviewState::Ready(strip) => PreviewView::Waveform(strip),
        PreviewState::Loading => PreviewView::Loading,
        PreviewState::Failed(error) => PreviewView::Failed(error),
    }
}

/// An item augmented with its on-screen geometry and preview state.
#[derive(Debug, Clone)]
pub struct RenderedItem {
    pub item: TimelineItem,
    pub left_px: f64,
    pub width_px: f64,
    pub preview: PreviewView,
    /// Set when the preview was carried over from before a resize began.
    pub frozen: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderSummary {
    pub item_id: String,
    pub left_px: f64,
    pub width_px: f64,
    pub preview: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RenderedItem> for RenderSummary {
    fn from(rendered: &RenderedItem) -> Self {
        Self {
            item_id: rendered.item.id.clone(),
            left_px: rendered.left_px,
            width_px: rendered.width_px,
            preview: rendered.preview.label(),
            error: match &rendered.preview {
                PreviewView::Failed(error) => Some(error.to_string()),
                _ => None,
            },
        }
    }
}

pub struct ItemRenderer<D: MediaDecoder> {
    thumbnails: ThumbnailCache<D>,
    waveforms: WaveformCache<D>,
    config: RendererConfig,
    last_views: HashMap<String, PreviewView>,
    resizing: HashSet<String>,
}

impl<D: MediaDecoder> ItemRenderer<D> {
    #[must_use]
    pub fn new(
        thumbnails: ThumbnailCache<D>,
        waveforms: WaveformCache<D>,
        config: RendererConfig,
    ) -> Self {
        Self {
            thumbnails,
            waveforms,
            config,
            last_views: HashMap::new(),
            resizing: HashSet::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[must_use]
    pub fn is_resizing(&self, item_id: &str) -> bool {
        self.resizing.contains(item_id)
    }

    /// While an item is resizing, rendering reuses its last preview and
    /// issues no cache requests. Ending the resize lets the next render
    /// request the final window.
    pub fn set_resizing(&mut self, item_id: &str, resizing: bool) {
        if resizing {
            self.resizing.insert(item_id.to_string());
        } else {
            self.resizing.remove(item_id);
        }
        debug!(item_id, resizing, "item resize state changed");
    }

    pub fn render(&mut self, item: &TimelineItem) -> RenderedItem {
        let left_px = seconds_to_pixels(item.start, self.config.pixels_per_second);
        let width_px = seconds_to_pixels(item.duration(), self.config.pixels_per_second);

        if self.resizing.contains(&item.id) {
            let preview = self
                .last_views
                .get(&item.id)
                .cloned()
                .unwrap_or(PreviewView::Loading);
            trace!(item_id = %item.id, "resize in progress, preview frozen");
            return RenderedItem {
                item: item.clone(),
                left_px,
                width_px,
                preview,
                frozen: true,
            };
        }

        let preview = self.request_preview(item, width_px);
        self.last_views.insert(item.id.clone(), preview.clone());
        RenderedItem {
            item: item.clone(),
            left_px,
            width_px,
            preview,
            frozen: false,
        }
    }

    /// Renders every item in track order and forgets state for items that no
    /// longer exist.
    pub fn render_tracks(&mut self, tracks: &TrackList) -> Vec<RenderedItem> {
        let rendered: Vec<RenderedItem> = tracks
            .tracks
            .iter()
            .flat_map(|track| track.items.iter())
            .map(|item| self.render(item))
            .collect();

        let live: HashSet<&str> = rendered.iter().map(|entry| entry.item.id.as_str()).collect();
        self.last_views.retain(|item_id, _| live.contains(item_id.as_str()));
        self.resizing.retain(|item_id| live.contains(item_id.as_str()));
        rendered
    }

    pub fn forget(&mut self, item_id: &str) {
        self.last_views.remove(item_id);
        self.resizing.remove(item_id);
    }

    // Items split from one source share its single in-flight slot. An item
    // whose window is not the one in flight waits instead of cancelling it.
    fn request_preview(&self, item: &TimelineItem, width_px: f64) -> PreviewView {
        let Some(source) = item.source.as_ref() else {
            return PreviewView::Unavailable;
        };
        let (media_start, media_end) = item.media_window();
        let key = PreviewKey::new(source.clone(), media_start, media_end);

        match item.kind {
            ItemKind::Video => {
                if sibling_in_flight(&self.thumbnails, &key) {
                    trace!(item_id = %item.id, "source busy with another window");
                    return self
                        .thumbnails
                        .peek(&key)
                        .map_or(PreviewView::Loading, PreviewView::Thumbnails);
                }
                let options = ThumbnailOptions {
                    count: self.config.thumbnail_count(width_px),
                    max_dimension: self.config.max_dimension,
                };
                thumbnail_view(self.thumbnails.request(source, media_start, media_end, options))
            }
            ItemKind::Audio => {
                if sibling_in_flight(&self.waveforms, &key) {
                    trace!(item_id = %item.id, "source busy with another window");
                    return self
                        .waveforms
                        .peek(&key)
                        .map_or(PreviewView::Loading, PreviewView::Waveform);
                }
                let options = WaveformOptions {
                    buckets: self.config.waveform_buckets,
                };
                waveform_view(self.waveforms.request_span(
                    source,
                    media_start,
                    media_end - media_start,
                    options,
                ))
            }
            ItemKind::Other => PreviewView::Unavailable,
        }
    }
}

fn sibling_in_flight<G: PreviewGenerator>(cache: &PreviewCache<G>, key: &PreviewKey) -> bool {
    cache
        .in_flight_key(&key.source)
        .is_some_and(|in_flight| in_flight != *key)
}
