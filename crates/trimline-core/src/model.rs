use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("item {item_id} has an empty or inverted window [{start}, {end})")]
    InvalidWindow { item_id: String, start: f64, end: f64 },
    #[error("item {item_id} has media window end {media_end} before start {media_start}")]
    InvalidMediaWindow {
        item_id: String,
        media_start: f64,
        media_end: f64,
    },
    #[error("items {first} and {second} overlap on track {track_id}")]
    Overlap {
        track_id: String,
        first: String,
        second: String,
    },
}

/// Stable identity of a decodable asset: a URL or an opaque file handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The full multi-track timeline value. This is the unit the history snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackList {
    pub tracks: Vec<Track>,
}

impl TrackList {
    #[must_use]
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.tracks.iter().map(|track| track.items.len()).sum()
    }

    #[must_use]
    pub fn find_item(&self, item_id: &str) -> Option<&TimelineItem> {
        self.tracks
            .iter()
            .flat_map(|track| track.items.iter())
            .find(|item| item.id == item_id)
    }

    pub fn find_item_mut(&mut self, item_id: &str) -> Option<&mut TimelineItem> {
        self.tracks
            .iter_mut()
            .flat_map(|track| track.items.iter_mut())
            .find(|item| item.id == item_id)
    }

    /// Checks every item window and the no-overlap rule within each track.
    pub fn validate(&self) -> Result<(), ModelError> {
        for track in &self.tracks {
            track.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub kind: TrackKind,
    pub items: Vec<TimelineItem>,
}

impl Track {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: TimelineItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for item in &self.items {
            item.validate()?;
        }

        let mut ordered: Vec<&TimelineItem> = self.items.iter().collect();
        ordered.sort_by(|left, right| left.start.total_cmp(&right.start));
        for pair in ordered.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(ModelError::Overlap {
                    track_id: self.id.clone(),
                    first: pair[0].id.clone(),
                    second: pair[1].id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    Voiceover,
    Music,
    Text,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Video,
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: String,
    pub kind: ItemKind,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl TimelineItem {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ItemKind, start: f64, end: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            start,
            end,
            media_start: None,
            media_end: None,
            source: None,
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<SourceRef>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_media_window(mut self, media_start: f64, media_end: f64) -> Self {
        self.media_start = Some(media_start);
        self.media_end = Some(media_end);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// The sub-range of the source asset mapped onto `[start, end)`.
    ///
    /// Missing bounds default to a window that starts at zero and spans the
    /// visible duration.
    #[must_use]
    pub fn media_window(&self) -> (f64, f64) {
        let media_start = self.media_start.unwrap_or(0.0).max(0.0);
        let media_end = self
            .media_end
            .unwrap_or(media_start + self.duration())
            .max(media_start);
        (media_start, media_end)
    }

    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.start.is_finite() || !self.end.is_finite() || self.end <= self.start {
            return Err(ModelError::InvalidWindow {
                item_id: self.id.clone(),
                start: self.start,
                end: self.end,
            });
        }
        if let (Some(media_start), Some(media_end)) = (self.media_start, self.media_end) {
            if !media_start.is_finite() || !media_end.is_finite() || media_end < media_start {
                return Err(ModelError::InvalidMediaWindow {
                    item_id: self.id.clone(),
                    media_start,
                    media_end,
                });
            }
        }
        Ok(())
    }
}
