//! Linear undo/redo history over [`TrackList`] revisions.
//!
//! The manager keeps `past`, `present` and `future` revisions. Every observed
//! change goes through [`HistoryManager::record`]; the manager decides whether
//! that change becomes a new undo step, is coalesced into an open batch, or is
//! a no-op because nothing actually changed.
//!
//! Batches come from two places: explicit [`HistoryManager::begin_batch`] /
//! [`HistoryManager::commit_batch`] calls and the host's "is interacting" flag
//! ([`HistoryManager::set_interacting`]). Explicit batches auto-commit once no
//! activity happened for the quiet period; an interaction batch stays open
//! until the flag drops. Undo and redo are silent no-ops while a batch is open.
//!
//! Inputs that cannot report start/end (sliders) are coalesced instead: a
//! change that only moves item `start`/`end`/`payload` values is committed as
//! a step right away, and further value-only changes to the same items within
//! the quiet period replace that step's value rather than pushing new ones.

use std::{
    collections::BTreeSet,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    diff::{ChangeKind, classify_change},
    model::TrackList,
};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    pub quiet_period: Duration,
    /// Upper bound on retained past revisions; the oldest are dropped first.
    pub max_depth: usize,
    pub infer_value_batches: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            quiet_period: DEFAULT_QUIET_PERIOD,
            max_depth: DEFAULT_MAX_DEPTH,
            infer_value_batches: true,
        }
    }
}

/// One immutable Track List snapshot.
#[derive(Debug, Clone)]
pub struct Revision {
    id: Uuid,
    label: &'static str,
    tracks: Arc<TrackList>,
}

impl Revision {
    fn new(tracks: TrackList, label: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            tracks: Arc::new(tracks),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn tracks(&self) -> &TrackList {
        &self.tracks
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryState {
    Idle,
    Batching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOrigin {
    Explicit,
    Interaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Deep-equal to the present revision; nothing recorded.
    Unchanged,
    /// A new undo step was pushed.
    Committed,
    /// The present value moved inside an open batch.
    Batched,
    /// Folded into the newest undo step by value-only coalescing.
    Coalesced,
}

#[derive(Debug)]
struct Batch {
    origin: Revision,
    kind: BatchOrigin,
    last_activity: Instant,
}

// While open, value-only changes to `touched` items replace the present value
// instead of pushing another past revision.
#[derive(Debug)]
struct Coalescing {
    touched: BTreeSet<String>,
    last_activity: Instant,
}

pub struct HistoryManager {
    past: Vec<Revision>,
    present: Revision,
    future: Vec<Revision>,
    batch: Option<Batch>,
    coalescing: Option<Coalescing>,
    interacting: bool,
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
}

impl HistoryManager {
    #[must_use]
    pub fn new(initial: TrackList) -> Self {
        Self::with_config(initial, HistoryConfig::default(), Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_config(initial: TrackList, config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            past: Vec::new(),
            present: Revision::new(initial, "reset"),
            future: Vec::new(),
            batch: None,
            coalescing: None,
            interacting: false,
            config: HistoryConfig {
                max_depth: config.max_depth.max(1),
                ..config
            },
            clock,
        }
    }

    #[must_use]
    pub fn present(&self) -> &Revision {
        &self.present
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> HistoryState {
        if self.batch.is_some() {
            HistoryState::Batching
        } else {
            HistoryState::Idle
        }
    }

    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    #[must_use]
    pub fn batch_origin(&self) -> Option<BatchOrigin> {
        self.batch.as_ref().map(|batch| batch.kind)
    }

    /// Whether value-only changes are currently folded into the newest step.
    #[must_use]
    pub fn is_coalescing(&self) -> bool {
        self.coalescing.is_some()
    }

    #[must_use]
    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.batch.is_none() && !self.past.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.batch.is_none() && !self.future.is_empty()
    }

    #[must_use]
    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    #[must_use]
    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    /// Commits a batch, or ends value-only coalescing, once the quiet period
    /// has elapsed. Returns whether anything was closed.
    ///
    /// Every other operation calls this first, so hosts only need it to close
    /// batches promptly while no further input arrives.
    pub fn poll(&mut self) -> bool {
        let now = self.clock.now();
        if let Some(coalescing) = &self.coalescing {
            if now.saturating_duration_since(coalescing.last_activity) >= self.config.quiet_period {
                trace!(touched = ?coalescing.touched, "quiet period elapsed, coalescing ended");
                self.coalescing = None;
                return true;
            }
        }

        let Some(batch) = &self.batch else {
            return false;
        };
        if batch.kind == BatchOrigin::Interaction {
            return false;
        }
        let idle_for = now.saturating_duration_since(batch.last_activity);
        if idle_for < self.config.quiet_period {
            return false;
        }

        debug!(
            kind = ?batch.kind,
            idle_ms = idle_for.as_millis(),
            "quiet period elapsed, committing batch"
        );
        self.commit_batch();
        true
    }

    #[instrument(level = "trace", skip(self, next), fields(past_len = self.past.len()))]
    pub fn record(&mut self, next: TrackList) -> RecordOutcome {
        self.poll();

        if *self.present.tracks == next {
            trace!("record ignored, track list unchanged");
            return RecordOutcome::Unchanged;
        }

        let now = self.clock.now();
        if let Some(batch) = self.batch.as_mut() {
            batch.last_activity = now;
            self.present = Revision::new(next, "batch");
            return RecordOutcome::Batched;
        }

        let touched = match classify_change(&self.present.tracks, &next) {
            ChangeKind::ValueOnly { touched } if self.config.infer_value_batches => Some(touched),
            _ => None,
        };
        let Some(touched) = touched else {
            self.coalescing = None;
            return self.commit_step(next);
        };

        if let Some(coalescing) = self
            .coalescing
            .as_mut()
            .filter(|coalescing| touched.is_subset(&coalescing.touched))
        {
            coalescing.last_activity = now;
            return self.coalesce_into_newest(next);
        }

        debug!(touched = ?touched, "value-only change, coalescing follow-ups");
        self.coalescing = Some(Coalescing {
            touched,
            last_activity: now,
        });
        self.commit_step(next)
    }

    fn commit_step(&mut self, next: TrackList) -> RecordOutcome {
        let previous = std::mem::replace(&mut self.present, Revision::new(next, "record"));
        self.push_past(previous);
        debug!(past_len = self.past.len(), "history step recorded");
        RecordOutcome::Committed
    }

    // A scrub that lands back on the step's starting value drops the step.
    fn coalesce_into_newest(&mut self, next: TrackList) -> RecordOutcome {
        if self.past.last().is_some_and(|origin| *origin.tracks == next) {
            if let Some(origin) = self.past.pop() {
                self.present = origin;
            }
            self.coalescing = None;
            debug!(past_len = self.past.len(), "coalesced step returned to its start, dropped");
            return RecordOutcome::Coalesced;
        }

        self.present = Revision::new(next, "record");
        trace!("value-only change folded into newest step");
        RecordOutcome::Coalesced
    }

    /// Opens an explicit batch anchored at the present revision, or extends
    /// the one already open.
    #[instrument(skip(self), fields(past_len = self.past.len()))]
    pub fn begin_batch(&mut self) {
        self.poll();

        if self.batch.is_some() {
            self.extend_batch();
            return;
        }
        self.open_batch(BatchOrigin::Explicit);
    }

    pub fn extend_batch(&mut self) {
        let now = self.clock.now();
        if let Some(batch) = self.batch.as_mut() {
            batch.last_activity = now;
        }
    }

    /// Closes the open batch. Pushes exactly one past revision when the batch
    /// changed anything and returns whether it did.
    #[instrument(skip(self), fields(past_len = self.past.len()))]
    pub fn commit_batch(&mut self) -> bool {
        let Some(batch) = self.batch.take() else {
            return false;
        };

        if Arc::ptr_eq(&batch.origin.tracks, &self.present.tracks)
            || *batch.origin.tracks == *self.present.tracks
        {
            debug!(kind = ?batch.kind, "batch closed without changes");
            return false;
        }

        self.present.label = "batch";
        self.push_past(batch.origin);
        info!(kind = ?batch.kind, past_len = self.past.len(), "batch committed");
        true
    }

    /// Reports the host's pointer-interaction flag. `false -> true` opens an
    /// interaction batch, `true -> false` commits it.
    #[instrument(skip(self), fields(was_interacting = self.interacting))]
    pub fn set_interacting(&mut self, interacting: bool) {
        if interacting == self.interacting {
            return;
        }
        self.interacting = interacting;

        if !interacting {
            self.commit_batch();
            return;
        }

        match self.batch.as_mut() {
            Some(batch) => batch.kind = BatchOrigin::Interaction,
            None => self.open_batch(BatchOrigin::Interaction),
        }
    }

    #[instrument(skip(self), fields(past_len = self.past.len(), future_len = self.future.len()))]
    pub fn undo(&mut self) -> Option<&Revision> {
        self.poll();

        if self.batch.is_some() {
            debug!("undo ignored while a batch is open");
            return None;
        }
        self.coalescing = None;
        let previous = self.past.pop()?;
        let current = std::mem::replace(&mut self.present, previous);
        self.future.push(current);
        info!(revision = %self.present.id, "undo applied");
        Some(&self.present)
    }

    #[instrument(skip(self), fields(past_len = self.past.len(), future_len = self.future.len()))]
    pub fn redo(&mut self) -> Option<&Revision> {
        self.poll();

        if self.batch.is_some() {
            debug!("redo ignored while a batch is open");
            return None;
        }
        self.coalescing = None;
        let next = self.future.pop()?;
        let current = std::mem::replace(&mut self.present, next);
        self.past.push(current);
        info!(revision = %self.present.id, "redo applied");
        Some(&self.present)
    }

    /// Drops all history and installs `tracks` as the present revision, so a
    /// freshly loaded project is not itself undoable.
    #[instrument(skip(self, tracks), fields(item_count = tracks.item_count()))]
    pub fn reset(&mut self, tracks: TrackList) {
        self.past.clear();
        self.future.clear();
        self.batch = None;
        self.coalescing = None;
        self.interacting = false;
        self.present = Revision::new(tracks, "reset");
        info!(revision = %self.present.id, "history reset");
    }

    fn open_batch(&mut self, kind: BatchOrigin) {
        self.coalescing = None;
        self.batch = Some(Batch {
            origin: self.present.clone(),
            kind,
            last_activity: self.clock.now(),
        });
        debug!(?kind, "batch opened");
    }

    fn push_past(&mut self, revision: Revision) {
        self.past.push(revision);
        self.future.clear();
        if self.past.len() > self.config.max_depth {
            let overflow = self.past.len() - self.config.max_depth;
            self.past.drain(..overflow);
            trace!(overflow, "dropped oldest history revisions");
        }
    }
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryManager")
            .field("past", &self.past.len())
            .field("present", &self.present.id)
            .field("future", &self.future.len())
            .field("batch", &self.batch_origin())
            .field("coalescing", &self.coalescing.is_some())
            .field("interacting", &self.interacting)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        model::{ItemKind, TimelineItem, Track, TrackKind},
    };

    fn tracks_with_end(end: f64) -> TrackList {
        TrackList::new(vec![
            Track::new("video", TrackKind::Video)
                .with_item(TimelineItem::new("s1", ItemKind::Video, 0.0, end)),
        ])
    }

    fn structural(count: usize) -> TrackList {
        let mut track = Track::new("video", TrackKind::Video);
        for index in 0..count {
            let start = index as f64;
            track.items.push(TimelineItem::new(
                format!("item-{index}"),
                ItemKind::Video,
                start,
                start + 1.0,
            ));
        }
        TrackList::new(vec![track])
    }

    fn manager(clock: &ManualClock) -> HistoryManager {
        HistoryManager::with_config(
            structural(0),
            HistoryConfig::default(),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn new_history_is_idle_and_empty() {
        let history = HistoryManager::new(TrackList::default());
        assert_eq!(history.state(), HistoryState::Idle);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.present().label(), "reset");
    }

    #[test]
    fn structural_changes_commit_immediately() {
        let clock = ManualClock::new();
        let mut history = manager(&clock);

        assert_eq!(history.record(structural(1)), RecordOutcome::Committed);
        assert_eq!(history.record(structural(2)), RecordOutcome::Committed);
        assert_eq!(history.past_len(), 2);
        assert_eq!(history.present().label(), "record");
    }

    #[test]
    fn value_only_changes_coalesce_until_quiet_period() {
        let clock = ManualClock::new();
        let mut history = HistoryManager::with_config(
            tracks_with_end(3.0),
            HistoryConfig::default(),
            Arc::new(clock.clone()),
        );

        assert_eq!(history.record(tracks_with_end(3.1)), RecordOutcome::Committed);
        for step in 2..=5 {
            clock.advance(Duration::from_millis(100));
            let outcome = history.record(tracks_with_end(3.0 + f64::from(step) * 0.1));
            assert_eq!(outcome, RecordOutcome::Coalesced);
        }
        assert_eq!(history.state(), HistoryState::Idle);
        assert!(history.is_coalescing());
        assert_eq!(history.past_len(), 1);
        assert!(!history.poll());

        clock.advance(DEFAULT_QUIET_PERIOD);
        assert!(history.poll());
        assert!(!history.is_coalescing());
        assert_eq!(history.past[0].tracks(), &tracks_with_end(3.0));
        assert_eq!(history.record(tracks_with_end(4.0)), RecordOutcome::Committed);
        assert_eq!(history.past_len(), 2);
    }

    #[test]
    fn coalesced_scrub_back_to_start_drops_the_step() {
        let clock = ManualClock::new();
        let mut history = HistoryManager::with_config(
            tracks_with_end(3.0),
            HistoryConfig::default(),
            Arc::new(clock.clone()),
        );

        history.record(tracks_with_end(3.5));
        history.record(tracks_with_end(3.0));
        assert_eq!(history.past_len(), 0);
        assert!(!history.is_coalescing());
        assert_eq!(history.present().tracks(), &tracks_with_end(3.0));
    }

    #[test]
    fn interaction_batches_ignore_quiet_period() {
        let clock = ManualClock::new();
        let mut history = manager(&clock);

        history.set_interacting(true);
        history.record(structural(1));
        clock.advance(Duration::from_secs(5));
        assert!(!history.poll());
        assert!(history.is_batching());

        history.set_interacting(false);
        assert!(!history.is_batching());
        assert_eq!(history.past_len(), 1);
    }

    #[test]
    fn explicit_batch_extended_by_activity_stays_open() {
        let clock = ManualClock::new();
        let mut history = manager(&clock);

        history.begin_batch();
        for _ in 0..4 {
            clock.advance(Duration::from_millis(400));
            history.extend_batch();
            assert!(!history.poll());
        }
        clock.advance(Duration::from_millis(500));
        assert!(history.poll());
        assert_eq!(history.past_len(), 0, "empty batch records nothing");
    }

    #[test]
    fn depth_bound_drops_oldest() {
        let clock = ManualClock::new();
        let config = HistoryConfig {
            max_depth: 3,
            ..HistoryConfig::default()
        };
        let mut history = HistoryManager::with_config(structural(0), config, Arc::new(clock));

        for count in 1..=6 {
            history.record(structural(count));
        }
        assert_eq!(history.past_len(), 3);
        assert_eq!(history.past[0].tracks(), &structural(3));
    }

    #[test]
    fn reset_clears_batch_and_flag() {
        let clock = ManualClock::new();
        let mut history = manager(&clock);
        history.set_interacting(true);
        history.record(structural(1));

        history.reset(structural(4));
        assert_eq!(history.state(), HistoryState::Idle);
        assert!(!history.is_interacting());
        assert_eq!(history.past_len(), 0);
        assert_eq!(history.present().tracks(), &structural(4));
    }
}
