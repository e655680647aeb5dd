//! Key-addressed, size- and age-bounded store of generated preview artifacts.
//!
//! [`PreviewCache::request`] never blocks: it answers from memory, reports an
//! in-flight generation as [`PreviewState::Loading`], replays a remembered
//! failure, or launches a new generation task on the runtime and returns
//! `Loading` immediately.
//!
//! At most one generation per source is outstanding. Requesting a new window
//! for a source cancels the task still working on the previous window; a task
//! only writes its result if it is still the registered task for its source
//! and its token was never cancelled, which is checked under the state lock.

use std::{
    collections::HashMap,
    fmt,
    num::NonZeroUsize,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    clock::{Clock, SystemClock},
    decode::{CancellationToken, DecodeError, MediaDecoder},
    generate::{
        GenerationError, GenerationRequest, PreviewGenerator, PreviewKind, ThumbnailGenerator,
        WaveformGenerator, WaveformOptions, WaveformStrip,
    },
    model::SourceRef,
    time::seconds_to_millis,
};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TASK_CEILING: Duration = Duration::from_secs(120);
pub const DEFAULT_EVENT_BUFFER: usize = 64;

pub type ThumbnailCache<D> = PreviewCache<ThumbnailGenerator<D>>;
pub type WaveformCache<D> = PreviewCache<WaveformGenerator<D>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewCacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    /// Generations still running after this long are abandoned and reported
    /// as [`PreviewError::TimedOut`].
    pub task_ceiling: Duration,
    pub event_buffer: usize,
}

impl Default for PreviewCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
            task_ceiling: DEFAULT_TASK_CEILING,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// `(source, window start, window end)`, with the window quantized to
/// milliseconds. Options are deliberately not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewKey {
    pub source: SourceRef,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl PreviewKey {
    #[must_use]
    pub fn new(source: SourceRef, start: f64, end: f64) -> Self {
        Self {
            source,
            start_ms: seconds_to_millis(start),
            end_ms: seconds_to_millis(end),
        }
    }
}

impl fmt::Display for PreviewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}..{}ms", self.source, self.start_ms, self.end_ms)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PreviewError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("invalid preview window [{start}, {end})")]
    InvalidWindow { start: f64, end: f64 },
    #[error("preview generation exceeded {0:?}")]
    TimedOut(Duration),
    #[error("preview generation task aborted: {0}")]
    TaskAborted(String),
}

/// The three states a previewable item can be in once requested.
#[derive(Debug)]
pub enum PreviewState<T> {
    Ready(Arc<T>),
    Loading,
    Failed(PreviewError),
}

impl<T> PreviewState<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn ready(&self) -> Option<&Arc<T>> {
        match self {
            Self::Ready(artifacts) => Some(artifacts),
            Self::Loading | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&PreviewError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Ready(_) | Self::Loading => None,
        }
    }
}

impl<T> Clone for PreviewState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Ready(artifacts) => Self::Ready(Arc::clone(artifacts)),
            Self::Loading => Self::Loading,
            Self::Failed(error) => Self::Failed(error.clone()),
        }
    }
}

/// Published whenever a generation task resolves. Cancelled tasks publish
/// nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    Ready {
        kind: PreviewKind,
        key: PreviewKey,
    },
    Failed {
        kind: PreviewKind,
        key: PreviewKey,
        error: PreviewError,
    },
}

impl PreviewEvent {
    #[must_use]
    pub fn key(&self) -> &PreviewKey {
        match self {
            Self::Ready { key, .. } | Self::Failed { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub failures: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub evicted_capacity: u64,
    pub evicted_expired: u64,
}

struct CacheEntry<T, O> {
    artifacts: Arc<T>,
    options: O,
    last_access: Instant,
}

struct FailureEntry<O> {
    error: PreviewError,
    options: O,
    recorded_at: Instant,
}

struct InFlight<O> {
    task_id: u64,
    key: PreviewKey,
    options: O,
    token: CancellationToken,
}

enum TaskOutcome<T> {
    Done(T),
    Cancelled,
    Failed(PreviewError),
}

struct CacheState<G: PreviewGenerator> {
    entries: LruCache<PreviewKey, CacheEntry<G::Output, G::Options>>,
    failures: HashMap<PreviewKey, FailureEntry<G::Options>>,
    in_flight: HashMap<SourceRef, InFlight<G::Options>>,
    next_task_id: u64,
    stats: CacheStats,
}

struct Shared<G: PreviewGenerator> {
    generator: G,
    config: PreviewCacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<G>>,
    events: broadcast::Sender<PreviewEvent>,
}

pub struct PreviewCache<G: PreviewGenerator> {
    shared: Arc<Shared<G>>,
    runtime: Handle,
}

impl<G: PreviewGenerator> Clone for PreviewCache<G> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            runtime: self.runtime.clone(),
        }
    }
}

impl<G: PreviewGenerator> PreviewCache<G> {
    #[must_use]
    pub fn new(generator: G, config: PreviewCacheConfig, runtime: Handle) -> Self {
        Self::with_clock(generator, config, runtime, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        generator: G,
        config: PreviewCacheConfig,
        runtime: Handle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let state = CacheState {
            entries: LruCache::new(capacity),
            failures: HashMap::new(),
            in_flight: HashMap::new(),
            next_task_id: 0,
            stats: CacheStats {
                capacity: capacity.get(),
                ..CacheStats::default()
            },
        };

        Self {
            shared: Arc::new(Shared {
                generator,
                config,
                clock,
                state: Mutex::new(state),
                events,
            }),
            runtime,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PreviewKind {
        self.shared.generator.kind()
    }

    #[must_use]
    pub fn config(&self) -> &PreviewCacheConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PreviewEvent> {
        self.shared.events.subscribe()
    }

    /// Returns cached artifacts, `Loading`, or a typed failure for the window
    /// `[start, end)` of `source`. Never blocks on generation.
    #[instrument(
        level = "trace",
        skip(self, source, options),
        fields(kind = %self.kind(), source = %source)
    )]
    pub fn request(
        &self,
        source: &SourceRef,
        start: f64,
        end: f64,
        options: G::Options,
    ) -> PreviewState<G::Output> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
            return PreviewState::Failed(PreviewError::InvalidWindow { start, end });
        }

        let key = PreviewKey::new(source.clone(), start, end);
        let now = self.shared.clock.now();
        let ttl = self.shared.config.ttl;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let expired = state
            .entries
            .peek(&key)
            .is_some_and(|entry| now.saturating_duration_since(entry.last_access) > ttl);
        if expired {
            state.entries.pop(&key);
            state.stats.evicted_expired += 1;
        } else if let Some(entry) = state.entries.get_mut(&key) {
            // Entries generated with other options stay until replaced.
            if entry.options == options {
                entry.last_access = now;
                let artifacts = Arc::clone(&entry.artifacts);
                state.stats.hits += 1;
                trace!(%key, "preview cache hit");
                return PreviewState::Ready(artifacts);
            }
        }

        if let Some(flight) = state.in_flight.get(source) {
            if flight.key == key && flight.options == options {
                trace!(%key, task_id = flight.task_id, "generation already in flight");
                return PreviewState::Loading;
            }
        }

        if let Some(failure) = state.failures.get(&key) {
            let fresh = now.saturating_duration_since(failure.recorded_at) <= ttl;
            if fresh && failure.options == options {
                return PreviewState::Failed(failure.error.clone());
            }
            state.failures.remove(&key);
        }

        if let Some(stale) = state.in_flight.remove(source) {
            stale.token.cancel();
            debug!(
                superseded = %stale.key,
                task_id = stale.task_id,
                "cancelled outstanding generation for source"
            );
        }

        let task_id = state.next_task_id;
        state.next_task_id += 1;
        let token = CancellationToken::new();
        state.in_flight.insert(
            source.clone(),
            InFlight {
                task_id,
                key: key.clone(),
                options: options.clone(),
                token: token.clone(),
            },
        );
        state.stats.started += 1;
        drop(guard);

        debug!(%key, task_id, "preview generation started");
        self.spawn_generation(task_id, key, (start, end), options, token);
        PreviewState::Loading
    }

    /// Looks up a live entry without launching work or refreshing recency.
    #[must_use]
    pub fn peek(&self, key: &PreviewKey) -> Option<Arc<G::Output>> {
        let state = self.shared.state.lock();
        state
            .entries
            .peek(key)
            .map(|entry| Arc::clone(&entry.artifacts))
    }

    #[must_use]
    pub fn contains(&self, key: &PreviewKey) -> bool {
        self.shared.state.lock().entries.contains(key)
    }

    #[must_use]
    pub fn in_flight_key(&self, source: &SourceRef) -> Option<PreviewKey> {
        let state = self.shared.state.lock();
        state.in_flight.get(source).map(|flight| flight.key.clone())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            entries: state.entries.len(),
            failures: state.failures.len(),
            in_flight: state.in_flight.len(),
            ..state.stats.clone()
        }
    }

    /// Evicts entries and remembered failures older than the TTL. Returns the
    /// number of artifact entries removed.
    pub fn cleanup(&self) -> usize {
        self.shared.sweep()
    }

    /// Starts the periodic TTL sweep on the runtime. Dropping the handle stops it.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let shared: Weak<Shared<G>> = Arc::downgrade(&self.shared);
        let interval = interval.max(Duration::from_millis(10));
        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.sweep();
            }
        });
        info!(interval_ms = interval.as_millis(), "preview sweeper started");
        SweeperHandle { task }
    }

    /// Drops everything cached or remembered for `source` and cancels its
    /// outstanding generation.
    #[instrument(skip(self, source), fields(kind = %self.kind(), source = %source))]
    pub fn invalidate_source(&self, source: &SourceRef) {
        let mut state = self.shared.state.lock();
        let stale: Vec<PreviewKey> = state
            .entries
            .iter()
            .filter(|(key, _)| key.source == *source)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            state.entries.pop(key);
        }
        state.failures.retain(|key, _| key.source != *source);
        if let Some(flight) = state.in_flight.remove(source) {
            flight.token.cancel();
        }
        debug!(removed = stale.len(), "source invalidated");
    }

    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.entries.clear();
        state.failures.clear();
        for (_, flight) in state.in_flight.drain() {
            flight.token.cancel();
        }
        debug!(kind = %self.kind(), "preview cache cleared");
    }

    fn spawn_generation(
        &self,
        task_id: u64,
        key: PreviewKey,
        window: (f64, f64),
        options: G::Options,
        token: CancellationToken,
    ) {
        let shared = Arc::clone(&self.shared);
        let runtime = self.runtime.clone();
        let ceiling = shared.config.task_ceiling;

        self.runtime.spawn(async move {
            let worker = Arc::clone(&shared);
            let source = key.source.clone();
            let worker_options = options.clone();
            let worker_token = token.clone();
            let work = runtime.spawn_blocking(move || {
                worker.generator.generate(
                    GenerationRequest {
                        source: &source,
                        start: window.0,
                        end: window.1,
                        options: &worker_options,
                    },
                    &worker_token,
                )
            });

            let outcome = match tokio::time::timeout(ceiling, work).await {
                Ok(Ok(Ok(artifacts))) => TaskOutcome::Done(artifacts),
                Ok(Ok(Err(GenerationError::Cancelled))) => TaskOutcome::Cancelled,
                Ok(Ok(Err(GenerationError::Failed(error)))) => {
                    TaskOutcome::Failed(PreviewError::Decode(error))
                }
                Ok(Err(join_error)) => {
                    TaskOutcome::Failed(PreviewError::TaskAborted(join_error.to_string()))
                }
                Err(_) => {
                    warn!(%key, task_id, ceiling_ms = ceiling.as_millis(), "preview generation timed out");
                    TaskOutcome::Failed(PreviewError::TimedOut(ceiling))
                }
            };

            shared.finish(task_id, key, options, outcome);
            token.cancel();
        });
    }
}

impl<D: MediaDecoder> PreviewCache<WaveformGenerator<D>> {
    /// Waveform requests are naturally phrased as a start plus a duration.
    pub fn request_span(
        &self,
        source: &SourceRef,
        start: f64,
        duration: f64,
        options: WaveformOptions,
    ) -> PreviewState<WaveformStrip> {
        self.request(source, start, start + duration, options)
    }
}

impl<G: PreviewGenerator> Shared<G> {
    fn finish(
        &self,
        task_id: u64,
        key: PreviewKey,
        options: G::Options,
        outcome: TaskOutcome<G::Output>,
    ) {
        let kind = self.generator.kind();
        let now = self.clock.now();
        let mut state = self.state.lock();

        let is_current = state
            .in_flight
            .get(&key.source)
            .is_some_and(|flight| flight.task_id == task_id && !flight.token.is_cancelled());
        if !is_current {
            state.stats.cancelled += 1;
            debug!(%key, task_id, "superseded generation discarded");
            return;
        }
        state.in_flight.remove(&key.source);

        let event = match outcome {
            TaskOutcome::Done(artifacts) => {
                state.failures.remove(&key);
                let entry = CacheEntry {
                    artifacts: Arc::new(artifacts),
                    options,
                    last_access: now,
                };
                if let Some((evicted, _)) = state.entries.push(key.clone(), entry) {
                    if evicted != key {
                        state.stats.evicted_capacity += 1;
                        debug!(%evicted, "least recently used preview evicted");
                    }
                }
                state.stats.completed += 1;
                info!(%key, task_id, %kind, "preview generation completed");
                PreviewEvent::Ready { kind, key }
            }
            TaskOutcome::Cancelled => {
                state.stats.cancelled += 1;
                debug!(%key, task_id, "generation observed cancellation");
                return;
            }
            TaskOutcome::Failed(error) => {
                state.stats.failed += 1;
                warn!(%key, task_id, %kind, %error, "preview generation failed");
                state.failures.insert(
                    key.clone(),
                    FailureEntry {
                        error: error.clone(),
                        options,
                        recorded_at: now,
                    },
                );
                PreviewEvent::Failed { kind, key, error }
            }
        };
        drop(state);

        if self.events.send(event).is_err() {
            trace!("no preview subscribers");
        }
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut state = self.state.lock();

        let expired: Vec<PreviewKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_access) > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        state
            .failures
            .retain(|_, failure| now.saturating_duration_since(failure.recorded_at) <= ttl);
        state.stats.evicted_expired += expired.len() as u64;

        if !expired.is_empty() {
            debug!(
                kind = %self.generator.kind(),
                evicted = expired.len(),
                remaining = state.entries.len(),
                "expired previews swept"
            );
        }
        expired.len()
    }
}

impl<G: PreviewGenerator> fmt::Debug for PreviewCache<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewCache")
            .field("kind", &self.kind())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// Owns the background sweep task; aborts it on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_quantize_to_milliseconds() {
        let source = SourceRef::new("clip.mp4");
        let key = PreviewKey::new(source.clone(), 1.0004, 2.5);
        assert_eq!(key, PreviewKey::new(source, 1.0, 2.5));
        assert_eq!(key.to_string(), "clip.mp4@1000..2500ms");
    }

    #[test]
    fn states_expose_their_payload() {
        let ready = PreviewState::Ready(Arc::new(3_u8));
        assert!(ready.is_ready());
        assert_eq!(ready.ready().map(|value| **value), Some(3));

        let failed: PreviewState<u8> =
            PreviewState::Failed(PreviewError::TimedOut(Duration::from_secs(1)));
        assert!(failed.error().is_some());
        assert!(!failed.clone().is_loading());
    }
}
