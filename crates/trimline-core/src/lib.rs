pub mod audio_decoder;
pub mod clock;
pub mod config;
pub mod decode;
pub mod diagnostics;
pub mod diff;
pub mod fixtures;
pub mod generate;
pub mod history;
pub mod model;
pub mod preview;
pub mod renderer;
pub mod time;

pub use audio_decoder::FileAudioDecoder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CONFIG_FILE_NAME, CONFIG_PATH_ENV, CoreConfig, DiagnosticsConfig};
pub use decode::{
    CancellationToken, DecodeError, DecodedAudio, DecodedFrame, MediaDecoder, MediaInfo,
    MediaTrack,
};
pub use diagnostics::{
    DEFAULT_LOG_FILTER, TelemetryGuard, init_tracing, init_tracing_from_config,
};
pub use diff::{ChangeKind, classify_change};
pub use generate::{
    GenerationError, GenerationRequest, PreviewGenerator, PreviewKind, Thumbnail,
    ThumbnailGenerator, ThumbnailOptions, ThumbnailStrip, WaveformGenerator, WaveformOptions,
    WaveformStrip,
};
pub use history::{
    BatchOrigin, HistoryConfig, HistoryManager, HistoryState, RecordOutcome, Revision,
};
pub use model::{ItemKind, ModelError, SourceRef, TimelineItem, Track, TrackKind, TrackList};
pub use preview::{
    CacheStats, PreviewCache, PreviewCacheConfig, PreviewError, PreviewEvent, PreviewKey,
    PreviewState, SweeperHandle, ThumbnailCache, WaveformCache,
};
pub use renderer::{ItemRenderer, PreviewView, RenderSummary, RenderedItem, RendererConfig};
