use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::{runtime::Handle, sync::broadcast::error::RecvError};
use trimline_core::{
    CoreConfig, FileAudioDecoder, HistoryManager, ItemRenderer, MediaDecoder, PreviewCache,
    PreviewGenerator, PreviewKey, PreviewState, RenderSummary, SourceRef, SystemClock,
    ThumbnailGenerator, ThumbnailOptions, WaveformGenerator, WaveformOptions,
    DiagnosticsConfig,
    diagnostics::init_tracing_from_config,
    fixtures::{DEMO_VIDEO_SOURCE, SyntheticDecoder, demo_track_list},
};

#[derive(Debug, Parser)]
#[command(name = "trimline-cli")]
#[command(about = "Headless tools for exercising timeline history and preview generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides `[diagnostics].logs_dir`.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Keeps stderr free of log lines; the session log file is still written.
    #[arg(long)]
    quiet: bool,

    /// Seconds to wait for a preview before giving up.
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replays reset / record / undo / redo on the demo timeline.
    HistoryDemo,
    /// Renders a thumbnail strip from the synthetic demo clip.
    Thumbnails {
        #[arg(long, default_value = DEMO_VIDEO_SOURCE)]
        source: String,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        #[arg(long, default_value_t = 10.0)]
        end: f64,
        #[arg(long, default_value_t = 4)]
        count: usize,
        /// Writes each thumbnail as `<index>.jpg` into this directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Decodes a local audio file and prints its bucketed peaks.
    Waveform {
        #[arg(long)]
        source: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        #[arg(long)]
        duration: Option<f64>,
        #[arg(long)]
        buckets: Option<usize>,
    },
    /// Renders the demo timeline and prints each item's preview state.
    Render,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CoreConfig::load_or_default()?;
    let _telemetry = init_tracing_from_config(&DiagnosticsConfig {
        logs_dir: cli
            .log_dir
            .clone()
            .unwrap_or_else(|| config.diagnostics.logs_dir.clone()),
        console: config.diagnostics.console && !cli.quiet,
        ..config.diagnostics.clone()
    })?;
    let wait = Duration::from_secs(cli.wait_secs.max(1));

    match cli.command {
        Commands::HistoryDemo => history_demo(&config)?,
        Commands::Thumbnails {
            source,
            start,
            end,
            count,
            output_dir,
        } => {
            let cache = PreviewCache::new(
                ThumbnailGenerator::new(SyntheticDecoder::demo())
                    .with_jpeg_quality(config.thumbnails.jpeg_quality),
                config.preview_cache_config(),
                Handle::current(),
            );
            let options = ThumbnailOptions {
                count,
                ..config.thumbnail_options()
            };
            let strip =
                await_preview(&cache, &SourceRef::new(source), start, end, options, wait).await?;

            if let Some(output_dir) = output_dir {
                std::fs::create_dir_all(&output_dir).with_context(|| {
                    format!("failed to create output dir {}", output_dir.display())
                })?;
                for (index, frame) in strip.frames.iter().enumerate() {
                    let path = output_dir.join(format!("{index:02}.jpg"));
                    std::fs::write(&path, &frame.jpeg)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
            }

            let frames: Vec<_> = strip
                .frames
                .iter()
                .map(|frame| {
                    json!({
                        "timestamp": frame.timestamp,
                        "width": frame.width,
                        "height": frame.height,
                        "bytes": frame.jpeg.len(),
                    })
                })
                .collect();
            print_json(&json!({
                "requested_timestamps": strip.requested_timestamps,
                "timestamps": strip.timestamps,
                "frames": frames,
                "stats": cache.stats(),
            }))?;
        }
        Commands::Waveform {
            source,
            start,
            duration,
            buckets,
        } => {
            let decoder = FileAudioDecoder::new();
            let source = SourceRef::new(source.display().to_string());
            let end = match duration {
                Some(duration) => start + duration,
                None => decoder.probe(&source)?.duration_seconds,
            };
            let cache = PreviewCache::new(
                WaveformGenerator::new(decoder),
                config.preview_cache_config(),
                Handle::current(),
            );
            let options = WaveformOptions {
                buckets: buckets.unwrap_or(config.waveform.buckets).max(1),
            };
            let strip = await_preview(&cache, &source, start, end, options, wait).await?;
            print_json(&*strip)?;
        }
        Commands::Render => render_demo(&config, wait).await?,
    }

    Ok(())
}

fn history_demo(config: &CoreConfig) -> anyhow::Result<()> {
    let initial = demo_track_list();
    let history_config = config.history_config();
    let mut history =
        HistoryManager::with_config(initial.clone(), history_config.clone(), Arc::new(SystemClock));
    history.reset(initial);

    let mut edited = history.present().tracks().clone();
    edited
        .find_item_mut("s1")
        .context("demo timeline should contain s1")?
        .end = 5.0;
    let outcome = history.record(edited);

    let mut steps = vec![snapshot("record", &history)];
    history.undo();
    steps.push(snapshot("undo", &history));
    history.redo();
    steps.push(snapshot("redo", &history));

    print_json(&json!({
        "quiet_period_ms": u64::try_from(history_config.quiet_period.as_millis()).unwrap_or(u64::MAX),
        "infer_value_batches": history_config.infer_value_batches,
        "record_outcome": format!("{outcome:?}"),
        "steps": steps,
    }))
}

fn snapshot(step: &str, history: &HistoryManager) -> serde_json::Value {
    json!({
        "step": step,
        "revision": history.present().id(),
        "label": history.present().label(),
        "past": history.past_len(),
        "future": history.future_len(),
        "tracks": history.present().tracks(),
    })
}

async fn render_demo(config: &CoreConfig, wait: Duration) -> anyhow::Result<()> {
    let decoder = Arc::new(SyntheticDecoder::demo());
    let thumbnails = PreviewCache::new(
        ThumbnailGenerator::new(Arc::clone(&decoder)),
        config.preview_cache_config(),
        Handle::current(),
    );
    let waveforms = PreviewCache::new(
        WaveformGenerator::new(decoder),
        config.preview_cache_config(),
        Handle::current(),
    );
    let _sweeper = thumbnails.spawn_sweeper(config.sweep_interval());
    let mut thumbnail_events = thumbnails.subscribe();
    let mut waveform_events = waveforms.subscribe();

    let mut renderer = ItemRenderer::new(thumbnails, waveforms, config.renderer_config());
    let tracks = demo_track_list();
    let mut rendered = renderer.render_tracks(&tracks);

    let deadline = tokio::time::Instant::now() + wait;
    while rendered.iter().any(|item| item.preview.is_loading()) {
        let received = tokio::time::timeout_at(deadline, async {
            tokio::select! {
                event = thumbnail_events.recv() => event,
                event = waveform_events.recv() => event,
            }
        })
        .await
        .context("timed out waiting for previews")?;
        if let Err(RecvError::Closed) = received {
            bail!("preview event channel closed");
        }
        rendered = renderer.render_tracks(&tracks);
    }

    let summaries: Vec<RenderSummary> = rendered.iter().map(RenderSummary::from).collect();
    print_json(&summaries)
}

async fn await_preview<G: PreviewGenerator>(
    cache: &PreviewCache<G>,
    source: &SourceRef,
    start: f64,
    end: f64,
    options: G::Options,
    wait: Duration,
) -> anyhow::Result<Arc<G::Output>> {
    let mut events = cache.subscribe();
    let key = PreviewKey::new(source.clone(), start, end);

    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match cache.request(source, start, end, options.clone()) {
            PreviewState::Ready(artifacts) => return Ok(artifacts),
            PreviewState::Failed(error) => bail!("preview for {key} failed: {error}"),
            PreviewState::Loading => {}
        }

        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .with_context(|| format!("timed out waiting for {key}"))?;
            match event {
                Ok(event) if *event.key() == key => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("preview event channel closed"),
            }
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
