//! CLI command implementations

use crate::output::{state_line, to_json, OutputFormat};
use console::style;
use hbbtv_player_core::adapter::{
    DashEngine, DashEngineEvent, HlsEngine, HlsEngineEvent, HlsErrorDetail,
};
use hbbtv_player_core::surface::SurfaceEvent;
use hbbtv_player_core::testing::{FakeDashEngine, FakeHlsEngine, FakeSurface};
use hbbtv_player_core::{
    detect_type, AdaptationSet, DefaultAdapterFactory, EngineEvent, Intent, MediaType,
    PlaybackType, PlayerConfig, PlayerRuntime, PlayerState, Representation, Resolution,
    SwitchReason, TimeRange, Variant, VideoSurface,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Detect playback types
pub fn detect(urls: &[String], format: &str) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct Detection<'a> {
        url: &'a str,
        playback_type: PlaybackType,
    }

    let detections: Vec<Detection> = urls
        .iter()
        .map(|url| Detection {
            url,
            playback_type: detect_type(url),
        })
        .collect();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&detections)),
        OutputFormat::Text => {
            for detection in &detections {
                println!(
                    "{:<7} {}",
                    style(detection.playback_type).green().bold(),
                    detection.url
                );
            }
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn show_config(config: &PlayerConfig, format: &str) -> anyhow::Result<()> {
    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(config)),
        OutputFormat::Text => {
            println!("Player configuration:");
            println!("  Max retries:      {}", config.retry.max_retries);
            println!("  Base delay:       {}ms", config.retry.base_delay_ms);
            println!("  Autoplay:         {}", config.autoplay);
            println!("  Loop playback:    {}", config.loop_playback);
            println!("  Queue warn depth: {}", config.queue_warn_depth);
        }
    }
    Ok(())
}

/// Knobs of a simulated session
pub struct SimulateOptions {
    pub duration: f64,
    pub seek: Option<f64>,
    pub manifest_failures: u32,
    pub block_autoplay: bool,
}

/// Wait until everything queued so far has been reduced
async fn settle(runtime: &PlayerRuntime) -> anyhow::Result<()> {
    runtime.dispatch(EngineEvent::Mounted).await?;
    Ok(())
}

fn ladder() -> Vec<(u64, Resolution)> {
    vec![
        (800_000, Resolution::new(640, 360)),
        (2_500_000, Resolution::new(1280, 720)),
        (5_000_000, Resolution::new(1920, 1080)),
    ]
}

/// Run a scripted session against in-memory engines
pub async fn simulate(
    url: &str,
    config: PlayerConfig,
    options: SimulateOptions,
    format: &str,
) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let retry = config.retry;

    let hls = FakeHlsEngine::new();
    let dash = FakeDashEngine::new();
    let (hls_engine, dash_engine) = (hls.clone(), dash.clone());
    let factory = DefaultAdapterFactory::new()
        .with_hls_engine(move || hls_engine.clone() as Arc<dyn HlsEngine>)
        .with_dash_engine(move || dash_engine.clone() as Arc<dyn DashEngine>);
    let runtime = PlayerRuntime::new(Arc::new(factory), config)?;

    let surface = FakeSurface::new();
    surface.block_autoplay(options.block_autoplay);
    runtime.mount(surface.clone()).await?;

    let step = Arc::new(AtomicUsize::new(0));
    let last: Arc<Mutex<Option<PlayerState>>> = Arc::new(Mutex::new(None));
    let printed = Arc::clone(&step);
    let _subscription = runtime.subscribe(move |state| {
        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
        if last.as_ref() != Some(state) {
            let n = printed.fetch_add(1, Ordering::SeqCst) + 1;
            println!("{}", state_line(n, state, format));
            *last = Some(state.clone());
        }
    });

    info!(url, "Simulating playback");
    runtime
        .dispatch(Intent::LoadRequested {
            url: url.to_string(),
        })
        .await?;

    let duration = options.duration.max(1.0);
    match runtime.playback_type() {
        Some(PlaybackType::Hls) => {
            hls.emit(HlsEngineEvent::ManifestLoading { url: url.to_string() });
            for attempt in 0..options.manifest_failures {
                hls.emit(HlsEngineEvent::Error {
                    detail: HlsErrorDetail::ManifestParsingError,
                    fatal: true,
                    message: "simulated playlist failure".into(),
                    url: Some(url.to_string()),
                    frag_index: None,
                });
                settle(&runtime).await?;
                if runtime.state().is_error() {
                    break;
                }
                warn!(attempt = attempt + 1, "Waiting for manifest retry");
                tokio::time::sleep(retry.delay_for(attempt) + Duration::from_millis(10)).await;
            }
            if !runtime.state().is_error() {
                let levels = ladder()
                    .into_iter()
                    .enumerate()
                    .map(|(index, (bandwidth, resolution))| Variant {
                        index,
                        bandwidth,
                        resolution: Some(resolution),
                        codecs: Some("avc1.640028,mp4a.40.2".into()),
                        name: Some(resolution.quality_name().to_string()),
                    })
                    .collect();
                hls.emit(HlsEngineEvent::ManifestParsed {
                    url: url.to_string(),
                    levels,
                    duration,
                });
                hls.emit(HlsEngineEvent::LevelSwitching {
                    from_level: 0,
                    to_level: 1,
                    reason: SwitchReason::Initial,
                });
                hls.emit(HlsEngineEvent::LevelSwitched {
                    level: 1,
                    bandwidth: 2_500_000,
                    resolution: Some(Resolution::new(1280, 720)),
                });
            }
        }
        Some(PlaybackType::Dash) => {
            dash.emit(DashEngineEvent::ManifestLoadingStarted { url: url.to_string() });
            for attempt in 0..options.manifest_failures {
                dash.emit(DashEngineEvent::Error {
                    code: 25,
                    message: "simulated MPD failure".into(),
                    media_type: None,
                    segment_index: None,
                    url: Some(url.to_string()),
                });
                settle(&runtime).await?;
                if runtime.state().is_error() {
                    break;
                }
                warn!(attempt = attempt + 1, "Waiting for MPD retry");
                tokio::time::sleep(retry.delay_for(attempt) + Duration::from_millis(10)).await;
            }
            if !runtime.state().is_error() {
                let representations: Vec<Representation> = ladder()
                    .into_iter()
                    .map(|(bandwidth, resolution)| Representation {
                        id: resolution.quality_name().to_string(),
                        bandwidth,
                        resolution: Some(resolution),
                        codecs: Some("avc1.640028".into()),
                    })
                    .collect();
                let selected = representations[1].clone();
                dash.emit(DashEngineEvent::ManifestLoaded {
                    url: url.to_string(),
                    adaptation_sets: vec![AdaptationSet {
                        id: "0".into(),
                        media_type: MediaType::Video,
                        representations,
                    }],
                    duration,
                    is_dynamic: false,
                });
                dash.emit(DashEngineEvent::QualityChangeRendered {
                    media_type: MediaType::Video,
                    representation: selected,
                });
            }
        }
        _ => {
            surface.set_media(duration, 1280, 720);
            surface.fire(SurfaceEvent::LoadedMetadata);
        }
    }
    settle(&runtime).await?;
    surface.set_media(duration, 1280, 720);

    if !runtime.state().is_error() {
        play_through(&runtime, &surface, duration, options.seek).await?;
    }

    let final_state = runtime.state();
    runtime.destroy().await?;

    if format == OutputFormat::Text {
        let steps = step.load(Ordering::SeqCst);
        let verdict = if final_state.is_error() {
            style("failed").red().bold()
        } else {
            style("completed").green().bold()
        };
        println!(
            "\nSimulation {} after {} transitions, final state {}",
            verdict,
            steps,
            final_state.tag()
        );
    }
    Ok(())
}

/// Play, report progress, seek, stall and run to the end
async fn play_through(
    runtime: &PlayerRuntime,
    surface: &FakeSurface,
    duration: f64,
    seek: Option<f64>,
) -> anyhow::Result<()> {
    let buffered_to = |end: f64| vec![TimeRange::new(0.0, end.min(duration))];

    runtime.dispatch(Intent::PlayRequested).await?;
    if runtime.state().is_error() {
        return Ok(());
    }
    surface.set_paused(false);
    surface.set_position(0.0, buffered_to(duration * 0.25));
    surface.fire(SurfaceEvent::Playing);

    for quarter in 1..=2 {
        let time = duration * 0.1 * quarter as f64;
        surface.set_position(time, buffered_to(time + duration * 0.25));
        surface.fire(SurfaceEvent::TimeUpdate);
    }
    settle(runtime).await?;

    let target = seek.unwrap_or(duration / 2.0);
    runtime.dispatch(Intent::SeekRequested { time: target }).await?;
    surface.fire(SurfaceEvent::Seeked);

    surface.fire(SurfaceEvent::Waiting);
    let resumed = surface.current_time();
    surface.set_position(resumed, buffered_to(resumed + duration * 0.1));
    surface.fire(SurfaceEvent::Playing);

    surface.set_position(duration, buffered_to(duration));
    surface.fire(SurfaceEvent::Ended);
    settle(runtime).await?;
    Ok(())
}
