//! DASH adapter over a dash.js-style engine

use super::wiring::{wire_surface_events, Forwarding, RetryScheduler, SourceSlot, SurfaceSlot};
use super::{EngineListener, PlaybackAdapter};
use crate::config::PlayerConfig;
use crate::error::AdapterError;
use crate::event::{DashEvent, EngineError, EngineEvent};
use crate::listeners::{Callback, Listeners, Subscription};
use crate::retry::{RetryDecision, RetryKey, RetryLedger};
use crate::surface::SharedSurface;
use crate::types::{AdaptationSet, MediaType, PlaybackType, Representation, SwitchReason};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, instrument, warn};

/// Callbacks of a DASH engine
#[derive(Debug, Clone, PartialEq)]
pub enum DashEngineEvent {
    ManifestLoadingStarted {
        url: String,
    },
    ManifestLoaded {
        url: String,
        adaptation_sets: Vec<AdaptationSet>,
        duration: f64,
        is_dynamic: bool,
    },
    QualityChangeRequested {
        media_type: MediaType,
        old_quality: usize,
        new_quality: usize,
        reason: SwitchReason,
    },
    QualityChangeRendered {
        media_type: MediaType,
        representation: Representation,
    },
    FragmentLoadingStarted {
        media_type: MediaType,
        index: u64,
    },
    /// Numeric engine error code plus whatever context the engine knows
    Error {
        code: u32,
        message: String,
        media_type: Option<MediaType>,
        segment_index: Option<u64>,
        url: Option<String>,
    },
}

/// What a DASH error code means for the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashErrorClass {
    /// MPD download or parse failure (codes 25–27)
    Mpd,
    /// Media or init segment download failure
    Segment,
    NotSupported,
    Decode,
    Drm,
    Other,
}

/// Classify a dash.js error code
pub fn classify_dash_error(code: u32) -> DashErrorClass {
    match code {
        25..=27 => DashErrorClass::Mpd,
        17 | 28 => DashErrorClass::Segment,
        23 | 24 | 35 => DashErrorClass::NotSupported,
        20 | 21 => DashErrorClass::Decode,
        100.. => DashErrorClass::Drm,
        _ => DashErrorClass::Other,
    }
}

/// MPEG-DASH engine bound to a media element
pub trait DashEngine: Send + Sync {
    fn is_supported(&self) -> bool;
    /// Bind to the surface; `autoplay` starts playback once possible
    fn initialize(&self, surface: SharedSurface, autoplay: bool) -> Result<(), AdapterError>;
    /// Attach an MPD; also the retry primitive for MPD and segment failures
    fn attach_source(&self, url: &str);
    fn reset(&self);
    fn subscribe(&self, listener: Callback<DashEngineEvent>) -> Subscription;
}

struct DashInner {
    engine: Arc<dyn DashEngine>,
    config: PlayerConfig,
    listeners: Listeners<EngineEvent>,
    ledger: Mutex<RetryLedger>,
    surface: SurfaceSlot,
    source: SourceSlot,
    subscriptions: Mutex<Vec<Subscription>>,
    retries: RetryScheduler,
    destroyed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Adapter for `.mpd` sources
pub struct DashAdapter {
    inner: Arc<DashInner>,
}

impl DashAdapter {
    pub fn new(engine: Arc<dyn DashEngine>, config: PlayerConfig) -> Result<Self, AdapterError> {
        if !engine.is_supported() {
            return Err(AdapterError::EngineNotSupported {
                engine: "dash".into(),
            });
        }

        let inner = Arc::new(DashInner {
            ledger: Mutex::new(RetryLedger::new(config.retry)),
            engine,
            config,
            listeners: Listeners::new(),
            surface: SurfaceSlot::default(),
            source: SourceSlot::default(),
            subscriptions: Mutex::new(Vec::new()),
            retries: RetryScheduler::new()?,
            destroyed: AtomicBool::new(false),
        });

        let weak: Weak<DashInner> = Arc::downgrade(&inner);
        let engine_subscription = inner.engine.subscribe(Arc::new(move |event: &DashEngineEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_engine_event(event);
            }
        }));
        lock(&inner.subscriptions).push(engine_subscription);

        Ok(Self { inner })
    }

    /// Retries spent on `key` so far
    pub fn retry_attempts(&self, key: &RetryKey) -> u32 {
        lock(&self.inner.ledger).attempts(key)
    }
}

impl DashInner {
    fn emit(&self, event: impl Into<EngineEvent>) {
        self.listeners.emit(&event.into());
    }

    fn on_engine_event(self: &Arc<Self>, event: &DashEngineEvent) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        match event {
            DashEngineEvent::ManifestLoadingStarted { url } => {
                self.emit(DashEvent::MpdLoading { url: url.clone() });
            }
            DashEngineEvent::ManifestLoaded {
                url,
                adaptation_sets,
                duration,
                is_dynamic,
            } => {
                info!(
                    url = %url,
                    adaptation_sets = adaptation_sets.len(),
                    is_dynamic,
                    "MPD parsed"
                );
                self.emit(DashEvent::MpdParsed {
                    url: url.clone(),
                    adaptation_sets: adaptation_sets.clone(),
                    duration: *duration,
                    is_dynamic: *is_dynamic,
                });
            }
            DashEngineEvent::QualityChangeRequested {
                media_type,
                old_quality,
                new_quality,
                reason,
            } => {
                self.emit(DashEvent::QualitySwitching {
                    media_type: *media_type,
                    from_quality: *old_quality,
                    to_quality: *new_quality,
                    reason: *reason,
                });
            }
            DashEngineEvent::QualityChangeRendered {
                media_type,
                representation,
            } => {
                self.emit(DashEvent::RepresentationSelected {
                    media_type: *media_type,
                    representation_id: representation.id.clone(),
                    bandwidth: representation.bandwidth,
                    resolution: representation.resolution,
                });
            }
            DashEngineEvent::FragmentLoadingStarted { media_type, index } => {
                self.emit(DashEvent::SegmentDownloading {
                    media_type: *media_type,
                    segment_index: *index,
                });
            }
            DashEngineEvent::Error {
                code,
                message,
                media_type,
                segment_index,
                url,
            } => self.on_engine_error(*code, message, *media_type, *segment_index, url.as_deref()),
        }
    }

    fn on_engine_error(
        self: &Arc<Self>,
        code: u32,
        message: &str,
        media_type: Option<MediaType>,
        segment_index: Option<u64>,
        url: Option<&str>,
    ) {
        let class = classify_dash_error(code);
        debug!(code, ?class, "DASH engine error");

        let message = message.to_string();
        let failure = match class {
            DashErrorClass::Mpd => match url.map(str::to_string).or_else(|| self.source.get()) {
                Some(url) => AdapterError::Manifest { url, message },
                None => AdapterError::Network(message),
            },
            DashErrorClass::Segment => match (media_type, segment_index) {
                (Some(media_type), Some(index)) => AdapterError::Segment {
                    resource: format!("{} segment {}", media_type, index),
                    message,
                },
                _ => AdapterError::Network(message),
            },
            DashErrorClass::NotSupported => AdapterError::FormatNotSupported(message),
            DashErrorClass::Decode => AdapterError::Decode(message),
            DashErrorClass::Drm => AdapterError::Drm(message),
            DashErrorClass::Other => AdapterError::Engine {
                detail: code.to_string(),
                message,
            },
        };

        if !failure.is_recoverable() {
            warn!(code, error = %failure, "DASH engine failure");
            self.surface_failure(&failure, code, url);
            return;
        }
        match (&failure, media_type, segment_index) {
            (AdapterError::Manifest { url, .. }, _, _) => {
                self.retry_mpd(url.clone(), code, &failure)
            }
            (AdapterError::Segment { .. }, Some(media_type), Some(index)) => {
                self.retry_segment(media_type, index, code, &failure)
            }
            _ => self.surface_failure(&failure, code, url),
        }
    }

    fn retry_mpd(self: &Arc<Self>, url: String, code: u32, failure: &AdapterError) {
        let decision = lock(&self.ledger).record_failure(&RetryKey::Mpd(url.clone()));
        match decision {
            RetryDecision::Retry { retry_count, delay } => {
                warn!(
                    url = %url,
                    code,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying MPD"
                );
                self.emit(DashEvent::MpdParseError {
                    url: url.clone(),
                    retry_count,
                });
                let weak = Arc::downgrade(self);
                self.retries.schedule(delay, move || async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.engine.attach_source(&url);
                    }
                });
            }
            RetryDecision::GiveUp { retries } => {
                warn!(url = %url, retries, "MPD retries exhausted");
                self.give_up(failure, code, retries, Some(url.as_str()));
            }
        }
    }

    fn retry_segment(
        self: &Arc<Self>,
        media_type: MediaType,
        index: u64,
        code: u32,
        failure: &AdapterError,
    ) {
        let decision = lock(&self.ledger).record_failure(&RetryKey::Segment { media_type, index });
        match decision {
            RetryDecision::Retry { retry_count, delay } => {
                warn!(%media_type, index, retry_count, "Retrying DASH segment");
                self.emit(DashEvent::SegmentDownloadError {
                    media_type,
                    segment_index: index,
                    retry_count,
                });
                let weak = Arc::downgrade(self);
                self.retries.schedule(delay, move || async move {
                    if let Some(inner) = weak.upgrade() {
                        if let Some(url) = inner.source.get() {
                            inner.engine.attach_source(&url);
                        }
                    }
                });
            }
            RetryDecision::GiveUp { retries } => {
                warn!(%media_type, index, retries, "DASH segment retries exhausted");
                self.give_up(failure, code, retries, None);
            }
        }
    }

    fn give_up(&self, failure: &AdapterError, code: u32, retries: u32, url: Option<&str>) {
        let mut error = engine_error(failure, code, url);
        error.message = format!("{} (after {} retries)", error.message, retries);
        self.emit(error);
    }

    fn surface_failure(&self, failure: &AdapterError, code: u32, url: Option<&str>) {
        self.emit(engine_error(failure, code, url));
    }
}

/// Surfaced DASH failures carry the engine's numeric code as cause
fn engine_error(failure: &AdapterError, code: u32, url: Option<&str>) -> EngineError {
    let mut error = failure
        .to_engine_error()
        .with_cause(format!("dash error code {}", code));
    if let Some(url) = url {
        error = error.with_url(url);
    }
    error
}

#[async_trait]
impl PlaybackAdapter for DashAdapter {
    fn kind(&self) -> PlaybackType {
        PlaybackType::Dash
    }

    fn name(&self) -> &str {
        "dash"
    }

    #[instrument(skip(self, surface))]
    async fn mount(&self, surface: SharedSurface) -> Result<(), AdapterError> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return Err(AdapterError::InitializationFailed("adapter already destroyed".into()));
        }

        inner
            .engine
            .initialize(Arc::clone(&surface), inner.config.autoplay)?;
        let wiring = wire_surface_events(
            &surface,
            inner.listeners.clone(),
            inner.source.clone(),
            Forwarding {
                element_errors: false,
            },
        );
        lock(&inner.subscriptions).push(wiring);
        inner.surface.set(surface);

        debug!("DASH engine initialized on surface");
        inner.emit(EngineEvent::Mounted);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, url: &str) -> Result<(), AdapterError> {
        let inner = &self.inner;
        if !inner.surface.is_mounted() {
            return Err(AdapterError::NotMounted);
        }
        inner.source.set(url);
        inner.engine.attach_source(url);
        info!(url, "DASH source attached");
        Ok(())
    }

    async fn play(&self) -> Result<(), AdapterError> {
        self.inner.surface.play().await
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.inner.surface.pause()
    }

    async fn seek(&self, time: f64) -> Result<(), AdapterError> {
        self.inner.surface.seek(time)
    }

    async fn set_volume(&self, volume: f64) -> Result<(), AdapterError> {
        self.inner.surface.set_volume(volume)
    }

    async fn set_muted(&self, muted: bool) -> Result<(), AdapterError> {
        self.inner.surface.set_muted(muted)
    }

    async fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.retries.cancel_all();
        let subscriptions: Vec<Subscription> = lock(&inner.subscriptions).drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        inner.surface.take();
        inner.engine.reset();
        inner.source.clear();
        inner.listeners.clear();
        lock(&inner.ledger).clear();
        debug!("DASH adapter destroyed");
    }

    fn subscribe(&self, listener: EngineListener) -> Subscription {
        self.inner.listeners.add(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EngineErrorKind;
    use crate::testing::{EngineCall, FakeDashEngine, FakeSurface};
    use std::time::Duration;

    struct Harness {
        adapter: DashAdapter,
        engine: Arc<FakeDashEngine>,
        seen: Arc<Mutex<Vec<EngineEvent>>>,
    }

    async fn mounted() -> Harness {
        let engine = FakeDashEngine::new();
        let adapter = DashAdapter::new(engine.clone(), PlayerConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        adapter.subscribe(Arc::new(move |event: &EngineEvent| {
            lock(&sink).push(event.clone());
        }));
        adapter.mount(FakeSurface::new()).await.unwrap();
        adapter.load("https://cdn.example.com/stream.mpd").await.unwrap();
        Harness { adapter, engine, seen }
    }

    fn attaches(engine: &FakeDashEngine) -> usize {
        engine
            .calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::AttachSource(_)))
            .count()
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_dash_error(25), DashErrorClass::Mpd);
        assert_eq!(classify_dash_error(27), DashErrorClass::Mpd);
        assert_eq!(classify_dash_error(28), DashErrorClass::Segment);
        assert_eq!(classify_dash_error(35), DashErrorClass::NotSupported);
        assert_eq!(classify_dash_error(21), DashErrorClass::Decode);
        assert_eq!(classify_dash_error(111), DashErrorClass::Drm);
        assert_eq!(classify_dash_error(16), DashErrorClass::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mpd_parse_error_retried_three_times() {
        let h = mounted().await;
        let parse_error = || DashEngineEvent::Error {
            code: 26,
            message: "parse failure".into(),
            media_type: None,
            segment_index: None,
            url: None,
        };

        for retry in 1..=3u32 {
            h.engine.emit(parse_error());
            assert_eq!(
                lock(&h.seen).last().cloned(),
                Some(EngineEvent::Dash(DashEvent::MpdParseError {
                    url: "https://cdn.example.com/stream.mpd".into(),
                    retry_count: retry,
                }))
            );
            tokio::time::sleep(Duration::from_millis(1000 * retry as u64 + 10)).await;
            assert_eq!(attaches(&h.engine), 1 + retry as usize);
        }
        assert_eq!(
            h.adapter
                .retry_attempts(&RetryKey::Mpd("https://cdn.example.com/stream.mpd".into())),
            3
        );

        h.engine.emit(parse_error());
        assert!(matches!(lock(&h.seen).last(), Some(EngineEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_errors_keyed_by_type_and_index() {
        let h = mounted().await;
        let segment_error = |media_type, index| DashEngineEvent::Error {
            code: 28,
            message: "timeout".into(),
            media_type: Some(media_type),
            segment_index: Some(index),
            url: None,
        };

        h.engine.emit(segment_error(MediaType::Video, 4));
        h.engine.emit(segment_error(MediaType::Audio, 4));
        h.engine.emit(segment_error(MediaType::Video, 4));

        let seen = lock(&h.seen).clone();
        let retry_counts: Vec<(MediaType, u32)> = seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Dash(DashEvent::SegmentDownloadError {
                    media_type,
                    retry_count,
                    ..
                }) => Some((*media_type, *retry_count)),
                _ => None,
            })
            .collect();
        assert_eq!(
            retry_counts,
            vec![(MediaType::Video, 1), (MediaType::Audio, 1), (MediaType::Video, 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_retries_exhausted_surface_network_error() {
        let h = mounted().await;
        let segment_error = || DashEngineEvent::Error {
            code: 17,
            message: "segment 404".into(),
            media_type: Some(MediaType::Video),
            segment_index: Some(9),
            url: None,
        };

        for retry in 1..=3u64 {
            h.engine.emit(segment_error());
            tokio::time::sleep(Duration::from_millis(1000 * retry + 10)).await;
        }
        assert_eq!(attaches(&h.engine), 4);
        assert_eq!(
            h.adapter.retry_attempts(&RetryKey::Segment {
                media_type: MediaType::Video,
                index: 9
            }),
            3
        );

        h.engine.emit(segment_error());
        match lock(&h.seen).last() {
            Some(EngineEvent::Error(error)) => {
                assert_eq!(error.kind, EngineErrorKind::Network);
                assert_eq!(error.cause.as_deref(), Some("dash error code 17"));
            }
            other => panic!("expected surfaced error, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(attaches(&h.engine), 4);
    }

    #[tokio::test]
    async fn test_unknown_code_surfaces_without_retry() {
        let h = mounted().await;
        h.engine.emit(DashEngineEvent::Error {
            code: 16,
            message: "unexpected".into(),
            media_type: None,
            segment_index: None,
            url: None,
        });
        match lock(&h.seen).last() {
            Some(EngineEvent::Error(error)) => assert_eq!(error.kind, EngineErrorKind::Unknown),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(attaches(&h.engine), 1);
    }

    #[tokio::test]
    async fn test_drm_error_is_fatal() {
        let h = mounted().await;
        h.engine.emit(DashEngineEvent::Error {
            code: 111,
            message: "license request failed".into(),
            media_type: None,
            segment_index: None,
            url: None,
        });
        match lock(&h.seen).last() {
            Some(EngineEvent::Error(error)) => {
                assert_eq!(error.kind, EngineErrorKind::Media);
                assert_eq!(error.cause.as_deref(), Some("dash error code 111"));
            }
            other => panic!("expected error, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn test_destroy_resets_engine_once() {
        let h = mounted().await;
        h.adapter.destroy().await;
        h.adapter.destroy().await;
        let resets = h
            .engine
            .calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Reset))
            .count();
        assert_eq!(resets, 1);
        assert_eq!(h.adapter.play().await, Err(AdapterError::NotMounted));
    }
}
