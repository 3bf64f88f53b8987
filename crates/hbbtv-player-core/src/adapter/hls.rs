//! HLS adapter over an hls.js-style engine
//!
//! The engine parses playlists and feeds the media element; this adapter
//! translates its callbacks into engine events and owns the retry policy
//! for manifest and fragment failures.

use super::wiring::{wire_surface_events, Forwarding, RetryScheduler, SourceSlot, SurfaceSlot};
use super::{EngineListener, PlaybackAdapter};
use crate::config::PlayerConfig;
use crate::error::AdapterError;
use crate::event::{EngineEvent, HlsEvent};
use crate::listeners::{Callback, Listeners, Subscription};
use crate::retry::{RetryDecision, RetryKey, RetryLedger};
use crate::surface::SharedSurface;
use crate::types::{PlaybackType, Resolution, SwitchReason, Variant};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, instrument, warn};

/// Error details reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HlsErrorDetail {
    ManifestLoadError,
    ManifestParsingError,
    LevelLoadError,
    FragLoadError,
    FragParsingError,
    KeySystemError,
    BufferAppendError,
    Other(String),
}

/// Callbacks of an HLS engine
#[derive(Debug, Clone, PartialEq)]
pub enum HlsEngineEvent {
    ManifestLoading {
        url: String,
    },
    ManifestParsed {
        url: String,
        levels: Vec<Variant>,
        duration: f64,
    },
    LevelSwitching {
        from_level: usize,
        to_level: usize,
        reason: SwitchReason,
    },
    LevelSwitched {
        level: usize,
        bandwidth: u64,
        resolution: Option<Resolution>,
    },
    FragLoading {
        index: u64,
        url: String,
    },
    Error {
        detail: HlsErrorDetail,
        fatal: bool,
        message: String,
        url: Option<String>,
        frag_index: Option<u64>,
    },
}

/// Segmented HLS engine bound to a media element
pub trait HlsEngine: Send + Sync {
    /// Whether the environment can run the engine (MSE available etc.)
    fn is_supported(&self) -> bool;
    fn attach_media(&self, surface: SharedSurface) -> Result<(), AdapterError>;
    fn detach_media(&self);
    /// Start loading a playlist; also the manifest retry primitive
    fn load_source(&self, url: &str);
    /// Resume fragment loading; the fragment retry primitive
    fn start_load(&self);
    fn destroy(&self);
    fn subscribe(&self, listener: Callback<HlsEngineEvent>) -> Subscription;
}

struct HlsInner {
    engine: Arc<dyn HlsEngine>,
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

/// Adapter for `.m3u8` sources
pub struct HlsAdapter {
    inner: Arc<HlsInner>,
}

impl HlsAdapter {
    /// Wrap `engine`; fails when the engine cannot run here
    pub fn new(engine: Arc<dyn HlsEngine>, config: PlayerConfig) -> Result<Self, AdapterError> {
        if !engine.is_supported() {
            return Err(AdapterError::EngineNotSupported {
                engine: "hls".into(),
            });
        }

        let inner = Arc::new(HlsInner {
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

        let weak: Weak<HlsInner> = Arc::downgrade(&inner);
        let engine_subscription = inner.engine.subscribe(Arc::new(move |event: &HlsEngineEvent| {
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

impl HlsInner {
    fn emit(&self, event: impl Into<EngineEvent>) {
        self.listeners.emit(&event.into());
    }

    fn on_engine_event(self: &Arc<Self>, event: &HlsEngineEvent) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        match event {
            HlsEngineEvent::ManifestLoading { url } => {
                self.emit(HlsEvent::ManifestLoading { url: url.clone() });
            }
            HlsEngineEvent::ManifestParsed {
                url,
                levels,
                duration,
            } => {
                info!(url = %url, variants = levels.len(), "HLS manifest parsed");
                self.emit(HlsEvent::ManifestParsed {
                    url: url.clone(),
                    variants: levels.clone(),
                    duration: *duration,
                });
                if self.config.autoplay {
                    self.autoplay();
                }
            }
            HlsEngineEvent::LevelSwitching {
                from_level,
                to_level,
                reason,
            } => {
                self.emit(HlsEvent::AdaptiveSwitching {
                    from_variant: *from_level,
                    to_variant: *to_level,
                    reason: *reason,
                });
            }
            HlsEngineEvent::LevelSwitched {
                level,
                bandwidth,
                resolution,
            } => {
                self.emit(HlsEvent::VariantSelected {
                    variant: *level,
                    bandwidth: *bandwidth,
                    resolution: *resolution,
                });
            }
            HlsEngineEvent::FragLoading { index, url } => {
                self.emit(HlsEvent::SegmentLoading {
                    segment_index: *index,
                    segment_url: url.clone(),
                });
            }
            HlsEngineEvent::Error {
                detail,
                fatal,
                message,
                url,
                frag_index,
            } => self.on_engine_error(detail, *fatal, message, url.as_deref(), *frag_index),
        }
    }

    fn on_engine_error(
        self: &Arc<Self>,
        detail: &HlsErrorDetail,
        fatal: bool,
        message: &str,
        url: Option<&str>,
        frag_index: Option<u64>,
    ) {
        let message = message.to_string();
        let failure = match detail {
            HlsErrorDetail::ManifestLoadError | HlsErrorDetail::ManifestParsingError => {
                match url.map(str::to_string).or_else(|| self.source.get()) {
                    Some(url) => AdapterError::Manifest { url, message },
                    None => AdapterError::Network(message),
                }
            }
            HlsErrorDetail::LevelLoadError => match url {
                Some(url) => AdapterError::LoadFailed {
                    url: url.to_string(),
                    message,
                },
                None if fatal => AdapterError::Network(message),
                None => {
                    debug!(?detail, "Non-fatal HLS level error without URL");
                    return;
                }
            },
            HlsErrorDetail::FragLoadError | HlsErrorDetail::FragParsingError => match url {
                Some(url) => AdapterError::Segment {
                    resource: url.to_string(),
                    message,
                },
                None if fatal => AdapterError::Network(message),
                None => {
                    debug!(?detail, "Non-fatal HLS fragment error without URL");
                    return;
                }
            },
            HlsErrorDetail::KeySystemError => AdapterError::Drm(message),
            HlsErrorDetail::BufferAppendError => AdapterError::Decode(message),
            HlsErrorDetail::Other(name) if fatal => AdapterError::Engine {
                detail: name.clone(),
                message,
            },
            HlsErrorDetail::Other(name) => {
                debug!(detail = %name, "Non-fatal HLS error left to the engine");
                return;
            }
        };

        if !failure.is_recoverable() {
            warn!(error = %failure, code = failure.error_code(), "HLS engine failure");
            self.surface_failure(&failure, url);
            return;
        }
        match &failure {
            AdapterError::Manifest { url, .. } => self.retry_manifest(url.clone(), &failure),
            AdapterError::Segment { resource: url, .. } | AdapterError::LoadFailed { url, .. } => {
                self.retry_fragment(url.clone(), frag_index.unwrap_or(0), &failure)
            }
            _ => self.surface_failure(&failure, url),
        }
    }

    fn retry_manifest(self: &Arc<Self>, url: String, failure: &AdapterError) {
        let decision = lock(&self.ledger).record_failure(&RetryKey::Manifest(url.clone()));
        match decision {
            RetryDecision::Retry { retry_count, delay } => {
                warn!(
                    url = %url,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying HLS manifest"
                );
                self.emit(HlsEvent::ManifestParseError {
                    url: url.clone(),
                    retry_count,
                });
                let weak = Arc::downgrade(self);
                self.retries.schedule(delay, move || async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.engine.load_source(&url);
                    }
                });
            }
            RetryDecision::GiveUp { retries } => {
                warn!(url = %url, retries, "HLS manifest retries exhausted");
                self.give_up(failure, retries, &url);
            }
        }
    }

    fn retry_fragment(self: &Arc<Self>, url: String, index: u64, failure: &AdapterError) {
        let decision = lock(&self.ledger).record_failure(&RetryKey::Fragment(url.clone()));
        match decision {
            RetryDecision::Retry { retry_count, delay } => {
                warn!(url = %url, index, retry_count, "Retrying HLS fragment");
                self.emit(HlsEvent::SegmentLoadError {
                    segment_index: index,
                    segment_url: url,
                    retry_count,
                });
                let weak = Arc::downgrade(self);
                self.retries.schedule(delay, move || async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.engine.start_load();
                    }
                });
            }
            RetryDecision::GiveUp { retries } => {
                warn!(url = %url, index, retries, "HLS fragment retries exhausted");
                self.give_up(failure, retries, &url);
            }
        }
    }

    fn give_up(&self, failure: &AdapterError, retries: u32, url: &str) {
        let mut error = failure.to_engine_error().with_url(url);
        error.message = format!("{} (after {} retries)", error.message, retries);
        self.emit(error);
    }

    fn surface_failure(&self, failure: &AdapterError, url: Option<&str>) {
        let mut error = failure.to_engine_error();
        if let Some(url) = url {
            error = error.with_url(url);
        }
        self.emit(error);
    }

    fn autoplay(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.retries.schedule(std::time::Duration::ZERO, move || async move {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.surface.play().await {
                    warn!(error = %e, "HLS autoplay rejected");
                }
            }
        });
    }
}

#[async_trait]
impl PlaybackAdapter for HlsAdapter {
    fn kind(&self) -> PlaybackType {
        PlaybackType::Hls
    }

    fn name(&self) -> &str {
        "hls"
    }

    #[instrument(skip(self, surface))]
    async fn mount(&self, surface: SharedSurface) -> Result<(), AdapterError> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return Err(AdapterError::InitializationFailed("adapter already destroyed".into()));
        }

        inner.engine.attach_media(Arc::clone(&surface))?;
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

        debug!("HLS engine attached to surface");
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
        inner.engine.load_source(url);
        info!(url, "HLS source attached");
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
        if inner.surface.take().is_some() {
            inner.engine.detach_media();
        }
        inner.engine.destroy();
        inner.source.clear();
        inner.listeners.clear();
        lock(&inner.ledger).clear();
        debug!("HLS adapter destroyed");
    }

    fn subscribe(&self, listener: EngineListener) -> Subscription {
        self.inner.listeners.add(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EngineErrorKind;
    use crate::testing::{EngineCall, FakeHlsEngine, FakeSurface};
    use std::time::Duration;

    struct Harness {
        adapter: HlsAdapter,
        engine: Arc<FakeHlsEngine>,
        seen: Arc<Mutex<Vec<EngineEvent>>>,
    }

    async fn mounted() -> Harness {
        let engine = FakeHlsEngine::new();
        let adapter = HlsAdapter::new(engine.clone(), PlayerConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        adapter.subscribe(Arc::new(move |event: &EngineEvent| {
            lock(&sink).push(event.clone());
        }));
        adapter.mount(FakeSurface::new()).await.unwrap();
        adapter.load("https://cdn.example.com/master.m3u8").await.unwrap();
        Harness { adapter, engine, seen }
    }

    fn manifest_error() -> HlsEngineEvent {
        HlsEngineEvent::Error {
            detail: HlsErrorDetail::ManifestParsingError,
            fatal: true,
            message: "no EXTM3U delimiter".into(),
            url: Some("https://cdn.example.com/master.m3u8".into()),
            frag_index: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_retries_then_surfaces() {
        let h = mounted().await;
        let loads = || {
            h.engine
                .calls()
                .iter()
                .filter(|c| matches!(c, EngineCall::LoadSource(_)))
                .count()
        };
        assert_eq!(loads(), 1);

        for expected_retry in 1..=3u32 {
            h.engine.emit(manifest_error());
            let last = lock(&h.seen).last().cloned();
            assert_eq!(
                last,
                Some(EngineEvent::Hls(HlsEvent::ManifestParseError {
                    url: "https://cdn.example.com/master.m3u8".into(),
                    retry_count: expected_retry,
                }))
            );
            // backoff is 1s, 2s, 3s
            tokio::time::sleep(Duration::from_millis(1000 * expected_retry as u64 + 10)).await;
            assert_eq!(loads(), 1 + expected_retry as usize);
        }

        h.engine.emit(manifest_error());
        match lock(&h.seen).last() {
            Some(EngineEvent::Error(error)) => {
                assert_eq!(error.kind, EngineErrorKind::Network);
                assert_eq!(error.url.as_deref(), Some("https://cdn.example.com/master.m3u8"));
            }
            other => panic!("expected surfaced error, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(loads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragment_retry_uses_start_load() {
        let h = mounted().await;
        h.engine.emit(HlsEngineEvent::Error {
            detail: HlsErrorDetail::FragLoadError,
            fatal: false,
            message: "404".into(),
            url: Some("seg7.ts".into()),
            frag_index: Some(7),
        });

        assert_eq!(
            lock(&h.seen).last().cloned(),
            Some(EngineEvent::Hls(HlsEvent::SegmentLoadError {
                segment_index: 7,
                segment_url: "seg7.ts".into(),
                retry_count: 1,
            }))
        );
        tokio::time::sleep(Duration::from_millis(1010)).await;
        assert!(h.engine.calls().contains(&EngineCall::StartLoad));
        assert_eq!(h.adapter.retry_attempts(&RetryKey::Fragment("seg7.ts".into())), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragment_retries_exhausted_surface_network_error() {
        let h = mounted().await;
        let frag_error = || HlsEngineEvent::Error {
            detail: HlsErrorDetail::FragLoadError,
            fatal: false,
            message: "timeout".into(),
            url: Some("seg3.ts".into()),
            frag_index: Some(3),
        };

        for retry in 1..=3u64 {
            h.engine.emit(frag_error());
            tokio::time::sleep(Duration::from_millis(1000 * retry + 10)).await;
        }
        let start_loads = || {
            h.engine
                .calls()
                .iter()
                .filter(|c| matches!(c, EngineCall::StartLoad))
                .count()
        };
        assert_eq!(start_loads(), 3);

        h.engine.emit(frag_error());
        match lock(&h.seen).last() {
            Some(EngineEvent::Error(error)) => {
                assert_eq!(error.kind, EngineErrorKind::Network);
                assert_eq!(error.url.as_deref(), Some("seg3.ts"));
                assert_eq!(error.cause.as_deref(), Some("SEGMENT"));
            }
            other => panic!("expected surfaced error, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(start_loads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_level_load_error_is_retried() {
        let h = mounted().await;
        h.engine.emit(HlsEngineEvent::Error {
            detail: HlsErrorDetail::LevelLoadError,
            fatal: false,
            message: "level 404".into(),
            url: Some("level_720.m3u8".into()),
            frag_index: None,
        });
        assert_eq!(
            h.adapter
                .retry_attempts(&RetryKey::Fragment("level_720.m3u8".into())),
            1
        );
        tokio::time::sleep(Duration::from_millis(1010)).await;
        assert!(h.engine.calls().contains(&EngineCall::StartLoad));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_pending_retry() {
        let h = mounted().await;
        h.engine.emit(manifest_error());
        h.adapter.destroy().await;
        h.adapter.destroy().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let calls = h.engine.calls();
        assert_eq!(
            calls.iter().filter(|c| matches!(c, EngineCall::LoadSource(_))).count(),
            1
        );
        assert!(calls.contains(&EngineCall::Destroy));
        assert_eq!(h.engine.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let h = mounted().await;
        h.engine.emit(HlsEngineEvent::Error {
            detail: HlsErrorDetail::BufferAppendError,
            fatal: true,
            message: "append failed".into(),
            url: None,
            frag_index: None,
        });
        match lock(&h.seen).last() {
            Some(EngineEvent::Error(error)) => assert_eq!(error.kind, EngineErrorKind::Decode),
            other => panic!("expected decode error, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn test_protocol_events_translated() {
        let h = mounted().await;
        h.engine.emit(HlsEngineEvent::LevelSwitching {
            from_level: 0,
            to_level: 2,
            reason: SwitchReason::Abr,
        });
        h.engine.emit(HlsEngineEvent::LevelSwitched {
            level: 2,
            bandwidth: 3_000_000,
            resolution: Some(Resolution::new(1280, 720)),
        });
        let seen = lock(&h.seen);
        assert_eq!(seen[0], EngineEvent::Mounted);
        assert!(seen.contains(&EngineEvent::Hls(HlsEvent::AdaptiveSwitching {
            from_variant: 0,
            to_variant: 2,
            reason: SwitchReason::Abr,
        })));
        assert!(seen.contains(&EngineEvent::Hls(HlsEvent::VariantSelected {
            variant: 2,
            bandwidth: 3_000_000,
            resolution: Some(Resolution::new(1280, 720)),
        })));
    }
}
