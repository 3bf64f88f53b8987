//! Helpers shared by the adapter implementations
//!
//! Adapters compose these instead of inheriting from a common base:
//! - [`wire_surface_events`] translates element notifications into engine events
//! - [`SurfaceSlot`] holds the mounted surface and implements the control calls
//! - [`SourceSlot`] remembers the URL currently attached
//! - [`RetryScheduler`] runs delayed retries and cancels them on teardown

use crate::error::AdapterError;
use crate::event::EngineEvent;
use crate::listeners::{Listeners, Subscription};
use crate::surface::{MediaErrorCode, PlayRejection, ReadyState, SharedSurface, SurfaceEvent};
use crate::types::PlaybackSnapshot;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// URL currently attached to an adapter
#[derive(Debug, Clone, Default)]
pub struct SourceSlot {
    url: Arc<Mutex<Option<String>>>,
}

impl SourceSlot {
    pub fn set(&self, url: &str) {
        *lock(&self.url) = Some(url.to_string());
    }

    pub fn get(&self) -> Option<String> {
        lock(&self.url).clone()
    }

    pub fn clear(&self) {
        *lock(&self.url) = None;
    }
}

/// Which element notifications an adapter forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forwarding {
    /// Forward element errors; streaming engines report their own instead
    pub element_errors: bool,
}

/// Subscribe to `surface` and re-emit its notifications as [`EngineEvent`]s.
///
/// Every playback event carries a snapshot captured at the moment the
/// element notified.
pub fn wire_surface_events(
    surface: &SharedSurface,
    emitter: Listeners<EngineEvent>,
    source: SourceSlot,
    forwarding: Forwarding,
) -> Subscription {
    let weak = Arc::downgrade(surface);
    let last_audio = Mutex::new((surface.volume(), surface.muted()));

    surface.subscribe(Arc::new(move |event: &SurfaceEvent| {
        let Some(surface) = weak.upgrade() else {
            return;
        };
        let snapshot = || PlaybackSnapshot::capture(surface.as_ref());

        let translated = match event {
            // Late notification for a source that has since been cleared
            SurfaceEvent::LoadedMetadata if surface.ready_state() < ReadyState::HaveMetadata => {
                debug!("Metadata notification without metadata ignored");
                Vec::new()
            }
            SurfaceEvent::LoadedMetadata => vec![EngineEvent::MetadataLoaded {
                url: source.get().unwrap_or_default(),
                duration: snapshot().duration,
                width: surface.video_width(),
                height: surface.video_height(),
            }],
            SurfaceEvent::TimeUpdate => vec![EngineEvent::TimeUpdated { snapshot: snapshot() }],
            SurfaceEvent::Playing => vec![EngineEvent::Playing { snapshot: snapshot() }],
            SurfaceEvent::Pause => vec![EngineEvent::Paused { snapshot: snapshot() }],
            SurfaceEvent::Waiting => vec![EngineEvent::Waiting { snapshot: snapshot() }],
            SurfaceEvent::Seeked => vec![EngineEvent::Seeked { snapshot: snapshot() }],
            SurfaceEvent::Ended => vec![EngineEvent::Ended { snapshot: snapshot() }],
            SurfaceEvent::VolumeChange => {
                let volume = surface.volume();
                let muted = surface.muted();
                let mut last = lock(&last_audio);
                let mut changed = Vec::new();
                if (last.0 - volume).abs() > f64::EPSILON {
                    changed.push(EngineEvent::VolumeChanged { volume });
                }
                if last.1 != muted {
                    changed.push(EngineEvent::MutedChanged { muted });
                }
                *last = (volume, muted);
                changed
            }
            SurfaceEvent::Error { code, message } if forwarding.element_errors => {
                let mut error = media_failure(*code, message).to_engine_error();
                if let Some(url) = source.get() {
                    error = error.with_url(url);
                }
                vec![EngineEvent::Error(error)]
            }
            SurfaceEvent::Error { code, .. } => {
                debug!(?code, "Element error left to the streaming engine");
                Vec::new()
            }
            SurfaceEvent::Progress | SurfaceEvent::CanPlay => Vec::new(),
        };

        for engine_event in &translated {
            trace!(?engine_event, "Surface event translated");
            emitter.emit(engine_event);
        }
    }))
}

fn media_failure(code: MediaErrorCode, message: &str) -> AdapterError {
    let message = message.to_string();
    match code {
        MediaErrorCode::Aborted => AdapterError::Aborted,
        MediaErrorCode::Network => AdapterError::Network(message),
        MediaErrorCode::Decode => AdapterError::Decode(message),
        MediaErrorCode::SrcNotSupported => AdapterError::FormatNotSupported(message),
    }
}

/// Mounted surface plus the control calls every adapter shares
#[derive(Default)]
pub struct SurfaceSlot {
    surface: Mutex<Option<SharedSurface>>,
}

impl SurfaceSlot {
    pub fn set(&self, surface: SharedSurface) {
        *lock(&self.surface) = Some(surface);
    }

    pub fn take(&self) -> Option<SharedSurface> {
        lock(&self.surface).take()
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.surface).is_some()
    }

    /// The mounted surface, or [`AdapterError::NotMounted`]
    pub fn get(&self) -> Result<SharedSurface, AdapterError> {
        lock(&self.surface).clone().ok_or(AdapterError::NotMounted)
    }

    pub async fn play(&self) -> Result<(), AdapterError> {
        let surface = self.get()?;
        surface.play().await.map_err(|rejection| match rejection {
            PlayRejection::NotAllowed => AdapterError::AutoplayBlocked,
            PlayRejection::Other(message) => AdapterError::PlayFailed(message),
        })
    }

    pub fn pause(&self) -> Result<(), AdapterError> {
        self.get()?.pause();
        Ok(())
    }

    pub fn seek(&self, time: f64) -> Result<(), AdapterError> {
        self.get()?.set_current_time(time);
        Ok(())
    }

    pub fn set_volume(&self, volume: f64) -> Result<(), AdapterError> {
        self.get()?.set_volume(volume.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), AdapterError> {
        self.get()?.set_muted(muted);
        Ok(())
    }
}

/// Delayed retry tasks owned by one adapter
pub struct RetryScheduler {
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancelled: Arc<AtomicBool>,
}

impl RetryScheduler {
    /// Bind to the current tokio runtime
    pub fn new() -> Result<Self, AdapterError> {
        let handle = Handle::try_current().map_err(|e| {
            AdapterError::InitializationFailed(format!("no async runtime available: {}", e))
        })?;
        Ok(Self {
            handle,
            tasks: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run `action` after `delay` unless the scheduler is cancelled first
    pub fn schedule<F, Fut>(&self, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let cancelled = Arc::clone(&self.cancelled);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.load(Ordering::SeqCst) {
                action().await;
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Abort every pending retry; later `schedule` calls are ignored
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.tasks).iter().filter(|task| !task.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EngineErrorKind;
    use crate::testing::FakeSurface;
    use crate::types::TimeRange;
    use std::sync::atomic::AtomicUsize;

    fn collect(emitter: &Listeners<EngineEvent>) -> Arc<Mutex<Vec<EngineEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = emitter.add(Arc::new(move |event: &EngineEvent| {
            lock(&sink).push(event.clone());
        }));
        seen
    }

    #[test]
    fn test_translates_with_snapshot() {
        let fake = FakeSurface::new();
        let surface: SharedSurface = fake.clone();
        let emitter = Listeners::new();
        let seen = collect(&emitter);
        let source = SourceSlot::default();
        source.set("video.mp4");
        surface.set_source(Some("video.mp4"));

        let _wiring = wire_surface_events(
            &surface,
            emitter.clone(),
            source,
            Forwarding { element_errors: true },
        );

        fake.set_media(120.0, 1920, 1080);
        fake.set_position(12.5, vec![TimeRange::new(0.0, 30.0)]);
        fake.fire(SurfaceEvent::LoadedMetadata);
        fake.fire(SurfaceEvent::Waiting);
        fake.fire(SurfaceEvent::Error {
            code: MediaErrorCode::Decode,
            message: "corrupt".into(),
        });

        let seen = lock(&seen);
        assert_eq!(
            seen[0],
            EngineEvent::MetadataLoaded {
                url: "video.mp4".into(),
                duration: 120.0,
                width: 1920,
                height: 1080
            }
        );
        match &seen[1] {
            EngineEvent::Waiting { snapshot } => {
                assert_eq!(snapshot.current_time, 12.5);
                assert_eq!(snapshot.buffered, vec![TimeRange::new(0.0, 30.0)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &seen[2] {
            EngineEvent::Error(error) => {
                assert_eq!(error.kind, EngineErrorKind::Decode);
                assert_eq!(error.url.as_deref(), Some("video.mp4"));
                assert_eq!(error.cause.as_deref(), Some("DECODE"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_element_errors_can_be_suppressed() {
        let fake = FakeSurface::new();
        let surface: SharedSurface = fake.clone();
        let emitter = Listeners::new();
        let seen = collect(&emitter);

        let wiring = wire_surface_events(
            &surface,
            emitter,
            SourceSlot::default(),
            Forwarding { element_errors: false },
        );
        fake.fire(SurfaceEvent::Error {
            code: MediaErrorCode::Network,
            message: "offline".into(),
        });
        assert!(lock(&seen).is_empty());

        wiring.unsubscribe();
        fake.fire(SurfaceEvent::Playing);
        assert!(lock(&seen).is_empty());
    }

    #[test]
    fn test_metadata_ignored_once_source_is_cleared() {
        let fake = FakeSurface::new();
        let surface: SharedSurface = fake.clone();
        let emitter = Listeners::new();
        let seen = collect(&emitter);
        let _wiring = wire_surface_events(
            &surface,
            emitter,
            SourceSlot::default(),
            Forwarding { element_errors: true },
        );

        fake.set_media(60.0, 640, 360);
        surface.set_source(None);
        fake.fire(SurfaceEvent::LoadedMetadata);
        assert!(lock(&seen).is_empty());
    }

    #[test]
    fn test_volume_change_reports_only_what_changed() {
        let fake = FakeSurface::new();
        let surface: SharedSurface = fake.clone();
        let emitter = Listeners::new();
        let seen = collect(&emitter);
        let _wiring = wire_surface_events(
            &surface,
            emitter,
            SourceSlot::default(),
            Forwarding { element_errors: true },
        );

        surface.set_muted(true);
        assert_eq!(*lock(&seen), vec![EngineEvent::MutedChanged { muted: true }]);
    }

    #[test]
    fn test_source_slot_shared_between_clones() {
        let slot = SourceSlot::default();
        let other = slot.clone();
        slot.set("a.mp4");
        assert_eq!(other.get().as_deref(), Some("a.mp4"));

        other.clear();
        assert_eq!(slot.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_cancel() {
        let scheduler = RetryScheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.schedule(Duration::from_millis(100), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&runs);
        scheduler.schedule(Duration::from_secs(10), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_slot_requires_mount() {
        let slot = SurfaceSlot::default();
        assert_eq!(slot.pause(), Err(AdapterError::NotMounted));
        assert_eq!(slot.play().await, Err(AdapterError::NotMounted));

        let fake = FakeSurface::new();
        slot.set(fake.clone());
        fake.block_autoplay(true);
        assert_eq!(slot.play().await, Err(AdapterError::AutoplayBlocked));
        slot.set_volume(3.0).unwrap();
        assert_eq!(fake.volume_level(), 1.0);
    }
}
