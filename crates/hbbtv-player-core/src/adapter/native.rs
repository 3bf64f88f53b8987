//! Native adapter: the media element plays the source itself

use super::wiring::{wire_surface_events, Forwarding, SourceSlot, SurfaceSlot};
use super::{EngineListener, PlaybackAdapter};
use crate::error::AdapterError;
use crate::event::EngineEvent;
use crate::listeners::{Listeners, Subscription};
use crate::surface::SharedSurface;
use crate::types::PlaybackType;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, instrument};

/// Adapter for progressive files (`.mp4`, `.webm`, `.ogg`, `.mov`, ...)
pub struct NativeAdapter {
    surface: SurfaceSlot,
    source: SourceSlot,
    listeners: Listeners<EngineEvent>,
    wiring: Mutex<Option<Subscription>>,
    destroyed: AtomicBool,
}

impl NativeAdapter {
    pub fn new() -> Self {
        Self {
            surface: SurfaceSlot::default(),
            source: SourceSlot::default(),
            listeners: Listeners::new(),
            wiring: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    fn ensure_alive(&self) -> Result<(), AdapterError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(AdapterError::InitializationFailed("adapter already destroyed".into()));
        }
        Ok(())
    }
}

impl Default for NativeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackAdapter for NativeAdapter {
    fn kind(&self) -> PlaybackType {
        PlaybackType::Native
    }

    fn name(&self) -> &str {
        "native"
    }

    #[instrument(skip(self, surface))]
    async fn mount(&self, surface: SharedSurface) -> Result<(), AdapterError> {
        self.ensure_alive()?;

        let wiring = wire_surface_events(
            &surface,
            self.listeners.clone(),
            self.source.clone(),
            Forwarding { element_errors: true },
        );
        let previous = self
            .wiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(wiring);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }

        self.surface.set(surface);
        debug!("Native adapter mounted");
        self.listeners.emit(&EngineEvent::Mounted);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, url: &str) -> Result<(), AdapterError> {
        self.ensure_alive()?;
        let surface = self.surface.get()?;
        if url.trim().is_empty() {
            return Err(AdapterError::LoadFailed {
                url: url.to_string(),
                message: "empty source URL".into(),
            });
        }

        self.source.set(url);
        surface.set_source(Some(url));
        surface.load();
        info!(url, "Native source attached");
        Ok(())
    }

    async fn play(&self) -> Result<(), AdapterError> {
        self.surface.play().await
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.surface.pause()
    }

    async fn seek(&self, time: f64) -> Result<(), AdapterError> {
        self.surface.seek(time)
    }

    async fn set_volume(&self, volume: f64) -> Result<(), AdapterError> {
        self.surface.set_volume(volume)
    }

    async fn set_muted(&self, muted: bool) -> Result<(), AdapterError> {
        self.surface.set_muted(muted)
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let wiring = self
            .wiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(wiring) = wiring {
            wiring.unsubscribe();
        }
        if let Some(surface) = self.surface.take() {
            surface.pause();
            surface.set_source(None);
            surface.load();
        }
        self.source.clear();
        self.listeners.clear();
        debug!("Native adapter destroyed");
    }

    fn subscribe(&self, listener: EngineListener) -> Subscription {
        self.listeners.add(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SurfaceEvent;
    use crate::testing::{FakeSurface, SurfaceCall};
    use std::sync::Arc;

    fn recorder(adapter: &NativeAdapter) -> Arc<Mutex<Vec<EngineEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        adapter.subscribe(Arc::new(move |event: &EngineEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        seen
    }

    #[tokio::test]
    async fn test_controls_fail_before_mount() {
        let adapter = NativeAdapter::new();
        assert_eq!(adapter.play().await, Err(AdapterError::NotMounted));
        assert_eq!(adapter.pause().await, Err(AdapterError::NotMounted));
        assert_eq!(adapter.seek(3.0).await, Err(AdapterError::NotMounted));
        assert_eq!(adapter.set_volume(0.5).await, Err(AdapterError::NotMounted));
        assert_eq!(adapter.set_muted(true).await, Err(AdapterError::NotMounted));
        assert_eq!(adapter.load("a.mp4").await, Err(AdapterError::NotMounted));
    }

    #[tokio::test]
    async fn test_mount_load_and_metadata() {
        let adapter = NativeAdapter::new();
        let seen = recorder(&adapter);
        let surface = FakeSurface::new();

        adapter.mount(surface.clone()).await.unwrap();
        adapter.load("video.mp4").await.unwrap();
        surface.set_media(120.0, 1920, 1080);
        surface.fire(SurfaceEvent::LoadedMetadata);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], EngineEvent::Mounted);
        assert_eq!(
            seen[1],
            EngineEvent::MetadataLoaded {
                url: "video.mp4".into(),
                duration: 120.0,
                width: 1920,
                height: 1080
            }
        );
        assert!(surface
            .calls()
            .contains(&SurfaceCall::SetSource(Some("video.mp4".into()))));
    }

    #[tokio::test]
    async fn test_empty_url_fails_to_load() {
        let adapter = NativeAdapter::new();
        let surface = FakeSurface::new();
        adapter.mount(surface.clone()).await.unwrap();

        let error = adapter.load("  ").await.unwrap_err();
        assert_eq!(error.error_code(), "LOAD_FAILED");
        assert!(error.is_recoverable());
        assert_eq!(surface.source(), None);
    }

    #[tokio::test]
    async fn test_autoplay_blocked_is_distinguished() {
        let adapter = NativeAdapter::new();
        let surface = FakeSurface::new();
        adapter.mount(surface.clone()).await.unwrap();

        surface.block_autoplay(true);
        assert_eq!(adapter.play().await, Err(AdapterError::AutoplayBlocked));

        surface.block_autoplay(false);
        surface.fail_play(Some("decoder busy"));
        assert_eq!(
            adapter.play().await,
            Err(AdapterError::PlayFailed("decoder busy".into()))
        );
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_detaches() {
        let adapter = NativeAdapter::new();
        let seen = recorder(&adapter);
        let surface = FakeSurface::new();
        adapter.mount(surface.clone()).await.unwrap();
        adapter.load("video.mp4").await.unwrap();

        adapter.destroy().await;
        adapter.destroy().await;

        surface.fire(SurfaceEvent::Playing);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(surface.source(), None);
        assert_eq!(adapter.play().await, Err(AdapterError::NotMounted));
        assert!(adapter.mount(surface).await.is_err());
    }
}
