//! Playback adapters
//!
//! An adapter binds one playback engine to the mounted video surface and
//! reports everything that happens as [`EngineEvent`]s. The runtime holds at
//! most one adapter at a time and never sees which engine is behind it.
//!
//! Lifecycle: created → mounted → loaded (+ control calls) → destroyed.

mod dash;
mod hls;
mod native;
pub mod wiring;

pub use dash::{classify_dash_error, DashAdapter, DashEngine, DashEngineEvent, DashErrorClass};
pub use hls::{HlsAdapter, HlsEngine, HlsEngineEvent, HlsErrorDetail};
pub use native::NativeAdapter;

use crate::config::PlayerConfig;
use crate::error::AdapterError;
use crate::event::EngineEvent;
use crate::listeners::{Callback, Subscription};
use crate::surface::SharedSurface;
use crate::types::PlaybackType;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Listener registered through [`PlaybackAdapter::subscribe`]
pub type EngineListener = Callback<EngineEvent>;

/// Uniform control surface over one playback engine
#[async_trait]
pub trait PlaybackAdapter: Send + Sync {
    fn kind(&self) -> PlaybackType;

    /// Human-readable engine name for logs
    fn name(&self) -> &str;

    /// Bind the engine to `surface`
    async fn mount(&self, surface: SharedSurface) -> Result<(), AdapterError>;

    /// Attach `url` as the source.
    ///
    /// For streaming engines this resolves once the source is accepted;
    /// manifest parsing is reported later through subscribed events.
    async fn load(&self, url: &str) -> Result<(), AdapterError>;

    /// Start playback; distinguishes `AutoplayBlocked` from `PlayFailed`
    async fn play(&self) -> Result<(), AdapterError>;
    async fn pause(&self) -> Result<(), AdapterError>;
    async fn seek(&self, time: f64) -> Result<(), AdapterError>;
    async fn set_volume(&self, volume: f64) -> Result<(), AdapterError>;
    async fn set_muted(&self, muted: bool) -> Result<(), AdapterError>;

    /// Best-effort teardown; idempotent and infallible
    async fn destroy(&self);

    /// Register for engine events; any number of subscribers is allowed
    fn subscribe(&self, listener: EngineListener) -> Subscription;
}

/// Builds adapters for detected playback types
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        kind: PlaybackType,
        config: &PlayerConfig,
    ) -> Result<Arc<dyn PlaybackAdapter>, AdapterError>;
}

type HlsConstructor = Arc<dyn Fn() -> Arc<dyn HlsEngine> + Send + Sync>;
type DashConstructor = Arc<dyn Fn() -> Arc<dyn DashEngine> + Send + Sync>;

/// Factory building [`NativeAdapter`], [`HlsAdapter`] and [`DashAdapter`].
///
/// Streaming engines are supplied by the embedder; a type without a
/// registered engine fails construction.
#[derive(Clone, Default)]
pub struct DefaultAdapterFactory {
    hls: Option<HlsConstructor>,
    dash: Option<DashConstructor>,
}

impl DefaultAdapterFactory {
    /// Factory that only plays natively until engines are registered
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hls_engine(
        mut self,
        constructor: impl Fn() -> Arc<dyn HlsEngine> + Send + Sync + 'static,
    ) -> Self {
        self.hls = Some(Arc::new(constructor));
        self
    }

    pub fn with_dash_engine(
        mut self,
        constructor: impl Fn() -> Arc<dyn DashEngine> + Send + Sync + 'static,
    ) -> Self {
        self.dash = Some(Arc::new(constructor));
        self
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(
        &self,
        kind: PlaybackType,
        config: &PlayerConfig,
    ) -> Result<Arc<dyn PlaybackAdapter>, AdapterError> {
        let missing = |engine: &str| AdapterError::ConstructionFailed {
            kind,
            message: format!("no {} engine registered", engine),
        };

        let adapter: Arc<dyn PlaybackAdapter> = match kind {
            PlaybackType::Native => Arc::new(NativeAdapter::new()),
            PlaybackType::Hls => {
                let constructor = self.hls.as_ref().ok_or_else(|| missing("HLS"))?;
                Arc::new(HlsAdapter::new(constructor(), config.clone())?)
            }
            PlaybackType::Dash => {
                let constructor = self.dash.as_ref().ok_or_else(|| missing("DASH"))?;
                Arc::new(DashAdapter::new(constructor(), config.clone())?)
            }
        };

        info!(kind = %kind, name = adapter.name(), "Adapter created");
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDashEngine, FakeHlsEngine};

    #[tokio::test]
    async fn test_factory_builds_each_type() {
        let factory = DefaultAdapterFactory::new()
            .with_hls_engine(|| FakeHlsEngine::new() as Arc<dyn HlsEngine>)
            .with_dash_engine(|| FakeDashEngine::new() as Arc<dyn DashEngine>);
        let config = PlayerConfig::default();

        for kind in [PlaybackType::Native, PlaybackType::Hls, PlaybackType::Dash] {
            let adapter = factory.create(kind, &config).unwrap();
            assert_eq!(adapter.kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_missing_engine_fails_construction() {
        let factory = DefaultAdapterFactory::new();
        let err = factory
            .create(PlaybackType::Dash, &PlayerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::ConstructionFailed { kind: PlaybackType::Dash, .. }));
    }

    #[tokio::test]
    async fn test_unsupported_engine_fails_construction() {
        let factory = DefaultAdapterFactory::new().with_hls_engine(|| {
            let engine = FakeHlsEngine::new();
            engine.set_supported(false);
            engine as Arc<dyn HlsEngine>
        });
        let err = factory
            .create(PlaybackType::Hls, &PlayerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::EngineNotSupported { .. }));
    }
}
