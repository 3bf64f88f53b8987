//! In-memory collaborators for tests and the CLI simulator.
//!
//! Hand-written fakes rather than generated mocks: the surface and engine
//! traits are small, and scenario tests need to drive notifications by hand
//! (`fire`, `emit`) in a precise order.
//!
//! - [`FakeSurface`]: a media element whose notifications are fired manually
//! - [`FakeHlsEngine`] / [`FakeDashEngine`]: engines recording every call
//! - [`RecordingFactory`] / [`RecordingAdapter`]: adapters logging call order

use crate::adapter::{
    AdapterFactory, DashEngine, DashEngineEvent, EngineListener, HlsEngine, HlsEngineEvent,
    PlaybackAdapter,
};
use crate::config::PlayerConfig;
use crate::error::AdapterError;
use crate::event::EngineEvent;
use crate::listeners::{Callback, Listeners, Subscription};
use crate::surface::{PlayRejection, ReadyState, SharedSurface, SurfaceEvent, VideoSurface};
use crate::types::{PlaybackType, TimeRange};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Calls made on a [`FakeSurface`]
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Play,
    Pause,
    SetSource(Option<String>),
    Load,
    Seek(f64),
    SetVolume(f64),
    SetMuted(bool),
}

#[derive(Debug)]
struct SurfaceModel {
    current_time: f64,
    duration: f64,
    buffered: Vec<TimeRange>,
    playback_rate: f64,
    paused: bool,
    volume: f64,
    muted: bool,
    width: u32,
    height: u32,
    source: Option<String>,
    autoplay_blocked: bool,
    play_failure: Option<String>,
    calls: Vec<SurfaceCall>,
}

impl Default for SurfaceModel {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: f64::NAN,
            buffered: Vec::new(),
            playback_rate: 1.0,
            paused: true,
            volume: 1.0,
            muted: false,
            width: 0,
            height: 0,
            source: None,
            autoplay_blocked: false,
            play_failure: None,
            calls: Vec::new(),
        }
    }
}

/// Media element double.
///
/// Playback notifications are only delivered through [`FakeSurface::fire`];
/// volume and mute changes notify synchronously like a real element.
#[derive(Default)]
pub struct FakeSurface {
    model: Mutex<SurfaceModel>,
    listeners: Listeners<SurfaceEvent>,
}

impl FakeSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver `event` to every subscriber
    pub fn fire(&self, event: SurfaceEvent) {
        self.listeners.emit(&event);
    }

    pub fn set_media(&self, duration: f64, width: u32, height: u32) {
        let mut model = lock(&self.model);
        model.duration = duration;
        model.width = width;
        model.height = height;
    }

    pub fn set_position(&self, current_time: f64, buffered: Vec<TimeRange>) {
        let mut model = lock(&self.model);
        model.current_time = current_time;
        model.buffered = buffered;
    }

    pub fn set_paused(&self, paused: bool) {
        lock(&self.model).paused = paused;
    }

    /// Refuse `play()` as a user agent without a gesture would
    pub fn block_autoplay(&self, blocked: bool) {
        lock(&self.model).autoplay_blocked = blocked;
    }

    pub fn fail_play(&self, message: Option<&str>) {
        lock(&self.model).play_failure = message.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        lock(&self.model).calls.clone()
    }

    pub fn source(&self) -> Option<String> {
        lock(&self.model).source.clone()
    }

    pub fn volume_level(&self) -> f64 {
        lock(&self.model).volume
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn record(&self, call: SurfaceCall) {
        lock(&self.model).calls.push(call);
    }
}

#[async_trait]
impl VideoSurface for FakeSurface {
    async fn play(&self) -> Result<(), PlayRejection> {
        let mut model = lock(&self.model);
        model.calls.push(SurfaceCall::Play);
        if model.autoplay_blocked {
            return Err(PlayRejection::NotAllowed);
        }
        if let Some(message) = &model.play_failure {
            return Err(PlayRejection::Other(message.clone()));
        }
        model.paused = false;
        Ok(())
    }

    fn pause(&self) {
        let mut model = lock(&self.model);
        model.calls.push(SurfaceCall::Pause);
        model.paused = true;
    }

    fn set_source(&self, url: Option<&str>) {
        let mut model = lock(&self.model);
        model.calls.push(SurfaceCall::SetSource(url.map(str::to_string)));
        model.source = url.map(str::to_string);
        model.current_time = 0.0;
        model.paused = true;
    }

    fn load(&self) {
        self.record(SurfaceCall::Load);
    }

    fn current_time(&self) -> f64 {
        lock(&self.model).current_time
    }

    fn set_current_time(&self, time: f64) {
        let mut model = lock(&self.model);
        model.calls.push(SurfaceCall::Seek(time));
        model.current_time = time;
    }

    fn duration(&self) -> f64 {
        lock(&self.model).duration
    }

    fn buffered(&self) -> Vec<TimeRange> {
        lock(&self.model).buffered.clone()
    }

    fn playback_rate(&self) -> f64 {
        lock(&self.model).playback_rate
    }

    fn paused(&self) -> bool {
        lock(&self.model).paused
    }

    fn volume(&self) -> f64 {
        lock(&self.model).volume
    }

    fn set_volume(&self, volume: f64) {
        {
            let mut model = lock(&self.model);
            model.calls.push(SurfaceCall::SetVolume(volume));
            model.volume = volume;
        }
        self.fire(SurfaceEvent::VolumeChange);
    }

    fn muted(&self) -> bool {
        lock(&self.model).muted
    }

    fn set_muted(&self, muted: bool) {
        {
            let mut model = lock(&self.model);
            model.calls.push(SurfaceCall::SetMuted(muted));
            model.muted = muted;
        }
        self.fire(SurfaceEvent::VolumeChange);
    }

    fn ready_state(&self) -> ReadyState {
        let model = lock(&self.model);
        if model.source.is_some() && model.duration.is_finite() {
            ReadyState::HaveMetadata
        } else {
            ReadyState::HaveNothing
        }
    }

    fn video_width(&self) -> u32 {
        lock(&self.model).width
    }

    fn video_height(&self) -> u32 {
        lock(&self.model).height
    }

    fn subscribe(&self, listener: Callback<SurfaceEvent>) -> Subscription {
        self.listeners.add(listener)
    }
}

/// Calls made on a fake streaming engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    AttachMedia,
    DetachMedia,
    LoadSource(String),
    StartLoad,
    Destroy,
    Initialize { autoplay: bool },
    AttachSource(String),
    Reset,
}

/// Engine bookkeeping shared by both fake engines
struct EngineLog<E> {
    supported: AtomicBool,
    calls: Mutex<Vec<EngineCall>>,
    listeners: Listeners<E>,
}

impl<E: 'static> EngineLog<E> {
    fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            listeners: Listeners::new(),
        }
    }

    fn record(&self, call: EngineCall) {
        lock(&self.calls).push(call);
    }
}

/// HLS engine double; events are injected with [`FakeHlsEngine::emit`]
pub struct FakeHlsEngine {
    log: EngineLog<HlsEngineEvent>,
}

impl FakeHlsEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { log: EngineLog::new() })
    }

    pub fn set_supported(&self, supported: bool) {
        self.log.supported.store(supported, Ordering::SeqCst);
    }

    pub fn emit(&self, event: HlsEngineEvent) {
        self.log.listeners.emit(&event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.log.calls).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.log.listeners.len()
    }
}

impl HlsEngine for FakeHlsEngine {
    fn is_supported(&self) -> bool {
        self.log.supported.load(Ordering::SeqCst)
    }

    fn attach_media(&self, _surface: SharedSurface) -> Result<(), AdapterError> {
        self.log.record(EngineCall::AttachMedia);
        Ok(())
    }

    fn detach_media(&self) {
        self.log.record(EngineCall::DetachMedia);
    }

    fn load_source(&self, url: &str) {
        self.log.record(EngineCall::LoadSource(url.to_string()));
    }

    fn start_load(&self) {
        self.log.record(EngineCall::StartLoad);
    }

    fn destroy(&self) {
        self.log.record(EngineCall::Destroy);
    }

    fn subscribe(&self, listener: Callback<HlsEngineEvent>) -> Subscription {
        self.log.listeners.add(listener)
    }
}

/// DASH engine double; events are injected with [`FakeDashEngine::emit`]
pub struct FakeDashEngine {
    log: EngineLog<DashEngineEvent>,
}

impl FakeDashEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { log: EngineLog::new() })
    }

    pub fn set_supported(&self, supported: bool) {
        self.log.supported.store(supported, Ordering::SeqCst);
    }

    pub fn emit(&self, event: DashEngineEvent) {
        self.log.listeners.emit(&event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.log.calls).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.log.listeners.len()
    }
}

impl DashEngine for FakeDashEngine {
    fn is_supported(&self) -> bool {
        self.log.supported.load(Ordering::SeqCst)
    }

    fn initialize(&self, _surface: SharedSurface, autoplay: bool) -> Result<(), AdapterError> {
        self.log.record(EngineCall::Initialize { autoplay });
        Ok(())
    }

    fn attach_source(&self, url: &str) {
        self.log.record(EngineCall::AttachSource(url.to_string()));
    }

    fn reset(&self) {
        self.log.record(EngineCall::Reset);
    }

    fn subscribe(&self, listener: Callback<DashEngineEvent>) -> Subscription {
        self.log.listeners.add(listener)
    }
}

/// One entry in a [`RecordingFactory`] log
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Create(PlaybackType),
    Subscribe(usize),
    Mount(usize),
    Load(usize, String),
    Play(usize),
    Pause(usize),
    Seek(usize, f64),
    SetVolume(usize, f64),
    SetMuted(usize, bool),
    Destroy(usize),
}

type CallLog = Arc<Mutex<Vec<AdapterCall>>>;

/// Adapter that records every call into a log shared with its factory.
///
/// Each adapter is numbered in creation order so ordering tests can tell
/// the outgoing adapter from its replacement.
pub struct RecordingAdapter {
    id: usize,
    kind: PlaybackType,
    log: CallLog,
    listeners: Listeners<EngineEvent>,
    mounted: AtomicBool,
    destroyed: AtomicBool,
    fail_mount: bool,
    play_error: Mutex<Option<AdapterError>>,
}

impl RecordingAdapter {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Push an engine event to the subscribers
    pub fn emit(&self, event: EngineEvent) {
        self.listeners.emit(&event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Make the next `play` calls fail with `error`
    pub fn fail_play(&self, error: Option<AdapterError>) {
        *lock(&self.play_error) = error;
    }

    fn record(&self, call: AdapterCall) {
        lock(&self.log).push(call);
    }

    fn ensure_mounted(&self) -> Result<(), AdapterError> {
        if self.mounted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::NotMounted)
        }
    }
}

#[async_trait]
impl PlaybackAdapter for RecordingAdapter {
    fn kind(&self) -> PlaybackType {
        self.kind
    }

    fn name(&self) -> &str {
        "recording"
    }

    async fn mount(&self, _surface: SharedSurface) -> Result<(), AdapterError> {
        self.record(AdapterCall::Mount(self.id));
        if self.fail_mount {
            return Err(AdapterError::InitializationFailed("mount refused".into()));
        }
        self.mounted.store(true, Ordering::SeqCst);
        self.emit(EngineEvent::Mounted);
        Ok(())
    }

    async fn load(&self, url: &str) -> Result<(), AdapterError> {
        self.record(AdapterCall::Load(self.id, url.to_string()));
        self.ensure_mounted()
    }

    async fn play(&self) -> Result<(), AdapterError> {
        self.record(AdapterCall::Play(self.id));
        self.ensure_mounted()?;
        match lock(&self.play_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.record(AdapterCall::Pause(self.id));
        self.ensure_mounted()
    }

    async fn seek(&self, time: f64) -> Result<(), AdapterError> {
        self.record(AdapterCall::Seek(self.id, time));
        self.ensure_mounted()
    }

    async fn set_volume(&self, volume: f64) -> Result<(), AdapterError> {
        self.record(AdapterCall::SetVolume(self.id, volume));
        self.ensure_mounted()
    }

    async fn set_muted(&self, muted: bool) -> Result<(), AdapterError> {
        self.record(AdapterCall::SetMuted(self.id, muted));
        self.ensure_mounted()
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.record(AdapterCall::Destroy(self.id));
        self.mounted.store(false, Ordering::SeqCst);
        self.listeners.clear();
    }

    fn subscribe(&self, listener: EngineListener) -> Subscription {
        self.record(AdapterCall::Subscribe(self.id));
        self.listeners.add(listener)
    }
}

/// Factory producing [`RecordingAdapter`]s that share one call log
#[derive(Default)]
pub struct RecordingFactory {
    log: CallLog,
    adapters: Mutex<Vec<Arc<RecordingAdapter>>>,
    failing: Mutex<HashSet<PlaybackType>>,
    fail_mount: AtomicBool,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make construction of `kind` fail
    pub fn fail_construction(&self, kind: PlaybackType) {
        lock(&self.failing).insert(kind);
    }

    /// Make `mount` fail on adapters created from now on
    pub fn fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<AdapterCall> {
        lock(&self.log).clone()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    /// Most recently created adapter
    pub fn last(&self) -> Option<Arc<RecordingAdapter>> {
        lock(&self.adapters).last().cloned()
    }

    pub fn created(&self) -> usize {
        lock(&self.adapters).len()
    }
}

impl AdapterFactory for RecordingFactory {
    fn create(
        &self,
        kind: PlaybackType,
        _config: &PlayerConfig,
    ) -> Result<Arc<dyn PlaybackAdapter>, AdapterError> {
        if lock(&self.failing).contains(&kind) {
            return Err(AdapterError::ConstructionFailed {
                kind,
                message: "engine unavailable".into(),
            });
        }

        let mut adapters = lock(&self.adapters);
        let adapter = Arc::new(RecordingAdapter {
            id: adapters.len(),
            kind,
            log: Arc::clone(&self.log),
            listeners: Listeners::new(),
            mounted: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            fail_mount: self.fail_mount.load(Ordering::SeqCst),
            play_error: Mutex::new(None),
        });
        adapters.push(Arc::clone(&adapter));
        lock(&self.log).push(AdapterCall::Create(kind));
        Ok(adapter)
    }
}
