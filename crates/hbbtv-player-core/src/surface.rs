//! Mountable video surface consumed by the adapters
//!
//! The surface is the media element the page owns. The core never creates
//! one; it is handed in through [`crate::PlayerRuntime::mount`].

use crate::listeners::{Callback, Subscription};
use crate::types::{PlaybackSnapshot, TimeRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Media element readiness, mirroring `HTMLMediaElement.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

/// Media element error codes, mirroring `MediaError.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaErrorCode {
    Aborted = 1,
    Network = 2,
    Decode = 3,
    SrcNotSupported = 4,
}

/// Element-level notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceEvent {
    LoadedMetadata,
    Progress,
    CanPlay,
    TimeUpdate,
    Playing,
    Pause,
    Waiting,
    Seeked,
    Ended,
    VolumeChange,
    Error { code: MediaErrorCode, message: String },
}

/// Why the element refused to start playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayRejection {
    /// The user agent requires a gesture before playback
    NotAllowed,
    Other(String),
}

/// The media element surface adapters bind engines to
#[async_trait]
pub trait VideoSurface: Send + Sync {
    /// Start playback; resolves once the element accepted or refused
    async fn play(&self) -> std::result::Result<(), PlayRejection>;
    fn pause(&self);

    /// Set `src` (or clear it with `None`) and reset the element
    fn set_source(&self, url: Option<&str>);
    /// Re-run the element's resource selection
    fn load(&self);

    fn current_time(&self) -> f64;
    fn set_current_time(&self, time: f64);
    fn duration(&self) -> f64;
    fn buffered(&self) -> Vec<TimeRange>;
    fn playback_rate(&self) -> f64;
    fn paused(&self) -> bool;

    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);
    fn muted(&self) -> bool;
    fn set_muted(&self, muted: bool);

    fn ready_state(&self) -> ReadyState;
    fn video_width(&self) -> u32;
    fn video_height(&self) -> u32;

    /// Listen to element notifications
    fn subscribe(&self, listener: Callback<SurfaceEvent>) -> Subscription;
}

/// Shared handle to a mounted surface
pub type SharedSurface = Arc<dyn VideoSurface>;

impl PlaybackSnapshot {
    /// Read the surface right now
    pub fn capture(surface: &dyn VideoSurface) -> Self {
        PlaybackSnapshot::new(
            surface.current_time(),
            surface.duration(),
            surface.buffered(),
            surface.playback_rate(),
            surface.paused(),
        )
    }
}
