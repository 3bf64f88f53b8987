//! HbbTV Player Core - media playback core for HbbTV applications
//!
//! This crate provides the playback core behind the player UI:
//! - A pure reducer deciding state transitions and side effects
//! - An effect runtime serializing intents and engine events
//! - A uniform adapter contract over native, HLS and DASH playback
//! - A bounded retry policy for manifest and segment failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HbbTV Player Core                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   Intent ──┐                                                    │
//! │            ▼                                                    │
//! │     ┌─────────────┐   reduce    ┌──────────────┐                │
//! │     │    FIFO     │ ──────────▶ │   Reducer    │                │
//! │     │    Queue    │             │    (pure)    │                │
//! │     └──────▲──────┘             └──────┬───────┘                │
//! │            │                  state +  │ effects                │
//! │            │                           ▼                        │
//! │            │                    ┌──────────────┐   listeners    │
//! │     EngineEvent                 │   Runtime    │ ─────────────▶ │
//! │            │                    └──────┬───────┘                │
//! │            │                           │                        │
//! │     ┌──────┴──────────────────────────┴────────┐                │
//! │     │  Adapter: Native │ HLS (+retry) │ DASH   │                │
//! │     └───────────────────┬──────────────────────┘                │
//! │                         ▼                                       │
//! │                   VideoSurface                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod event;
pub mod listeners;
pub mod reducer;
pub mod retry;
pub mod runtime;
pub mod state;
pub mod surface;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{AdapterFactory, DefaultAdapterFactory, PlaybackAdapter};
pub use config::PlayerConfig;
pub use error::{AdapterError, DestroyError, Error, Result};
pub use event::{EngineError, EngineErrorKind, EngineEvent, Event, Intent};
pub use listeners::Subscription;
pub use reducer::{detect_type, reduce, Effect, ReduceContext, Transition};
pub use runtime::PlayerRuntime;
pub use state::{ControlState, PlayerState, SourceState};
pub use surface::{SharedSurface, VideoSurface};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version once at startup
pub fn init() {
    tracing::info!(version = VERSION, "HbbTV player core initialized");
}
