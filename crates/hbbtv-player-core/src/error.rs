//! Error types for the HbbTV player core

use crate::event::{EngineError, EngineErrorKind};
use crate::types::PlaybackType;
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime-level errors surfaced to callers of [`crate::PlayerRuntime`]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Runtime worker has stopped")]
    RuntimeStopped,

    #[error("No async runtime available: {0}")]
    NoAsyncRuntime(String),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Whether an adapter failure may be retried automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Retried by the adapter up to its retry budget, then surfaced
    Recoverable,
    /// Never retried; needs a fresh load or user intervention
    Fatal,
}

/// Failures raised by playback adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    // Recoverable
    #[error("Adapter initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Failed to load {url}: {message}")]
    LoadFailed { url: String, message: String },

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Operation aborted by user")]
    Aborted,

    #[error("Manifest error for {url}: {message}")]
    Manifest { url: String, message: String },

    #[error("Segment error for {resource}: {message}")]
    Segment { resource: String, message: String },

    // Fatal
    #[error("{engine} engine is not supported in this environment")]
    EngineNotSupported { engine: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("DRM error: {0}")]
    Drm(String),

    #[error("Format not supported: {0}")]
    FormatNotSupported(String),

    #[error("Failed to construct {kind} adapter: {message}")]
    ConstructionFailed { kind: PlaybackType, message: String },

    #[error("Engine error {detail}: {message}")]
    Engine { detail: String, message: String },

    // Control surface
    #[error("Video surface is not mounted")]
    NotMounted,

    #[error("Autoplay was blocked by the user agent")]
    AutoplayBlocked,

    #[error("Play request failed: {0}")]
    PlayFailed(String),
}

impl AdapterError {
    /// Retry classification of this failure
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AdapterError::InitializationFailed(_)
            | AdapterError::LoadFailed { .. }
            | AdapterError::Network(_)
            | AdapterError::Aborted
            | AdapterError::Manifest { .. }
            | AdapterError::Segment { .. } => ErrorSeverity::Recoverable,
            AdapterError::EngineNotSupported { .. }
            | AdapterError::Decode(_)
            | AdapterError::Drm(_)
            | AdapterError::FormatNotSupported(_)
            | AdapterError::ConstructionFailed { .. }
            | AdapterError::Engine { .. }
            | AdapterError::NotMounted
            | AdapterError::AutoplayBlocked
            | AdapterError::PlayFailed(_) => ErrorSeverity::Fatal,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        self.severity() == ErrorSeverity::Recoverable
    }

    /// Engine error kind reported when this failure becomes an `Engine/Error`
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            AdapterError::Network(_)
            | AdapterError::LoadFailed { .. }
            | AdapterError::Manifest { .. }
            | AdapterError::Segment { .. } => EngineErrorKind::Network,
            AdapterError::Decode(_) => EngineErrorKind::Decode,
            AdapterError::EngineNotSupported { .. } | AdapterError::FormatNotSupported(_) => {
                EngineErrorKind::NotSupported
            }
            AdapterError::Drm(_)
            | AdapterError::NotMounted
            | AdapterError::AutoplayBlocked
            | AdapterError::PlayFailed(_) => EngineErrorKind::Media,
            AdapterError::InitializationFailed(_)
            | AdapterError::Aborted
            | AdapterError::ConstructionFailed { .. }
            | AdapterError::Engine { .. } => EngineErrorKind::Unknown,
        }
    }

    /// Returns the error code for logs and observers
    pub fn error_code(&self) -> &'static str {
        match self {
            AdapterError::InitializationFailed(_) => "INIT_FAILED",
            AdapterError::LoadFailed { .. } => "LOAD_FAILED",
            AdapterError::Network(_) => "NETWORK",
            AdapterError::Aborted => "ABORTED",
            AdapterError::Manifest { .. } => "MANIFEST",
            AdapterError::Segment { .. } => "SEGMENT",
            AdapterError::EngineNotSupported { .. } => "ENGINE_UNSUPPORTED",
            AdapterError::Decode(_) => "DECODE",
            AdapterError::Drm(_) => "DRM",
            AdapterError::FormatNotSupported(_) => "FORMAT_UNSUPPORTED",
            AdapterError::ConstructionFailed { .. } => "CONSTRUCTION_FAILED",
            AdapterError::Engine { .. } => "ENGINE_ERROR",
            AdapterError::NotMounted => "NOT_MOUNTED",
            AdapterError::AutoplayBlocked => "AUTOPLAY_BLOCKED",
            AdapterError::PlayFailed(_) => "PLAY_FAILED",
        }
    }

    /// `Engine/Error` payload for this failure, with the error code as cause
    pub fn to_engine_error(&self) -> EngineError {
        EngineError::new(self.kind(), self.to_string()).with_cause(self.error_code())
    }
}

/// Error returned by [`crate::PlayerRuntime::destroy`]
#[derive(Error, Debug)]
pub enum DestroyError {
    #[error("Runtime worker has stopped before teardown completed")]
    WorkerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert!(AdapterError::Network("timeout".into()).is_recoverable());
        assert!(AdapterError::Manifest {
            url: "a.m3u8".into(),
            message: "bad".into()
        }
        .is_recoverable());
        assert!(AdapterError::Aborted.is_recoverable());

        assert!(!AdapterError::Decode("bad frame".into()).is_recoverable());
        assert!(!AdapterError::Drm("no key".into()).is_recoverable());
        assert!(!AdapterError::ConstructionFailed {
            kind: PlaybackType::Hls,
            message: "boom".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AdapterError::EngineNotSupported { engine: "hls".into() }.kind(),
            EngineErrorKind::NotSupported
        );
        assert_eq!(AdapterError::Decode("x".into()).kind(), EngineErrorKind::Decode);
        assert_eq!(
            AdapterError::Segment {
                resource: "seg7.ts".into(),
                message: "404".into()
            }
            .kind(),
            EngineErrorKind::Network
        );
        assert_eq!(AdapterError::AutoplayBlocked.error_code(), "AUTOPLAY_BLOCKED");
    }

    #[test]
    fn test_engine_error_conversion() {
        let error = AdapterError::Drm("license expired".into()).to_engine_error();
        assert_eq!(error.kind, EngineErrorKind::Media);
        assert_eq!(error.message, "DRM error: license expired");
        assert_eq!(error.cause.as_deref(), Some("DRM"));

        let engine = AdapterError::Engine {
            detail: "internalException".into(),
            message: "boom".into(),
        };
        assert!(!engine.is_recoverable());
        assert_eq!(engine.to_engine_error().kind, EngineErrorKind::Unknown);
    }
}
