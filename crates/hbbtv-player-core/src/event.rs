//! Events consumed by the reducer
//!
//! Two families enter the runtime queue:
//! - [`Intent`]: issued by the UI layer
//! - [`EngineEvent`]: emitted asynchronously by the mounted adapter

use crate::types::{AdaptationSet, MediaType, PlaybackSnapshot, Resolution, SwitchReason, Variant};
use serde::{Deserialize, Serialize};

/// User-issued requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    LoadRequested { url: String },
    PlayRequested,
    PauseRequested,
    SeekRequested { time: f64 },
    SetVolumeRequested { volume: f64 },
    SetMutedRequested { muted: bool },
}

/// Category of an engine-reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineErrorKind {
    Network,
    Decode,
    NotSupported,
    Media,
    Unknown,
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineErrorKind::Network => write!(f, "network"),
            EngineErrorKind::Decode => write!(f, "decode"),
            EngineErrorKind::NotSupported => write!(f, "not-supported"),
            EngineErrorKind::Media => write!(f, "media"),
            EngineErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Engine failure payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub codec: Option<String>,
    pub cause: Option<String>,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: None,
            codec: None,
            cause: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// HLS protocol sub-events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HlsEvent {
    ManifestLoading {
        url: String,
    },
    ManifestParsed {
        url: String,
        variants: Vec<Variant>,
        duration: f64,
    },
    VariantSelected {
        variant: usize,
        bandwidth: u64,
        resolution: Option<Resolution>,
    },
    AdaptiveSwitching {
        from_variant: usize,
        to_variant: usize,
        reason: SwitchReason,
    },
    SegmentLoading {
        segment_index: u64,
        segment_url: String,
    },
    SegmentLoadError {
        segment_index: u64,
        segment_url: String,
        retry_count: u32,
    },
    ManifestParseError {
        url: String,
        retry_count: u32,
    },
}

/// DASH protocol sub-events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashEvent {
    MpdLoading {
        url: String,
    },
    MpdParsed {
        url: String,
        adaptation_sets: Vec<AdaptationSet>,
        duration: f64,
        is_dynamic: bool,
    },
    QualitySwitching {
        media_type: MediaType,
        from_quality: usize,
        to_quality: usize,
        reason: SwitchReason,
    },
    RepresentationSelected {
        media_type: MediaType,
        representation_id: String,
        bandwidth: u64,
        resolution: Option<Resolution>,
    },
    SegmentDownloading {
        media_type: MediaType,
        segment_index: u64,
    },
    SegmentDownloadError {
        media_type: MediaType,
        segment_index: u64,
        retry_count: u32,
    },
    MpdParseError {
        url: String,
        retry_count: u32,
    },
}

/// Adapter-issued events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    Mounted,
    MetadataLoaded {
        url: String,
        duration: f64,
        width: u32,
        height: u32,
    },
    TimeUpdated {
        snapshot: PlaybackSnapshot,
    },
    Playing {
        snapshot: PlaybackSnapshot,
    },
    Paused {
        snapshot: PlaybackSnapshot,
    },
    Waiting {
        snapshot: PlaybackSnapshot,
    },
    Ended {
        snapshot: PlaybackSnapshot,
    },
    Seeked {
        snapshot: PlaybackSnapshot,
    },
    VolumeChanged {
        volume: f64,
    },
    MutedChanged {
        muted: bool,
    },
    Error(EngineError),
    Hls(HlsEvent),
    Dash(DashEvent),
}

impl EngineEvent {
    /// Shorthand for an `Error` event
    pub fn error(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        EngineEvent::Error(EngineError::new(kind, message))
    }
}

impl From<HlsEvent> for EngineEvent {
    fn from(event: HlsEvent) -> Self {
        EngineEvent::Hls(event)
    }
}

impl From<DashEvent> for EngineEvent {
    fn from(event: DashEvent) -> Self {
        EngineEvent::Dash(event)
    }
}

impl From<EngineError> for EngineEvent {
    fn from(error: EngineError) -> Self {
        EngineEvent::Error(error)
    }
}

/// Anything the runtime queue accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "event", rename_all = "snake_case")]
pub enum Event {
    Intent(Intent),
    Engine(EngineEvent),
}

impl Event {
    /// Short label for logs, e.g. `Intent/PlayRequested`
    pub fn label(&self) -> &'static str {
        match self {
            Event::Intent(intent) => match intent {
                Intent::LoadRequested { .. } => "Intent/LoadRequested",
                Intent::PlayRequested => "Intent/PlayRequested",
                Intent::PauseRequested => "Intent/PauseRequested",
                Intent::SeekRequested { .. } => "Intent/SeekRequested",
                Intent::SetVolumeRequested { .. } => "Intent/SetVolumeRequested",
                Intent::SetMutedRequested { .. } => "Intent/SetMutedRequested",
            },
            Event::Engine(engine) => match engine {
                EngineEvent::Mounted => "Engine/Mounted",
                EngineEvent::MetadataLoaded { .. } => "Engine/MetadataLoaded",
                EngineEvent::TimeUpdated { .. } => "Engine/TimeUpdated",
                EngineEvent::Playing { .. } => "Engine/Playing",
                EngineEvent::Paused { .. } => "Engine/Paused",
                EngineEvent::Waiting { .. } => "Engine/Waiting",
                EngineEvent::Ended { .. } => "Engine/Ended",
                EngineEvent::Seeked { .. } => "Engine/Seeked",
                EngineEvent::VolumeChanged { .. } => "Engine/VolumeChanged",
                EngineEvent::MutedChanged { .. } => "Engine/MutedChanged",
                EngineEvent::Error(_) => "Engine/Error",
                EngineEvent::Hls(_) => "Engine/Hls",
                EngineEvent::Dash(_) => "Engine/Dash",
            },
        }
    }
}

impl From<Intent> for Event {
    fn from(intent: Intent) -> Self {
        Event::Intent(intent)
    }
}

impl From<EngineEvent> for Event {
    fn from(event: EngineEvent) -> Self {
        Event::Engine(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EngineErrorKind::NotSupported).unwrap(),
            "\"not-supported\""
        );
        assert_eq!(EngineErrorKind::NotSupported.to_string(), "not-supported");
    }

    #[test]
    fn test_intent_json() {
        let intent: Intent =
            serde_json::from_str(r#"{"type":"seek_requested","time":30.0}"#).unwrap();
        assert_eq!(intent, Intent::SeekRequested { time: 30.0 });
    }

    #[test]
    fn test_labels() {
        assert_eq!(Event::from(Intent::PlayRequested).label(), "Intent/PlayRequested");
        let event: Event = EngineEvent::from(HlsEvent::ManifestLoading {
            url: "a.m3u8".into(),
        })
        .into();
        assert_eq!(event.label(), "Engine/Hls");
    }
}
