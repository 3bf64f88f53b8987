//! Player state model
//!
//! Exactly one state holds at a time, drawn from two groups:
//! - [`ControlState`]: engine-agnostic playback phase, mirrors media element truth
//! - [`SourceState`]: protocol progress of the mounted adapter, superseded freely

use crate::event::EngineErrorKind;
use crate::types::{AdaptationSet, MediaType, Resolution, SwitchReason, TimeRange, Variant};
use serde::{Deserialize, Serialize};

/// Engine-agnostic playback phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControlState {
    /// Initial state, no content loaded
    Idle,
    Loading {
        url: String,
        progress: f64,
    },
    Playing {
        current_time: f64,
        duration: f64,
        buffered: Vec<TimeRange>,
        playback_rate: f64,
    },
    Paused {
        current_time: f64,
        duration: f64,
        buffered: Vec<TimeRange>,
    },
    Buffering {
        current_time: f64,
        duration: f64,
        buffered: Vec<TimeRange>,
        percent: f64,
    },
    Seeking {
        from_time: f64,
        to_time: f64,
        duration: f64,
    },
    Ended {
        duration: f64,
        #[serde(rename = "loop")]
        looping: bool,
    },
    Error {
        kind: EngineErrorKind,
        message: String,
        url: Option<String>,
        cause: Option<String>,
    },
}

/// Progressive file source detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Mp4State {
    Ready {
        url: String,
        duration: f64,
        resolution: Resolution,
        codec: Option<String>,
    },
}

/// HLS source detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HlsState {
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
}

/// DASH source detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DashState {
    MpdLoading {
        url: String,
    },
    MpdParsed {
        url: String,
        adaptation_sets: Vec<AdaptationSet>,
        duration: f64,
        is_dynamic: bool,
    },
    RepresentationSelected {
        media_type: MediaType,
        representation_id: String,
        bandwidth: u64,
        resolution: Option<Resolution>,
    },
    QualitySwitching {
        media_type: MediaType,
        from_quality: usize,
        to_quality: usize,
        reason: SwitchReason,
    },
}

/// Protocol-specific detail, only present while a matching adapter is mounted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "detail", rename_all = "snake_case")]
pub enum SourceState {
    Mp4(Mp4State),
    Hls(HlsState),
    Dash(DashState),
}

/// Observable state of the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "group", content = "value", rename_all = "snake_case")]
pub enum PlayerState {
    Control(ControlState),
    Source(SourceState),
}

impl PlayerState {
    pub fn idle() -> Self {
        PlayerState::Control(ControlState::Idle)
    }

    /// Stable tag such as `Control/Playing` or `Source/HLS/ManifestParsed`
    pub fn tag(&self) -> &'static str {
        match self {
            PlayerState::Control(control) => match control {
                ControlState::Idle => "Control/Idle",
                ControlState::Loading { .. } => "Control/Loading",
                ControlState::Playing { .. } => "Control/Playing",
                ControlState::Paused { .. } => "Control/Paused",
                ControlState::Buffering { .. } => "Control/Buffering",
                ControlState::Seeking { .. } => "Control/Seeking",
                ControlState::Ended { .. } => "Control/Ended",
                ControlState::Error { .. } => "Control/Error",
            },
            PlayerState::Source(SourceState::Mp4(Mp4State::Ready { .. })) => "Source/MP4/Ready",
            PlayerState::Source(SourceState::Hls(hls)) => match hls {
                HlsState::ManifestLoading { .. } => "Source/HLS/ManifestLoading",
                HlsState::ManifestParsed { .. } => "Source/HLS/ManifestParsed",
                HlsState::VariantSelected { .. } => "Source/HLS/VariantSelected",
                HlsState::AdaptiveSwitching { .. } => "Source/HLS/AdaptiveSwitching",
            },
            PlayerState::Source(SourceState::Dash(dash)) => match dash {
                DashState::MpdLoading { .. } => "Source/DASH/MPDLoading",
                DashState::MpdParsed { .. } => "Source/DASH/MPDParsed",
                DashState::RepresentationSelected { .. } => "Source/DASH/RepresentationSelected",
                DashState::QualitySwitching { .. } => "Source/DASH/QualitySwitching",
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PlayerState::Control(ControlState::Idle))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PlayerState::Control(ControlState::Error { .. }))
    }

    pub fn control(&self) -> Option<&ControlState> {
        match self {
            PlayerState::Control(control) => Some(control),
            PlayerState::Source(_) => None,
        }
    }

    /// Playback position carried by the state, if any
    pub fn current_time(&self) -> Option<f64> {
        match self {
            PlayerState::Control(ControlState::Playing { current_time, .. })
            | PlayerState::Control(ControlState::Paused { current_time, .. })
            | PlayerState::Control(ControlState::Buffering { current_time, .. }) => {
                Some(*current_time)
            }
            PlayerState::Control(ControlState::Seeking { to_time, .. }) => Some(*to_time),
            _ => None,
        }
    }

    /// Content duration carried by the state, if any
    pub fn duration(&self) -> Option<f64> {
        match self {
            PlayerState::Control(ControlState::Playing { duration, .. })
            | PlayerState::Control(ControlState::Paused { duration, .. })
            | PlayerState::Control(ControlState::Buffering { duration, .. })
            | PlayerState::Control(ControlState::Seeking { duration, .. })
            | PlayerState::Control(ControlState::Ended { duration, .. })
            | PlayerState::Source(SourceState::Mp4(Mp4State::Ready { duration, .. }))
            | PlayerState::Source(SourceState::Hls(HlsState::ManifestParsed { duration, .. }))
            | PlayerState::Source(SourceState::Dash(DashState::MpdParsed { duration, .. })) => {
                Some(*duration)
            }
            _ => None,
        }
    }

    /// Buffered ranges carried by the state, empty when none
    pub fn buffered(&self) -> &[TimeRange] {
        match self {
            PlayerState::Control(ControlState::Playing { buffered, .. })
            | PlayerState::Control(ControlState::Paused { buffered, .. })
            | PlayerState::Control(ControlState::Buffering { buffered, .. }) => buffered,
            _ => &[],
        }
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::idle()
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<ControlState> for PlayerState {
    fn from(state: ControlState) -> Self {
        PlayerState::Control(state)
    }
}

impl From<SourceState> for PlayerState {
    fn from(state: SourceState) -> Self {
        PlayerState::Source(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(PlayerState::idle().tag(), "Control/Idle");
        let ready = PlayerState::Source(SourceState::Mp4(Mp4State::Ready {
            url: "video.mp4".into(),
            duration: 120.0,
            resolution: Resolution::new(1920, 1080),
            codec: None,
        }));
        assert_eq!(ready.tag(), "Source/MP4/Ready");
        assert_eq!(ready.duration(), Some(120.0));
        assert_eq!(ready.current_time(), None);

        let mpd = PlayerState::Source(SourceState::Dash(DashState::MpdLoading {
            url: "a.mpd".into(),
        }));
        assert_eq!(mpd.to_string(), "Source/DASH/MPDLoading");
    }

    #[test]
    fn test_ended_serializes_loop_field() {
        let ended = PlayerState::Control(ControlState::Ended {
            duration: 10.0,
            looping: true,
        });
        let json = serde_json::to_string(&ended).unwrap();
        assert!(json.contains("\"loop\":true"));
    }
}
