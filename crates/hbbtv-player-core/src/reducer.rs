//! Pure reducer: `(state, event) -> (next state, effects)`
//!
//! All state-visible decisions of the playback core live here. The reducer
//! performs no I/O and never retries; effects describe what the runtime must
//! execute afterwards, in order.

use crate::event::{DashEvent, EngineEvent, Event, HlsEvent, Intent};
use crate::state::{ControlState, DashState, HlsState, Mp4State, PlayerState, SourceState};
use crate::types::{PlaybackSnapshot, PlaybackType, Resolution};
use serde::{Deserialize, Serialize};
use url::Url;

const DETECT_BASE: &str = "http://localhost/";

/// Side effects requested by a transition, executed by the runtime in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// Unsubscribe from and destroy the live adapter, if there is one
    DestroyAdapterIfAny,
    /// Resolve the playback type of `url`
    DetectType { url: String },
    /// Construct an adapter for the detected type
    CreateAdapter,
    /// Route the new adapter's events into the runtime queue
    Subscribe,
    /// Bind the adapter to the mounted video surface
    Mount,
    Load { url: String },
    Play,
    Pause,
    Seek { time: f64 },
    SetVolume { volume: f64 },
    SetMuted { muted: bool },
}

/// Facts the reducer needs besides the state itself
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReduceContext {
    /// Type of the live adapter, `None` before the first load
    pub playback_type: Option<PlaybackType>,
    /// Restart from the beginning when playback ends
    pub loop_playback: bool,
}

/// Result of a reduction
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PlayerState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: impl Into<PlayerState>, effects: Vec<Effect>) -> Self {
        Self {
            state: state.into(),
            effects,
        }
    }

    fn unchanged(state: &PlayerState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }

    fn effects_only(state: &PlayerState, effects: Vec<Effect>) -> Self {
        Self {
            state: state.clone(),
            effects,
        }
    }

    /// True when the transition changed neither state nor requested effects
    pub fn is_noop(&self, previous: &PlayerState) -> bool {
        self.effects.is_empty() && &self.state == previous
    }
}

/// Detect the playback type from a URL suffix.
///
/// Query strings and fragments are ignored and matching is case-insensitive.
/// Anything that is not an HLS playlist or a DASH MPD plays natively.
pub fn detect_type(url: &str) -> PlaybackType {
    let path = Url::parse(url)
        .or_else(|_| Url::parse(DETECT_BASE).and_then(|base| base.join(url)))
        .map(|parsed| parsed.path().to_ascii_lowercase())
        .unwrap_or_else(|_| {
            url.split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase()
        });

    if path.ends_with(".m3u8") {
        PlaybackType::Hls
    } else if path.ends_with(".mpd") {
        PlaybackType::Dash
    } else {
        // .mp4, .webm, .ogg, .mov and unknown suffixes
        PlaybackType::Native
    }
}

/// Effects of a load, in the order the runtime must execute them
pub fn load_effects(url: &str) -> Vec<Effect> {
    vec![
        Effect::DestroyAdapterIfAny,
        Effect::DetectType { url: url.to_string() },
        Effect::CreateAdapter,
        Effect::Subscribe,
        Effect::Mount,
        Effect::Load { url: url.to_string() },
    ]
}

/// Reduce one event against the current state
pub fn reduce(state: &PlayerState, event: &Event, ctx: &ReduceContext) -> Transition {
    match event {
        Event::Intent(intent) => reduce_intent(state, intent),
        Event::Engine(engine) => reduce_engine(state, engine, ctx),
    }
}

fn reduce_intent(state: &PlayerState, intent: &Intent) -> Transition {
    match intent {
        Intent::LoadRequested { url } => Transition::to(
            ControlState::Loading {
                url: url.clone(),
                progress: 0.0,
            },
            load_effects(url),
        ),

        Intent::PlayRequested => match state {
            PlayerState::Control(ControlState::Paused {
                current_time,
                duration,
                buffered,
            }) => Transition::to(
                ControlState::Playing {
                    current_time: *current_time,
                    duration: *duration,
                    buffered: buffered.clone(),
                    playback_rate: 1.0,
                },
                vec![Effect::Play],
            ),
            PlayerState::Control(ControlState::Ended { duration, .. }) => Transition::to(
                ControlState::Playing {
                    current_time: 0.0,
                    duration: *duration,
                    buffered: Vec::new(),
                    playback_rate: 1.0,
                },
                vec![Effect::Play],
            ),
            // Nothing to play, or already playing
            PlayerState::Control(ControlState::Idle)
            | PlayerState::Control(ControlState::Error { .. })
            | PlayerState::Control(ControlState::Playing { .. }) => Transition::unchanged(state),
            // Adapter is live; the engine's Playing event confirms
            _ => Transition::effects_only(state, vec![Effect::Play]),
        },

        Intent::PauseRequested => match state {
            PlayerState::Control(ControlState::Playing {
                current_time,
                duration,
                buffered,
                ..
            }) => Transition::to(
                ControlState::Paused {
                    current_time: *current_time,
                    duration: *duration,
                    buffered: buffered.clone(),
                },
                vec![Effect::Pause],
            ),
            _ => Transition::unchanged(state),
        },

        Intent::SeekRequested { time } => match state {
            PlayerState::Control(ControlState::Playing {
                current_time,
                duration,
                ..
            })
            | PlayerState::Control(ControlState::Paused {
                current_time,
                duration,
                ..
            }) if time.is_finite() => Transition::to(
                ControlState::Seeking {
                    from_time: *current_time,
                    to_time: *time,
                    duration: *duration,
                },
                vec![Effect::Seek { time: *time }],
            ),
            _ => Transition::unchanged(state),
        },

        Intent::SetVolumeRequested { volume } => {
            if state.is_idle() || !volume.is_finite() {
                Transition::unchanged(state)
            } else {
                Transition::effects_only(
                    state,
                    vec![Effect::SetVolume {
                        volume: volume.clamp(0.0, 1.0),
                    }],
                )
            }
        }

        Intent::SetMutedRequested { muted } => {
            if state.is_idle() {
                Transition::unchanged(state)
            } else {
                Transition::effects_only(state, vec![Effect::SetMuted { muted: *muted }])
            }
        }
    }
}

fn reduce_engine(state: &PlayerState, event: &EngineEvent, ctx: &ReduceContext) -> Transition {
    match event {
        // Forcing events: the media element is the source of truth
        EngineEvent::Playing { snapshot } => Transition::to(playing_from(snapshot), Vec::new()),
        EngineEvent::Paused { snapshot } => Transition::to(paused_from(snapshot), Vec::new()),
        EngineEvent::Waiting { snapshot } => Transition::to(
            ControlState::Buffering {
                current_time: snapshot.current_time,
                duration: snapshot.duration,
                buffered: snapshot.buffered.clone(),
                percent: snapshot.buffered_percent(),
            },
            Vec::new(),
        ),
        EngineEvent::Ended { snapshot } => {
            let effects = if ctx.loop_playback {
                vec![Effect::Seek { time: 0.0 }, Effect::Play]
            } else {
                Vec::new()
            };
            Transition::to(
                ControlState::Ended {
                    duration: snapshot.duration,
                    looping: ctx.loop_playback,
                },
                effects,
            )
        }

        EngineEvent::MetadataLoaded {
            url,
            duration,
            width,
            height,
        } => match ctx.playback_type {
            Some(PlaybackType::Native) => Transition::to(
                SourceState::Mp4(Mp4State::Ready {
                    url: url.clone(),
                    duration: if duration.is_finite() { duration.max(0.0) } else { 0.0 },
                    resolution: Resolution::new(*width, *height),
                    codec: None,
                }),
                Vec::new(),
            ),
            // Manifest and MPD events own the source-ready transition
            _ => Transition::unchanged(state),
        },

        EngineEvent::TimeUpdated { snapshot } => {
            Transition::to(refresh_time(state, snapshot), Vec::new())
        }

        EngineEvent::Seeked { snapshot } => match state {
            PlayerState::Control(ControlState::Seeking { .. }) if snapshot.paused => {
                Transition::to(paused_from(snapshot), Vec::new())
            }
            PlayerState::Control(ControlState::Seeking { .. }) => {
                Transition::to(playing_from(snapshot), Vec::new())
            }
            _ => Transition::unchanged(state),
        },

        EngineEvent::Error(error) => Transition::to(
            ControlState::Error {
                kind: error.kind,
                message: error.message.clone(),
                url: error.url.clone(),
                cause: error.cause.clone(),
            },
            Vec::new(),
        ),

        EngineEvent::Hls(hls) if ctx.playback_type == Some(PlaybackType::Hls) => {
            reduce_hls(state, hls)
        }
        EngineEvent::Dash(dash) if ctx.playback_type == Some(PlaybackType::Dash) => {
            reduce_dash(state, dash)
        }

        EngineEvent::Mounted
        | EngineEvent::VolumeChanged { .. }
        | EngineEvent::MutedChanged { .. }
        | EngineEvent::Hls(_)
        | EngineEvent::Dash(_) => Transition::unchanged(state),
    }
}

fn playing_from(snapshot: &PlaybackSnapshot) -> ControlState {
    ControlState::Playing {
        current_time: snapshot.current_time,
        duration: snapshot.duration,
        buffered: snapshot.buffered.clone(),
        playback_rate: snapshot.playback_rate,
    }
}

fn paused_from(snapshot: &PlaybackSnapshot) -> ControlState {
    ControlState::Paused {
        current_time: snapshot.current_time,
        duration: snapshot.duration,
        buffered: snapshot.buffered.clone(),
    }
}

fn refresh_time(state: &PlayerState, snapshot: &PlaybackSnapshot) -> PlayerState {
    match state {
        PlayerState::Control(ControlState::Playing { .. }) => playing_from(snapshot).into(),
        PlayerState::Control(ControlState::Paused { .. }) => paused_from(snapshot).into(),
        PlayerState::Control(ControlState::Buffering { .. }) => ControlState::Buffering {
            current_time: snapshot.current_time,
            duration: snapshot.duration,
            buffered: snapshot.buffered.clone(),
            percent: snapshot.buffered_percent(),
        }
        .into(),
        _ => state.clone(),
    }
}

fn reduce_hls(state: &PlayerState, event: &HlsEvent) -> Transition {
    let next = match event {
        HlsEvent::ManifestLoading { url } => HlsState::ManifestLoading { url: url.clone() },
        HlsEvent::ManifestParsed {
            url,
            variants,
            duration,
        } => HlsState::ManifestParsed {
            url: url.clone(),
            variants: variants.clone(),
            duration: *duration,
        },
        HlsEvent::VariantSelected {
            variant,
            bandwidth,
            resolution,
        } => HlsState::VariantSelected {
            variant: *variant,
            bandwidth: *bandwidth,
            resolution: *resolution,
        },
        HlsEvent::AdaptiveSwitching {
            from_variant,
            to_variant,
            reason,
        } => HlsState::AdaptiveSwitching {
            from_variant: *from_variant,
            to_variant: *to_variant,
            reason: *reason,
        },
        // Retries are the adapter's business
        HlsEvent::SegmentLoading { .. }
        | HlsEvent::SegmentLoadError { .. }
        | HlsEvent::ManifestParseError { .. } => return Transition::unchanged(state),
    };
    Transition::to(SourceState::Hls(next), Vec::new())
}

fn reduce_dash(state: &PlayerState, event: &DashEvent) -> Transition {
    let next = match event {
        DashEvent::MpdLoading { url } => DashState::MpdLoading { url: url.clone() },
        DashEvent::MpdParsed {
            url,
            adaptation_sets,
            duration,
            is_dynamic,
        } => DashState::MpdParsed {
            url: url.clone(),
            adaptation_sets: adaptation_sets.clone(),
            duration: *duration,
            is_dynamic: *is_dynamic,
        },
        DashEvent::RepresentationSelected {
            media_type,
            representation_id,
            bandwidth,
            resolution,
        } => DashState::RepresentationSelected {
            media_type: *media_type,
            representation_id: representation_id.clone(),
            bandwidth: *bandwidth,
            resolution: *resolution,
        },
        DashEvent::QualitySwitching {
            media_type,
            from_quality,
            to_quality,
            reason,
        } => DashState::QualitySwitching {
            media_type: *media_type,
            from_quality: *from_quality,
            to_quality: *to_quality,
            reason: *reason,
        },
        DashEvent::SegmentDownloading { .. }
        | DashEvent::SegmentDownloadError { .. }
        | DashEvent::MpdParseError { .. } => return Transition::unchanged(state),
    };
    Transition::to(SourceState::Dash(next), Vec::new())
}
