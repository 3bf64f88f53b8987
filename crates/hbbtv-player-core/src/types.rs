//! Core value types for the playback core

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a runtime instance, attached to log spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeId(pub Uuid);

impl RuntimeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuntimeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery mechanism selected for a source URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackType {
    /// Progressive file played by the media element itself
    Native,
    /// HTTP Live Streaming
    Hls,
    /// MPEG-DASH
    Dash,
}

impl PlaybackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackType::Native => "native",
            PlaybackType::Hls => "hls",
            PlaybackType::Dash => "dash",
        }
    }
}

impl std::fmt::Display for PlaybackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A buffered time range in seconds, `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0.0
    }
}

/// Sort ranges by start and merge overlapping ones
pub fn normalize_ranges(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.retain(|r| r.start.is_finite() && r.end.is_finite());
    ranges.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Point-in-time read of the media element, captured when an engine event fires.
///
/// Snapshots are never refreshed after capture; consumers accept that they
/// may be stale by the time they are reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    /// Current position in seconds, never negative
    pub current_time: f64,
    /// Duration in seconds, 0 when unknown or non-finite
    pub duration: f64,
    /// Ordered, non-overlapping buffered ranges
    pub buffered: Vec<TimeRange>,
    pub playback_rate: f64,
    pub paused: bool,
}

impl PlaybackSnapshot {
    /// Build a snapshot, normalizing out-of-domain values
    pub fn new(
        current_time: f64,
        duration: f64,
        buffered: Vec<TimeRange>,
        playback_rate: f64,
        paused: bool,
    ) -> Self {
        Self {
            current_time: finite_or_zero(current_time).max(0.0),
            duration: finite_or_zero(duration).max(0.0),
            buffered: normalize_ranges(buffered),
            playback_rate: if playback_rate.is_finite() { playback_rate } else { 1.0 },
            paused,
        }
    }

    /// Snapshot at position `current_time` with everything else defaulted
    pub fn at(current_time: f64, duration: f64) -> Self {
        Self::new(current_time, duration, Vec::new(), 1.0, false)
    }

    /// Percentage (0-100) of the duration covered up to the end of the
    /// buffered range containing `current_time`
    pub fn buffered_percent(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        let ahead = self
            .buffered
            .iter()
            .find(|r| r.contains(self.current_time))
            .map(|r| r.end)
            .unwrap_or(self.current_time);
        ((ahead / self.duration) * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self::new(0.0, 0.0, Vec::new(), 1.0, true)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// One bitrate/resolution option within an HLS playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Level index as reported by the engine
    pub index: usize,
    /// Bandwidth in bits per second
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    pub name: Option<String>,
}

/// Track type of a DASH adaptation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Text,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
            MediaType::Text => write!(f, "text"),
        }
    }
}

/// One bitrate/resolution option within a DASH adaptation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    pub id: String,
    /// Bandwidth in bits per second
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
}

/// A DASH adaptation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationSet {
    pub id: String,
    pub media_type: MediaType,
    pub representations: Vec<Representation>,
}

/// Reason for a quality change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// ABR algorithm decision
    Abr,
    /// User manual selection
    Manual,
    /// Buffer-based downgrade
    Buffer,
    /// Initial selection
    Initial,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_normalizes_values() {
        let snapshot = PlaybackSnapshot::new(-3.0, f64::INFINITY, Vec::new(), f64::NAN, false);
        assert_eq!(snapshot.current_time, 0.0);
        assert_eq!(snapshot.duration, 0.0);
        assert_eq!(snapshot.playback_rate, 1.0);
    }

    #[test]
    fn test_ranges_are_merged_and_ordered() {
        let ranges = normalize_ranges(vec![
            TimeRange::new(20.0, 30.0),
            TimeRange::new(0.0, 10.0),
            TimeRange::new(5.0, 12.0),
        ]);
        assert_eq!(ranges, vec![TimeRange::new(0.0, 12.0), TimeRange::new(20.0, 30.0)]);
    }

    #[test]
    fn test_buffered_percent() {
        let snapshot =
            PlaybackSnapshot::new(10.0, 100.0, vec![TimeRange::new(0.0, 40.0)], 1.0, false);
        assert!((snapshot.buffered_percent() - 40.0).abs() < f64::EPSILON);
        assert_eq!(PlaybackSnapshot::at(5.0, 0.0).buffered_percent(), 0.0);
    }

    #[test]
    fn test_playback_type_display() {
        assert_eq!(PlaybackType::Hls.to_string(), "hls");
        assert_eq!(
            serde_json::to_string(&PlaybackType::Dash).unwrap(),
            "\"dash\""
        );
        assert_eq!(Resolution::new(1920, 1080).quality_name(), "1080p");
    }
}
