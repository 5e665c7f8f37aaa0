//! Timeline model definitions
//!
//! Sequence, Track and Clip as supplied by the host's project store.
//! The engine treats all of these as read-only snapshots.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::timing;
use crate::{AssetId, ClipId, EffectId, SequenceId, TimeSec, TrackId};

// =============================================================================
// Sequence
// =============================================================================

/// Sequence (the edited program: an ordered stack of tracks)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: SequenceId,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Sequence {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tracks: vec![],
        }
    }

    pub fn add_track(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn get_track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    /// Finds a clip anywhere in the sequence, together with its owning track
    pub fn find_clip(&self, clip_id: &str) -> Option<(&Track, &Clip)> {
        self.tracks
            .iter()
            .find_map(|t| t.get_clip(clip_id).map(|c| (t, c)))
    }

    /// End of the last clip on any track
    pub fn duration(&self) -> TimeSec {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(Clip::timeline_end)
            .fold(0.0, f64::max)
    }
}

// =============================================================================
// Track
// =============================================================================

/// Track type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Video,
    #[default]
    Audio,
    Caption,
}

/// Track (a lane of clips)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    #[serde(default)]
    pub kind: TrackKind,
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub muted: bool,
    /// Linear volume multiplier (0.0 - 2.0, 1.0 = 100%)
    #[serde(default = "default_track_volume")]
    pub volume: f32,
}

fn default_track_volume() -> f32 {
    1.0
}

impl Track {
    pub fn new(id: &str, kind: TrackKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            clips: vec![],
            muted: false,
            volume: 1.0,
        }
    }

    pub fn new_audio(id: &str) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn add_clip(&mut self, clip: Clip) {
        self.clips.push(clip);
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clips.push(clip);
        self
    }

    pub fn get_clip(&self, clip_id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == clip_id)
    }

    /// Video clips carry their embedded audio; captions never do.
    pub fn carries_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio | TrackKind::Video)
    }
}

// =============================================================================
// Clip range / placement
// =============================================================================

/// Range within the source asset
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRange {
    pub source_in_sec: TimeSec,
    pub source_out_sec: TimeSec,
}

impl ClipRange {
    pub fn new(source_in: TimeSec, source_out: TimeSec) -> Self {
        Self {
            source_in_sec: source_in,
            source_out_sec: source_out,
        }
    }

    /// Source-time length of the range (never negative)
    pub fn duration(&self) -> TimeSec {
        (self.source_out_sec - self.source_in_sec).max(0.0)
    }
}

/// Placement on the timeline
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipPlace {
    pub timeline_in_sec: TimeSec,
    /// Timeline length as stored by the editor. Scheduling recomputes the
    /// length from range and speed instead of trusting this value.
    #[serde(default)]
    pub duration_sec: TimeSec,
}

impl ClipPlace {
    pub fn new(timeline_in: TimeSec, duration: TimeSec) -> Self {
        Self {
            timeline_in_sec: timeline_in,
            duration_sec: duration,
        }
    }
}

/// Per-clip audio settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    /// Volume in dB (-60 to +6)
    pub volume_db: f32,
    /// Pan (-1.0 left, 0.0 center, 1.0 right)
    pub pan: f32,
    pub muted: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            pan: 0.0,
            muted: false,
        }
    }
}

// =============================================================================
// Clip
// =============================================================================

/// Clip (media segment on timeline)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: ClipId,
    pub asset_id: AssetId,
    pub range: ClipRange,
    pub place: ClipPlace,
    /// Playback speed (1.0 = normal). Non-positive values are read as 1.0.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Ordered effect ids, resolved through the effect registry
    #[serde(default)]
    pub effects: Vec<EffectId>,
    #[serde(default)]
    pub audio: AudioSettings,
}

fn default_speed() -> f64 {
    1.0
}

impl Clip {
    /// Creates a clip covering `[source_in, source_out)` of `asset_id`, placed at 0
    pub fn with_range(id: &str, asset_id: &str, source_in: TimeSec, source_out: TimeSec) -> Self {
        let range = ClipRange::new(source_in, source_out);
        Self {
            id: id.to_string(),
            asset_id: asset_id.to_string(),
            range,
            place: ClipPlace::new(0.0, range.duration()),
            speed: 1.0,
            effects: vec![],
            audio: AudioSettings::default(),
        }
    }

    /// Places the clip at a specific timeline position
    pub fn place_at(mut self, timeline_in: TimeSec) -> Self {
        self.place.timeline_in_sec = timeline_in;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self.place.duration_sec = timing::clip_timeline_duration(&self);
        self
    }

    pub fn with_effects<I, S>(mut self, effects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EffectId>,
    {
        self.effects = effects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = audio;
        self
    }

    /// Timeline duration derived from range and (safe) speed
    pub fn duration(&self) -> TimeSec {
        timing::clip_timeline_duration(self)
    }

    pub fn timeline_end(&self) -> TimeSec {
        self.place.timeline_in_sec + self.duration()
    }

    pub fn contains_time(&self, time_sec: TimeSec) -> bool {
        timing::is_time_in_clip(self, time_sec)
    }

    pub fn timeline_to_source(&self, timeline_sec: TimeSec) -> TimeSec {
        timing::timeline_to_source(self, timeline_sec)
    }
}

// =============================================================================
// Store access
// =============================================================================

/// Read access to the host's project store.
///
/// Returns a snapshot of the active sequence; `None` when no sequence is open.
pub trait TimelineSource: Send + Sync {
    fn sequence(&self) -> Option<Arc<Sequence>>;
}

impl TimelineSource for Arc<Sequence> {
    fn sequence(&self) -> Option<Arc<Sequence>> {
        Some(Arc::clone(self))
    }
}
