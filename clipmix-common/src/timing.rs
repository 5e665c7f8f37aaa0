//! Timeline timing math
//!
//! Conversions between timeline time and source time for clips. All
//! speed-dependent math goes through [`safe_speed`] so that a zero,
//! negative or non-finite speed can never reach a playback rate.

use crate::timeline::Clip;
use crate::TimeSec;

/// Clip speed clamped to a strictly positive value (non-positive → 1.0)
pub fn safe_speed(speed: f64) -> f64 {
    if speed > 0.0 && speed.is_finite() {
        speed
    } else {
        1.0
    }
}

/// Timeline duration of a clip: `(source_out - source_in) / safe_speed`.
///
/// Returns 0 for an empty or inverted source range.
pub fn clip_timeline_duration(clip: &Clip) -> TimeSec {
    clip.range.duration() / safe_speed(clip.speed)
}

/// Whether timeline time `t` falls inside the clip.
///
/// Start inclusive, end exclusive: `timeline_in <= t < timeline_in + duration`.
pub fn is_time_in_clip(clip: &Clip, t: TimeSec) -> bool {
    let start = clip.place.timeline_in_sec;
    t >= start && t < start + clip_timeline_duration(clip)
}

/// Maps a timeline time to the matching position in the clip's source
pub fn timeline_to_source(clip: &Clip, timeline_sec: TimeSec) -> TimeSec {
    clip.range.source_in_sec + (timeline_sec - clip.place.timeline_in_sec) * safe_speed(clip.speed)
}

/// Decibels to linear amplitude
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
