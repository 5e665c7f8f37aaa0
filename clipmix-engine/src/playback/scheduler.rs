//! Clip scheduling
//!
//! Decides, for the current transport time, which clips need a voice now:
//! the clip has not finished, starts within the look-ahead horizon, and has
//! no voice yet. Also owns the per-clip gain/rate math and the rate limiter
//! that coalesces periodic passes with forced ones.
//!
//! Loading and voice creation are driven by the engine; this module is
//! pure decision logic.

use std::time::Duration;

use clipmix_common::timing::{db_to_linear, safe_speed};
use clipmix_common::{Clip, EngineConfig, Sequence, TimeSec, Track, TrackId, TransportState};
use tokio::time::Instant;

/// Periodic passes run once this fraction of the interval has elapsed
const PERIODIC_SLACK: f64 = 0.9;

/// Where and when a clip's source starts sounding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipTiming {
    /// How far the transport already is into the clip (timeline seconds)
    pub time_into_clip: TimeSec,
    /// Source position to start reading from
    pub source_offset: TimeSec,
    /// Wait before the source starts (clip begins in the future)
    pub start_delay: TimeSec,
    /// Source seconds left to play
    pub audio_duration: TimeSec,
}

impl ClipTiming {
    pub fn compute(clip: &Clip, current_time: TimeSec) -> Self {
        let speed = safe_speed(clip.speed);
        let timeline_in = clip.place.timeline_in_sec;

        let time_into_clip = (current_time - timeline_in).max(0.0);
        let source_offset = clip.range.source_in_sec + time_into_clip * speed;
        let start_delay = (timeline_in - current_time).max(0.0);
        let audio_duration = (clip.range.source_out_sec - source_offset).max(0.0);

        Self {
            time_into_clip,
            source_offset,
            start_delay,
            audio_duration,
        }
    }

    /// False when nothing is left to play
    pub fn is_playable(&self) -> bool {
        self.audio_duration > 0.0
    }
}

/// Linear per-clip gain: `track_volume * 10^(volume_db/20)`.
///
/// Zero when the clip, its track or the transport is muted. Transport
/// volume is not included; it is applied once, at the master mix.
pub fn clip_gain(track: &Track, clip: &Clip, transport: &TransportState) -> f32 {
    if clip.audio.muted || track.muted || transport.is_muted {
        return 0.0;
    }
    (track.volume * db_to_linear(clip.audio.volume_db)).max(0.0)
}

/// Effective gain of a clip at the output: transport volume × clip gain
pub fn final_gain(track: &Track, clip: &Clip, transport: &TransportState) -> f32 {
    transport.volume.max(0.0) * clip_gain(track, clip, transport)
}

/// Playback rate of a clip's voice: transport rate × safe clip speed
pub fn voice_rate(clip: &Clip, transport: &TransportState) -> f64 {
    transport.safe_rate() * safe_speed(clip.speed)
}

/// A clip that needs a voice in this pass
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledClip {
    pub track_id: TrackId,
    pub clip: Clip,
    pub timing: ClipTiming,
}

/// Scheduling decisions plus the pass rate limiter
#[derive(Debug)]
pub struct ClipScheduler {
    schedule_ahead: TimeSec,
    interval: Duration,
    last_run: Option<Instant>,
}

impl ClipScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            schedule_ahead: config.schedule_ahead_secs,
            interval: config.reschedule_interval(),
            last_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Single-flight gate: forced passes always run and restart the clock;
    /// periodic passes run only when most of an interval has gone by since
    /// the last pass of either kind.
    pub fn should_run(&mut self, now: Instant, forced: bool) -> bool {
        let due = match self.last_run {
            _ if forced => true,
            None => true,
            Some(last) => now.duration_since(last).as_secs_f64() >= self.interval.as_secs_f64() * PERIODIC_SLACK,
        };
        if due {
            self.last_run = Some(now);
        }
        due
    }

    /// Forgets the last pass, so the next periodic tick runs
    pub fn reset_clock(&mut self) {
        self.last_run = None;
    }

    /// Whether a clip still needs to sound at or shortly after `current_time`
    pub fn is_in_horizon(&self, clip: &Clip, current_time: TimeSec) -> bool {
        current_time < clip.timeline_end() && clip.place.timeline_in_sec <= current_time + self.schedule_ahead
    }

    /// Clips on audible tracks that need a voice now, in timeline order of
    /// tracks then clips.
    pub fn plan<F>(&self, sequence: &Sequence, current_time: TimeSec, has_voice: F) -> Vec<ScheduledClip>
    where
        F: Fn(&str) -> bool,
    {
        let mut planned = Vec::new();

        for track in &sequence.tracks {
            if track.muted || !track.carries_audio() {
                continue;
            }
            for clip in &track.clips {
                if !self.is_in_horizon(clip, current_time) || has_voice(&clip.id) {
                    continue;
                }
                let timing = ClipTiming::compute(clip, current_time);
                if !timing.is_playable() {
                    continue;
                }
                planned.push(ScheduledClip {
                    track_id: track.id.clone(),
                    clip: clip.clone(),
                    timing,
                });
            }
        }
        planned
    }

    /// Fresh gain and rate for a live voice, or None when its clip is gone
    /// from the sequence (or moved to a track that carries no audio).
    pub fn live_update(sequence: &Sequence, clip_id: &str, transport: &TransportState) -> Option<(f32, f64)> {
        let (track, clip) = sequence.find_clip(clip_id)?;
        if !track.carries_audio() {
            return None;
        }
        Some((clip_gain(track, clip, transport), voice_rate(clip, transport)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use clipmix_common::AudioSettings;

    fn scheduler() -> ClipScheduler {
        ClipScheduler::new(&EngineConfig::default())
    }

    #[test]
    fn test_timing_scenario() {
        let clip = Clip::with_range("c", "a", 0.0, 10.0).place_at(5.0).with_speed(2.0);
        let timing = ClipTiming::compute(&clip, 7.0);

        assert_relative_eq!(timing.source_offset, 4.0);
        assert_relative_eq!(timing.audio_duration, 6.0);
        assert_relative_eq!(timing.start_delay, 0.0);
        assert_relative_eq!(timing.time_into_clip, 2.0);
    }

    #[test]
    fn test_future_clip_has_delay() {
        let clip = Clip::with_range("c", "a", 1.0, 3.0).place_at(10.0);
        let timing = ClipTiming::compute(&clip, 9.75);

        assert_relative_eq!(timing.start_delay, 0.25);
        assert_relative_eq!(timing.source_offset, 1.0);
        assert_relative_eq!(timing.audio_duration, 2.0);
    }

    #[test]
    fn test_gain_scenario() {
        let mut track = Track::new_audio("t");
        track.volume = 0.8;
        let clip = Clip::with_range("c", "a", 0.0, 1.0).with_audio(AudioSettings {
            volume_db: -6.0,
            ..AudioSettings::default()
        });
        let transport = TransportState::default();

        assert_relative_eq!(clip_gain(&track, &clip, &transport), 0.401, epsilon = 0.001);

        let muted = clip.clone().with_audio(AudioSettings {
            volume_db: -6.0,
            muted: true,
            ..AudioSettings::default()
        });
        assert_eq!(clip_gain(&track, &muted, &transport), 0.0);

        let transport_muted = TransportState {
            is_muted: true,
            ..TransportState::default()
        };
        assert_eq!(clip_gain(&track, &clip, &transport_muted), 0.0);
    }

    #[test]
    fn test_final_gain_applies_transport_volume_once() {
        let track = Track::new_audio("t");
        let clip = Clip::with_range("c", "a", 0.0, 1.0);
        let transport = TransportState {
            volume: 0.5,
            ..TransportState::default()
        };
        assert_relative_eq!(clip_gain(&track, &clip, &transport), 1.0);
        assert_relative_eq!(final_gain(&track, &clip, &transport), 0.5);
    }

    #[test]
    fn test_non_positive_speed_acts_as_one() {
        let transport = TransportState::default();
        for speed in [0.0, -2.0, f64::NAN] {
            let clip = Clip::with_range("c", "a", 0.0, 4.0).place_at(1.0).with_speed(speed);
            assert_eq!(voice_rate(&clip, &transport), 1.0);

            let timing = ClipTiming::compute(&clip, 2.0);
            assert_relative_eq!(timing.source_offset, 1.0);
            assert_relative_eq!(timing.audio_duration, 3.0);
        }
    }

    #[test]
    fn test_voice_rate_includes_transport_rate() {
        let clip = Clip::with_range("c", "a", 0.0, 4.0).with_speed(1.5);
        let transport = TransportState {
            playback_rate: 2.0,
            ..TransportState::default()
        };
        assert_relative_eq!(voice_rate(&clip, &transport), 3.0);
    }

    #[test]
    fn test_plan_filters() {
        let mut seq = Sequence::new("s");
        seq.add_track(
            Track::new_audio("t1")
                .with_clip(Clip::with_range("finished", "a", 0.0, 2.0))
                .with_clip(Clip::with_range("playing", "a", 0.0, 10.0))
                .with_clip(Clip::with_range("soon", "a", 0.0, 1.0).place_at(3.3))
                .with_clip(Clip::with_range("later", "a", 0.0, 1.0).place_at(4.0))
                .with_clip(Clip::with_range("active", "a", 0.0, 10.0)),
        );
        let mut muted = Track::new_audio("t2").with_clip(Clip::with_range("muted", "a", 0.0, 10.0));
        muted.muted = true;
        seq.add_track(muted);
        seq.add_track(
            Track::new("t3", clipmix_common::TrackKind::Caption)
                .with_clip(Clip::with_range("caption", "a", 0.0, 10.0)),
        );

        let plan = scheduler().plan(&seq, 3.0, |id| id == "active");
        let ids: Vec<&str> = plan.iter().map(|p| p.clip.id.as_str()).collect();
        assert_eq!(ids, vec!["playing", "soon"]);
    }

    #[test]
    fn test_end_boundary_is_exclusive() {
        let s = scheduler();
        let clip = Clip::with_range("c", "a", 0.0, 2.0).place_at(1.0);
        assert!(s.is_in_horizon(&clip, 2.999));
        assert!(!s.is_in_horizon(&clip, 3.0));
    }

    #[test]
    fn test_empty_range_never_planned() {
        let mut seq = Sequence::new("s");
        seq.add_track(Track::new_audio("t").with_clip(Clip::with_range("empty", "a", 2.0, 2.0)));
        assert!(scheduler().plan(&seq, 0.0, |_| false).is_empty());
    }

    #[test]
    fn test_rate_limiter() {
        let mut s = scheduler();
        let t0 = Instant::now();

        assert!(s.should_run(t0, false));
        assert!(!s.should_run(t0 + Duration::from_millis(100), false));
        assert!(s.should_run(t0 + Duration::from_millis(230), false));

        // Forced pass restarts the clock
        assert!(s.should_run(t0 + Duration::from_millis(300), true));
        assert!(!s.should_run(t0 + Duration::from_millis(400), false));

        s.reset_clock();
        assert!(s.should_run(t0 + Duration::from_millis(410), false));
    }

    #[test]
    fn test_live_update_missing_clip() {
        let mut seq = Sequence::new("s");
        seq.add_track(Track::new_audio("t").with_clip(Clip::with_range("c", "a", 0.0, 1.0)));
        let transport = TransportState::default();

        assert_eq!(ClipScheduler::live_update(&seq, "c", &transport), Some((1.0, 1.0)));
        assert_eq!(ClipScheduler::live_update(&seq, "gone", &transport), None);
    }
}
