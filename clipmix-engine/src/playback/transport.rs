//! Transport tracking
//!
//! Turns successive [`TransportState`] snapshots into discrete changes and
//! extrapolates the transport position between reports. A time jump is a
//! seek only when it disagrees with the extrapolated position by more than
//! the seek threshold; ordinary progress reports never count.

use clipmix_common::{TimeSec, TransportState};
use tokio::time::Instant;

/// One observed transport change
#[derive(Debug, Clone, PartialEq)]
pub enum TransportChange {
    /// Paused → playing
    Started,
    /// Playing → paused
    Stopped,
    /// Position jumped away from where playback would have carried it
    Seeked { from: TimeSec, to: TimeSec },
    RateChanged(f64),
    VolumeChanged(f32),
    MuteChanged(bool),
}

#[derive(Debug)]
pub struct TransportSync {
    state: TransportState,
    reported_at: Instant,
    seek_threshold: TimeSec,
}

impl TransportSync {
    pub fn new(initial: TransportState, seek_threshold: TimeSec, now: Instant) -> Self {
        Self {
            state: initial,
            reported_at: now,
            seek_threshold,
        }
    }

    /// Last reported snapshot
    pub fn state(&self) -> &TransportState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    /// Transport position at `now`: the last report, advanced by elapsed
    /// time × rate while playing.
    pub fn current_time(&self, now: Instant) -> TimeSec {
        if !self.state.is_playing {
            return self.state.current_time;
        }
        let elapsed = now.saturating_duration_since(self.reported_at).as_secs_f64();
        self.state.current_time + elapsed * self.state.safe_rate()
    }

    /// Absorbs a new snapshot and reports what changed.
    ///
    /// Changes come out in the order the engine must apply them: stop before
    /// seek before start, then the live parameters.
    pub fn apply(&mut self, next: TransportState, now: Instant) -> Vec<TransportChange> {
        let mut changes = Vec::new();
        let predicted = self.current_time(now);
        let prev = &self.state;

        if prev.is_playing && !next.is_playing {
            changes.push(TransportChange::Stopped);
        }
        if (next.current_time - predicted).abs() > self.seek_threshold {
            changes.push(TransportChange::Seeked {
                from: predicted,
                to: next.current_time,
            });
        }
        if !prev.is_playing && next.is_playing {
            changes.push(TransportChange::Started);
        }
        if prev.playback_rate != next.playback_rate {
            changes.push(TransportChange::RateChanged(next.playback_rate));
        }
        if prev.volume != next.volume {
            changes.push(TransportChange::VolumeChanged(next.volume));
        }
        if prev.is_muted != next.is_muted {
            changes.push(TransportChange::MuteChanged(next.is_muted));
        }

        self.state = next;
        self.reported_at = now;
        changes
    }
}
