//! Transport state read model
//!
//! The transport is owned by the host (play button, scrubber, volume slider).
//! The engine observes snapshots of it and never writes back.

use serde::{Deserialize, Serialize};

use crate::TimeSec;

/// Snapshot of the host transport
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportState {
    /// Playhead position on the timeline
    pub current_time: TimeSec,
    pub is_playing: bool,
    /// Global playback rate (1.0 = real time)
    pub playback_rate: f64,
    /// Master volume (0.0 - 1.0)
    pub volume: f32,
    pub is_muted: bool,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            playback_rate: 1.0,
            volume: 1.0,
            is_muted: false,
        }
    }
}

impl TransportState {
    /// Transport rate clamped to a strictly positive value
    pub fn safe_rate(&self) -> f64 {
        crate::timing::safe_speed(self.playback_rate)
    }

    /// Gain applied at the master mix: volume, or silence when muted
    pub fn master_gain(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume.max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_gain() {
        let mut state = TransportState {
            volume: 0.7,
            ..Default::default()
        };
        assert_eq!(state.master_gain(), 0.7);
        state.is_muted = true;
        assert_eq!(state.master_gain(), 0.0);
    }

    #[test]
    fn test_safe_rate() {
        let state = TransportState {
            playback_rate: 0.0,
            ..Default::default()
        };
        assert_eq!(state.safe_rate(), 1.0);
    }
}
