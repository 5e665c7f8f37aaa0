//! Core audio data types
//!
//! Decoded asset audio, shared read-only between the cache and every voice
//! playing from it.

/// Channel count of every buffer and of the internal mix bus
pub const CHANNELS: usize = 2;

/// Decoded audio for one asset.
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Stereo interleaved: [L, R, L, R, ...]
/// - Source sample rate (voices resample on the fly while reading)
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    frames: usize,
}

impl AudioBuffer {
    /// Builds a stereo buffer from interleaved samples with `channels` channels.
    ///
    /// Mono is duplicated to both sides; more than two channels keep the
    /// first two (front left/right).
    pub fn from_interleaved(samples: &[f32], sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut stereo = Vec::with_capacity(frames * CHANNELS);

        for frame in samples.chunks_exact(channels) {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { frame[0] };
            stereo.push(left);
            stereo.push(right);
        }

        Self {
            samples: stereo,
            sample_rate,
            frames,
        }
    }

    /// Stereo buffer of `frames` frames of silence
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![0.0; frames * CHANNELS],
            sample_rate,
            frames,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Stereo frame at a fractional frame position, linearly interpolated.
    ///
    /// Positions outside the buffer read as silence.
    pub fn frame_at(&self, position: f64) -> (f32, f32) {
        if position < 0.0 || !position.is_finite() {
            return (0.0, 0.0);
        }
        let index = position.floor() as usize;
        if index >= self.frames {
            return (0.0, 0.0);
        }
        let frac = (position - index as f64) as f32;
        let (l0, r0) = (self.samples[index * 2], self.samples[index * 2 + 1]);
        let (l1, r1) = if index + 1 < self.frames {
            (self.samples[index * 2 + 2], self.samples[index * 2 + 3])
        } else {
            (l0, r0)
        };
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }
}
