//! Gain stages

use super::EffectStage;

/// Volume / Gain effect: flat linear multiplier (`level`)
pub struct VolumeStage {
    level: f32,
}

impl VolumeStage {
    pub fn new() -> Self {
        Self { level: 1.0 }
    }
}

impl Default for VolumeStage {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectStage for VolumeStage {
    fn process(&mut self, block: &mut [f32]) {
        if self.level == 1.0 {
            return;
        }
        for sample in block.iter_mut() {
            *sample *= self.level;
        }
    }

    fn set_param(&mut self, name: &str, value: f64) -> bool {
        match name {
            "level" => {
                self.level = value.max(0.0) as f32;
                true
            }
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        "volume"
    }
}

/// Per-voice gain with equal-power pan.
///
/// Not a registry effect: every voice has exactly one, ahead of its chain.
/// Gain changes ramp linearly across one block to avoid zipper noise.
#[derive(Debug, Clone)]
pub struct GainStage {
    gain: f32,
    target: f32,
    pan: f32,
}

impl GainStage {
    pub fn new(gain: f32, pan: f32) -> Self {
        let gain = gain.max(0.0);
        Self {
            gain,
            target: gain,
            pan: pan.clamp(-1.0, 1.0),
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.target = gain.max(0.0);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    /// Gain the stage is heading to (the value last set)
    pub fn gain(&self) -> f32 {
        self.target
    }

    fn pan_gains(&self) -> (f32, f32) {
        // Center = unity on both sides
        if self.pan == 0.0 {
            return (1.0, 1.0);
        }
        let theta = (self.pan + 1.0) * std::f32::consts::FRAC_PI_4;
        let norm = std::f32::consts::SQRT_2;
        (theta.cos() * norm, theta.sin() * norm)
    }

    pub fn process(&mut self, block: &mut [f32]) {
        let frames = block.len() / 2;
        if frames == 0 {
            return;
        }
        let (pan_l, pan_r) = self.pan_gains();
        let start = self.gain;
        let step = (self.target - start) / frames as f32;

        for (i, frame) in block.chunks_exact_mut(2).enumerate() {
            let g = start + step * (i + 1) as f32;
            frame[0] *= g * pan_l;
            frame[1] *= g * pan_r;
        }
        self.gain = self.target;
    }
}
