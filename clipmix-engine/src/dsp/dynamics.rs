//! Dynamics: compressor and limiter
//!
//! Feed-forward design on a linked stereo peak envelope. Thresholds are
//! linear amplitudes, matching the editor's export filters.

use super::{time_coefficient, EffectStage};

/// Shared envelope follower + gain computer
struct Dynamics {
    threshold: f32,
    /// None = brick wall (limiter)
    ratio: Option<f32>,
    attack_ms: f64,
    release_ms: f64,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    sample_rate: u32,
}

impl Dynamics {
    fn new(sample_rate: u32, threshold: f32, ratio: Option<f32>) -> Self {
        let mut d = Self {
            threshold,
            ratio,
            attack_ms: 5.0,
            release_ms: 50.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            sample_rate,
        };
        d.update_coefficients();
        d
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_coefficient(self.attack_ms, self.sample_rate);
        self.release_coeff = time_coefficient(self.release_ms, self.sample_rate);
    }

    fn gain_for(&self, envelope: f32) -> f32 {
        if envelope <= self.threshold || envelope <= 0.0 {
            return 1.0;
        }
        let target = match self.ratio {
            Some(ratio) => self.threshold * (envelope / self.threshold).powf(1.0 / ratio),
            None => self.threshold,
        };
        target / envelope
    }

    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(2) {
            let peak = frame[0].abs().max(frame[1].abs());
            let coeff = if peak > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * peak;

            let gain = self.gain_for(self.envelope);
            frame[0] *= gain;
            frame[1] *= gain;
        }
    }
}

/// Compressor (`threshold`, `ratio`, `attack`, `release`)
pub struct CompressorStage {
    inner: Dynamics,
}

impl CompressorStage {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Dynamics::new(sample_rate, 0.5, Some(4.0)),
        }
    }
}

impl EffectStage for CompressorStage {
    fn process(&mut self, block: &mut [f32]) {
        self.inner.process(block);
    }

    fn set_param(&mut self, name: &str, value: f64) -> bool {
        match name {
            "threshold" => self.inner.threshold = value.clamp(0.000_976_563, 1.0) as f32,
            "ratio" => self.inner.ratio = Some(value.clamp(1.0, 20.0) as f32),
            "attack" => {
                self.inner.attack_ms = value.clamp(0.01, 2000.0);
                self.inner.update_coefficients();
            }
            "release" => {
                self.inner.release_ms = value.clamp(0.01, 9000.0);
                self.inner.update_coefficients();
            }
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.inner.envelope = 0.0;
    }

    fn name(&self) -> &'static str {
        "compressor"
    }
}

/// Limiter (`limit`, `attack`, `release`)
pub struct LimiterStage {
    inner: Dynamics,
}

impl LimiterStage {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Dynamics::new(sample_rate, 1.0, None),
        }
    }
}

impl EffectStage for LimiterStage {
    fn process(&mut self, block: &mut [f32]) {
        self.inner.process(block);
        // Envelope lag lets the first transient through; clamp it.
        let limit = self.inner.threshold;
        for sample in block.iter_mut() {
            *sample = sample.clamp(-limit, limit);
        }
    }

    fn set_param(&mut self, name: &str, value: f64) -> bool {
        match name {
            "limit" => self.inner.threshold = value.clamp(0.0625, 1.0) as f32,
            "attack" => {
                self.inner.attack_ms = value.clamp(0.1, 80.0);
                self.inner.update_coefficients();
            }
            "release" => {
                self.inner.release_ms = value.clamp(1.0, 8000.0);
                self.inner.update_coefficients();
            }
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.inner.envelope = 0.0;
    }

    fn name(&self) -> &'static str {
        "limiter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_signal_passes_compressor() {
        let mut stage = CompressorStage::new(48_000);
        let mut block = vec![0.1f32; 2_000];
        stage.process(&mut block);
        assert!(block.iter().all(|s| (*s - 0.1).abs() < 1e-6));
    }

    #[test]
    fn test_loud_signal_is_compressed() {
        let mut stage = CompressorStage::new(48_000);
        stage.set_param("threshold", 0.25);
        stage.set_param("ratio", 4.0);
        stage.set_param("attack", 1.0);

        let mut block = vec![1.0f32; 48_000];
        stage.process(&mut block);

        // Settled: 0.25 * (1/0.25)^(1/4) ≈ 0.354
        let settled = *block.last().unwrap();
        assert!((settled - 0.354).abs() < 0.01, "settled = {}", settled);
    }

    #[test]
    fn test_limiter_never_exceeds_limit() {
        let mut stage = LimiterStage::new(48_000);
        stage.set_param("limit", 0.5);

        let mut block: Vec<f32> = (0..4_800).map(|i| if i % 200 < 100 { 0.95 } else { -0.95 }).collect();
        stage.process(&mut block);
        assert!(block.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let mut stage = LimiterStage::new(48_000);
        assert!(!stage.set_param("ratio", 2.0));
    }
}
