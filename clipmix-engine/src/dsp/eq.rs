//! Peaking EQ band
//!
//! RBJ cookbook peaking filter, Direct Form II Transposed, f64 state per
//! channel. Bandwidth is given in Hz (`width`) and converted to Q.

use super::EffectStage;

pub struct EqBandStage {
    frequency: f64,
    width: f64,
    gain_db: f64,
    sample_rate: f64,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // [z1, z2] per channel
    state: [[f64; 2]; 2],
}

impl EqBandStage {
    pub fn new(sample_rate: u32) -> Self {
        let mut stage = Self {
            frequency: 1000.0,
            width: 100.0,
            gain_db: 0.0,
            sample_rate: sample_rate.max(1) as f64,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            state: [[0.0; 2]; 2],
        };
        stage.calculate_coefficients();
        stage
    }

    fn calculate_coefficients(&mut self) {
        let nyquist = self.sample_rate / 2.0;
        let f0 = self.frequency.clamp(10.0, nyquist * 0.99);
        let q = (f0 / self.width.max(1.0)).clamp(0.05, 50.0);

        let a = 10f64.powf(self.gain_db / 40.0);
        let w0 = std::f64::consts::TAU * f0 / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = (-2.0 * cos_w0) / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = (-2.0 * cos_w0) / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }
}

impl EffectStage for EqBandStage {
    fn process(&mut self, block: &mut [f32]) {
        if self.gain_db == 0.0 {
            // Peaking filter at 0 dB is the identity
            return;
        }
        for frame in block.chunks_exact_mut(2) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let x = *sample as f64;
                let [z1, z2] = self.state[ch];
                let y = self.b0 * x + z1;
                self.state[ch] = [self.b1 * x - self.a1 * y + z2, self.b2 * x - self.a2 * y];
                *sample = y as f32;
            }
        }
    }

    fn set_param(&mut self, name: &str, value: f64) -> bool {
        match name {
            "frequency" => self.frequency = value,
            "width" => self.width = value,
            "gain" => self.gain_db = value.clamp(-48.0, 48.0),
            _ => return false,
        }
        self.calculate_coefficients();
        true
    }

    fn reset(&mut self) {
        self.state = [[0.0; 2]; 2];
    }

    fn name(&self) -> &'static str {
        "eq_band"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_block(freq: f64, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (std::f64::consts::TAU * freq * i as f64 / sample_rate as f64).sin() as f32;
                [v, v]
            })
            .collect()
    }

    fn rms(block: &[f32]) -> f32 {
        (block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32).sqrt()
    }

    #[test]
    fn test_zero_gain_is_transparent() {
        let mut stage = EqBandStage::new(48_000);
        let input = sine_block(1000.0, 48_000, 256);
        let mut block = input.clone();
        stage.process(&mut block);
        assert_eq!(block, input);
    }

    #[test]
    fn test_boost_at_center_frequency() {
        let mut stage = EqBandStage::new(48_000);
        stage.set_param("frequency", 1000.0);
        stage.set_param("width", 200.0);
        stage.set_param("gain", 12.0);

        let input = sine_block(1000.0, 48_000, 9_600);
        let mut block = input.clone();
        stage.process(&mut block);

        // Compare the settled second half: +12 dB ≈ 3.98x
        let half = block.len() / 2;
        let ratio = rms(&block[half..]) / rms(&input[half..]);
        assert!(ratio > 3.5 && ratio < 4.5, "ratio = {}", ratio);
    }

    #[test]
    fn test_far_frequency_untouched() {
        let mut stage = EqBandStage::new(48_000);
        stage.set_param("frequency", 8000.0);
        stage.set_param("width", 100.0);
        stage.set_param("gain", -12.0);

        let input = sine_block(200.0, 48_000, 9_600);
        let mut block = input.clone();
        stage.process(&mut block);

        let half = block.len() / 2;
        let ratio = rms(&block[half..]) / rms(&input[half..]);
        assert!((ratio - 1.0).abs() < 0.05, "ratio = {}", ratio);
    }
}
