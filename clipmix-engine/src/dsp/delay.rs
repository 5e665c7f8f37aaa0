//! Delay-line stages: plain delay and echo

use super::EffectStage;

/// Longest supported delay
const MAX_DELAY_MS: f64 = 5_000.0;

/// Stereo circular delay line
struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
    delay_frames: usize,
}

impl DelayLine {
    fn new(sample_rate: u32, delay_ms: f64) -> Self {
        let capacity = (MAX_DELAY_MS / 1000.0 * sample_rate.max(1) as f64) as usize + 1;
        let mut line = Self {
            buffer: vec![0.0; capacity * 2],
            write: 0,
            delay_frames: 0,
        };
        line.set_delay(sample_rate, delay_ms);
        line
    }

    fn capacity(&self) -> usize {
        self.buffer.len() / 2
    }

    fn set_delay(&mut self, sample_rate: u32, delay_ms: f64) {
        let frames = (delay_ms.clamp(0.0, MAX_DELAY_MS) / 1000.0 * sample_rate as f64).round() as usize;
        self.delay_frames = frames.min(self.capacity() - 1);
    }

    /// Pushes one frame and returns the frame written `delay_frames` ago
    fn tick(&mut self, left: f32, right: f32) -> (f32, f32) {
        let cap = self.capacity();
        let read = (self.write + cap - self.delay_frames) % cap;
        self.buffer[self.write * 2] = left;
        self.buffer[self.write * 2 + 1] = right;
        let out = (self.buffer[read * 2], self.buffer[read * 2 + 1]);
        self.write = (self.write + 1) % cap;
        out
    }

    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write = 0;
    }
}

/// Delay effect: the signal shifted later by `delay` ms
pub struct DelayStage {
    line: DelayLine,
    sample_rate: u32,
}

impl DelayStage {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            line: DelayLine::new(sample_rate, 500.0),
            sample_rate,
        }
    }
}

impl EffectStage for DelayStage {
    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(2) {
            let (l, r) = self.line.tick(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn set_param(&mut self, name: &str, value: f64) -> bool {
        match name {
            "delay" => {
                self.line.set_delay(self.sample_rate, value);
                true
            }
            _ => false,
        }
    }

    fn reset(&mut self) {
        self.line.clear();
    }

    fn name(&self) -> &'static str {
        "delay"
    }
}

/// Reverb effect, rendered as a single-tap echo:
/// `out = (in * IN_GAIN + in[t - delay] * decay) * OUT_GAIN`
pub struct EchoStage {
    line: DelayLine,
    decay: f32,
    sample_rate: u32,
}

const IN_GAIN: f32 = 0.8;
const OUT_GAIN: f32 = 0.88;

impl EchoStage {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            line: DelayLine::new(sample_rate, 500.0),
            decay: 0.5,
            sample_rate,
        }
    }
}

impl EffectStage for EchoStage {
    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(2) {
            let (dl, dr) = self.line.tick(frame[0], frame[1]);
            frame[0] = (frame[0] * IN_GAIN + dl * self.decay) * OUT_GAIN;
            frame[1] = (frame[1] * IN_GAIN + dr * self.decay) * OUT_GAIN;
        }
    }

    fn set_param(&mut self, name: &str, value: f64) -> bool {
        match name {
            "delay" => self.line.set_delay(self.sample_rate, value),
            "decay" => self.decay = value.clamp(0.0, 1.0) as f32,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.line.clear();
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(frames: usize) -> Vec<f32> {
        let mut block = vec![0.0f32; frames * 2];
        block[0] = 1.0;
        block[1] = 1.0;
        block
    }

    #[test]
    fn test_delay_shifts_impulse() {
        // 1 kHz: 10 ms = 10 frames
        let mut stage = DelayStage::new(1_000);
        stage.set_param("delay", 10.0);
        let mut block = impulse(32);
        stage.process(&mut block);

        assert_eq!(block[0], 0.0);
        assert_eq!(block[20], 1.0);
        assert_eq!(block[21], 1.0);
        assert_eq!(block.iter().filter(|s| **s != 0.0).count(), 2);
    }

    #[test]
    fn test_zero_delay_is_identity() {
        let mut stage = DelayStage::new(1_000);
        stage.set_param("delay", 0.0);
        let mut block = impulse(4);
        stage.process(&mut block);
        assert_eq!(block, impulse(4));
    }

    #[test]
    fn test_echo_tap() {
        let mut stage = EchoStage::new(1_000);
        stage.set_param("delay", 5.0);
        stage.set_param("decay", 0.5);
        let mut block = impulse(16);
        stage.process(&mut block);

        assert!((block[0] - IN_GAIN * OUT_GAIN).abs() < 1e-6);
        assert!((block[10] - 0.5 * OUT_GAIN).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut stage = DelayStage::new(1_000);
        stage.set_param("delay", 3.0);
        let mut block = impulse(2);
        stage.process(&mut block);
        stage.reset();

        let mut silent = vec![0.0f32; 8];
        stage.process(&mut silent);
        assert!(silent.iter().all(|s| *s == 0.0));
    }
}
