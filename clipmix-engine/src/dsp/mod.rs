//! Real-time effect stages
//!
//! Each audio effect type from the registry maps to one stage. Stages
//! process interleaved stereo blocks in place and are wired in series by
//! the voice that owns them.

pub mod delay;
pub mod dynamics;
pub mod eq;
pub mod gain;

use std::collections::HashMap;

use clipmix_common::EffectType;

pub use delay::{DelayStage, EchoStage};
pub use dynamics::{CompressorStage, LimiterStage};
pub use eq::EqBandStage;
pub use gain::{GainStage, VolumeStage};

/// One signal-processing stage in a clip's effect chain
pub trait EffectStage: Send {
    /// Processes an interleaved stereo block in place
    fn process(&mut self, block: &mut [f32]);

    /// Updates a numeric parameter; returns false for unknown names
    fn set_param(&mut self, name: &str, value: f64) -> bool;

    /// Clears internal state (filter memory, delay lines, envelopes)
    fn reset(&mut self) {}

    /// Short stage name for logs
    fn name(&self) -> &'static str;
}

/// Instantiates the stage for an effect type, or None when the type has no
/// audio-processing counterpart.
pub fn create_stage(
    effect_type: &EffectType,
    params: &HashMap<String, f64>,
    sample_rate: u32,
) -> Option<Box<dyn EffectStage>> {
    let mut stage: Box<dyn EffectStage> = match effect_type {
        EffectType::Volume | EffectType::Gain => Box::new(VolumeStage::new()),
        EffectType::EqBand => Box::new(EqBandStage::new(sample_rate)),
        EffectType::Compressor => Box::new(CompressorStage::new(sample_rate)),
        EffectType::Limiter => Box::new(LimiterStage::new(sample_rate)),
        EffectType::Reverb => Box::new(EchoStage::new(sample_rate)),
        EffectType::Delay => Box::new(DelayStage::new(sample_rate)),
        _ => return None,
    };

    for (name, value) in params {
        stage.set_param(name, *value);
    }
    Some(stage)
}

/// Milliseconds to a one-pole smoothing coefficient at `sample_rate`
pub(crate) fn time_coefficient(ms: f64, sample_rate: u32) -> f32 {
    let samples = (ms.max(0.01) / 1000.0) * sample_rate.max(1) as f64;
    (-1.0 / samples).exp() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stage_audio_types() {
        let params = HashMap::new();
        for effect_type in [
            EffectType::Volume,
            EffectType::Gain,
            EffectType::EqBand,
            EffectType::Compressor,
            EffectType::Limiter,
            EffectType::Reverb,
            EffectType::Delay,
        ] {
            assert!(create_stage(&effect_type, &params, 48_000).is_some(), "{:?}", effect_type);
        }
    }

    #[test]
    fn test_create_stage_rejects_visual_types() {
        let params = HashMap::new();
        assert!(create_stage(&EffectType::GaussianBlur, &params, 48_000).is_none());
        assert!(create_stage(&EffectType::NoiseReduction, &params, 48_000).is_none());
        assert!(create_stage(&EffectType::Custom("shader".into()), &params, 48_000).is_none());
    }

    #[test]
    fn test_create_stage_applies_params() {
        let mut params = HashMap::new();
        params.insert("level".to_string(), 0.5);
        params.insert("unknown".to_string(), 3.0);

        let mut stage = create_stage(&EffectType::Volume, &params, 48_000).unwrap();
        let mut block = [1.0f32, -1.0];
        stage.process(&mut block);
        assert_eq!(block, [0.5, -0.5]);
    }
}
