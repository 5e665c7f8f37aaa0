//! Effect chain construction
//!
//! Resolves a clip's effect ids against the registry and instantiates the
//! audio stages in wiring order. Anything that cannot be turned into an
//! audio stage is dropped here without error.

use std::collections::HashMap;

use clipmix_common::{Clip, EffectDescriptor, EffectId, EffectLookup};
use tracing::trace;

use crate::dsp::{self, EffectStage};

/// One instantiated stage, tagged with the registry effect it came from
pub struct ChainStage {
    pub effect_id: EffectId,
    pub order: u32,
    pub stage: Box<dyn EffectStage>,
}

/// Ordered stages, wired in series: `stages[0]` is fed by the voice's gain
/// stage, the last one feeds the master mix.
#[derive(Default)]
pub struct EffectChain {
    stages: Vec<ChainStage>,
    index: HashMap<EffectId, usize>,
}

impl EffectChain {
    fn new(stages: Vec<ChainStage>) -> Self {
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.effect_id.clone(), i))
            .collect();
        Self { stages, index }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Effect ids in wiring order
    pub fn effect_ids(&self) -> Vec<EffectId> {
        self.stages.iter().map(|s| s.effect_id.clone()).collect()
    }

    /// Position of an effect in the chain
    pub fn position(&self, effect_id: &str) -> Option<usize> {
        self.index.get(effect_id).copied()
    }

    /// Runs the block through every stage in order
    pub fn process(&mut self, block: &mut [f32]) {
        for stage in &mut self.stages {
            stage.stage.process(block);
        }
    }

    /// Live parameter update on one stage. False when the effect is not in
    /// the chain or the stage does not know the parameter.
    pub fn set_param(&mut self, effect_id: &str, name: &str, value: f64) -> bool {
        match self.index.get(effect_id) {
            Some(&i) => self.stages[i].stage.set_param(name, value),
            None => false,
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.stage.reset();
        }
    }
}

/// Builds effect chains for clips
pub struct EffectChainBuilder;

impl EffectChainBuilder {
    /// Resolves and orders the clip's audio effects.
    ///
    /// Missing ids, non-audio types and disabled effects are skipped. The
    /// rest are sorted by `order`; the sort is stable, so ties keep the
    /// clip's list order.
    pub fn build(clip: &Clip, lookup: &dyn EffectLookup, sample_rate: u32) -> EffectChain {
        let mut resolved: Vec<EffectDescriptor> = Vec::with_capacity(clip.effects.len());

        for effect_id in &clip.effects {
            let Some(descriptor) = lookup.effect(effect_id) else {
                trace!("Clip {}: effect {} not in registry, skipping", clip.id, effect_id);
                continue;
            };
            if !descriptor.effect_type.is_audio() {
                trace!(
                    "Clip {}: effect {} ({:?}) has no audio stage",
                    clip.id,
                    effect_id,
                    descriptor.effect_type
                );
                continue;
            }
            if !descriptor.enabled {
                trace!("Clip {}: effect {} disabled", clip.id, effect_id);
                continue;
            }
            resolved.push(descriptor);
        }

        resolved.sort_by_key(|d| d.order);

        let stages = resolved
            .into_iter()
            .filter_map(|descriptor| {
                let params = descriptor.numeric_params();
                dsp::create_stage(&descriptor.effect_type, &params, sample_rate).map(|stage| {
                    ChainStage {
                        effect_id: descriptor.id,
                        order: descriptor.order,
                        stage,
                    }
                })
            })
            .collect();

        EffectChain::new(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmix_common::{EffectType, ParamValue};

    fn registry(effects: Vec<EffectDescriptor>) -> HashMap<EffectId, EffectDescriptor> {
        effects.into_iter().map(|e| (e.id.clone(), e)).collect()
    }

    #[test]
    fn test_sorted_by_order() {
        let lookup = registry(vec![
            EffectDescriptor::new("a", EffectType::Volume).with_order(2),
            EffectDescriptor::new("b", EffectType::Delay).with_order(0),
            EffectDescriptor::new("c", EffectType::Compressor).with_order(1),
        ]);
        let clip = Clip::with_range("clip", "asset", 0.0, 1.0).with_effects(["a", "b", "c"]);

        let chain = EffectChainBuilder::build(&clip, &lookup, 48_000);
        assert_eq!(chain.effect_ids(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_keep_list_order() {
        let lookup = registry(vec![
            EffectDescriptor::new("x", EffectType::Gain).with_order(1),
            EffectDescriptor::new("y", EffectType::Volume).with_order(1),
            EffectDescriptor::new("z", EffectType::Limiter).with_order(0),
        ]);
        let clip = Clip::with_range("clip", "asset", 0.0, 1.0).with_effects(["y", "x", "z"]);

        let chain = EffectChainBuilder::build(&clip, &lookup, 48_000);
        assert_eq!(chain.effect_ids(), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_filters_missing_visual_and_disabled() {
        let lookup = registry(vec![
            EffectDescriptor::new("blur", EffectType::GaussianBlur),
            EffectDescriptor::new("off", EffectType::Volume).disabled(),
            EffectDescriptor::new("eq", EffectType::EqBand),
        ]);
        let clip = Clip::with_range("clip", "asset", 0.0, 1.0)
            .with_effects(["blur", "missing", "off", "eq"]);

        let chain = EffectChainBuilder::build(&clip, &lookup, 48_000);
        assert_eq!(chain.effect_ids(), vec!["eq"]);
        assert_eq!(chain.position("eq"), Some(0));
        assert_eq!(chain.position("off"), None);
    }

    #[test]
    fn test_no_effects_is_empty_chain() {
        let lookup = registry(vec![]);
        let clip = Clip::with_range("clip", "asset", 0.0, 1.0);
        let chain = EffectChainBuilder::build(&clip, &lookup, 48_000);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_numeric_params_applied_and_live_update() {
        let lookup = registry(vec![EffectDescriptor::new("vol", EffectType::Volume)
            .with_param("level", ParamValue::Float(0.5))
            .with_param("label", ParamValue::String("loud".into()))]);
        let clip = Clip::with_range("clip", "asset", 0.0, 1.0).with_effects(["vol"]);

        let mut chain = EffectChainBuilder::build(&clip, &lookup, 48_000);
        let mut block = [1.0f32, 1.0];
        chain.process(&mut block);
        assert_eq!(block, [0.5, 0.5]);

        assert!(chain.set_param("vol", "level", 0.25));
        assert!(!chain.set_param("vol", "label", 1.0));
        assert!(!chain.set_param("other", "level", 1.0));

        let mut block = [1.0f32, 1.0];
        chain.process(&mut block);
        assert_eq!(block, [0.25, 0.25]);
    }
}
