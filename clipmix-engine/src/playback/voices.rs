//! Voice registry
//!
//! Owns the clip id → voice map and is the only code that connects or
//! disconnects voice nodes in the mixer. At most one voice exists per clip;
//! starting a clip that already has one replaces it under a single mixer
//! lock, so the render callback never sees both.

use std::collections::HashMap;
use std::sync::Arc;

use clipmix_common::{Clip, ClipId, EffectId};
use serde::Serialize;
use tracing::{debug, trace};

use crate::audio::types::AudioBuffer;
use crate::dsp::GainStage;
use crate::playback::chain::EffectChain;
use crate::playback::mixer::{lock_mixer, NodeId, SharedMixer, VoiceNode};
use crate::playback::scheduler::ClipTiming;

/// Identifies one started voice; a replacement voice for the same clip gets
/// a new id.
pub type VoiceId = NodeId;

/// Playback parameters for a new voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// Per-clip linear gain (transport volume is applied at the master)
    pub gain: f32,
    /// Transport rate × safe clip speed
    pub rate: f64,
    /// Engine generation the voice is started in
    pub generation: u64,
}

/// A registered voice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Voice {
    pub clip_id: ClipId,
    pub voice_id: VoiceId,
    /// Device-clock time at which the source starts
    pub start_at: f64,
    pub source_offset: f64,
    pub duration: f64,
    pub rate: f64,
    pub gain: f32,
    pub generation: u64,
    /// Effect ids in wiring order
    pub effects: Vec<EffectId>,
}

pub struct VoiceManager {
    mixer: SharedMixer,
    voices: HashMap<ClipId, Voice>,
}

impl VoiceManager {
    pub fn new(mixer: SharedMixer) -> Self {
        Self {
            mixer,
            voices: HashMap::new(),
        }
    }

    /// Wires `source -> gain -> chain -> master` for `clip` and schedules it
    /// `timing.start_delay` seconds after the current device time.
    ///
    /// An existing voice for the clip is stopped and replaced.
    pub fn start(
        &mut self,
        clip: &Clip,
        buffer: Arc<AudioBuffer>,
        chain: EffectChain,
        timing: &ClipTiming,
        params: VoiceParams,
    ) -> VoiceId {
        let effects = chain.effect_ids();
        let gain = GainStage::new(params.gain, clip.audio.pan);

        let mut mixer = lock_mixer(&self.mixer);
        if let Some(previous) = self.voices.remove(&clip.id) {
            debug!("Replacing voice {} for clip {}", previous.voice_id, clip.id);
            mixer.disconnect(previous.voice_id);
        }

        let start_frame = mixer.frame_after(timing.start_delay);
        let start_at = start_frame as f64 / mixer.sample_rate() as f64;
        let node = VoiceNode::new(
            clip.id.clone(),
            buffer,
            timing.source_offset,
            timing.audio_duration,
            start_frame,
            params.rate,
            gain,
            chain,
        );
        let voice_id = mixer.connect(node);
        drop(mixer);

        debug!(
            "Started voice {} for clip {}: offset={:.3}s duration={:.3}s start_at={:.3}s rate={:.3} gain={:.3}",
            voice_id,
            clip.id,
            timing.source_offset,
            timing.audio_duration,
            start_at,
            params.rate,
            params.gain
        );

        self.voices.insert(
            clip.id.clone(),
            Voice {
                clip_id: clip.id.clone(),
                voice_id,
                start_at,
                source_offset: timing.source_offset,
                duration: timing.audio_duration,
                rate: params.rate,
                gain: params.gain,
                generation: params.generation,
                effects,
            },
        );
        voice_id
    }

    /// Adjusts gain and rate of a started voice in place
    pub fn update_live(&mut self, clip_id: &str, gain: f32, rate: f64) -> bool {
        let Some(voice) = self.voices.get_mut(clip_id) else {
            return false;
        };
        let mut mixer = lock_mixer(&self.mixer);
        let Some(node) = mixer.node_mut(voice.voice_id) else {
            return false;
        };
        node.set_gain(gain);
        node.set_rate(rate);
        voice.gain = gain;
        voice.rate = rate;
        true
    }

    /// Live parameter change on one effect of a playing voice
    pub fn update_effect_param(&mut self, clip_id: &str, effect_id: &str, name: &str, value: f64) -> bool {
        let Some(voice) = self.voices.get(clip_id) else {
            return false;
        };
        lock_mixer(&self.mixer)
            .node_mut(voice.voice_id)
            .is_some_and(|node| node.set_effect_param(effect_id, name, value))
    }

    /// Stops and releases the clip's voice. False if there was none.
    pub fn stop(&mut self, clip_id: &str) -> bool {
        match self.voices.remove(clip_id) {
            Some(voice) => {
                lock_mixer(&self.mixer).disconnect(voice.voice_id);
                trace!("Stopped voice {} for clip {}", voice.voice_id, clip_id);
                true
            }
            None => false,
        }
    }

    /// Stops every voice; returns how many were registered
    pub fn stop_all(&mut self) -> usize {
        let count = self.voices.len();
        if count == 0 {
            return 0;
        }
        let mut mixer = lock_mixer(&self.mixer);
        for (_, voice) in self.voices.drain() {
            mixer.disconnect(voice.voice_id);
        }
        debug!("Stopped {} voices", count);
        count
    }

    /// Natural end of a voice's source. Ignored unless `voice_id` is still
    /// the clip's registered voice.
    pub fn on_voice_ended(&mut self, clip_id: &str, voice_id: VoiceId) -> bool {
        let is_current = self
            .voices
            .get(clip_id)
            .is_some_and(|voice| voice.voice_id == voice_id);
        if !is_current {
            return false;
        }
        self.voices.remove(clip_id);
        lock_mixer(&self.mixer).disconnect(voice_id);
        trace!("Voice {} for clip {} ended", voice_id, clip_id);
        true
    }

    pub fn has_voice(&self, clip_id: &str) -> bool {
        self.voices.contains_key(clip_id)
    }

    pub fn get(&self, clip_id: &str) -> Option<&Voice> {
        self.voices.get(clip_id)
    }

    /// Clip ids with a registered voice, sorted
    pub fn active_clip_ids(&self) -> Vec<ClipId> {
        let mut ids: Vec<ClipId> = self.voices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registered voices, sorted by clip id
    pub fn voices(&self) -> Vec<Voice> {
        let mut voices: Vec<Voice> = self.voices.values().cloned().collect();
        voices.sort_by(|a, b| a.clip_id.cmp(&b.clip_id));
        voices
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
