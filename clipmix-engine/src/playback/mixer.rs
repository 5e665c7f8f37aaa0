//! Output graph: voice nodes summed into the master mix
//!
//! # Architecture
//!
//! The mixer is the only state shared between the engine task and the audio
//! callback (`Arc<Mutex<Mixer>>`). Each connected node is one voice:
//!
//! ```text
//! source (varispeed read) -> gain/pan -> effect chain -> master mix -> master gain
//! ```
//!
//! The device clock is the number of frames rendered so far. Nodes carry a
//! start frame on that clock, a source read position and an end position;
//! when a node runs past its end it falls silent and reports itself once
//! through the ended channel. Removal is always done by the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use clipmix_common::ClipId;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::audio::types::{AudioBuffer, CHANNELS};
use crate::dsp::GainStage;
use crate::playback::chain::EffectChain;
use crate::playback::events::EngineMessage;

/// Mixer shared with the render callback
pub type SharedMixer = Arc<Mutex<Mixer>>;

/// Locks the mixer, recovering the guard if a render panicked mid-block
pub fn lock_mixer(mixer: &SharedMixer) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle of a connected voice node. Never reused within one mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// One voice's slice of the graph
pub struct VoiceNode {
    clip_id: ClipId,
    buffer: Arc<AudioBuffer>,
    /// Device frame at which the source starts reading
    start_frame: u64,
    /// Read position in source frames
    position: f64,
    /// Source frame where playback stops
    end_position: f64,
    /// Source frames advanced per output frame
    step: f64,
    rate: f64,
    output_rate: u32,
    gain: GainStage,
    chain: EffectChain,
    ended: bool,
}

impl VoiceNode {
    /// Builds a node reading `duration_secs` of `buffer` from `offset_secs`
    /// at `rate`, starting at `start_frame` on the device clock.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clip_id: ClipId,
        buffer: Arc<AudioBuffer>,
        offset_secs: f64,
        duration_secs: f64,
        start_frame: u64,
        rate: f64,
        gain: GainStage,
        chain: EffectChain,
    ) -> Self {
        let source_rate = buffer.sample_rate() as f64;
        let position = offset_secs.max(0.0) * source_rate;
        let end_position = (position + duration_secs.max(0.0) * source_rate).min(buffer.frames() as f64);
        Self {
            clip_id,
            buffer,
            start_frame,
            position,
            end_position,
            step: 0.0,
            rate,
            output_rate: 0,
            gain,
            chain,
            ended: false,
        }
    }

    pub fn clip_id(&self) -> &str {
        &self.clip_id
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn gain(&self) -> f32 {
        self.gain.gain()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain.set_gain(gain);
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.update_step(self.output_rate);
    }

    pub fn set_effect_param(&mut self, effect_id: &str, name: &str, value: f64) -> bool {
        self.chain.set_param(effect_id, name, value)
    }

    /// Effect ids in wiring order
    pub fn effect_ids(&self) -> Vec<String> {
        self.chain.effect_ids()
    }

    fn update_step(&mut self, output_rate: u32) {
        self.output_rate = output_rate.max(1);
        self.step = self.rate * self.buffer.sample_rate() as f64 / self.output_rate as f64;
    }

    /// Renders into `block` (cleared first). Returns true when the source
    /// reached its end during this block.
    fn render(&mut self, block: &mut [f32], first_frame: u64) -> bool {
        block.iter_mut().for_each(|s| *s = 0.0);
        if self.ended {
            return false;
        }

        let mut reached_end = false;
        for (i, frame) in block.chunks_exact_mut(CHANNELS).enumerate() {
            if first_frame + (i as u64) < self.start_frame {
                continue;
            }
            if self.position >= self.end_position {
                reached_end = true;
                break;
            }
            let (l, r) = self.buffer.frame_at(self.position);
            frame[0] = l;
            frame[1] = r;
            self.position += self.step;
        }

        self.gain.process(block);
        self.chain.process(block);

        if reached_end {
            self.ended = true;
        }
        reached_end
    }
}

/// Master mix
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    master_gain: f32,
    nodes: HashMap<NodeId, VoiceNode>,
    next_id: u64,
    ended_tx: Option<UnboundedSender<EngineMessage>>,
    scratch: Vec<f32>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            master_gain: 1.0,
            nodes: HashMap::new(),
            next_id: 1,
            ended_tx: None,
            scratch: Vec::new(),
        }
    }

    pub fn shared(sample_rate: u32) -> SharedMixer {
        Arc::new(Mutex::new(Self::new(sample_rate)))
    }

    /// Channel that receives [`EngineMessage::VoiceEnded`]
    pub fn set_ended_sender(&mut self, tx: UnboundedSender<EngineMessage>) {
        self.ended_tx = Some(tx);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Adopts the device rate. Existing nodes keep their source positions.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        let rate = self.sample_rate;
        for node in self.nodes.values_mut() {
            node.update_step(rate);
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Device clock in seconds
    pub fn now_secs(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Device frame `delay_secs` from now
    pub fn frame_after(&self, delay_secs: f64) -> u64 {
        self.frames_rendered + (delay_secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn connect(&mut self, mut node: VoiceNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        node.update_step(self.sample_rate);
        trace!("Connected {} for clip {}", id, node.clip_id);
        self.nodes.insert(id, node);
        id
    }

    /// Removes a node. Returns false if it was already gone.
    pub fn disconnect(&mut self, id: NodeId) -> bool {
        self.nodes.remove(&id).is_some()
    }

    /// Removes every node; returns how many were connected
    pub fn disconnect_all(&mut self) -> usize {
        let count = self.nodes.len();
        self.nodes.clear();
        count
    }

    pub fn node(&self, id: NodeId) -> Option<&VoiceNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut VoiceNode> {
        self.nodes.get_mut(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Renders one interleaved stereo block and advances the device clock.
    ///
    /// Output is not clamped; backends clamp when converting to device
    /// samples.
    pub fn render(&mut self, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let frames = out.len() / CHANNELS;
        if frames == 0 {
            return;
        }

        self.scratch.resize(frames * CHANNELS, 0.0);
        let first_frame = self.frames_rendered;

        for (&id, node) in self.nodes.iter_mut() {
            let block = &mut self.scratch[..frames * CHANNELS];
            if node.render(block, first_frame) {
                if let Some(tx) = &self.ended_tx {
                    // Receiver gone means the engine is shutting down
                    let _ = tx.send(EngineMessage::VoiceEnded {
                        clip_id: node.clip_id.clone(),
                        voice_id: id,
                    });
                }
            }
            for (o, s) in out.iter_mut().zip(block.iter()) {
                *o += *s;
            }
        }

        if self.master_gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= self.master_gain;
            }
        }

        self.frames_rendered += frames as u64;
    }
}
