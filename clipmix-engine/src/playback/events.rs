//! Internal engine messages
//!
//! Everything that reaches the engine task from outside its own call stack
//! (spawned loads, retry timers, the render callback) arrives as one of
//! these.

use clipmix_common::{AssetId, ClipId};

use crate::error::LoadError;
use crate::playback::mixer::NodeId;

/// Messages delivered to the engine task
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// A load spawned by a scheduling pass finished.
    ///
    /// Tagged with the generation it was requested in; completions from an
    /// older generation are dropped.
    LoadCompleted {
        clip_id: ClipId,
        generation: u64,
        result: Result<(), LoadError>,
    },

    /// A voice's source reached the end of its scheduled range.
    ///
    /// Sent from the render callback.
    VoiceEnded { clip_id: ClipId, voice_id: NodeId },
}

/// Outcomes reported by the asset cache, including timer-driven retries
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Asset decoded and cached
    Loaded { asset_id: AssetId },

    /// An attempt failed; `attempts` counts failures since the last reset
    Failed {
        asset_id: AssetId,
        attempts: u32,
        error: LoadError,
    },
}
