//! Timeline playback: asset cache, scheduling, voices and the engine task

pub mod cache;
pub mod chain;
pub mod engine;
pub mod events;
pub mod mixer;
pub mod scheduler;
pub mod transport;
pub mod voices;

pub use cache::{AssetBufferCache, FailedLoadRecord};
pub use chain::{EffectChain, EffectChainBuilder};
pub use engine::{Collaborators, EngineHandle, EngineState, PlaybackEngine};
pub use events::{CacheEvent, EngineMessage};
pub use mixer::{lock_mixer, Mixer, NodeId, SharedMixer};
pub use scheduler::{ClipScheduler, ClipTiming};
pub use transport::{TransportChange, TransportSync};
pub use voices::{Voice, VoiceId, VoiceManager, VoiceParams};
