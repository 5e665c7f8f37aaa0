//! # clipmix Common Library
//!
//! Shared code for the clipmix audio engine and its host applications:
//! - Timeline model (sequences, tracks, clips)
//! - Effect descriptors and parameter values
//! - Transport state read model
//! - Asset locations
//! - Timing math shared by scheduler and UI
//! - Engine configuration loading

pub mod assets;
pub mod config;
pub mod effects;
pub mod error;
pub mod project;
pub mod timeline;
pub mod timing;
pub mod transport;

pub use assets::{AssetCatalog, AssetLocation};
pub use config::EngineConfig;
pub use effects::{EffectDescriptor, EffectLookup, EffectType, ParamValue};
pub use error::{Error, Result};
pub use project::ProjectSnapshot;
pub use timeline::{AudioSettings, Clip, ClipPlace, ClipRange, Sequence, TimelineSource, Track, TrackKind};
pub use transport::TransportState;

/// Identifier of an asset in the host's catalog
pub type AssetId = String;

/// Identifier of a clip on the timeline
pub type ClipId = String;

/// Identifier of an effect in the effect registry
pub type EffectId = String;

/// Identifier of a track
pub type TrackId = String;

/// Identifier of a sequence
pub type SequenceId = String;

/// Time in seconds
pub type TimeSec = f64;
