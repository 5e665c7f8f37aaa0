//! # clipmix-engine
//!
//! Real-time audio preview engine for a non-linear video editor timeline.
//!
//! **Purpose:** Follow an external transport (play/pause, playhead, rate,
//! volume, mute), schedule the audible clips of the active sequence slightly
//! ahead of the playhead, and route each one through its effect chain into
//! a shared output.
//!
//! **Architecture:** symphonia decode into an in-memory asset cache, one
//! tokio task owning scheduling state, and a pull-model mixer rendered by a
//! cpal callback (or offline, for bounces and tests).

pub mod audio;
pub mod build_info;
pub mod dsp;
pub mod error;
pub mod playback;

pub use audio::{AssetLoader, AudioBuffer, CpalBackend, FileLoader, OfflineBackend, OutputBackend};
pub use build_info::BuildInfo;
pub use error::{Error, LoadError, Result};
pub use playback::{Collaborators, EngineHandle, EngineState, PlaybackEngine};
