//! Playback engine
//!
//! One tokio task owns every component (cache handle, voice registry,
//! scheduler, transport tracker) and reacts to transport snapshots,
//! handle commands, load completions, voice endings and its own periodic
//! tick. The mixer is the only state it shares, with the audio callback.
//!
//! **State machine:** `Uninitialized -> Ready` once the output is open
//! (lazily, on the first play), `Ready <-> Scheduling` while playing,
//! `Disposed` from anywhere.

mod core;
mod handle;

use std::sync::Arc;

use clipmix_common::{AssetCatalog, EffectLookup, EngineConfig, ProjectSnapshot, TimelineSource, TransportState};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::audio::loader::AssetLoader;
use crate::audio::output::OutputBackend;
use crate::error::Result;
use crate::playback::cache::AssetBufferCache;
use crate::playback::mixer::{lock_mixer, Mixer};

use self::core::{DisposeGuard, EngineCore};
pub use handle::EngineHandle;

/// Command channel depth
const COMMAND_BUFFER: usize = 32;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Output not opened yet
    Uninitialized,
    /// Output open, not playing
    Ready,
    /// Playing: periodic scheduling active
    Scheduling,
    /// Terminal
    Disposed,
}

/// Read-side collaborators, owned by the host
#[derive(Clone)]
pub struct Collaborators {
    pub timeline: Arc<dyn TimelineSource>,
    pub effects: Arc<dyn EffectLookup>,
    pub assets: Arc<dyn AssetCatalog>,
    pub loader: Arc<dyn AssetLoader>,
}

impl Collaborators {
    /// All three read models served by one in-memory project
    pub fn from_project(project: Arc<ProjectSnapshot>, loader: Arc<dyn AssetLoader>) -> Self {
        Self {
            timeline: project.clone(),
            effects: project.clone(),
            assets: project,
            loader,
        }
    }
}

pub struct PlaybackEngine;

impl PlaybackEngine {
    /// Starts the engine task and returns its handle.
    ///
    /// Must be called from within a tokio runtime. The current transport
    /// snapshot is applied immediately, so an already-playing transport
    /// starts playback right away.
    pub fn spawn(
        config: EngineConfig,
        collaborators: Collaborators,
        backend: Box<dyn OutputBackend>,
        transport: watch::Receiver<TransportState>,
    ) -> Result<EngineHandle> {
        config.validate()?;
        let config = Arc::new(config);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (cache_tx, cache_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Uninitialized);

        let mixer = Mixer::shared(config.sample_rate);
        lock_mixer(&mixer).set_ended_sender(message_tx.clone());

        let cache = AssetBufferCache::new(collaborators.loader.clone(), config.clone()).with_events(cache_tx);

        info!(
            "Starting playback engine (output: {}, look-ahead {:.2}s, interval {:.2}s)",
            backend.name(),
            config.schedule_ahead_secs,
            config.reschedule_interval_secs
        );

        let core = EngineCore::new(config, collaborators, cache, mixer, backend, state_tx, message_tx);
        // Guard exists before the task is first polled, so even a task that
        // never runs releases everything when dropped
        let guard = DisposeGuard::new(core);
        tokio::spawn(core::run(guard, command_rx, transport, message_rx, cache_rx));

        Ok(EngineHandle::new(command_tx, state_rx))
    }
}
