//! Handle to a running engine
//!
//! Every call is a message to the engine task with a oneshot reply; once
//! the task is gone, calls fail with [`Error::EngineClosed`] (except
//! `dispose`, which is then already done).

use clipmix_common::{AssetId, ClipId, EffectId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, LoadError, Result};
use crate::playback::voices::Voice;

use super::EngineState;

pub(crate) enum EngineCommand {
    RetryLoad {
        asset_id: AssetId,
        reply: oneshot::Sender<std::result::Result<(), LoadError>>,
    },
    UpdateClipEffect {
        clip_id: ClipId,
        effect_id: EffectId,
        param: String,
        value: f64,
        reply: oneshot::Sender<bool>,
    },
    FailedAssets {
        reply: oneshot::Sender<Vec<AssetId>>,
    },
    ActiveVoices {
        reply: oneshot::Sender<Vec<Voice>>,
    },
    IsReady {
        reply: oneshot::Sender<bool>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle; the engine shuts down when the last clone is dropped
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    state: watch::Receiver<EngineState>,
}

impl EngineHandle {
    pub(crate) fn new(commands: mpsc::Sender<EngineCommand>, state: watch::Receiver<EngineState>) -> Self {
        Self { commands, state }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)
    }

    /// Clears the asset's failure record and forces one fresh load attempt.
    /// Resolves when that attempt finishes.
    pub async fn retry_load(&self, asset_id: &str) -> Result<()> {
        let asset_id = asset_id.to_string();
        self.request(|reply| EngineCommand::RetryLoad { asset_id, reply })
            .await?
            .map_err(Error::from)
    }

    /// Real-time parameter change on a playing clip's effect. Returns false
    /// when the clip has no voice or the effect/parameter is not in its chain.
    pub async fn update_clip_effect(&self, clip_id: &str, effect_id: &str, param: &str, value: f64) -> Result<bool> {
        let (clip_id, effect_id, param) = (clip_id.to_string(), effect_id.to_string(), param.to_string());
        self.request(|reply| EngineCommand::UpdateClipEffect {
            clip_id,
            effect_id,
            param,
            value,
            reply,
        })
        .await
    }

    /// Asset ids currently in a failed-load state
    pub async fn failed_assets(&self) -> Result<Vec<AssetId>> {
        self.request(|reply| EngineCommand::FailedAssets { reply }).await
    }

    /// Voices currently registered, sorted by clip id
    pub async fn active_voices(&self) -> Result<Vec<Voice>> {
        self.request(|reply| EngineCommand::ActiveVoices { reply }).await
    }

    /// Output open and decoding available. False once the engine is gone.
    pub async fn is_ready(&self) -> bool {
        self.request(|reply| EngineCommand::IsReady { reply })
            .await
            .unwrap_or(false)
    }

    /// Latest lifecycle state
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Waits until the engine reaches `target` (or is disposed)
    pub async fn wait_for_state(&self, target: EngineState) -> EngineState {
        let mut state = self.state.clone();
        let reached = match state
            .wait_for(|s| *s == target || *s == EngineState::Disposed)
            .await
        {
            Ok(reached) => *reached,
            Err(_) => EngineState::Disposed,
        };
        reached
    }

    /// Stops all voices, cancels retries, drops in-flight loads and closes
    /// the output. Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        match self.request(|reply| EngineCommand::Dispose { reply }).await {
            Ok(()) | Err(Error::EngineClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
