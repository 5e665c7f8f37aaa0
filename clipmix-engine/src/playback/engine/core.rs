//! Engine task: state, event handlers and the select loop
//!
//! **Responsibilities:**
//! - Transport reactions (lazy output init, start/stop, seek, live params)
//! - Scheduling passes and load orchestration
//! - Generation tracking: bumped on seek, stop and dispose; load
//!   completions tagged with an older generation are dropped
//! - Guaranteed teardown through [`DisposeGuard`]

use std::collections::HashSet;
use std::ops::{ControlFlow, Deref, DerefMut};
use std::sync::Arc;

use clipmix_common::{ClipId, EngineConfig, Sequence, Track, TransportState};
use tokio::sync::mpsc::{Receiver, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::audio::output::OutputBackend;
use crate::audio::types::AudioBuffer;
use crate::error::Result;
use crate::playback::cache::AssetBufferCache;
use crate::playback::chain::EffectChainBuilder;
use crate::playback::events::{CacheEvent, EngineMessage};
use crate::playback::mixer::{lock_mixer, SharedMixer};
use crate::playback::scheduler::{clip_gain, voice_rate, ClipScheduler, ScheduledClip};
use crate::playback::transport::{TransportChange, TransportSync};
use crate::playback::voices::{VoiceManager, VoiceParams};

use super::handle::EngineCommand;
use super::{Collaborators, EngineState};

pub(super) struct EngineCore {
    config: Arc<EngineConfig>,
    collaborators: Collaborators,
    cache: AssetBufferCache,
    voices: VoiceManager,
    scheduler: ClipScheduler,
    transport: TransportSync,
    mixer: SharedMixer,
    backend: Box<dyn OutputBackend>,
    output_open: bool,
    generation: u64,
    /// Clips whose buffer load was spawned in the current generation
    pending_loads: HashSet<ClipId>,
    /// Clips whose voice played to its end in the current generation
    finished: HashSet<ClipId>,
    ticker: Option<Interval>,
    state: EngineState,
    state_tx: watch::Sender<EngineState>,
    messages_tx: UnboundedSender<EngineMessage>,
}

impl EngineCore {
    pub(super) fn new(
        config: Arc<EngineConfig>,
        collaborators: Collaborators,
        cache: AssetBufferCache,
        mixer: SharedMixer,
        backend: Box<dyn OutputBackend>,
        state_tx: watch::Sender<EngineState>,
        messages_tx: UnboundedSender<EngineMessage>,
    ) -> Self {
        Self {
            scheduler: ClipScheduler::new(&config),
            transport: TransportSync::new(TransportState::default(), config.seek_threshold_secs, Instant::now()),
            voices: VoiceManager::new(mixer.clone()),
            config,
            collaborators,
            cache,
            mixer,
            backend,
            output_open: false,
            generation: 0,
            pending_loads: HashSet::new(),
            finished: HashSet::new(),
            ticker: None,
            state: EngineState::Uninitialized,
            state_tx,
            messages_tx,
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!("Engine state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
        self.pending_loads.clear();
        self.finished.clear();
        trace!("Generation now {}", self.generation);
    }

    fn is_ready(&self) -> bool {
        self.output_open
            && matches!(self.state, EngineState::Ready | EngineState::Scheduling)
            && self.cache.is_available()
    }

    // ========================================
    // Transport
    // ========================================

    fn on_transport(&mut self, next: TransportState) {
        if self.state == EngineState::Disposed {
            return;
        }
        for change in self.transport.apply(next, Instant::now()) {
            trace!("Transport change: {:?}", change);
            match change {
                TransportChange::Stopped => self.on_stopped(),
                TransportChange::Seeked { from, to } => self.on_seeked(from, to),
                TransportChange::Started => self.on_started(),
                TransportChange::RateChanged(_) => self.refresh_live(),
                TransportChange::VolumeChanged(_) | TransportChange::MuteChanged(_) => {
                    self.apply_master_gain();
                    self.refresh_live();
                }
            }
        }
    }

    /// Opens the output on first use; the device may not exist before then
    fn ensure_output(&mut self) -> Result<()> {
        if self.output_open {
            return Ok(());
        }
        let rate = self.backend.open(self.mixer.clone())?;
        lock_mixer(&self.mixer).set_sample_rate(rate);
        self.output_open = true;
        self.apply_master_gain();
        self.set_state(EngineState::Ready);
        info!("{} output initialized at {} Hz", self.backend.name(), rate);
        Ok(())
    }

    fn on_started(&mut self) {
        if let Err(e) = self.ensure_output() {
            warn!("Cannot start playback, output unavailable: {}", e);
            return;
        }
        if let Err(e) = self.backend.resume() {
            // Voices stay registered; the next play request retries the resume
            warn!("Playback start rejected by {} output: {}", self.backend.name(), e);
        }

        self.set_state(EngineState::Scheduling);
        let period = self.scheduler.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        self.scheduler.reset_clock();
        self.schedule_pass(true);
    }

    fn on_stopped(&mut self) {
        self.ticker = None;
        let stopped = self.voices.stop_all();
        self.bump_generation();
        if self.output_open {
            self.set_state(EngineState::Ready);
        }
        debug!("Transport stopped ({} voices released)", stopped);
    }

    fn on_seeked(&mut self, from: f64, to: f64) {
        debug!("Seek {:.3}s -> {:.3}s", from, to);
        self.voices.stop_all();
        self.bump_generation();
        self.scheduler.reset_clock();
        if self.state == EngineState::Scheduling {
            self.schedule_pass(true);
        }
    }

    fn apply_master_gain(&mut self) {
        let gain = self.transport.state().master_gain();
        lock_mixer(&self.mixer).set_master_gain(gain);
    }

    // ========================================
    // Scheduling
    // ========================================

    /// One scheduling pass. Periodic passes are rate limited; forced ones
    /// (play, seek, load completion) always run.
    fn schedule_pass(&mut self, forced: bool) {
        if self.state != EngineState::Scheduling {
            return;
        }
        let now = Instant::now();
        if !self.scheduler.should_run(now, forced) {
            trace!("Skipping periodic pass, last one too recent");
            return;
        }

        let Some(sequence) = self.collaborators.timeline.sequence() else {
            debug!("No active sequence");
            self.voices.stop_all();
            return;
        };
        let current_time = self.transport.current_time(now);
        let transport = *self.transport.state();

        let voices = &self.voices;
        let pending = &self.pending_loads;
        let finished = &self.finished;
        let plan = self.scheduler.plan(&sequence, current_time, |id| {
            voices.has_voice(id) || pending.contains(id) || finished.contains(id)
        });
        trace!("Pass at {:.3}s: {} clips to start", current_time, plan.len());

        for scheduled in plan {
            self.materialize(&sequence, scheduled, &transport);
        }
        self.refresh_live_with(&sequence, &transport);
    }

    fn materialize(&mut self, sequence: &Sequence, scheduled: ScheduledClip, transport: &TransportState) {
        let clip = &scheduled.clip;
        let Some(location) = self.collaborators.assets.resolve(&clip.asset_id) else {
            debug!("Clip {}: asset {} not in catalog, skipping", clip.id, clip.asset_id);
            return;
        };
        let Some(track) = sequence.get_track(&scheduled.track_id) else {
            return;
        };

        if let Some(buffer) = self.cache.get(&clip.asset_id) {
            self.start_voice(track, &scheduled, buffer, transport);
            return;
        }
        if self.cache.has_pending_retry(&clip.asset_id) {
            trace!("Clip {}: asset {} waiting on its retry timer", clip.id, clip.asset_id);
            return;
        }
        if self.cache.retries_exhausted(&clip.asset_id) {
            trace!("Clip {}: asset {} needs an explicit retry", clip.id, clip.asset_id);
            return;
        }
        self.spawn_load(clip.id.clone(), clip.asset_id.clone(), location.preferred_uri().to_string());
    }

    fn start_voice(
        &mut self,
        track: &Track,
        scheduled: &ScheduledClip,
        buffer: Arc<AudioBuffer>,
        transport: &TransportState,
    ) {
        let clip = &scheduled.clip;
        let sample_rate = lock_mixer(&self.mixer).sample_rate();
        let chain = EffectChainBuilder::build(clip, self.collaborators.effects.as_ref(), sample_rate);
        let params = VoiceParams {
            gain: clip_gain(track, clip, transport),
            rate: voice_rate(clip, transport),
            generation: self.generation,
        };
        self.voices.start(clip, buffer, chain, &scheduled.timing, params);
    }

    fn spawn_load(&mut self, clip_id: ClipId, asset_id: String, uri: String) {
        self.pending_loads.insert(clip_id.clone());
        let cache = self.cache.clone();
        let tx = self.messages_tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let result = cache.load(&asset_id, &uri).await.map(|_| ());
            let _ = tx.send(EngineMessage::LoadCompleted {
                clip_id,
                generation,
                result,
            });
        });
    }

    fn refresh_live(&mut self) {
        if self.voices.is_empty() {
            return;
        }
        match self.collaborators.timeline.sequence() {
            Some(sequence) => {
                let transport = *self.transport.state();
                self.refresh_live_with(&sequence, &transport);
            }
            None => {
                self.voices.stop_all();
            }
        }
    }

    /// Pushes fresh gain/rate to every voice; voices whose clip left the
    /// timeline are stopped.
    fn refresh_live_with(&mut self, sequence: &Sequence, transport: &TransportState) {
        for clip_id in self.voices.active_clip_ids() {
            match ClipScheduler::live_update(sequence, &clip_id, transport) {
                Some((gain, rate)) => {
                    self.voices.update_live(&clip_id, gain, rate);
                }
                None => {
                    debug!("Clip {} left the timeline, stopping its voice", clip_id);
                    self.voices.stop(&clip_id);
                }
            }
        }
    }

    // ========================================
    // Messages and commands
    // ========================================

    fn on_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::LoadCompleted {
                clip_id,
                generation,
                result,
            } => {
                if generation != self.generation {
                    debug!(
                        "Dropping load for clip {} from generation {} (now {})",
                        clip_id, generation, self.generation
                    );
                    return;
                }
                self.pending_loads.remove(&clip_id);
                match result {
                    // The pass re-checks the clip against the current time
                    Ok(()) => self.schedule_pass(true),
                    Err(e) => debug!("Clip {} not started: {}", clip_id, e),
                }
            }
            EngineMessage::VoiceEnded { clip_id, voice_id } => {
                if self.voices.on_voice_ended(&clip_id, voice_id) {
                    // Not replanned until a seek or stop
                    self.finished.insert(clip_id);
                }
            }
        }
    }

    fn on_cache_event(&mut self, event: CacheEvent) {
        match event {
            CacheEvent::Loaded { asset_id } => {
                trace!("Asset {} available", asset_id);
                self.schedule_pass(true);
            }
            CacheEvent::Failed {
                asset_id,
                attempts,
                error,
            } => {
                debug!("Asset {} failed ({} attempts): {}", asset_id, attempts, error);
            }
        }
    }

    /// Handles one command; `Break` once the engine is disposed
    fn on_command(&mut self, command: EngineCommand) -> ControlFlow<()> {
        match command {
            EngineCommand::RetryLoad { asset_id, reply } => {
                let uri = self
                    .collaborators
                    .assets
                    .resolve(&asset_id)
                    .map(|location| location.preferred_uri().to_string());
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    let result = cache.retry_load(&asset_id, uri.as_deref()).await.map(|_| ());
                    let _ = reply.send(result);
                });
            }
            EngineCommand::UpdateClipEffect {
                clip_id,
                effect_id,
                param,
                value,
                reply,
            } => {
                let applied = self.voices.update_effect_param(&clip_id, &effect_id, &param, value);
                if !applied {
                    debug!("No live effect {} on clip {} for {}", effect_id, clip_id, param);
                }
                let _ = reply.send(applied);
            }
            EngineCommand::FailedAssets { reply } => {
                let _ = reply.send(self.cache.failed_assets());
            }
            EngineCommand::ActiveVoices { reply } => {
                let _ = reply.send(self.voices.voices());
            }
            EngineCommand::IsReady { reply } => {
                let _ = reply.send(self.is_ready());
            }
            EngineCommand::Dispose { reply } => {
                self.dispose();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Stops voices, cancels retries, invalidates loads, closes the output.
    /// Idempotent.
    pub(super) fn dispose(&mut self) {
        if self.state == EngineState::Disposed {
            return;
        }
        self.ticker = None;
        self.bump_generation();
        let stopped = self.voices.stop_all();
        self.cache.dispose();
        if self.output_open {
            self.backend.close();
            self.output_open = false;
        }
        self.set_state(EngineState::Disposed);
        info!(
            "Playback engine disposed ({} voices stopped, look-ahead was {:.2}s)",
            stopped, self.config.schedule_ahead_secs
        );
    }
}

/// Runs [`EngineCore::dispose`] when dropped, whatever ended the task
pub(super) struct DisposeGuard(EngineCore);

impl DisposeGuard {
    pub(super) fn new(core: EngineCore) -> Self {
        Self(core)
    }
}

impl Deref for DisposeGuard {
    type Target = EngineCore;

    fn deref(&self) -> &EngineCore {
        &self.0
    }
}

impl DerefMut for DisposeGuard {
    fn deref_mut(&mut self) -> &mut EngineCore {
        &mut self.0
    }
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Engine task body
pub(super) async fn run(
    mut core: DisposeGuard,
    mut commands: Receiver<EngineCommand>,
    mut transport: watch::Receiver<TransportState>,
    mut messages: UnboundedReceiver<EngineMessage>,
    mut cache_events: UnboundedReceiver<CacheEvent>,
) {
    let initial = *transport.borrow_and_update();
    core.on_transport(initial);
    let mut transport_open = true;

    loop {
        tokio::select! {
            // Transport first: a snapshot sent before a command is applied
            // before that command is answered
            biased;

            changed = transport.changed(), if transport_open => match changed {
                Ok(()) => {
                    let next = *transport.borrow_and_update();
                    core.on_transport(next);
                }
                Err(_) => {
                    debug!("Transport source dropped; keeping last state");
                    transport_open = false;
                }
            },

            Some(message) = messages.recv() => core.on_message(message),

            Some(event) = cache_events.recv() => core.on_cache_event(event),

            command = commands.recv() => match command {
                Some(command) => {
                    if core.on_command(command).is_break() {
                        break;
                    }
                }
                None => {
                    debug!("All engine handles dropped");
                    break;
                }
            },

            _ = next_tick(&mut core.ticker) => core.schedule_pass(false),
        }
    }
    // DisposeGuard drop completes teardown on every exit path
}
