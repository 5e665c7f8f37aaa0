//! Shared fixtures for clipmix-engine integration tests
//!
//! - `MockLoader`: in-memory asset loader with latency, call counting and
//!   failure injection
//! - `Rig`: an engine on an offline backend plus the host-side transport
//! - Project and WAV builders

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clipmix_common::{AssetLocation, EffectDescriptor, EngineConfig, ProjectSnapshot, Sequence, TransportState};
use clipmix_engine::error::LoadError;
use clipmix_engine::{AssetLoader, AudioBuffer, Collaborators, EngineHandle, OfflineBackend, PlaybackEngine};
use futures::future::BoxFuture;
use futures::FutureExt;
use hound::{WavSpec, WavWriter};
use tokio::sync::watch;

/// Sample rate used by the offline backend and mock buffers
pub const TEST_SAMPLE_RATE: u32 = 8_000;

/// Constant sample value of every mock buffer
pub const MOCK_LEVEL: f32 = 0.5;

pub fn asset_uri(asset_id: &str) -> String {
    format!("mem://{}", asset_id)
}

/// Loader serving constant-level buffers from memory
pub struct MockLoader {
    latency: Duration,
    buffer_secs: f64,
    calls: Mutex<HashMap<String, u32>>,
    failing: Mutex<HashSet<String>>,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::from_millis(10))
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            buffer_secs: 10.0,
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    /// Makes every later load of `uri` fail
    pub fn fail(&self, uri: &str) {
        self.failing.lock().unwrap().insert(uri.to_string());
    }

    pub fn heal(&self, uri: &str) {
        self.failing.lock().unwrap().remove(uri);
    }

    pub fn calls(&self, uri: &str) -> u32 {
        self.calls.lock().unwrap().get(uri).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

impl AssetLoader for MockLoader {
    fn load(&self, uri: &str) -> BoxFuture<'static, Result<AudioBuffer, LoadError>> {
        *self.calls.lock().unwrap().entry(uri.to_string()).or_insert(0) += 1;
        let fail = self.failing.lock().unwrap().contains(uri);
        let latency = self.latency;
        let frames = (self.buffer_secs * TEST_SAMPLE_RATE as f64) as usize;
        let uri = uri.to_string();

        async move {
            tokio::time::sleep(latency).await;
            if fail {
                return Err(LoadError::Fetch {
                    uri,
                    reason: "injected failure".to_string(),
                });
            }
            let samples = vec![MOCK_LEVEL; frames];
            Ok(AudioBuffer::from_interleaved(&samples, TEST_SAMPLE_RATE, 1))
        }
        .boxed()
    }
}

/// Project whose catalog maps each listed asset id to `mem://<id>`
pub fn project(sequence: Sequence, effects: Vec<EffectDescriptor>, assets: &[&str]) -> Arc<ProjectSnapshot> {
    let snapshot = ProjectSnapshot::default();
    snapshot.set_sequence(Some(sequence));
    for effect in effects {
        snapshot.upsert_effect(effect);
    }
    for asset in assets {
        snapshot.set_asset(asset, AssetLocation::new(&asset_uri(asset)));
    }
    Arc::new(snapshot)
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        sample_rate: TEST_SAMPLE_RATE,
        ..EngineConfig::default()
    }
}

/// Running engine plus everything a test pokes at
pub struct Rig {
    pub engine: EngineHandle,
    pub backend: OfflineBackend,
    pub transport: watch::Sender<TransportState>,
    pub project: Arc<ProjectSnapshot>,
    pub loader: Arc<MockLoader>,
}

impl Rig {
    pub fn start(project: Arc<ProjectSnapshot>, loader: Arc<MockLoader>) -> Self {
        Self::start_with(test_config(), project, loader, OfflineBackend::new(TEST_SAMPLE_RATE))
    }

    pub fn start_with(
        config: EngineConfig,
        project: Arc<ProjectSnapshot>,
        loader: Arc<MockLoader>,
        backend: OfflineBackend,
    ) -> Self {
        let (transport, transport_rx) = watch::channel(TransportState::default());
        let collaborators = Collaborators::from_project(project.clone(), loader.clone());
        let engine = PlaybackEngine::spawn(config, collaborators, Box::new(backend.clone()), transport_rx)
            .expect("engine spawn");
        Self {
            engine,
            backend,
            transport,
            project,
            loader,
        }
    }

    pub fn play(&self) {
        self.transport.send_modify(|t| t.is_playing = true);
    }

    pub fn pause(&self) {
        self.transport.send_modify(|t| t.is_playing = false);
    }

    pub fn seek(&self, time: f64) {
        self.transport.send_modify(|t| t.current_time = time);
    }

    pub fn update(&self, f: impl FnOnce(&mut TransportState)) {
        self.transport.send_modify(f);
    }

    /// Round trip through the engine task: every transport change and
    /// internal event queued before this call has been handled on return.
    pub async fn sync(&self) {
        self.engine.is_ready().await;
    }

    pub fn master_gain(&self) -> f32 {
        let mixer = self.backend.mixer().expect("output open");
        let gain = clipmix_engine::playback::lock_mixer(&mixer).master_gain();
        gain
    }
}

/// Lets spawned loads and timers run (paused-clock tests auto-advance)
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Writes a mono 16-bit sine WAV
pub fn write_sine_wav(path: &Path, sample_rate: u32, secs: f64, frequency: f32, amplitude: f32) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let frames = (secs * sample_rate as f64) as usize;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = (t * frequency * std::f32::consts::TAU).sin() * amplitude;
        writer.write_sample((value * i16::MAX as f32) as i16)?;
    }
    writer.finalize()
}
