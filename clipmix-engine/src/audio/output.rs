//! Audio output backends
//!
//! A backend pulls rendered blocks from the shared [`Mixer`] and delivers
//! them somewhere: the default cpal device, or nowhere at all (offline
//! rendering for tests and bouncing to a file).
//!
//! Backends are opened lazily, on the first transition to playing.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::audio::types::CHANNELS;
use crate::error::{Error, Result};
use crate::playback::mixer::{lock_mixer, SharedMixer};

/// Where rendered audio goes
pub trait OutputBackend: Send {
    /// Attaches the mixer and prepares the output. Returns the output
    /// sample rate, which the mixer adopts.
    fn open(&mut self, mixer: SharedMixer) -> Result<u32>;

    /// Starts (or restarts) pulling audio. May be rejected by the platform;
    /// the caller retries on the next play request.
    fn resume(&mut self) -> Result<()>;

    /// Stops output and releases the device. Idempotent.
    fn close(&mut self);

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

// ========================================
// cpal device backend
// ========================================

enum StreamCommand {
    Play,
    Close,
}

/// Owns the device thread. cpal streams are not `Send`, so the stream is
/// built, played and dropped on a dedicated thread and driven by commands.
struct StreamWorker {
    control: std_mpsc::Sender<StreamCommand>,
    replies: std_mpsc::Receiver<Result<()>>,
    thread: Option<JoinHandle<()>>,
}

/// Plays through a cpal output device
pub struct CpalBackend {
    device_name: Option<String>,
    preferred_rate: u32,
    worker: Option<StreamWorker>,
}

impl CpalBackend {
    /// `device_name`: None selects the default device
    pub fn new(device_name: Option<String>, preferred_rate: u32) -> Self {
        Self {
            device_name,
            preferred_rate,
            worker: None,
        }
    }

    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Finds the requested device, falling back to the default device
    fn select_device(device_name: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

            if let Some(dev) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                info!("Found requested audio device: {}", name);
                return Ok(dev);
            }
            warn!("Requested device '{}' not found, falling back to default device", name);
        }

        let dev = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
        info!(
            "Using default audio device: {}",
            dev.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        Ok(dev)
    }

    /// Prefers stereo f32 at the preferred rate, else the device default
    fn best_config(device: &Device, preferred_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported_configs = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let preferred = supported_configs.find(|config| {
            config.channels() as usize == CHANNELS
                && config.min_sample_rate().0 <= preferred_rate
                && config.max_sample_rate().0 >= preferred_rate
                && config.sample_format() == SampleFormat::F32
        });

        if let Some(supported_config) = preferred {
            let sample_format = supported_config.sample_format();
            let config = supported_config
                .with_sample_rate(cpal::SampleRate(preferred_rate))
                .config();
            return Ok((config, sample_format));
        }

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        let sample_format = supported_config.sample_format();
        Ok((supported_config.config(), sample_format))
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mixer: SharedMixer,
    ) -> Result<Stream> {
        match sample_format {
            SampleFormat::F32 => Self::build_typed_stream::<f32>(device, config, mixer),
            SampleFormat::I16 => Self::build_typed_stream::<i16>(device, config, mixer),
            SampleFormat::U16 => Self::build_typed_stream::<u16>(device, config, mixer),
            other => Err(Error::AudioOutput(format!("Unsupported sample format: {:?}", other))),
        }
    }

    fn build_typed_stream<T>(device: &Device, config: &StreamConfig, mixer: SharedMixer) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels as usize;
        let mut scratch: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    scratch.resize(frames * CHANNELS, 0.0);
                    lock_mixer(&mixer).render(&mut scratch);

                    for (frame, mixed) in data.chunks_mut(channels).zip(scratch.chunks_exact(CHANNELS)) {
                        let left = mixed[0].clamp(-1.0, 1.0);
                        let right = mixed[1].clamp(-1.0, 1.0);
                        if channels == 1 {
                            frame[0] = T::from_sample((left + right) * 0.5);
                            continue;
                        }
                        frame[0] = T::from_sample(left);
                        frame[1] = T::from_sample(right);
                        for extra in frame.iter_mut().skip(CHANNELS) {
                            *extra = T::EQUILIBRIUM;
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// Device thread body: build the stream, report the rate, then serve
    /// commands until closed.
    fn run_stream(
        device_name: Option<String>,
        preferred_rate: u32,
        mixer: SharedMixer,
        ready: std_mpsc::Sender<Result<u32>>,
        control: std_mpsc::Receiver<StreamCommand>,
        replies: std_mpsc::Sender<Result<()>>,
    ) {
        let opened = Self::select_device(device_name.as_deref()).and_then(|device| {
            let (config, sample_format) = Self::best_config(&device, preferred_rate)?;
            debug!(
                "Audio config: sample_rate={}, channels={}, format={:?}",
                config.sample_rate.0, config.channels, sample_format
            );
            let stream = Self::build_stream(&device, &config, sample_format, mixer)?;
            // Some hosts start streams on creation; stay silent until resumed
            if let Err(e) = stream.pause() {
                debug!("Stream pause after build not supported: {}", e);
            }
            Ok((stream, config.sample_rate.0))
        });

        let stream = match opened {
            Ok((stream, rate)) => {
                let _ = ready.send(Ok(rate));
                stream
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        while let Ok(command) = control.recv() {
            match command {
                StreamCommand::Play => {
                    let result = stream
                        .play()
                        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)));
                    let _ = replies.send(result);
                }
                StreamCommand::Close => break,
            }
        }

        drop(stream);
        debug!("Audio stream thread exiting");
    }
}

/// How long to wait for the device thread to answer
const DEVICE_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a blocking wait on the device thread. On a multi-threaded runtime
/// the worker is handed off first so other tasks keep running.
fn wait_for_device<T>(wait: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

impl OutputBackend for CpalBackend {
    fn open(&mut self, mixer: SharedMixer) -> Result<u32> {
        if self.worker.is_some() {
            return Err(Error::InvalidState("audio output already open".to_string()));
        }

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (control_tx, control_rx) = std_mpsc::channel();
        let (reply_tx, reply_rx) = std_mpsc::channel();
        let device_name = self.device_name.clone();
        let preferred_rate = self.preferred_rate;

        let thread = std::thread::Builder::new()
            .name("clipmix-audio".to_string())
            .spawn(move || {
                Self::run_stream(device_name, preferred_rate, mixer, ready_tx, control_rx, reply_tx)
            })?;

        let rate = wait_for_device(|| ready_rx.recv_timeout(DEVICE_REPLY_TIMEOUT))
            .map_err(|e| Error::AudioOutput(format!("Audio thread did not report: {}", e)))??;

        self.worker = Some(StreamWorker {
            control: control_tx,
            replies: reply_rx,
            thread: Some(thread),
        });
        info!("Audio output open at {} Hz", rate);
        Ok(rate)
    }

    fn resume(&mut self) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| Error::InvalidState("audio output not open".to_string()))?;
        worker
            .control
            .send(StreamCommand::Play)
            .map_err(|_| Error::AudioOutput("audio thread gone".to_string()))?;
        wait_for_device(|| worker.replies.recv_timeout(DEVICE_REPLY_TIMEOUT))
            .map_err(|e| Error::AudioOutput(format!("Audio thread did not reply: {}", e)))?
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.control.send(StreamCommand::Close);
            if let Some(thread) = worker.thread.take() {
                if wait_for_device(|| thread.join()).is_err() {
                    warn!("Audio thread panicked during shutdown");
                }
            }
            info!("Audio output closed");
        }
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

// ========================================
// Offline backend
// ========================================

#[derive(Default)]
struct OfflineState {
    mixer: Option<SharedMixer>,
    running: bool,
    rejected_resumes: u32,
    resume_calls: u32,
}

/// Device-less backend. Audio advances only when [`OfflineBackend::render`]
/// is called; clones share state, so a test keeps one clone and hands the
/// other to the engine.
#[derive(Clone)]
pub struct OfflineBackend {
    sample_rate: u32,
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            state: Arc::new(Mutex::new(OfflineState::default())),
        }
    }

    /// Rejects the next `count` resume calls, as a platform blocking
    /// playback without a user gesture would.
    pub fn reject_resumes(self, count: u32) -> Self {
        self.lock().rejected_resumes = count;
        self
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_open(&self) -> bool {
        self.lock().mixer.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of resume requests seen, rejected ones included
    pub fn resume_calls(&self) -> u32 {
        self.lock().resume_calls
    }

    /// The attached mixer, once opened
    pub fn mixer(&self) -> Option<SharedMixer> {
        self.lock().mixer.clone()
    }

    /// Pulls `frames` stereo frames. Silence, without advancing the clock,
    /// while closed or suspended.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * CHANNELS];
        let mixer = {
            let state = self.lock();
            if !state.running {
                return out;
            }
            state.mixer.clone()
        };
        if let Some(mixer) = mixer {
            lock_mixer(&mixer).render(&mut out);
        }
        out
    }
}

impl OutputBackend for OfflineBackend {
    fn open(&mut self, mixer: SharedMixer) -> Result<u32> {
        lock_mixer(&mixer).set_sample_rate(self.sample_rate);
        self.lock().mixer = Some(mixer);
        Ok(self.sample_rate)
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.resume_calls += 1;
        if state.mixer.is_none() {
            return Err(Error::InvalidState("offline output not open".to_string()));
        }
        if state.rejected_resumes > 0 {
            state.rejected_resumes -= 1;
            return Err(Error::AudioOutput("playback start rejected".to_string()));
        }
        state.running = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.running = false;
        state.mixer = None;
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::mixer::Mixer;

    #[test]
    fn test_list_devices() {
        // Headless CI machines may have no audio host; only check it returns
        let _ = CpalBackend::list_devices();
    }

    #[test]
    fn test_device_wait_without_runtime() {
        assert_eq!(wait_for_device(|| 7), 7);
    }

    #[tokio::test]
    async fn test_device_wait_on_current_thread_runtime() {
        assert_eq!(wait_for_device(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_device_wait_keeps_other_tasks_running() {
        let (tx, rx) = std_mpsc::channel();
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
        });

        // The blocked wait is answered by a task on the same runtime
        let reply = wait_for_device(|| rx.recv_timeout(Duration::from_secs(5)));
        assert!(reply.is_ok());
        ticker.await.unwrap();
    }

    #[test]
    fn test_offline_lifecycle() {
        let mut backend = OfflineBackend::new(8_000);
        let observer = backend.clone();
        let mixer = Mixer::shared(48_000);

        assert!(backend.resume().is_err());
        assert_eq!(backend.open(mixer.clone()).unwrap(), 8_000);
        assert_eq!(lock_mixer(&mixer).sample_rate(), 8_000);
        assert!(observer.is_open());

        // Suspended: silence, clock frozen
        assert_eq!(observer.render(4), vec![0.0; 8]);
        assert_eq!(lock_mixer(&mixer).frames_rendered(), 0);

        backend.resume().unwrap();
        observer.render(4);
        assert_eq!(lock_mixer(&mixer).frames_rendered(), 4);

        backend.close();
        backend.close();
        assert!(!observer.is_open());
        assert!(!observer.is_running());
    }

    #[test]
    fn test_offline_rejected_resume() {
        let mut backend = OfflineBackend::new(8_000).reject_resumes(1);
        backend.open(Mixer::shared(8_000)).unwrap();

        assert!(matches!(backend.resume(), Err(Error::AudioOutput(_))));
        assert!(!backend.is_running());
        assert!(backend.resume().is_ok());
        assert_eq!(backend.resume_calls(), 2);
    }
}
