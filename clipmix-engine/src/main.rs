//! clipmix-play - preview or bounce a project timeline
//!
//! Loads a project document (sequence, effects, asset locations), drives
//! the playback engine with a simple transport, and either plays through
//! an output device or renders to a WAV file in real time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use clipmix_common::timing::safe_speed;
use clipmix_common::{EngineConfig, ProjectSnapshot, TimelineSource, TransportState};
use clipmix_engine::audio::types::CHANNELS;
use clipmix_engine::playback::Voice;
use clipmix_engine::{
    BuildInfo, Collaborators, CpalBackend, EngineHandle, EngineState, FileLoader, OfflineBackend, OutputBackend,
    PlaybackEngine,
};
use serde::Serialize;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Render step while bouncing
const BOUNCE_STEP: Duration = Duration::from_millis(20);

/// How often the transport reports the playhead
const TRANSPORT_REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Command-line arguments for clipmix-play
#[derive(Parser, Debug)]
#[command(name = "clipmix-play")]
#[command(about = "Timeline audio preview for clipmix projects")]
#[command(version)]
struct Args {
    /// Project document (JSON)
    #[arg(short, long, env = "CLIPMIX_PROJECT", required_unless_present = "list_devices")]
    project: Option<PathBuf>,

    /// Engine config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Playhead start position in seconds
    #[arg(long, default_value = "0")]
    start: f64,

    /// Seconds to play (default: to the end of the sequence)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Transport playback rate
    #[arg(long, default_value = "1.0")]
    rate: f64,

    /// Master volume (0.0 - 1.0)
    #[arg(long, default_value = "1.0")]
    volume: f32,

    /// Render to this WAV file instead of the output device
    #[arg(short, long)]
    bounce: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print engine status as JSON when playback ends
    #[arg(long)]
    status_json: bool,
}

/// End-of-run engine snapshot
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    build: BuildInfo,
    state: EngineState,
    failed_assets: Vec<String>,
    voices: Vec<Voice>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipmix_engine=info,clipmix_play=info,clipmix_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("clipmix-play {}", BuildInfo::current());

    if args.list_devices {
        for name in CpalBackend::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load engine config")?;
    let project_path = args.project.as_deref().context("--project is required")?;
    let project = Arc::new(
        ProjectSnapshot::from_file(project_path)
            .with_context(|| format!("Failed to load project {}", project_path.display()))?,
    );

    let sequence_end = project.sequence().map(|s| s.duration()).unwrap_or(0.0);
    let play_for = match args.duration {
        Some(d) => d,
        None => (sequence_end - args.start).max(0.0) / safe_speed(args.rate),
    };
    if !(play_for > 0.0) {
        bail!(
            "Nothing to play: start {:.2}s is past the sequence end {:.2}s",
            args.start,
            sequence_end
        );
    }
    info!(
        "Playing {} from {:.2}s for {:.2}s at rate {}",
        project_path.display(),
        args.start,
        play_for,
        args.rate
    );

    let collaborators = Collaborators::from_project(project, Arc::new(FileLoader::new()));
    let (transport_tx, transport_rx) = watch::channel(TransportState {
        current_time: args.start,
        volume: args.volume,
        playback_rate: args.rate,
        ..TransportState::default()
    });

    match &args.bounce {
        Some(path) => {
            let backend = OfflineBackend::new(config.sample_rate);
            let engine = start_engine(config, collaborators, Box::new(backend.clone()), transport_rx)?;
            play(&transport_tx);
            let result = bounce(&engine, &backend, path, play_for).await;
            if args.status_json {
                print_status(&engine).await?;
            }
            stop(&transport_tx);
            engine.dispose().await?;
            result
        }
        None => {
            let backend = CpalBackend::new(config.output_device.clone(), config.sample_rate);
            let engine = start_engine(config, collaborators, Box::new(backend), transport_rx)?;
            play(&transport_tx);
            run_live(&engine, &transport_tx, args.start, args.rate, play_for).await;
            if args.status_json {
                print_status(&engine).await?;
            }
            stop(&transport_tx);
            engine.dispose().await?;
            Ok(())
        }
    }
}

fn start_engine(
    config: EngineConfig,
    collaborators: Collaborators,
    backend: Box<dyn OutputBackend>,
    transport: watch::Receiver<TransportState>,
) -> Result<EngineHandle> {
    PlaybackEngine::spawn(config, collaborators, backend, transport).context("Failed to start playback engine")
}

async fn print_status(engine: &EngineHandle) -> Result<()> {
    let report = StatusReport {
        build: BuildInfo::current(),
        state: engine.state(),
        failed_assets: engine.failed_assets().await?,
        voices: engine.active_voices().await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn play(transport: &watch::Sender<TransportState>) {
    transport.send_modify(|t| t.is_playing = true);
}

fn stop(transport: &watch::Sender<TransportState>) {
    transport.send_modify(|t| t.is_playing = false);
}

/// Plays through the device until the duration elapses or Ctrl-C
async fn run_live(
    engine: &EngineHandle,
    transport: &watch::Sender<TransportState>,
    start: f64,
    rate: f64,
    play_for: f64,
) {
    if engine.wait_for_state(EngineState::Scheduling).await != EngineState::Scheduling {
        warn!("Engine stopped before playback began");
        return;
    }

    let started = Instant::now();
    let deadline = started + Duration::from_secs_f64(play_for);
    let mut report = tokio::time::interval(TRANSPORT_REPORT_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                info!("Reached end of playback range");
                break;
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = report.tick() => {
                // Progress reports stay within the seek threshold of the
                // engine's own extrapolation
                let elapsed = started.elapsed().as_secs_f64();
                transport.send_modify(|t| t.current_time = start + elapsed * safe_speed(rate));
            }
        }
    }
}

/// Renders `play_for` seconds from the offline backend into a stereo float
/// WAV, paced in real time so asset loads land as they would on a device.
async fn bounce(engine: &EngineHandle, backend: &OfflineBackend, path: &Path, play_for: f64) -> Result<()> {
    if engine.wait_for_state(EngineState::Scheduling).await != EngineState::Scheduling {
        bail!("Engine stopped before playback began");
    }

    let sample_rate = backend.sample_rate();
    let spec = hound::WavSpec {
        channels: CHANNELS as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("Failed to create {}", path.display()))?;

    let total_frames = (play_for * sample_rate as f64).round() as u64;
    let started = Instant::now();
    let mut written: u64 = 0;
    let mut step = tokio::time::interval(BOUNCE_STEP);

    while written < total_frames {
        step.tick().await;
        let due = ((started.elapsed().as_secs_f64() * sample_rate as f64) as u64).min(total_frames);
        if due <= written {
            continue;
        }
        let block = backend.render((due - written) as usize);
        for sample in block {
            writer.write_sample(sample).context("Failed to write WAV samples")?;
        }
        written = due;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    info!(
        "Bounced {:.2}s ({} frames at {} Hz) to {}",
        play_for,
        written,
        sample_rate,
        path.display()
    );
    Ok(())
}
