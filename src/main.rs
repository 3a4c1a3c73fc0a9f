// Demo driver for the recorder
//
// Runs the engine against the synthetic capture backend:
//   info    print the device/encoder catalog as JSON
//   record  record the primary synthetic display, optionally splitting
//   replay  buffer replays and capture one clip
//
// Usage: replay-recorder record --duration 10 --output ~/Videos/demo --split 4

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replay_recorder::capture::synthetic::{SYNTHETIC_MICROPHONE, SYNTHETIC_PRIMARY_MONITOR};
use replay_recorder::settings::MonitorCaptureSourceSettings;
use replay_recorder::{
    CaptureReplayOptions, CaptureSettings, CaptureSettingsOptions, RecordStopEventArgs, Recorder,
    RecorderConfig, RecordingOptions, ReplayOptions, ReplayVideo, SplitOptions, SyntheticBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "replay-recorder")]
#[command(about = "Capture, record and replay with the synthetic backend")]
struct Args {
    /// Recorder config file (toml, json, yaml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print devices, encoders and monitors
    Info,

    /// Record the primary display
    Record {
        /// Duration to record in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output path without extension
        #[arg(short, long, default_value = "~/Videos/replay-recorder/recording")]
        output: String,

        /// Split the recording every N seconds
        #[arg(short, long)]
        split: Option<u64>,

        /// Play this WAV file as the microphone
        #[arg(long)]
        wav: Option<String>,
    },

    /// Keep a replay buffer and capture one clip from it
    Replay {
        /// Replay buffer length in seconds
        #[arg(short, long, default_value = "30")]
        buffer: u64,

        /// Folder replay files are written to
        #[arg(short, long, default_value = "~/Videos/replay-recorder/replays")]
        folder: String,

        /// Seconds to buffer before capturing
        #[arg(short, long, default_value = "10")]
        warmup: u64,

        /// Seconds of past to include
        #[arg(short, long, default_value = "5")]
        past: u64,

        /// Seconds to keep capturing after the call
        #[arg(short, long, default_value = "2")]
        timeout: u64,
    },
}

async fn build_settings(recorder: &Recorder) -> Result<CaptureSettings> {
    let mut builder = recorder
        .create_settings_builder(CaptureSettingsOptions {
            include_default_audio_sources: true,
            ..CaptureSettingsOptions::default()
        })
        .await?;
    builder.add_screen_source(MonitorCaptureSourceSettings {
        monitor_id: SYNTHETIC_PRIMARY_MONITOR.to_string(),
        ..MonitorCaptureSourceSettings::default()
    })?;
    Ok(builder.build())
}

async fn record(
    recorder: &Recorder,
    duration: u64,
    output: String,
    split: Option<u64>,
) -> Result<()> {
    let settings = build_settings(recorder).await?;

    let mut options = RecordingOptions::new(output);
    options.split = split.map(|seconds| SplitOptions {
        enable_manual: true,
        max_time_second: Some(seconds),
        max_by_size_mb: None,
    });

    let (stopped_tx, stopped_rx) = oneshot::channel();
    recorder
        .start_recording(
            options,
            Some(settings),
            Some(Box::new(move |args: &RecordStopEventArgs| {
                let _ = stopped_tx.send(args.clone());
            })),
        )
        .await?;

    info!("Recording for {} seconds, Ctrl+C stops early", duration);
    tokio::select! {
        _ = sleep(Duration::from_secs(duration)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if let Err(e) = recorder.stop_recording(None).await {
        warn!("Recording already stopped: {}", e);
    }
    let stopped = stopped_rx.await.context("Recording ended without a stop event")?;

    info!("Recording complete!");
    info!("  Last file: {}", stopped.base.file_path.as_deref().unwrap_or("-"));
    info!("  Splits: {}", stopped.split_count.unwrap_or(0));
    info!("  Reason: {:?}", stopped.base.reason);
    if let Some(error) = &stopped.base.error {
        warn!("  Error: {}", error);
    }
    Ok(())
}

async fn replay(
    recorder: &Recorder,
    buffer: u64,
    folder: String,
    warmup: u64,
    past: u64,
    timeout: u64,
) -> Result<()> {
    let settings = build_settings(recorder).await?;
    recorder
        .start_replays(ReplayOptions::new(buffer, folder), Some(settings))
        .await?;

    info!("Buffering replays for {} seconds...", warmup);
    sleep(Duration::from_secs(warmup)).await;

    let name = format!("replay-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"));
    let (done_tx, done_rx) = oneshot::channel();
    let active = recorder
        .capture_replay(
            CaptureReplayOptions {
                file_name: name,
                past_duration: past * 1000,
                timeout: Some(timeout * 1000),
            },
            Some(Box::new(move |video: &ReplayVideo| {
                let _ = done_tx.send(video.clone());
            })),
        )
        .await?;
    info!("Capturing replay {} ({:?}ms forward)", active.id(), active.timeout());

    let video = done_rx.await.context("Replay capture was dropped")?;
    recorder.stop_replays().await?;

    info!("Replay captured!");
    info!("  File: {}", video.base.file_path.as_deref().unwrap_or("-"));
    info!("  Duration: {:.1}s", video.duration as f64 / 1000.0);
    if let Some(error) = &video.base.error {
        warn!("  Error: {}", error);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => RecorderConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => RecorderConfig::default(),
    };

    let level = if cfg.enable_debug_logs {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let backend = Arc::new(SyntheticBackend::new());
    let wav = match &args.command {
        Command::Record { wav, .. } => wav.clone(),
        _ => None,
    };
    if let Some(path) = wav {
        let path = shellexpand::tilde(&path).into_owned();
        info!("Microphone plays {}", path);
        backend.use_wav(SYNTHETIC_MICROPHONE, path);
    }

    let recorder = Recorder::builder(cfg).build(backend);

    match args.command {
        Command::Info => {
            let info = recorder.query_information().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Record {
            duration,
            output,
            split,
            ..
        } => record(&recorder, duration, output, split).await?,
        Command::Replay {
            buffer,
            folder,
            warmup,
            past,
            timeout,
        } => replay(&recorder, buffer, folder, warmup, past, timeout).await?,
    }

    Ok(())
}
