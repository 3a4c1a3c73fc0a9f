// Shared fixtures for the recorder integration tests
//
// Sessions run against the synthetic backend at 64x36 so that long
// scenarios stay cheap, with a fake host probe that reports whatever free
// space a test sets.

#![allow(dead_code)]

use anyhow::Result;
use parking_lot::Mutex;
use replay_recorder::capture::synthetic::SYNTHETIC_PRIMARY_MONITOR;
use replay_recorder::games::{GameProcessInfo, GameType};
use replay_recorder::host::{HostProbe, ProcessUsage};
use replay_recorder::session::{ReplayVideo, StopCallback, SplitCallback};
use replay_recorder::settings::{MonitorCaptureSourceSettings, VideoSettings};
use replay_recorder::{
    CaptureSettings, CaptureSettingsOptions, EventKind, GameInfo, GameTracker, RecordStopEventArgs,
    Recorder, RecorderConfig, RecorderEvent, RecordingInformation, ReplayCallback,
    SplitRecordArgs, SyntheticBackend,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;

pub const GB: u64 = 1024 * 1024 * 1024;
pub const MB: u64 = 1024 * 1024;

pub struct FakeHost {
    free: AtomicU64,
}

impl FakeHost {
    pub fn new(free: u64) -> Arc<Self> {
        Arc::new(Self {
            free: AtomicU64::new(free),
        })
    }

    pub fn set_free(&self, bytes: u64) {
        self.free.store(bytes, Ordering::SeqCst);
    }
}

impl HostProbe for FakeHost {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        Some(self.free.load(Ordering::SeqCst))
    }

    fn process_usage(&self) -> ProcessUsage {
        ProcessUsage {
            cpu_percent: 12.5,
            memory_mb: 256.0,
        }
    }
}

/// Synthetic catalog with tiny monitors
pub fn small_catalog() -> RecordingInformation {
    let mut catalog = SyntheticBackend::default_catalog();
    for monitor in &mut catalog.monitors {
        monitor.rect.width = 64;
        monitor.rect.height = 36;
    }
    catalog
}

pub fn test_config() -> RecorderConfig {
    RecorderConfig {
        stats_interval_ms: 0,
        connect_retry_delay_ms: 10,
        ..RecorderConfig::default()
    }
}

pub struct Harness {
    pub recorder: Recorder,
    pub backend: Arc<SyntheticBackend>,
    pub host: Arc<FakeHost>,
    pub events: Arc<Mutex<Vec<RecorderEvent>>>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::build(test_config(), None)
    }

    pub fn build(config: RecorderConfig, tracker: Option<Arc<dyn GameTracker>>) -> Result<Self> {
        let backend = Arc::new(SyntheticBackend::with_catalog(small_catalog()));
        let host = FakeHost::new(10 * GB);

        let mut builder = Recorder::builder(config).host_probe(host.clone());
        if let Some(tracker) = tracker {
            builder = builder.game_tracker(tracker);
        }
        let recorder = builder.build(backend.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = Arc::clone(&events);
            recorder.on(
                kind,
                Arc::new(move |event: &RecorderEvent| events.lock().push(event.clone())),
            );
        }

        Ok(Self {
            recorder,
            backend,
            host,
            events,
            dir: TempDir::new()?,
        })
    }

    /// Output base path (no extension) inside the temp dir
    pub fn base_path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    /// Primary display plus default devices at 64x36
    pub async fn settings(&self) -> Result<CaptureSettings> {
        let mut builder = self
            .recorder
            .create_settings_builder(CaptureSettingsOptions {
                include_default_audio_sources: true,
                ..CaptureSettingsOptions::default()
            })
            .await?;
        builder
            .set_video_settings(VideoSettings::with_base(64, 36))?
            .add_screen_source(MonitorCaptureSourceSettings {
                monitor_id: SYNTHETIC_PRIMARY_MONITOR.to_string(),
                ..MonitorCaptureSourceSettings::default()
            })?;
        Ok(builder.build())
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<RecorderEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind().name()).collect()
    }
}

pub fn stop_listener() -> (StopCallback, oneshot::Receiver<RecordStopEventArgs>) {
    let (tx, rx) = oneshot::channel();
    let callback: StopCallback = Box::new(move |args: &RecordStopEventArgs| {
        let _ = tx.send(args.clone());
    });
    (callback, rx)
}

pub fn split_listener() -> (SplitCallback, oneshot::Receiver<SplitRecordArgs>) {
    let (tx, rx) = oneshot::channel();
    let callback: SplitCallback = Box::new(move |args: &SplitRecordArgs| {
        let _ = tx.send(args.clone());
    });
    (callback, rx)
}

pub fn replay_listener() -> (ReplayCallback, oneshot::Receiver<ReplayVideo>) {
    let (tx, rx) = oneshot::channel();
    let callback: ReplayCallback = Box::new(move |video: &ReplayVideo| {
        let _ = tx.send(video.clone());
    });
    (callback, rx)
}

pub fn test_game(pid: u32) -> GameInfo {
    GameInfo {
        id: 21640,
        class_id: 2164,
        name: "Test Game".to_string(),
        supported: true,
        process_info: Some(GameProcessInfo {
            pid: Some(pid),
            full_path: "C:\\Games\\Test\\test_game.exe".to_string(),
            command_line: None,
            is_32_bit: None,
            is_elevated: None,
        }),
        game_type: GameType::Game,
    }
}
