//! Deterministic in-process capture backend
//!
//! Produces flat gray test frames and sine tones, optionally plays WAV files
//! in place of audio devices, and can be scripted to fail: refuse
//! connections, refuse to open a source, or lose a source after a number of
//! frames. Drives the demo binary and the integration tests.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use super::backend::{
    AudioFeed, AudioFrame, CaptureBackend, ConnectOptions, FeedPoll, VideoFeed, VideoFrame,
};
use super::file::WavAudioFeed;
use crate::catalog::{
    AdapterInfo, AudioDevice, AudioDeviceType, AudioEncoderInfo, AudioInformation, MonitorInfo,
    Rect, RecordingInformation, VideoEncoderInfo, VideoInformation,
};
use crate::error::{ErrorCode, RecorderError, RecorderResult};
use crate::games::GameInfo;
use crate::settings::encoder::describe_properties;
use crate::settings::{
    AudioCapture, AudioCaptureKind, AudioGeneralSettings, CaptureSource, VideoEncoderKind,
    VideoSettings,
};

pub const SYNTHETIC_PRIMARY_MONITOR: &str = "synthetic-display-1";
pub const SYNTHETIC_SECONDARY_MONITOR: &str = "synthetic-display-2";
pub const SYNTHETIC_MICROPHONE: &str = "synthetic-mic";
pub const SYNTHETIC_SPEAKERS: &str = "synthetic-speakers";
pub const SYNTHETIC_HEADSET: &str = "synthetic-headset";

const TONE_AMPLITUDE: f32 = 0.25 * i16::MAX as f32;

/// Scripted loss of a live source
#[derive(Debug, Clone)]
pub struct SourceScript {
    /// Frames (video) or reads (audio) delivered before the source is lost
    pub lose_after: u64,
    pub error: RecorderError,
}

pub struct SyntheticBackend {
    catalog: RwLock<RecordingInformation>,
    failing_connects: AtomicU32,
    connect_attempts: AtomicU32,
    last_connect: Mutex<Option<ConnectOptions>>,
    open_failures: Mutex<HashMap<String, RecorderError>>,
    scripts: Mutex<HashMap<String, SourceScript>>,
    wav_files: Mutex<HashMap<String, PathBuf>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::with_catalog(Self::default_catalog())
    }

    pub fn with_catalog(catalog: RecordingInformation) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            failing_connects: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
            last_connect: Mutex::new(None),
            open_failures: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            wav_files: Mutex::new(HashMap::new()),
        }
    }

    /// Two monitors, a microphone, two output devices, AAC/Opus and
    /// x264/NVENC
    pub fn default_catalog() -> RecordingInformation {
        let device = |device_type, id: &str, name: &str, is_default| AudioDevice {
            device_type,
            id: id.to_string(),
            name: name.to_string(),
            is_default,
        };
        let audio_encoder = |kind: &str, codec: &str, name: &str| AudioEncoderInfo {
            kind: kind.to_string(),
            codec: codec.to_string(),
            name: name.to_string(),
        };
        let monitor = |index: u32, id: &str, width: u32, height: u32, is_primary| MonitorInfo {
            adapter_index: 0,
            id: id.to_string(),
            alt_id: format!("\\\\.\\DISPLAY{}", index + 1),
            dpi: 96,
            attached_to_desktop: true,
            friendly_name: format!("Synthetic Display {}", index + 1),
            refresh_rate: 60,
            rect: Rect {
                top: 0,
                left: (index * 640) as i32,
                width,
                height,
            },
            is_primary,
            display_index: index,
        };

        RecordingInformation {
            audio: AudioInformation {
                input_devices: vec![device(
                    AudioDeviceType::Input,
                    SYNTHETIC_MICROPHONE,
                    "Synthetic Microphone",
                    true,
                )],
                output_devices: vec![
                    device(AudioDeviceType::Output, SYNTHETIC_SPEAKERS, "Synthetic Speakers", true),
                    device(AudioDeviceType::Output, SYNTHETIC_HEADSET, "Synthetic Headset", false),
                ],
                encoders: vec![
                    audio_encoder("ffmpeg_aac", "aac", "FFmpeg AAC"),
                    audio_encoder("ffmpeg_opus", "opus", "FFmpeg Opus"),
                ],
                default_encoder: "ffmpeg_aac".to_string(),
            },
            video: VideoInformation {
                encoders: [VideoEncoderKind::ObsX264, VideoEncoderKind::JimNvenc]
                    .into_iter()
                    .map(Self::encoder_info)
                    .collect(),
                adapters: vec![AdapterInfo {
                    index: 0,
                    name: "Synthetic GPU".to_string(),
                    driver: "1.0".to_string(),
                    hags_enabled: false,
                    hags_enabled_by_default: false,
                }],
                default_encoder: Some(VideoEncoderKind::JimNvenc),
            },
            monitors: vec![
                monitor(0, SYNTHETIC_PRIMARY_MONITOR, 640, 360, true),
                monitor(1, SYNTHETIC_SECONDARY_MONITOR, 320, 240, false),
            ],
        }
    }

    pub fn encoder_info(kind: VideoEncoderKind) -> VideoEncoderInfo {
        VideoEncoderInfo {
            kind,
            codec: kind.codec(),
            name: format!("Synthetic {}", kind),
            properties: describe_properties(kind),
        }
    }

    /// Replace the catalog (simulates hot-plug)
    pub fn set_catalog(&self, catalog: RecordingInformation) {
        *self.catalog.write() = catalog;
    }

    /// Make the next `attempts` connection attempts fail
    pub fn fail_connects(&self, attempts: u32) {
        self.failing_connects.store(attempts, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Options of the most recent connection attempt
    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.last_connect.lock().clone()
    }

    /// Opening the source (video label or audio device ID) fails with `error`
    pub fn fail_open(&self, key: impl Into<String>, error: RecorderError) {
        self.open_failures.lock().insert(key.into(), error);
    }

    /// The source (video label or audio device ID) is lost after delivering
    /// `lose_after` frames
    pub fn lose_after(&self, key: impl Into<String>, lose_after: u64, error: RecorderError) {
        self.scripts
            .lock()
            .insert(key.into(), SourceScript { lose_after, error });
    }

    /// Feed an audio device from a WAV file instead of a tone
    pub fn use_wav(&self, device_id: impl Into<String>, path: impl Into<PathBuf>) {
        self.wav_files.lock().insert(device_id.into(), path.into());
    }

    fn check_open(&self, key: &str) -> RecorderResult<()> {
        match self.open_failures.lock().get(key) {
            Some(error) => {
                warn!("Synthetic source '{}' refused to open", key);
                Err(error.clone())
            }
            None => Ok(()),
        }
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn connect(&self, options: &ConnectOptions) -> RecorderResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_connect.lock() = Some(options.clone());
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(RecorderError::new(
                ErrorCode::ConnectionOBSError,
                "Synthetic backend refused the connection",
            ));
        }
        debug!(
            "Synthetic backend connected (debug window: {}, args: {:?})",
            options.show_debug_window, options.command_line_args
        );
        Ok(())
    }

    async fn query_information(&self) -> RecorderResult<RecordingInformation> {
        Ok(self.catalog.read().clone())
    }

    async fn open_video(
        &self,
        source: &CaptureSource,
        game: Option<&GameInfo>,
        video: &VideoSettings,
    ) -> RecorderResult<Box<dyn VideoFeed>> {
        let label = source.label();
        self.check_open(&label)?;

        let (width, height) = match source {
            CaptureSource::Display(settings) => {
                let catalog = self.catalog.read();
                let monitor = catalog.find_monitor(&settings.monitor_id).ok_or_else(|| {
                    RecorderError::encoder(format!("Monitor '{}' is not connected", settings.monitor_id))
                })?;
                (monitor.rect.width, monitor.rect.height)
            }
            CaptureSource::Game(_) => {
                if game.is_none() {
                    return Err(RecorderError::encoder("Game process is not running"));
                }
                (video.base_width, video.base_height)
            }
            CaptureSource::Window(_) => (video.base_width, video.base_height),
        };

        info!("Synthetic video feed opened: {} ({}x{})", label, width, height);
        let script = self.scripts.lock().get(&label).cloned();
        Ok(Box::new(SyntheticVideoFeed {
            name: label,
            width,
            height,
            frames: 0,
            script,
        }))
    }

    async fn open_audio(
        &self,
        capture: &AudioCapture,
        general: &AudioGeneralSettings,
    ) -> RecorderResult<Box<dyn AudioFeed>> {
        self.check_open(&capture.id)?;

        let script = self.scripts.lock().get(&capture.id).cloned();
        let wav = self.wav_files.lock().get(&capture.id).cloned();
        if let Some(path) = wav {
            let feed = WavAudioFeed::open(&path)
                .map_err(|e| RecorderError::encoder(format!("{:#}", e)))?;
            return Ok(Box::new(Scripted {
                inner: feed,
                script,
                reads: 0,
            }));
        }

        let frequency = match capture.kind {
            AudioCaptureKind::Input => 440.0,
            AudioCaptureKind::Output => 660.0,
            AudioCaptureKind::Application => 880.0,
        };
        info!(
            "Synthetic audio feed opened: {} ({}Hz tone)",
            capture.id, frequency
        );
        Ok(Box::new(Scripted {
            inner: ToneFeed {
                name: capture.id.clone(),
                frequency,
                channels: general.channels(),
                phase: 0.0,
            },
            script,
            reads: 0,
        }))
    }
}

struct SyntheticVideoFeed {
    name: String,
    width: u32,
    height: u32,
    frames: u64,
    script: Option<SourceScript>,
}

impl VideoFeed for SyntheticVideoFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_frame(&mut self) -> FeedPoll<VideoFrame> {
        if let Some(script) = &self.script {
            if self.frames >= script.lose_after {
                return FeedPoll::Lost(script.error.clone());
            }
        }

        // Flat gray that cycles, cheap to generate at any size
        let shade = 32 + (self.frames % 192) as u8;
        let frame = VideoFrame {
            width: self.width,
            height: self.height,
            data: vec![shade; self.width as usize * self.height as usize * 4],
            timestamp_ms: self.frames * 1000 / 60,
        };
        self.frames += 1;
        FeedPoll::Ready(frame)
    }
}

struct ToneFeed {
    name: String,
    frequency: f32,
    channels: u16,
    phase: f32,
}

impl AudioFeed for ToneFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, frames: usize, sample_rate: u32) -> FeedPoll<AudioFrame> {
        let step = TAU * self.frequency / sample_rate as f32;
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for _ in 0..frames {
            let value = (self.phase.sin() * TONE_AMPLITUDE) as i16;
            for _ in 0..self.channels {
                samples.push(value);
            }
            self.phase = (self.phase + step) % TAU;
        }
        FeedPoll::Ready(AudioFrame {
            samples,
            sample_rate,
            channels: self.channels,
            timestamp_ms: 0,
        })
    }
}

/// Applies a [`SourceScript`] to any audio feed
struct Scripted<F> {
    inner: F,
    script: Option<SourceScript>,
    reads: u64,
}

impl<F: AudioFeed> AudioFeed for Scripted<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&mut self, frames: usize, sample_rate: u32) -> FeedPoll<AudioFrame> {
        if let Some(script) = &self.script {
            if self.reads >= script.lose_after {
                return FeedPoll::Lost(script.error.clone());
            }
        }
        self.reads += 1;
        self.inner.read(frames, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{AudioDeviceSettings, MonitorCaptureSourceSettings};

    fn display(id: &str) -> CaptureSource {
        CaptureSource::Display(MonitorCaptureSourceSettings {
            monitor_id: id.to_string(),
            ..MonitorCaptureSourceSettings::default()
        })
    }

    #[tokio::test]
    async fn test_connect_failures_are_consumed() {
        let backend = SyntheticBackend::new();
        backend.fail_connects(2);
        let options = ConnectOptions::default();
        assert!(backend.connect(&options).await.is_err());
        assert!(backend.connect(&options).await.is_err());
        assert!(backend.connect(&options).await.is_ok());
        assert_eq!(backend.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_display_feed_uses_monitor_size() {
        let backend = SyntheticBackend::new();
        let mut feed = backend
            .open_video(&display(SYNTHETIC_SECONDARY_MONITOR), None, &VideoSettings::default())
            .await
            .unwrap();
        match feed.poll_frame() {
            FeedPoll::Ready(frame) => {
                assert_eq!((frame.width, frame.height), (320, 240));
                assert!(frame.is_well_formed());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_loss() {
        let backend = SyntheticBackend::new();
        let source = display(SYNTHETIC_PRIMARY_MONITOR);
        backend.lose_after(source.label(), 2, RecorderError::encoder("unplugged"));

        let mut feed = backend
            .open_video(&source, None, &VideoSettings::default())
            .await
            .unwrap();
        assert!(matches!(feed.poll_frame(), FeedPoll::Ready(_)));
        assert!(matches!(feed.poll_frame(), FeedPoll::Ready(_)));
        assert!(matches!(feed.poll_frame(), FeedPoll::Lost(_)));
    }

    #[tokio::test]
    async fn test_game_source_needs_running_game() {
        let backend = SyntheticBackend::new();
        let source = CaptureSource::Game(Default::default());
        let err = backend
            .open_video(&source, None, &VideoSettings::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::EncoderError);
    }

    #[tokio::test]
    async fn test_tone_feed_layout() {
        let backend = SyntheticBackend::new();
        let capture = AudioCapture {
            kind: AudioCaptureKind::Input,
            id: SYNTHETIC_MICROPHONE.to_string(),
            name: "mic".to_string(),
            settings: AudioDeviceSettings::default(),
        };
        let mut feed = backend
            .open_audio(&capture, &AudioGeneralSettings::default())
            .await
            .unwrap();
        match feed.read(1600, 48000) {
            FeedPoll::Ready(frame) => {
                assert_eq!(frame.channels, 2);
                assert_eq!(frame.frames(), 1600);
                assert!(frame.samples.iter().any(|s| *s != 0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
