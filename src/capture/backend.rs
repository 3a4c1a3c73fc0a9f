use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::catalog::RecordingInformation;
use crate::error::{RecorderError, RecorderResult};
use crate::games::GameInfo;
use crate::settings::{AudioCapture, AudioGeneralSettings, CaptureSource, VideoSettings};

/// Raw video frame (BGRA, 4 bytes per pixel, tightly packed rows)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Capture time in milliseconds, backend clock
    pub timestamp_ms: u64,
}

impl VideoFrame {
    /// Solid color frame
    pub fn filled(width: u32, height: u32, bgra: [u8; 4], timestamp_ms: u64) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgra);
        }
        Self {
            width,
            height,
            data,
            timestamp_ms,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 4
    }
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds, backend clock
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Result of asking a feed for data without blocking
#[derive(Debug)]
pub enum FeedPoll<T> {
    Ready(T),
    /// Nothing new since the last poll
    Idle,
    /// The feed is gone for good (device unplugged, process exited, ...)
    Lost(RecorderError),
}

/// A live video capture handle
pub trait VideoFeed: Send {
    fn name(&self) -> &str;

    /// Most recent frame. Must not block
    fn poll_frame(&mut self) -> FeedPoll<VideoFrame>;
}

/// A live audio capture handle
pub trait AudioFeed: Send {
    fn name(&self) -> &str;

    /// Samples covering the next `frames` sample frames at `sample_rate`.
    /// The feed may answer in its native rate and layout; the mixer conforms
    /// the data. Must not block
    fn read(&mut self, frames: usize, sample_rate: u32) -> FeedPoll<AudioFrame>;
}

/// How the capture process is launched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Folder holding the backend binaries, when overridden
    pub backend_folder: Option<PathBuf>,
    pub show_debug_window: bool,
    /// Extra command line arguments for the capture process
    pub command_line_args: Vec<String>,
}

/// Capture backend
///
/// Implementations own the platform specifics (screen duplication, game
/// hooks, audio device APIs). The recorder only ever talks to them through
/// this trait and the feeds they hand out.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Establish the connection to the capture process
    async fn connect(&self, options: &ConnectOptions) -> RecorderResult<()>;

    /// Current devices, monitors and encoders. Never cached
    async fn query_information(&self) -> RecorderResult<RecordingInformation>;

    /// Resolve a video source to a live feed. `game` is the running game a
    /// Game source was matched to
    async fn open_video(
        &self,
        source: &CaptureSource,
        game: Option<&GameInfo>,
        video: &VideoSettings,
    ) -> RecorderResult<Box<dyn VideoFeed>>;

    /// Resolve an audio device or application to a live feed
    async fn open_audio(
        &self,
        capture: &AudioCapture,
        general: &AudioGeneralSettings,
    ) -> RecorderResult<Box<dyn AudioFeed>>;
}

/// Video feed for push-style backends that deliver frames over a channel
///
/// Each poll drains the channel and keeps only the newest frame, so a slow
/// consumer never accumulates stale frames.
pub struct ChannelVideoFeed {
    name: String,
    rx: mpsc::Receiver<VideoFrame>,
}

impl ChannelVideoFeed {
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<VideoFrame>) -> Self {
        Self {
            name: name.into(),
            rx,
        }
    }
}

impl VideoFeed for ChannelVideoFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_frame(&mut self) -> FeedPoll<VideoFrame> {
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_none() {
                        return FeedPoll::Lost(RecorderError::encoder(format!(
                            "Video feed '{}' disconnected",
                            self.name
                        )));
                    }
                    break;
                }
            }
        }

        match latest {
            Some(frame) => FeedPoll::Ready(frame),
            None => FeedPoll::Idle,
        }
    }
}
