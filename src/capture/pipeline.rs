// Capture source pipeline
//
// Resolves every configured source to a live feed, then ticks at the output
// frame rate: newest frame of each video feed -> compositor, one block of
// each audio feed -> mixer, and the resulting batch goes into the encoder
// queue. Ticks are numbered from the session start and timestamps derive from
// the tick number, so the timeline never drifts.

use std::sync::Arc;
use std::time::Instant as WallClock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::backend::{AudioFeed, CaptureBackend, FeedPoll, VideoFeed, VideoFrame};
use super::compositor::Compositor;
use super::mixer::{AudioMixer, MixInput, MixerConfig, TrackAudio};
use crate::encoder::FrameQueue;
use crate::error::{ErrorCode, RecorderError, RecorderResult};
use crate::games::GameInfo;
use crate::session::FrameCounters;
use crate::settings::{AudioDeviceSettings, AudioTracks, CaptureSettings, CaptureSource, GameProcess};

/// Everything captured during one tick
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub tick: u64,
    pub pts_ms: u64,
    pub duration_ms: u64,
    pub video: VideoFrame,
    pub audio: Vec<TrackAudio>,
}

struct VideoInput {
    feed: Box<dyn VideoFeed>,
    layer: usize,
    degraded: bool,
}

struct AudioInput {
    feed: Box<dyn AudioFeed>,
    settings: AudioDeviceSettings,
    tracks: AudioTracks,
    degraded: bool,
}

pub struct SourcePipeline {
    fps: u32,
    video: Vec<VideoInput>,
    audio: Vec<AudioInput>,
    compositor: Compositor,
    mixer: AudioMixer,
    bound_game: Option<GameInfo>,
}

/// Match a Game source against the games currently known to be running
pub fn find_running_game<'a>(process: &GameProcess, games: &'a [GameInfo]) -> Option<&'a GameInfo> {
    match process {
        GameProcess::Pid(pid) => games.iter().find(|g| g.pid() == Some(*pid)),
        GameProcess::Name(name) => games.iter().find(|g| {
            g.process_name()
                .map(|p| p.eq_ignore_ascii_case(name))
                .unwrap_or(false)
                || g.name.eq_ignore_ascii_case(name)
        }),
    }
}

impl SourcePipeline {
    /// Open a feed for every source of `settings`
    ///
    /// Fails on the first source that cannot be opened; feeds opened so far
    /// are dropped, so nothing stays live.
    pub async fn resolve(
        backend: &dyn CaptureBackend,
        settings: &CaptureSettings,
        output_tracks: AudioTracks,
        running_games: &[GameInfo],
    ) -> RecorderResult<Self> {
        let video_settings = settings.video_settings();
        let general = &settings.audio_settings().general;

        let mut compositor = Compositor::new(
            video_settings.base_width,
            video_settings.base_height,
            video_settings.output_width,
            video_settings.output_height,
        );
        let mut video = Vec::new();
        let mut bound_game = None;

        for source in settings.sources() {
            let game = match source {
                CaptureSource::Game(game_settings) => {
                    let game = find_running_game(&game_settings.game_process, running_games)
                        .ok_or_else(|| {
                            RecorderError::encoder(format!(
                                "Game for source {} is not running",
                                source.label()
                            ))
                        })?;
                    bound_game = Some(game.clone());
                    Some(game)
                }
                _ => None,
            };

            let feed = backend.open_video(source, game, video_settings).await?;
            let layer = compositor.add_layer(source.stretch_to_output_size());
            debug!("Video source resolved: {} (layer {})", source.label(), layer);
            video.push(VideoInput {
                feed,
                layer,
                degraded: false,
            });
        }

        let mut audio = Vec::new();
        for capture in settings.audio_settings().captures() {
            let feed = backend.open_audio(capture, general).await?;
            debug!("Audio source resolved: {:?} '{}'", capture.kind, capture.id);
            audio.push(AudioInput {
                feed,
                settings: capture.settings.clone(),
                tracks: capture.settings.effective_tracks(),
                degraded: false,
            });
        }

        info!(
            "Source pipeline resolved: {} video, {} audio, {}x{} -> {}x{} @ {}fps",
            video.len(),
            audio.len(),
            video_settings.base_width,
            video_settings.base_height,
            video_settings.output_width,
            video_settings.output_height,
            video_settings.fps
        );

        Ok(Self {
            fps: video_settings.fps,
            video,
            audio,
            compositor,
            mixer: AudioMixer::new(MixerConfig {
                sample_rate: general.sample_rate,
                channels: general.channels(),
                output_tracks,
            }),
            bound_game,
        })
    }

    /// The running game a Game source was bound to
    pub fn bound_game(&self) -> Option<&GameInfo> {
        self.bound_game.as_ref()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Sample frames of audio belonging to `tick`; spreads the remainder so
    /// that the total never drifts from the sample rate
    fn audio_frames_for_tick(&self, tick: u64) -> usize {
        let rate = self.mixer.config().sample_rate as u64;
        let fps = self.fps as u64;
        (((tick + 1) * rate / fps) - (tick * rate / fps)) as usize
    }

    /// Capture one batch
    ///
    /// Lost feeds are marked degraded and skipped. Losing every feed of a
    /// modality, or any feed reporting that the backend died, is fatal.
    pub fn tick(&mut self, tick: u64) -> RecorderResult<RawBatch> {
        let fps = self.fps as u64;
        let pts_ms = tick * 1000 / fps;
        let duration_ms = (tick + 1) * 1000 / fps - pts_ms;

        for input in self.video.iter_mut().filter(|i| !i.degraded) {
            match input.feed.poll_frame() {
                FeedPoll::Ready(frame) => self.compositor.update(input.layer, frame),
                FeedPoll::Idle => {}
                FeedPoll::Lost(err) => {
                    if err.code == ErrorCode::ProcessTerminated {
                        return Err(err);
                    }
                    warn!("Video source '{}' lost, continuing without it: {}", input.feed.name(), err);
                    input.degraded = true;
                    self.compositor.clear(input.layer);
                }
            }
        }
        if !self.video.is_empty() && self.video.iter().all(|i| i.degraded) {
            return Err(RecorderError::encoder("All video sources were lost"));
        }

        let frames = self.audio_frames_for_tick(tick);
        let sample_rate = self.mixer.config().sample_rate;
        let mut inputs = Vec::with_capacity(self.audio.len());
        for input in self.audio.iter_mut().filter(|i| !i.degraded) {
            match input.feed.read(frames, sample_rate) {
                FeedPoll::Ready(frame) => inputs.push(MixInput {
                    tracks: input.tracks,
                    samples: self.mixer.prepare(&frame, frames, &input.settings),
                }),
                FeedPoll::Idle => {}
                FeedPoll::Lost(err) => {
                    if err.code == ErrorCode::ProcessTerminated {
                        return Err(err);
                    }
                    warn!("Audio source '{}' lost, continuing without it: {}", input.feed.name(), err);
                    input.degraded = true;
                }
            }
        }
        if !self.audio.is_empty() && self.audio.iter().all(|i| i.degraded) {
            return Err(RecorderError::encoder("All audio sources were lost"));
        }

        Ok(RawBatch {
            tick,
            pts_ms,
            duration_ms,
            video: self.compositor.compose(pts_ms),
            audio: self.mixer.mix(&inputs, frames),
        })
    }

    /// Run the tick loop until `stop` flips or a fatal error occurs
    ///
    /// The queue is closed when the loop ends so the encoder drains and
    /// finishes.
    pub fn spawn<F>(
        mut self,
        queue: Arc<FrameQueue<RawBatch>>,
        counters: Arc<FrameCounters>,
        mut stop: watch::Receiver<bool>,
        on_failure: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(RecorderError) + Send + 'static,
    {
        tokio::spawn(async move {
            let period = Duration::from_secs_f64(1.0 / self.fps as f64);
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut start = None;
            let mut last_tick: Option<u64> = None;
            let mut on_failure = Some(on_failure);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    instant = interval.tick() => {
                        let start = *start.get_or_insert(instant);
                        let tick = ((instant - start).as_secs_f64() * self.fps as f64).round() as u64;
                        if let Some(last) = last_tick {
                            if tick > last + 1 {
                                counters.render_skipped(tick - last - 1);
                            }
                        }
                        last_tick = Some(tick);

                        let began = WallClock::now();
                        match self.tick(tick) {
                            Ok(batch) => {
                                counters.frame_rendered(began.elapsed().as_micros() as u64);
                                if queue.push(batch).is_some() {
                                    counters.output_skipped();
                                    debug!("Encoder queue full, dropped oldest batch");
                                }
                            }
                            Err(err) => {
                                warn!("Capture pipeline stopped: {}", err);
                                if let Some(notify) = on_failure.take() {
                                    notify(err);
                                }
                                break;
                            }
                        }
                    }
                }
            }

            queue.close();
            debug!("Capture pipeline task finished after {} ticks", counters.render_total());
        })
    }
}
