// Session controller
//
// A single task owns the active session and every piece of mutable session
// state. Operations arrive as commands with a oneshot reply and run one at a
// time; runtime signals and the stats timer are handled between commands.
// Events are emitted from this task only, so their order is the order of
// state changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{
    EventRegistry, RecordEventArgs, RecordStopEventArgs, RecorderEvent, ReplayVideo, SplitCallback,
    SplitRecordArgs, StopCallback,
};
use super::options::{CaptureReplayOptions, RecordingOptions, ReplayOptions};
use super::runtime::{ControllerSignal, OutputSink, SessionRuntime, SessionSignal, SignalSender};
use super::stats::RecorderStats;
use crate::capture::{CaptureBackend, ConnectOptions, SourcePipeline};
use crate::catalog::RecordingInformation;
use crate::config::RecorderConfig;
use crate::encoder::{EncoderAdapter, EncoderFactory};
use crate::error::{ErrorCode, RecorderError, RecorderResult};
use crate::games::{GameEvent, GameInfo, GameTracker, GamesFilter};
use crate::host::HostProbe;
use crate::output::{segment_path, ContainerHeader, FileFormat, RecordingWriter, SplitInfo, WriterOptions};
use crate::replay::{
    spawn_capture, ActiveReplay, CallbackSlot, ReplayBuffer, ReplayCallback, ReplayControl,
    ReplayOutcome, ReplayRequest,
};
use crate::settings::{AudioTracks, CaptureSettings, LastBuiltSettings};

/// Externally visible controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Starting,
    Recording,
    Replays,
    Stopping,
}

impl SessionPhase {
    pub fn is_active(self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }
}

pub(crate) enum Command {
    QueryInformation {
        reply: oneshot::Sender<RecorderResult<RecordingInformation>>,
    },
    StartRecording {
        options: RecordingOptions,
        settings: Option<CaptureSettings>,
        listener: Option<StopCallback>,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    StopRecording {
        listener: Option<StopCallback>,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    SplitRecording {
        listener: Option<SplitCallback>,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    StartReplays {
        options: ReplayOptions,
        settings: Option<CaptureSettings>,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    StopReplays {
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    CaptureReplay {
        options: CaptureReplayOptions,
        callback: Option<ReplayCallback>,
        reply: oneshot::Sender<RecorderResult<ActiveReplay>>,
    },
    RegisterGames {
        filter: GamesFilter,
    },
}

/// Stop payload error text when the captured game exited
pub const GAME_EXITED: &str = "Game exited";

/// Why a session ends
#[derive(Debug, Clone)]
enum StopCause {
    User,
    GameExit,
    LowDisk,
    Failed(RecorderError),
}

struct InFlightReplay {
    id: u64,
    control: mpsc::UnboundedSender<ReplayControl>,
    callback: CallbackSlot,
    task: JoinHandle<()>,
}

enum SessionMode {
    Recording {
        options: RecordingOptions,
        stop_listener: Option<StopCallback>,
        split_listener: Option<SplitCallback>,
    },
    Replays {
        ring: Arc<ReplayBuffer>,
        folder: PathBuf,
        format: FileFormat,
        replay: Option<InFlightReplay>,
    },
}

struct ActiveSession {
    id: Uuid,
    mode: SessionMode,
    runtime: SessionRuntime,
    header: ContainerHeader,
    output_dir: PathBuf,
    start_time_epoch_ms: i64,
    bound_game: Option<GameInfo>,
    auto_shutdown: bool,
    stats_mark: (Instant, u64),
}

/// Collaborators handed to the controller
pub(crate) struct ControllerParts {
    pub config: RecorderConfig,
    pub backend: Arc<dyn CaptureBackend>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub host: Arc<dyn HostProbe>,
    pub tracker: Arc<dyn GameTracker>,
    pub events: Arc<EventRegistry>,
    pub last_built: LastBuiltSettings,
    pub phase: watch::Sender<SessionPhase>,
}

pub(crate) struct Controller {
    config: RecorderConfig,
    backend: Arc<dyn CaptureBackend>,
    encoders: Arc<dyn EncoderFactory>,
    host: Arc<dyn HostProbe>,
    tracker: Arc<dyn GameTracker>,
    events: Arc<EventRegistry>,
    last_built: LastBuiltSettings,
    phase: watch::Sender<SessionPhase>,
    connected: bool,
    running_games: Vec<GameInfo>,
    games_task: Option<JoinHandle<()>>,
    session: Option<ActiveSession>,
    next_replay_id: u64,
    signal_tx: mpsc::UnboundedSender<ControllerSignal>,
    signal_rx: mpsc::UnboundedReceiver<ControllerSignal>,
}

fn expand_path(raw: &str) -> RecorderResult<PathBuf> {
    if raw.trim().is_empty() {
        return Err(RecorderError::bad_path("Output path is empty"));
    }
    let expanded = shellexpand::full(raw)
        .map_err(|e| RecorderError::bad_path(format!("Cannot expand '{}': {}", raw, e)))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn ensure_dir(dir: &Path) -> RecorderResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| RecorderError::bad_path(format!("Cannot create {}: {}", dir.display(), e)))
}

fn same_game(a: &GameInfo, b: &GameInfo) -> bool {
    match (a.pid(), b.pid()) {
        (Some(x), Some(y)) => x == y,
        _ => a.class_id == b.class_id,
    }
}

impl Controller {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            config: parts.config,
            backend: parts.backend,
            encoders: parts.encoders,
            host: parts.host,
            tracker: parts.tracker,
            events: parts.events,
            last_built: parts.last_built,
            phase: parts.phase,
            connected: false,
            running_games: Vec::new(),
            games_task: None,
            session: None,
            next_replay_id: 1,
            signal_tx,
            signal_rx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut stats = self.config.stats_interval().map(delayed_interval);
        let mut disk = self.config.disk_check_interval().map(delayed_interval);

        loop {
            let replays = self
                .session
                .as_ref()
                .is_some_and(|s| matches!(s.mode, SessionMode::Replays { .. }));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal).await,
                _ = tick(&mut stats), if self.session.is_some() => self.emit_stats(),
                _ = tick(&mut disk), if replays => self.check_replay_disk().await,
            }
        }

        if self.session.is_some() {
            info!("Recorder dropped with an active session, stopping it");
            self.stop_session(StopCause::User).await;
        }
        if let Some(task) = self.games_task.take() {
            task.abort();
        }
        debug!("Session controller finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::QueryInformation { reply } => {
                let result = self.query_information().await;
                let _ = reply.send(result);
            }
            Command::StartRecording {
                options,
                settings,
                listener,
                reply,
            } => {
                let result = self.start_recording(options, settings, listener).await;
                let _ = reply.send(result);
            }
            Command::StopRecording { listener, reply } => {
                let result = self.stop_recording(listener).await;
                let _ = reply.send(result);
            }
            Command::SplitRecording { listener, reply } => {
                let result = self.split_recording(listener).await;
                let _ = reply.send(result);
            }
            Command::StartReplays {
                options,
                settings,
                reply,
            } => {
                let result = self.start_replays(options, settings).await;
                let _ = reply.send(result);
            }
            Command::StopReplays { reply } => {
                let result = self.stop_replays().await;
                let _ = reply.send(result);
            }
            Command::CaptureReplay {
                options,
                callback,
                reply,
            } => {
                let result = self.capture_replay(options, callback);
                let _ = reply.send(result);
            }
            Command::RegisterGames { filter } => self.register_games(filter),
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    /// Connect to the backend, retrying a bounded number of times
    async fn ensure_connected(&mut self) -> RecorderResult<()> {
        if self.connected {
            return Ok(());
        }

        let mut options = ConnectOptions {
            backend_folder: None,
            show_debug_window: self.config.show_debug_window,
            command_line_args: self.config.custom_command_line_args.clone(),
        };
        if let Some(folder) = &self.config.override_backend_folder {
            let folder = expand_path(folder)?;
            if !folder.is_dir() {
                return Err(RecorderError::new(
                    ErrorCode::MissingBinaries,
                    format!("Backend folder {} does not exist", folder.display()),
                ));
            }
            options.backend_folder = Some(folder);
        }

        let attempts = self.config.connect_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.backend.connect(&options).await {
                Ok(()) => {
                    info!("Connected to capture backend '{}'", self.backend.name());
                    self.connected = true;
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "Backend connection attempt {}/{} failed: {}",
                        attempt, attempts, err
                    );
                    last_error = Some(err);
                    if attempt < attempts {
                        time::sleep(Duration::from_millis(self.config.connect_retry_delay_ms)).await;
                    }
                }
            }
        }

        let detail = last_error.map(|e| e.message).unwrap_or_default();
        Err(RecorderError::new(
            ErrorCode::ConnectionOBSError,
            format!("Could not connect to the capture backend: {}", detail),
        ))
    }

    async fn query_information(&mut self) -> RecorderResult<RecordingInformation> {
        self.ensure_connected().await?;
        self.backend.query_information().await
    }

    fn check_disk(&self, dir: &Path) -> RecorderResult<()> {
        if let Some(free) = self.host.available_space(dir) {
            if free < self.config.low_disk_space_bytes() {
                return Err(RecorderError::new(
                    ErrorCode::NoDiskSpaceError,
                    format!(
                        "Only {}MB free in {}, {}MB needed",
                        free / (1024 * 1024),
                        dir.display(),
                        self.config.low_disk_space_mb
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Replay sessions have no writer watching the disk, so the controller
    /// polls it
    async fn check_replay_disk(&mut self) {
        let Some(dir) = self.session.as_ref().map(|s| s.output_dir.clone()) else {
            return;
        };
        if let Err(err) = self.check_disk(&dir) {
            warn!("Stopping replays: {}", err);
            self.stop_session(StopCause::LowDisk).await;
        }
    }

    fn resolve_settings(&self, explicit: Option<CaptureSettings>) -> RecorderResult<CaptureSettings> {
        explicit
            .or_else(|| self.last_built.get())
            .ok_or_else(|| RecorderError::invalid("No capture settings given and none were built"))
    }

    fn stats_snapshot(&self) -> RecorderStats {
        let usage = self.host.process_usage();
        let mut stats = RecorderStats {
            cpu_usage: usage.cpu_percent,
            memory_usage: usage.memory_mb,
            ..RecorderStats::default()
        };

        if let Some(session) = &self.session {
            session.runtime.counters().fill(&mut stats);
            stats.available_disk_space = self
                .host
                .available_space(&session.output_dir)
                .map(|bytes| bytes as f64 / (1024.0 * 1024.0))
                .unwrap_or(0.0);
        }
        stats
    }

    fn emit_stats(&mut self) {
        let mut stats = self.stats_snapshot();
        if let Some(session) = self.session.as_mut() {
            let rendered = session.runtime.counters().render_total();
            let (since, previous) = session.stats_mark;
            let elapsed = since.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                stats.active_fps = (rendered - previous) as f64 / elapsed;
            }
            session.stats_mark = (Instant::now(), rendered);
        }
        self.events.emit(&RecorderEvent::Stats(stats));
    }

    /// Resolve sources and encoders, then start the session tasks
    ///
    /// On failure nothing is left running.
    async fn launch(
        &mut self,
        settings: &CaptureSettings,
        tracks: Option<AudioTracks>,
        format: FileFormat,
        output_dir: &Path,
        make_sink: impl FnOnce(&ContainerHeader, i64) -> OutputSink,
    ) -> RecorderResult<(Uuid, SessionRuntime, ContainerHeader, Option<GameInfo>, i64)> {
        self.ensure_connected().await?;
        self.check_disk(output_dir)?;

        let tracks = tracks.unwrap_or_else(|| settings.default_audio_tracks());
        if tracks.is_empty() {
            return Err(RecorderError::invalid("At least one audio track is required"));
        }

        let resolved =
            SourcePipeline::resolve(self.backend.as_ref(), settings, tracks, &self.running_games).await;
        let pipeline = match resolved {
            Ok(pipeline) => pipeline,
            Err(err) => {
                if err.code == ErrorCode::ProcessTerminated {
                    self.connected = false;
                }
                return Err(err);
            }
        };
        let bound_game = pipeline.bound_game().cloned();

        let general = &settings.audio_settings().general;
        let adapter = EncoderAdapter::new(
            self.encoders.as_ref(),
            settings.video_encoder_settings(),
            settings.video_settings(),
            settings.audio_encoder(),
            general,
        )?;

        let video = settings.video_settings();
        let header = ContainerHeader {
            format,
            width: video.output_width,
            height: video.output_height,
            fps: video.fps,
            video_encoder: settings.video_encoder_settings().kind.as_str().to_string(),
            audio_encoder: settings.audio_encoder().kind.clone(),
            audio_tracks: tracks.tracks().collect(),
            sample_rate: general.sample_rate,
            channels: general.channels(),
            created_at_ms: 0,
        };

        let id = Uuid::new_v4();
        let start_time_epoch_ms = chrono::Utc::now().timestamp_millis();
        let runtime = SessionRuntime::start(
            pipeline,
            adapter,
            make_sink(&header, start_time_epoch_ms),
            self.config.encoder_queue_capacity,
            SignalSender::new(id, self.signal_tx.clone()),
        );

        Ok((id, runtime, header, bound_game, start_time_epoch_ms))
    }

    async fn start_recording(
        &mut self,
        options: RecordingOptions,
        settings: Option<CaptureSettings>,
        listener: Option<StopCallback>,
    ) -> RecorderResult<()> {
        if self.session.is_some() {
            return Err(RecorderError::already_running());
        }
        let settings = self.resolve_settings(settings)?;
        if let Some(split) = &options.split {
            split.validate()?;
        }
        let base_path = expand_path(&options.file_path)?;
        let output_dir = base_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        ensure_dir(&output_dir)?;

        self.set_phase(SessionPhase::Starting);
        info!("Starting recording to {}", base_path.display());

        let split = options.split.as_ref().map(|s| s.policy()).unwrap_or_default();
        let low_disk_bytes = self.config.low_disk_space_bytes();
        let host = Arc::clone(&self.host);
        let writer_base = base_path.clone();
        let launched = self
            .launch(
                &settings,
                options.audio_track,
                options.file_format,
                &output_dir,
                move |header, start_time_epoch_ms| {
                    OutputSink::Recording(RecordingWriter::new(
                        WriterOptions {
                            base_path: writer_base,
                            header: header.clone(),
                            split,
                            low_disk_bytes,
                            start_time_epoch_ms,
                        },
                        host,
                    ))
                },
            )
            .await;

        let (id, runtime, header, bound_game, start_time_epoch_ms) = match launched {
            Ok(parts) => parts,
            Err(err) => {
                warn!("Recording failed to start: {}", err);
                self.set_phase(SessionPhase::Idle);
                return Err(err);
            }
        };

        let file_path = segment_path(&base_path, options.file_format.extension(), 0);
        self.session = Some(ActiveSession {
            id,
            auto_shutdown: options.auto_shutdown_on_game_exit,
            mode: SessionMode::Recording {
                options,
                stop_listener: listener,
                split_listener: None,
            },
            runtime,
            header,
            output_dir,
            start_time_epoch_ms,
            bound_game,
            stats_mark: (Instant::now(), 0),
        });
        self.set_phase(SessionPhase::Recording);
        info!("Recording started: session {}", id);

        let stats = self.stats_snapshot();
        self.events.emit(&RecorderEvent::RecordingStarted(RecordEventArgs {
            file_path: Some(file_path.display().to_string()),
            stats: Some(stats),
            ..RecordEventArgs::default()
        }));
        Ok(())
    }

    async fn stop_recording(&mut self, listener: Option<StopCallback>) -> RecorderResult<()> {
        match self.session.as_mut().map(|s| &mut s.mode) {
            Some(SessionMode::Recording { stop_listener, .. }) => {
                if listener.is_some() {
                    *stop_listener = listener;
                }
            }
            _ => return Err(RecorderError::no_active_recording()),
        }
        self.stop_session(StopCause::User).await;
        Ok(())
    }

    async fn split_recording(&mut self, listener: Option<SplitCallback>) -> RecorderResult<()> {
        let split_timeout = Duration::from_millis(self.config.split_timeout_ms);
        let rx = {
            let Some(session) = self.session.as_mut() else {
                return Err(RecorderError::no_active_recording());
            };
            let SessionMode::Recording {
                options,
                split_listener,
                ..
            } = &mut session.mode
            else {
                return Err(RecorderError::no_active_recording());
            };
            if !options.manual_split_enabled() {
                return Err(RecorderError::new(
                    ErrorCode::SplitRecordingDisabled,
                    "Manual split was not enabled when the recording started",
                ));
            }
            if listener.is_some() {
                *split_listener = listener;
            }

            let (tx, rx) = oneshot::channel();
            session.runtime.request_split(tx);
            rx
        };

        let result = match time::timeout(split_timeout, rx).await {
            Ok(Ok(result)) => result.map(|_| ()),
            Ok(Err(_)) => Err(RecorderError::no_active_recording()),
            Err(_) => Err(RecorderError::encoder("Timed out waiting for a keyframe to split on")),
        };

        match &result {
            // The split signal is already queued; deliver it before returning
            Ok(()) => self.drain_signals().await,
            Err(err) => {
                warn!("Manual split failed: {}", err);
                if let Some(SessionMode::Recording { split_listener, .. }) =
                    self.session.as_mut().map(|s| &mut s.mode)
                {
                    split_listener.take();
                }
            }
        }
        result
    }

    async fn start_replays(
        &mut self,
        options: ReplayOptions,
        settings: Option<CaptureSettings>,
    ) -> RecorderResult<()> {
        if self.session.is_some() {
            return Err(RecorderError::already_running());
        }
        let settings = self.resolve_settings(settings)?;
        if options.buffer_second == 0 {
            return Err(RecorderError::invalid("bufferSecond must be positive"));
        }
        let folder = expand_path(&options.root_folder)?;
        ensure_dir(&folder)?;

        self.set_phase(SessionPhase::Starting);
        info!(
            "Starting replays: {}s buffer, files in {}",
            options.buffer_second,
            folder.display()
        );

        let ring = Arc::new(ReplayBuffer::new(options.buffer_second * 1000));
        let sink_ring = Arc::clone(&ring);
        let launched = self
            .launch(
                &settings,
                options.audio_track,
                options.file_format,
                &folder,
                move |_, _| OutputSink::Replay(sink_ring),
            )
            .await;

        let (id, runtime, header, bound_game, start_time_epoch_ms) = match launched {
            Ok(parts) => parts,
            Err(err) => {
                warn!("Replays failed to start: {}", err);
                self.set_phase(SessionPhase::Idle);
                return Err(err);
            }
        };

        self.session = Some(ActiveSession {
            id,
            auto_shutdown: options.auto_shutdown_on_game_exit,
            mode: SessionMode::Replays {
                ring,
                folder: folder.clone(),
                format: options.file_format,
                replay: None,
            },
            runtime,
            header,
            output_dir: folder,
            start_time_epoch_ms,
            bound_game,
            stats_mark: (Instant::now(), 0),
        });
        self.set_phase(SessionPhase::Replays);
        info!("Replays started: session {}", id);

        let stats = self.stats_snapshot();
        self.events.emit(&RecorderEvent::ReplaysStarted(RecordEventArgs {
            stats: Some(stats),
            ..RecordEventArgs::default()
        }));
        Ok(())
    }

    async fn stop_replays(&mut self) -> RecorderResult<()> {
        match self.session.as_ref().map(|s| &s.mode) {
            Some(SessionMode::Replays { .. }) => {}
            _ => return Err(RecorderError::no_active_recording()),
        }
        self.stop_session(StopCause::User).await;
        Ok(())
    }

    fn capture_replay(
        &mut self,
        options: CaptureReplayOptions,
        callback: Option<ReplayCallback>,
    ) -> RecorderResult<ActiveReplay> {
        let replay_id = self.next_replay_id;
        let poll_interval = Duration::from_millis(self.config.replay_poll_interval_ms.max(1));

        let Some(session) = self.session.as_mut() else {
            return Err(RecorderError::no_active_recording());
        };
        let session_id = session.id;
        let header = session.header.clone();
        let SessionMode::Replays {
            ring,
            folder,
            format,
            replay,
        } = &mut session.mode
        else {
            return Err(RecorderError::no_active_recording());
        };

        if replay.is_some() {
            return Err(RecorderError::new(
                ErrorCode::AlreadyRunning,
                "A replay capture is already in progress",
            ));
        }
        if options.file_name.trim().is_empty() {
            return Err(RecorderError::invalid("Replay file name is empty"));
        }

        let path = segment_path(&folder.join(&options.file_name), format.extension(), 0);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let callback: CallbackSlot = Arc::new(parking_lot::Mutex::new(callback));
        let signals = SignalSender::new(session_id, self.signal_tx.clone());

        info!(
            "Capturing replay {}: {}ms past, timeout {:?} -> {}",
            replay_id,
            options.past_duration,
            options.timeout,
            path.display()
        );

        let task = spawn_capture(
            Arc::clone(ring),
            ReplayRequest {
                id: replay_id,
                path,
                past_ms: options.past_duration,
                timeout_ms: options.timeout,
                header,
                poll_interval,
            },
            control_rx,
            move |outcome| signals.send(SessionSignal::ReplayFinished(outcome)),
        );

        *replay = Some(InFlightReplay {
            id: replay_id,
            control: control_tx.clone(),
            callback: Arc::clone(&callback),
            task,
        });
        self.next_replay_id += 1;

        Ok(ActiveReplay::new(replay_id, options.timeout, control_tx, callback))
    }

    fn finish_replay(&mut self, outcome: ReplayOutcome) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let start_time_epoch_ms = session.start_time_epoch_ms;
        let SessionMode::Replays { replay, .. } = &mut session.mode else {
            return;
        };
        if replay.as_ref().map(|r| r.id) != Some(outcome.id) {
            debug!(
                "Ignoring outcome of unknown replay {} ({})",
                outcome.id,
                outcome.path.display()
            );
            return;
        }
        let Some(in_flight) = replay.take() else {
            return;
        };

        let video = match outcome.result {
            Ok(segment) => ReplayVideo {
                base: RecordEventArgs {
                    file_path: Some(segment.path.display().to_string()),
                    error: outcome
                        .aborted
                        .then(|| "Replays stopped before the capture completed".to_string()),
                    reason: Some(if outcome.aborted {
                        ErrorCode::SuccessWithError
                    } else {
                        ErrorCode::Success
                    }),
                    stats: None,
                },
                duration: segment.duration_ms,
                start_time_epoch: start_time_epoch_ms + segment.first_pts_ms as i64,
            },
            Err(err) => ReplayVideo {
                base: RecordEventArgs {
                    file_path: None,
                    error: Some(err.message.clone()),
                    reason: Some(err.code),
                    stats: None,
                },
                duration: 0,
                start_time_epoch: start_time_epoch_ms,
            },
        };

        let callback = in_flight.callback.lock().take();
        if let Some(callback) = callback {
            callback(&video);
        }
        self.events.emit(&RecorderEvent::ReplayCaptured(video));
    }

    /// Handle the signals that are already queued
    async fn drain_signals(&mut self) {
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.handle_signal(signal).await;
        }
    }

    async fn handle_signal(&mut self, signal: ControllerSignal) {
        let (id, signal) = match signal {
            ControllerSignal::Game(event) => {
                self.handle_game_event(event).await;
                return;
            }
            ControllerSignal::Session(id, signal) => (id, signal),
        };

        if self.session.as_ref().map(|s| s.id) != Some(id) {
            debug!("Dropping signal of finished session {}: {:?}", id, signal);
            return;
        }

        match signal {
            SessionSignal::Failed(err) => {
                error!("Session failed: {}", err);
                if err.code == ErrorCode::ProcessTerminated {
                    self.connected = false;
                }
                self.stop_session(StopCause::Failed(err)).await;
            }
            SessionSignal::OutputFailed(err) => {
                error!("Session output failed: {}", err);
                self.stop_session(StopCause::Failed(err)).await;
            }
            SessionSignal::LowDisk => {
                warn!("Stopping session, disk space is low");
                self.stop_session(StopCause::LowDisk).await;
            }
            SessionSignal::Split(info) => self.emit_split(info),
            SessionSignal::ReplayFinished(outcome) => self.finish_replay(outcome),
        }
    }

    fn emit_split(&mut self, info: SplitInfo) {
        let listener = match self.session.as_mut().map(|s| &mut s.mode) {
            Some(SessionMode::Recording { split_listener, .. }) => split_listener.take(),
            _ => None,
        };

        let args = SplitRecordArgs {
            base: RecordEventArgs {
                file_path: Some(info.closed.path.display().to_string()),
                ..RecordEventArgs::default()
            },
            duration: info.closed.duration_ms,
            split_count: info.split_count,
            next_file_path: info.next_file_path.display().to_string(),
            start_time_epoch: Some(info.start_time_epoch_ms),
        };
        if let Some(listener) = listener {
            listener(&args);
        }
        self.events.emit(&RecorderEvent::RecordingSplit(args));
    }

    fn register_games(&mut self, filter: GamesFilter) {
        if let Some(previous) = self.games_task.take() {
            previous.abort();
        }
        info!(
            "Tracking games: all={}, ids={:?}",
            filter.all, filter.games_ids
        );

        let mut events = self.tracker.register(filter);
        let signals = self.signal_tx.clone();
        self.games_task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if signals.send(ControllerSignal::Game(event)).is_err() {
                    break;
                }
            }
        }));
    }

    async fn handle_game_event(&mut self, event: GameEvent) {
        if self.track_game(event) {
            info!("Captured game exited, stopping session");
            self.stop_session(StopCause::GameExit).await;
        }
    }

    /// Update the running game list and emit the event
    ///
    /// Returns true when the exited game is the one an auto-shutdown
    /// session is bound to.
    fn track_game(&mut self, event: GameEvent) -> bool {
        match event {
            GameEvent::Launched(game) => {
                info!("Game launched: {} (pid {:?})", game.name, game.pid());
                self.running_games.retain(|g| !same_game(g, &game));
                self.running_games.push(game.clone());
                self.events.emit(&RecorderEvent::GameLaunched(game));
                false
            }
            GameEvent::Exited(game) => {
                info!("Game exited: {} (pid {:?})", game.name, game.pid());
                self.running_games.retain(|g| !same_game(g, &game));

                let shutdown = self.session.as_ref().is_some_and(|s| {
                    s.auto_shutdown && s.bound_game.as_ref().is_some_and(|g| same_game(g, &game))
                });
                self.events.emit(&RecorderEvent::GameExit(game));
                shutdown
            }
        }
    }

    /// Tear the active session down and report how it ended
    async fn stop_session(&mut self, cause: StopCause) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.set_phase(SessionPhase::Stopping);
        info!("Stopping session {} ({:?})", session.id, cause);

        let mut stats = RecorderStats::default();
        session.runtime.counters().fill(&mut stats);
        let usage = self.host.process_usage();
        stats.cpu_usage = usage.cpu_percent;
        stats.memory_usage = usage.memory_mb;

        // A running replay capture is cut short and still reported
        let mut aborted_replay = None;
        if let SessionMode::Replays { replay, .. } = &mut session.mode {
            if let Some(mut in_flight) = replay.take() {
                let _ = in_flight.control.send(ReplayControl::Abort);
                if let Err(e) = (&mut in_flight.task).await {
                    error!("Replay capture task panicked: {}", e);
                }
                aborted_replay = Some(in_flight);
            }
        }
        if let Some(in_flight) = aborted_replay {
            let id = in_flight.id;
            if let SessionMode::Replays { replay, .. } = &mut session.mode {
                *replay = Some(in_flight);
            }
            self.session = Some(session);
            self.drain_replay_outcome(id).await;
            let Some(restored) = self.session.take() else {
                return;
            };
            session = restored;
        }

        let report = session.runtime.shutdown().await;

        let (reason, has_error, error) = match (&report.finish_error, &cause) {
            (Some(err), _) => (ErrorCode::ProcessOutputError, true, Some(err.message.clone())),
            (None, StopCause::User) => (ErrorCode::Success, false, None),
            (None, StopCause::GameExit) => (ErrorCode::Success, false, Some(GAME_EXITED.to_string())),
            (None, StopCause::LowDisk) => (ErrorCode::SuccessLowDiskSpace, false, None),
            (None, StopCause::Failed(err)) => {
                let wrote_files = report
                    .summary
                    .as_ref()
                    .is_some_and(|s| !s.segments.is_empty());
                match &session.mode {
                    SessionMode::Recording { .. } if wrote_files => {
                        (ErrorCode::SuccessWithError, true, Some(err.message.clone()))
                    }
                    _ => (err.code, true, Some(err.message.clone())),
                }
            }
        };

        match session.mode {
            SessionMode::Recording { stop_listener, .. } => {
                let summary = report.summary.unwrap_or_else(|| crate::output::RecordingSummary {
                    segments: Vec::new(),
                    split_count: 0,
                    duration_ms: 0,
                });
                let args = RecordStopEventArgs {
                    base: RecordEventArgs {
                        file_path: summary.last_path().map(|p| p.display().to_string()),
                        error,
                        reason: Some(reason),
                        stats: Some(stats),
                    },
                    duration: summary.segments.last().map(|s| s.duration_ms),
                    has_error,
                    split_count: Some(summary.split_count),
                    start_time_epoch: Some(session.start_time_epoch_ms),
                };
                info!(
                    "Recording stopped: reason {:?}, {} file(s), {} split(s)",
                    reason,
                    summary.segments.len(),
                    summary.split_count
                );

                self.set_phase(SessionPhase::Idle);
                if let Some(listener) = stop_listener {
                    listener(&args);
                }
                self.events.emit(&RecorderEvent::RecordingStopped(args));
            }
            SessionMode::Replays { .. } => {
                info!("Replays stopped: reason {:?}", reason);
                self.set_phase(SessionPhase::Idle);
                self.events.emit(&RecorderEvent::ReplaysStopped(RecordEventArgs {
                    file_path: None,
                    error,
                    reason: Some(reason),
                    stats: Some(stats),
                }));
            }
        }
    }

    /// Process queued signals until the outcome of replay `id` was handled
    async fn drain_replay_outcome(&mut self, id: u64) {
        while let Ok(signal) = self.signal_rx.try_recv() {
            match signal {
                ControllerSignal::Session(session, SessionSignal::ReplayFinished(outcome))
                    if self.session.as_ref().map(|s| s.id) == Some(session) =>
                {
                    let done = outcome.id == id;
                    self.finish_replay(outcome);
                    if done {
                        return;
                    }
                }
                ControllerSignal::Session(_, SessionSignal::Split(info)) => self.emit_split(info),
                ControllerSignal::Game(event) => {
                    self.track_game(event);
                }
                other => debug!("Ignoring signal while stopping: {:?}", other),
            }
        }
    }
}

fn delayed_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
