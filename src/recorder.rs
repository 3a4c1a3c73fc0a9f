//! Public recorder handle
//!
//! [`Recorder`] is a cheap, cloneable handle to the session controller task.
//! Every operation is queued to that task and answered over a oneshot
//! channel, so operations never run concurrently. Dropping the last handle
//! stops any active session.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::capture::CaptureBackend;
use crate::catalog::RecordingInformation;
use crate::config::RecorderConfig;
use crate::encoder::{EncoderFactory, ReferenceEncoderFactory};
use crate::error::{ErrorCode, RecorderError, RecorderResult};
use crate::games::{ChannelGameTracker, GameTracker, GamesFilter};
use crate::host::{HostProbe, SystemProbe};
use crate::replay::{ActiveReplay, ReplayCallback};
use crate::session::controller::{Command, Controller, ControllerParts};
use crate::session::{
    CaptureReplayOptions, EventKind, EventListener, EventRegistry, RecordingOptions, ReplayOptions,
    SessionPhase, SplitCallback, StopCallback,
};
use crate::settings::{CaptureSettings, CaptureSettingsBuilder, CaptureSettingsOptions, LastBuiltSettings};

const COMMAND_QUEUE: usize = 32;

/// Assembles a [`Recorder`] around a capture backend
pub struct RecorderBuilder {
    config: RecorderConfig,
    host: Option<Arc<dyn HostProbe>>,
    encoders: Option<Arc<dyn EncoderFactory>>,
    tracker: Option<Arc<dyn GameTracker>>,
}

impl RecorderBuilder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            host: None,
            encoders: None,
            tracker: None,
        }
    }

    /// Default: [`SystemProbe`]
    pub fn host_probe(mut self, host: Arc<dyn HostProbe>) -> Self {
        self.host = Some(host);
        self
    }

    /// Default: [`ReferenceEncoderFactory`]
    pub fn encoder_factory(mut self, encoders: Arc<dyn EncoderFactory>) -> Self {
        self.encoders = Some(encoders);
        self
    }

    /// Default: a [`ChannelGameTracker`] nobody publishes to
    pub fn game_tracker(mut self, tracker: Arc<dyn GameTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Spawn the controller task. Must be called inside a tokio runtime
    pub fn build(self, backend: Arc<dyn CaptureBackend>) -> Recorder {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (phase_tx, phase) = watch::channel(SessionPhase::Idle);
        let events = Arc::new(EventRegistry::new());
        let last_built = LastBuiltSettings::default();

        info!("Recorder created with backend '{}'", backend.name());

        let controller = Controller::new(ControllerParts {
            config: self.config,
            backend,
            encoders: self
                .encoders
                .unwrap_or_else(|| Arc::new(ReferenceEncoderFactory)),
            host: self.host.unwrap_or_else(|| Arc::new(SystemProbe::new())),
            tracker: self
                .tracker
                .unwrap_or_else(|| Arc::new(ChannelGameTracker::new())),
            events: Arc::clone(&events),
            last_built: last_built.clone(),
            phase: phase_tx,
        });
        tokio::spawn(controller.run(command_rx));

        Recorder {
            commands,
            phase,
            events,
            last_built,
        }
    }
}

#[derive(Clone)]
pub struct Recorder {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<SessionPhase>,
    events: Arc<EventRegistry>,
    last_built: LastBuiltSettings,
}

impl Recorder {
    pub fn builder(config: RecorderConfig) -> RecorderBuilder {
        RecorderBuilder::new(config)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<RecorderResult<T>>) -> Command,
    ) -> RecorderResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| controller_gone())?;
        rx.await.map_err(|_| controller_gone())?
    }

    /// Devices, encoders, adapters and monitors known to the backend
    pub async fn query_information(&self) -> RecorderResult<RecordingInformation> {
        self.request(|reply| Command::QueryInformation { reply }).await
    }

    /// Builder seeded from a fresh catalog snapshot
    ///
    /// Settings it builds become the default for sessions started without
    /// explicit settings.
    pub async fn create_settings_builder(
        &self,
        options: CaptureSettingsOptions,
    ) -> RecorderResult<CaptureSettingsBuilder> {
        let catalog = self.query_information().await?;
        Ok(CaptureSettingsBuilder::new(catalog, options)?.with_last_built(self.last_built.clone()))
    }

    /// Start recording to `options.file_path`
    ///
    /// `listener` is called once with the `recording-stopped` payload.
    pub async fn start_recording(
        &self,
        options: RecordingOptions,
        settings: Option<CaptureSettings>,
        listener: Option<StopCallback>,
    ) -> RecorderResult<()> {
        self.request(|reply| Command::StartRecording {
            options,
            settings,
            listener,
            reply,
        })
        .await
    }

    /// Stop the active recording; `listener` replaces the one given at start
    pub async fn stop_recording(&self, listener: Option<StopCallback>) -> RecorderResult<()> {
        self.request(|reply| Command::StopRecording { listener, reply })
            .await
    }

    /// Roll the recording over to a new file at the next keyframe
    pub async fn split_recording(&self, listener: Option<SplitCallback>) -> RecorderResult<()> {
        self.request(|reply| Command::SplitRecording { listener, reply })
            .await
    }

    pub async fn start_replays(
        &self,
        options: ReplayOptions,
        settings: Option<CaptureSettings>,
    ) -> RecorderResult<()> {
        self.request(|reply| Command::StartReplays {
            options,
            settings,
            reply,
        })
        .await
    }

    pub async fn stop_replays(&self) -> RecorderResult<()> {
        self.request(|reply| Command::StopReplays { reply }).await
    }

    /// Write the buffered past plus up to `options.timeout` ms of the future
    /// to a replay file
    pub async fn capture_replay(
        &self,
        options: CaptureReplayOptions,
        callback: Option<ReplayCallback>,
    ) -> RecorderResult<ActiveReplay> {
        self.request(|reply| Command::CaptureReplay {
            options,
            callback,
            reply,
        })
        .await
    }

    /// Track games accepted by `filter`, replacing any previous filter
    pub async fn register_games(&self, filter: GamesFilter) -> RecorderResult<()> {
        self.commands
            .send(Command::RegisterGames { filter })
            .await
            .map_err(|_| controller_gone())
    }

    pub fn is_active(&self) -> bool {
        self.phase.borrow().is_active()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn on(&self, kind: EventKind, listener: EventListener) {
        self.events.on(kind, listener);
    }
}

fn controller_gone() -> RecorderError {
    RecorderError::new(ErrorCode::ProcessTerminated, "Recorder task is not running")
}
