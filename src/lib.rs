pub mod capture;
pub mod catalog;
pub mod config;
pub mod encoder;
pub mod error;
pub mod games;
pub mod host;
pub mod output;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod settings;

pub use capture::{CaptureBackend, ConnectOptions, SyntheticBackend};
pub use catalog::RecordingInformation;
pub use config::RecorderConfig;
pub use error::{ErrorCode, RecorderError, RecorderResult};
pub use games::{ChannelGameTracker, GameEvent, GameInfo, GameTracker, GamesFilter};
pub use output::FileFormat;
pub use recorder::{Recorder, RecorderBuilder};
pub use replay::{ActiveReplay, ReplayCallback};
pub use session::{
    CaptureReplayOptions, EventKind, RecordEventArgs, RecordStopEventArgs, RecorderEvent,
    RecorderStats, RecordingOptions, ReplayOptions, ReplayVideo, SessionPhase, SplitOptions,
    SplitRecordArgs,
};
pub use settings::{CaptureSettings, CaptureSettingsBuilder, CaptureSettingsOptions};
