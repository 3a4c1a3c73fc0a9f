//! Recording and replay sessions
//!
//! This module provides the session machinery behind [`crate::Recorder`]:
//! - The controller task that owns the single active session
//! - Per-session capture and output tasks
//! - Session options, event payloads and the listener registry
//! - Frame counters and statistics

pub(crate) mod controller;
mod events;
mod options;
pub(crate) mod runtime;
mod stats;

pub use controller::{SessionPhase, GAME_EXITED};
pub use events::{
    EventKind, EventListener, EventRegistry, RecordEventArgs, RecordStopEventArgs, RecorderEvent,
    ReplayVideo, SplitCallback, SplitRecordArgs, StopCallback,
};
pub use options::{CaptureReplayOptions, RecordingOptions, ReplayOptions, SplitOptions};
pub use stats::{FrameCounters, RecorderStats};
