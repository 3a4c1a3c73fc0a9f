//! Session events and the listener registry

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::stats::RecorderStats;
use crate::error::ErrorCode;
use crate::games::GameInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameLaunched,
    GameExit,
    RecordingStarted,
    RecordingStopped,
    RecordingSplit,
    ReplaysStarted,
    ReplaysStopped,
    ReplayCaptured,
    Stats,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::GameLaunched,
        EventKind::GameExit,
        EventKind::RecordingStarted,
        EventKind::RecordingStopped,
        EventKind::RecordingSplit,
        EventKind::ReplaysStarted,
        EventKind::ReplaysStopped,
        EventKind::ReplayCaptured,
        EventKind::Stats,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::GameLaunched => "game-launched",
            EventKind::GameExit => "game-exit",
            EventKind::RecordingStarted => "recording-started",
            EventKind::RecordingStopped => "recording-stopped",
            EventKind::RecordingSplit => "recording-split",
            EventKind::ReplaysStarted => "replays-started",
            EventKind::ReplaysStopped => "replays-stopped",
            EventKind::ReplayCaptured => "replay-captured",
            EventKind::Stats => "stats",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

fn serialize_reason<S: Serializer>(reason: &Option<ErrorCode>, serializer: S) -> Result<S::Ok, S::Error> {
    match reason {
        Some(code) => serializer.serialize_i32(code.as_i32()),
        None => serializer.serialize_none(),
    }
}

/// Payload shared by every session event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEventArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_reason")]
    pub reason: Option<ErrorCode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RecorderStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStopEventArgs {
    #[serde(flatten)]
    pub base: RecordEventArgs,

    /// Duration of the last file in milliseconds
    pub duration: Option<u64>,

    pub has_error: bool,

    pub split_count: Option<u32>,

    pub start_time_epoch: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRecordArgs {
    #[serde(flatten)]
    pub base: RecordEventArgs,

    /// Duration of the file just closed
    pub duration: u64,

    pub split_count: u32,

    pub next_file_path: String,

    pub start_time_epoch: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayVideo {
    #[serde(flatten)]
    pub base: RecordEventArgs,

    pub duration: u64,

    /// Wall clock time of the first frame, ms since the Unix epoch
    pub start_time_epoch: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    GameLaunched(GameInfo),
    GameExit(GameInfo),
    RecordingStarted(RecordEventArgs),
    RecordingStopped(RecordStopEventArgs),
    RecordingSplit(SplitRecordArgs),
    ReplaysStarted(RecordEventArgs),
    ReplaysStopped(RecordEventArgs),
    ReplayCaptured(ReplayVideo),
    Stats(RecorderStats),
}

impl RecorderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RecorderEvent::GameLaunched(_) => EventKind::GameLaunched,
            RecorderEvent::GameExit(_) => EventKind::GameExit,
            RecorderEvent::RecordingStarted(_) => EventKind::RecordingStarted,
            RecorderEvent::RecordingStopped(_) => EventKind::RecordingStopped,
            RecorderEvent::RecordingSplit(_) => EventKind::RecordingSplit,
            RecorderEvent::ReplaysStarted(_) => EventKind::ReplaysStarted,
            RecorderEvent::ReplaysStopped(_) => EventKind::ReplaysStopped,
            RecorderEvent::ReplayCaptured(_) => EventKind::ReplayCaptured,
            RecorderEvent::Stats(_) => EventKind::Stats,
        }
    }

    /// Event payload as JSON
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            RecorderEvent::GameLaunched(game) | RecorderEvent::GameExit(game) => {
                serde_json::to_value(game)
            }
            RecorderEvent::RecordingStarted(args)
            | RecorderEvent::ReplaysStarted(args)
            | RecorderEvent::ReplaysStopped(args) => serde_json::to_value(args),
            RecorderEvent::RecordingStopped(args) => serde_json::to_value(args),
            RecorderEvent::RecordingSplit(args) => serde_json::to_value(args),
            RecorderEvent::ReplayCaptured(args) => serde_json::to_value(args),
            RecorderEvent::Stats(stats) => serde_json::to_value(stats),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

pub type EventListener = Arc<dyn Fn(&RecorderEvent) + Send + Sync>;

/// Callback for a single `recording-stopped`
pub type StopCallback = Box<dyn FnOnce(&RecordStopEventArgs) + Send>;

/// Callback for a single `recording-split`
pub type SplitCallback = Box<dyn FnOnce(&SplitRecordArgs) + Send>;

/// Listeners per event kind, called in registration order
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<HashMap<EventKind, Vec<EventListener>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, listener: EventListener) {
        self.listeners.write().entry(kind).or_default().push(listener);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Call every listener of the event's kind
    ///
    /// The lock is released before listeners run, so a listener may
    /// register further listeners.
    pub fn emit(&self, event: &RecorderEvent) {
        let listeners = self
            .listeners
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        debug!("Event {} -> {} listener(s)", event.kind().name(), listeners.len());
        for listener in listeners {
            listener(event);
        }
    }
}
