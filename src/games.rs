//! Game/process tracking boundary
//!
//! The recorder never enumerates processes itself. A [`GameTracker`] hands it
//! launch/exit events, which it uses to resolve Game capture sources and to
//! auto-shutdown sessions bound to a game that exited.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProcessInfo {
    pub pid: Option<u32>,
    pub full_path: String,
    pub command_line: Option<String>,
    pub is_32_bit: Option<bool>,
    pub is_elevated: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameType {
    Game,
    Launcher,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub id: u32,
    pub class_id: u32,
    pub name: String,
    pub supported: bool,
    pub process_info: Option<GameProcessInfo>,
    #[serde(rename = "type")]
    pub game_type: GameType,
}

impl GameInfo {
    pub fn pid(&self) -> Option<u32> {
        self.process_info.as_ref().and_then(|p| p.pid)
    }

    /// Executable file name (e.g. "game.exe")
    pub fn process_name(&self) -> Option<&str> {
        let info = self.process_info.as_ref()?;
        info.full_path
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .filter(|name| !name.is_empty())
    }
}

/// Which games to report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamesFilter {
    pub all: bool,
    pub include_unsupported: bool,
    pub games_ids: Vec<u32>,
}

impl GamesFilter {
    pub fn matches(&self, game: &GameInfo) -> bool {
        if !game.supported && !self.include_unsupported {
            return false;
        }
        self.all || self.games_ids.contains(&game.class_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Launched(GameInfo),
    Exited(GameInfo),
}

impl GameEvent {
    pub fn game(&self) -> &GameInfo {
        match self {
            GameEvent::Launched(game) | GameEvent::Exited(game) => game,
        }
    }
}

/// Source of game launch/exit events
pub trait GameTracker: Send + Sync {
    /// Subscribe to events for the games accepted by `filter`
    fn register(&self, filter: GamesFilter) -> mpsc::Receiver<GameEvent>;
}

/// Tracker fed by the host application
///
/// Events published through [`ChannelGameTracker::publish`] are fanned out to
/// every registration whose filter accepts the game.
#[derive(Clone)]
pub struct ChannelGameTracker {
    tx: broadcast::Sender<GameEvent>,
}

impl ChannelGameTracker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn publish(&self, event: GameEvent) {
        if self.tx.send(event).is_err() {
            debug!("Game event published with no registered listeners");
        }
    }
}

impl Default for ChannelGameTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GameTracker for ChannelGameTracker {
    fn register(&self, filter: GamesFilter) -> mpsc::Receiver<GameEvent> {
        let mut events = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !filter.matches(event.game()) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Game tracker lagged, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}
