use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, RecorderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayCaptureType {
    #[default]
    Auto,
    /// Desktop duplication
    Dxgi,
    /// Windows Graphics Capture
    Wgc,
    /// Compatibility mode
    BitBlt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorCaptureSourceSettings {
    pub monitor_id: String,
    #[serde(rename = "type")]
    pub capture_type: DisplayCaptureType,
    pub capture_cursor: bool,
    pub force_sdr: bool,
    /// Center and scale the source to the output canvas
    pub stretch_to_output_size: bool,
}

impl Default for MonitorCaptureSourceSettings {
    fn default() -> Self {
        Self {
            monitor_id: String::new(),
            capture_type: DisplayCaptureType::Auto,
            capture_cursor: true,
            force_sdr: false,
            stretch_to_output_size: true,
        }
    }
}

/// Game to capture, by process name or process ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameProcess {
    Pid(u32),
    Name(String),
}

impl Default for GameProcess {
    fn default() -> Self {
        GameProcess::Name(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameCaptureSourceSettings {
    pub game_process: GameProcess,
    /// Slow capture through shared memory
    pub sli_compatibility: bool,
    pub capture_cursor: bool,
    pub allow_transparency: bool,
    pub premultiplied_alpha: bool,
    /// Capture third-party overlays
    pub capture_overlays: bool,
    pub limit_framerate: bool,
    /// Rec.2100 (PQ) instead of sRGB
    pub rgb10a2_space: bool,
    pub stretch_to_output_size: bool,
}

impl Default for GameCaptureSourceSettings {
    fn default() -> Self {
        Self {
            game_process: GameProcess::default(),
            sli_compatibility: false,
            capture_cursor: true,
            allow_transparency: false,
            premultiplied_alpha: false,
            capture_overlays: false,
            limit_framerate: false,
            rgb10a2_space: false,
            stretch_to_output_size: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowCaptureSourceSettings {
    /// Executable owning the window (e.g. "discord.exe")
    pub executable: String,
    /// Optional window title filter
    pub title: Option<String>,
    pub capture_cursor: bool,
    pub stretch_to_output_size: bool,
}

impl Default for WindowCaptureSourceSettings {
    fn default() -> Self {
        Self {
            executable: String::new(),
            title: None,
            capture_cursor: true,
            stretch_to_output_size: true,
        }
    }
}

/// A configured video origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum CaptureSource {
    Display(MonitorCaptureSourceSettings),
    Game(GameCaptureSourceSettings),
    Window(WindowCaptureSourceSettings),
}

impl CaptureSource {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CaptureSource::Display(_) => "Display",
            CaptureSource::Game(_) => "Game",
            CaptureSource::Window(_) => "Window",
        }
    }

    pub fn stretch_to_output_size(&self) -> bool {
        match self {
            CaptureSource::Display(s) => s.stretch_to_output_size,
            CaptureSource::Game(s) => s.stretch_to_output_size,
            CaptureSource::Window(s) => s.stretch_to_output_size,
        }
    }

    pub fn capture_cursor(&self) -> bool {
        match self {
            CaptureSource::Display(s) => s.capture_cursor,
            CaptureSource::Game(s) => s.capture_cursor,
            CaptureSource::Window(s) => s.capture_cursor,
        }
    }

    /// Human readable label for logs
    pub fn label(&self) -> String {
        match self {
            CaptureSource::Display(s) => format!("display:{}", s.monitor_id),
            CaptureSource::Game(s) => match &s.game_process {
                GameProcess::Pid(pid) => format!("game:pid-{}", pid),
                GameProcess::Name(name) => format!("game:{}", name),
            },
            CaptureSource::Window(s) => format!("window:{}", s.executable),
        }
    }

    /// Checks that do not need the device catalog
    pub fn validate(&self) -> RecorderResult<()> {
        match self {
            CaptureSource::Display(s) => {
                if s.monitor_id.trim().is_empty() {
                    return Err(RecorderError::invalid("Monitor ID is required"));
                }
            }
            CaptureSource::Game(s) => match &s.game_process {
                GameProcess::Pid(0) => {
                    return Err(RecorderError::invalid("Game process ID must be non-zero"));
                }
                GameProcess::Name(name) if name.trim().is_empty() => {
                    return Err(RecorderError::invalid("Game process name is required"));
                }
                _ => {}
            },
            CaptureSource::Window(s) => {
                if s.executable.trim().is_empty() {
                    return Err(RecorderError::invalid("Window executable is required"));
                }
            }
        }
        Ok(())
    }
}
