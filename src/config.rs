use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Global recorder options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Show the backend capture window (debugging only)
    pub show_debug_window: bool,

    /// Enable debug level logs
    pub enable_debug_logs: bool,

    /// Extra arguments handed to the capture backend when it is launched
    pub custom_command_line_args: Vec<String>,

    /// Override the folder holding the backend binaries
    pub override_backend_folder: Option<String>,

    /// Interval between `stats` events. 0 disables stats
    /// Default: 2000ms
    pub stats_interval_ms: u64,

    /// Backend connection attempts at session start
    pub connect_retries: u32,

    pub connect_retry_delay_ms: u64,

    /// Raw batches queued between the pipeline and the encoder
    pub encoder_queue_capacity: usize,

    /// Sessions stop gracefully when free space drops below this
    /// Default: 50MB
    pub low_disk_space_mb: u64,

    /// How often a replay session checks free space against
    /// `low_disk_space_mb`. Recordings check on every write. 0 disables
    pub disk_check_interval_ms: u64,

    /// How often an open-ended replay capture collects new packets
    pub replay_poll_interval_ms: u64,

    /// Upper bound for a manual split to find its keyframe
    pub split_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            show_debug_window: false,
            enable_debug_logs: false,
            custom_command_line_args: Vec::new(),
            override_backend_folder: None,
            stats_interval_ms: 2000,
            connect_retries: 3,
            connect_retry_delay_ms: 500,
            encoder_queue_capacity: 8,
            low_disk_space_mb: 50,
            disk_check_interval_ms: 1000,
            replay_poll_interval_ms: 250,
            split_timeout_ms: 5000,
        }
    }
}

impl RecorderConfig {
    /// Load options from a config file (any format the `config` crate knows),
    /// overridable by `RECORDER_*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RECORDER"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn disk_check_interval(&self) -> Option<Duration> {
        match self.disk_check_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn low_disk_space_bytes(&self) -> u64 {
        self.low_disk_space_mb * 1024 * 1024
    }
}
