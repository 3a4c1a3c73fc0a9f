use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, RecorderResult};
use crate::output::{FileFormat, SplitPolicy};
use crate::settings::AudioTracks;

/// Recording split configuration
///
/// Automatic thresholds and manual splits work independently; whichever
/// triggers first rolls the file over at the next keyframe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOptions {
    pub enable_manual: bool,

    /// Split by time, in seconds
    pub max_time_second: Option<u64>,

    /// Split by size, in MB
    #[serde(rename = "maxBySizeMB")]
    pub max_by_size_mb: Option<u64>,
}

impl SplitOptions {
    pub fn validate(&self) -> RecorderResult<()> {
        if self.max_time_second == Some(0) {
            return Err(RecorderError::invalid("maxTimeSecond must be positive"));
        }
        if self.max_by_size_mb == Some(0) {
            return Err(RecorderError::invalid("maxBySizeMB must be positive"));
        }
        Ok(())
    }

    pub fn policy(&self) -> SplitPolicy {
        SplitPolicy {
            max_time_ms: self.max_time_second.map(|s| s * 1000),
            max_bytes: self.max_by_size_mb.map(|mb| mb * 1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Output path without extension
    pub file_path: String,

    pub split: Option<SplitOptions>,

    #[serde(default)]
    pub file_format: FileFormat,

    /// Output audio tracks. Defaults to Track1, or Track1|Track2|Track3 when
    /// the settings use separate audio tracks
    pub audio_track: Option<AudioTracks>,

    /// Stop when the captured game exits
    #[serde(default)]
    pub auto_shutdown_on_game_exit: bool,
}

impl RecordingOptions {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Manual splits are allowed only when enabled in the split options
    pub fn manual_split_enabled(&self) -> bool {
        self.split.as_ref().is_some_and(|s| s.enable_manual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOptions {
    /// Length of the rolling buffer in seconds
    pub buffer_second: u64,

    /// Folder replay files are written to
    pub root_folder: String,

    #[serde(default)]
    pub file_format: FileFormat,

    pub audio_track: Option<AudioTracks>,

    #[serde(default)]
    pub auto_shutdown_on_game_exit: bool,
}

impl ReplayOptions {
    pub fn new(buffer_second: u64, root_folder: impl Into<String>) -> Self {
        Self {
            buffer_second,
            root_folder: root_folder.into(),
            file_format: FileFormat::default(),
            audio_track: None,
            auto_shutdown_on_game_exit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReplayOptions {
    /// Replay file name without extension
    pub file_name: String,

    /// Milliseconds of video before this call to include
    pub past_duration: u64,

    /// Stop automatically after this many milliseconds. 0 writes the past
    /// only; None keeps capturing until stopped through the handle
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_policy_units() {
        let split = SplitOptions {
            enable_manual: false,
            max_time_second: Some(2),
            max_by_size_mb: Some(3),
        };
        assert_eq!(
            split.policy(),
            SplitPolicy {
                max_time_ms: Some(2000),
                max_bytes: Some(3 * 1024 * 1024),
            }
        );
        assert!(split.validate().is_ok());
        assert!(SplitOptions { max_time_second: Some(0), ..split }.validate().is_err());
    }

    #[test]
    fn test_manual_split_flag() {
        let mut options = RecordingOptions::new("/tmp/clip");
        assert!(!options.manual_split_enabled());
        options.split = Some(SplitOptions::default());
        assert!(!options.manual_split_enabled());
        options.split = Some(SplitOptions {
            enable_manual: true,
            ..SplitOptions::default()
        });
        assert!(options.manual_split_enabled());
    }

    #[test]
    fn test_recording_options_from_json() {
        let options: RecordingOptions = serde_json::from_str(
            r#"{"filePath":"/videos/a","split":{"enableManual":true,"maxBySizeMB":100}}"#,
        )
        .unwrap();
        assert_eq!(options.file_format, FileFormat::FragmentedMp4);
        assert_eq!(options.split.unwrap().max_by_size_mb, Some(100));
    }
}
