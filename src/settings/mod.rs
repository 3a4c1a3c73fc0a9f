//! Capture settings
//!
//! [`CaptureSettings`] is the immutable description of what a session
//! captures and how it encodes it. It is produced by [`CaptureSettingsBuilder`]
//! and shared cheaply (reference counted) between the caller and sessions.

pub mod audio;
mod builder;
pub mod encoder;
pub mod source;
pub mod video;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::sync::Arc;

use crate::catalog::AudioEncoderInfo;

pub use audio::{
    AudioCapture, AudioCaptureKind, AudioDeviceSettings, AudioGeneralSettings, AudioSettings,
    AudioTracks, SpeakerLayout,
};
pub use builder::{
    ApplicationAudioCaptureParams, AudioDeviceParams, CaptureSettingsBuilder,
    CaptureSettingsOptions, DefaultAudioDeviceParams,
};
pub use encoder::{EncoderTuning, VideoEncoderKind, VideoEncoderSettings};
pub use source::{
    CaptureSource, DisplayCaptureType, GameCaptureSourceSettings, GameProcess,
    MonitorCaptureSourceSettings, WindowCaptureSourceSettings,
};
pub use video::{VideoColorFormat, VideoColorRange, VideoColorSpec, VideoSettings};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsData {
    video_settings: VideoSettings,
    audio_settings: AudioSettings,
    video_encoder_settings: VideoEncoderSettings,
    audio_encoder: AudioEncoderInfo,
    sources: Vec<CaptureSource>,
    separate_audio_tracks: bool,
}

/// Frozen capture configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    data: Arc<SettingsData>,
}

impl CaptureSettings {
    pub fn video_settings(&self) -> &VideoSettings {
        &self.data.video_settings
    }

    pub fn audio_settings(&self) -> &AudioSettings {
        &self.data.audio_settings
    }

    pub fn video_encoder_settings(&self) -> &VideoEncoderSettings {
        &self.data.video_encoder_settings
    }

    pub fn audio_encoder(&self) -> &AudioEncoderInfo {
        &self.data.audio_encoder
    }

    pub fn sources(&self) -> &[CaptureSource] {
        &self.data.sources
    }

    pub fn separate_audio_tracks(&self) -> bool {
        self.data.separate_audio_tracks
    }

    /// Track layout used when a session does not pick one
    pub fn default_audio_tracks(&self) -> AudioTracks {
        if self.data.separate_audio_tracks {
            AudioTracks::TRACK1 | AudioTracks::TRACK2 | AudioTracks::TRACK3
        } else {
            AudioTracks::TRACK1
        }
    }

    /// The Game source, if any (at most one per settings)
    pub fn game_source(&self) -> Option<&GameCaptureSourceSettings> {
        self.data.sources.iter().find_map(|s| match s {
            CaptureSource::Game(game) => Some(game),
            _ => None,
        })
    }

    /// Whether both values are the same snapshot
    pub fn same_snapshot(&self, other: &CaptureSettings) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Serialize for CaptureSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

/// The most recently built settings, used when a session is started
/// without explicit settings
#[derive(Debug, Clone, Default)]
pub(crate) struct LastBuiltSettings(Arc<Mutex<Option<CaptureSettings>>>);

impl LastBuiltSettings {
    pub(crate) fn store(&self, settings: CaptureSettings) {
        *self.0.lock() = Some(settings);
    }

    pub(crate) fn get(&self) -> Option<CaptureSettings> {
        self.0.lock().clone()
    }
}
