use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr};

use crate::error::{RecorderError, RecorderResult};

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [44100, 48000];
pub const DEFAULT_VOLUME: f32 = 1.0;
pub const MAX_VOLUME: f32 = 20.0;
pub const DEFAULT_BALANCE: f32 = 0.5;
pub const MAX_AUDIO_TRACKS: u8 = 6;

/// Bitmask of output audio tracks (Track1 = bit 0 .. Track6 = bit 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioTracks(pub u8);

impl AudioTracks {
    pub const NONE: AudioTracks = AudioTracks(0);
    pub const TRACK1: AudioTracks = AudioTracks(1 << 0);
    pub const TRACK2: AudioTracks = AudioTracks(1 << 1);
    pub const TRACK3: AudioTracks = AudioTracks(1 << 2);
    pub const TRACK4: AudioTracks = AudioTracks(1 << 3);
    pub const TRACK5: AudioTracks = AudioTracks(1 << 4);
    pub const TRACK6: AudioTracks = AudioTracks(1 << 5);
    pub const ALL: AudioTracks = AudioTracks(0xff);

    pub fn contains_track(self, track: u8) -> bool {
        track >= 1 && track <= MAX_AUDIO_TRACKS && self.0 & (1 << (track - 1)) != 0
    }

    /// Track numbers (1-based) present in the mask
    pub fn tracks(self) -> impl Iterator<Item = u8> {
        (1..=MAX_AUDIO_TRACKS).filter(move |t| self.contains_track(*t))
    }

    pub fn is_empty(self) -> bool {
        self.tracks().next().is_none()
    }
}

impl BitOr for AudioTracks {
    type Output = AudioTracks;

    fn bitor(self, rhs: Self) -> Self::Output {
        AudioTracks(self.0 | rhs.0)
    }
}

impl BitAnd for AudioTracks {
    type Output = AudioTracks;

    fn bitand(self, rhs: Self) -> Self::Output {
        AudioTracks(self.0 & rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeakerLayout {
    SpeakersMono,
    #[default]
    SpeakersStereo,
    #[serde(rename = "SPEAKERS_2POINT1")]
    Speakers2Point1,
    #[serde(rename = "SPEAKERS_4POINT0")]
    Speakers4Point0,
    #[serde(rename = "SPEAKERS_4POINT1")]
    Speakers4Point1,
    #[serde(rename = "SPEAKERS_5POINT1")]
    Speakers5Point1,
    #[serde(rename = "SPEAKERS_7POINT1")]
    Speakers7Point1,
}

impl SpeakerLayout {
    pub fn channels(self) -> u16 {
        match self {
            SpeakerLayout::SpeakersMono => 1,
            SpeakerLayout::SpeakersStereo => 2,
            SpeakerLayout::Speakers2Point1 => 3,
            SpeakerLayout::Speakers4Point0 => 4,
            SpeakerLayout::Speakers4Point1 => 5,
            SpeakerLayout::Speakers5Point1 => 6,
            SpeakerLayout::Speakers7Point1 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioGeneralSettings {
    /// 44100 or 48000
    pub sample_rate: u32,
    pub speaker_layout: SpeakerLayout,
    /// Win32 only
    pub disable_audio_ducking: bool,
    pub low_latency_audio_buffering: bool,
}

impl Default for AudioGeneralSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            speaker_layout: SpeakerLayout::default(),
            disable_audio_ducking: true,
            low_latency_audio_buffering: false,
        }
    }
}

impl AudioGeneralSettings {
    pub fn validate(&self) -> RecorderResult<()> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(RecorderError::invalid(format!(
                "Unsupported sample rate {}Hz",
                self.sample_rate
            )));
        }
        Ok(())
    }

    pub fn channels(&self) -> u16 {
        self.speaker_layout.channels()
    }
}

/// Per-device mixing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioDeviceSettings {
    /// 0.0 - 20.0
    pub volume: f32,
    pub mono: bool,
    /// 0.0 (left) - 1.0 (right)
    pub balance: f32,
    /// Output tracks this device feeds. None = every track
    pub tracks: Option<AudioTracks>,
    pub use_device_timing: bool,
}

impl Default for AudioDeviceSettings {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            mono: false,
            balance: DEFAULT_BALANCE,
            tracks: None,
            use_device_timing: false,
        }
    }
}

impl AudioDeviceSettings {
    pub fn validate(&self) -> RecorderResult<()> {
        if !(0.0..=MAX_VOLUME).contains(&self.volume) {
            return Err(RecorderError::invalid(format!(
                "Volume must be between 0 and {}, got {}",
                MAX_VOLUME, self.volume
            )));
        }
        if !(0.0..=1.0).contains(&self.balance) {
            return Err(RecorderError::invalid(format!(
                "Balance must be between 0 and 1, got {}",
                self.balance
            )));
        }
        Ok(())
    }

    pub fn effective_tracks(&self) -> AudioTracks {
        self.tracks.unwrap_or(AudioTracks::ALL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCaptureKind {
    Input,
    Output,
    /// Per-process audio (always an output)
    Application,
}

/// One audio device (or application) to capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCapture {
    pub kind: AudioCaptureKind,
    /// Device ID, or process name for applications
    pub id: String,
    pub name: String,
    pub settings: AudioDeviceSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub general: AudioGeneralSettings,
    pub inputs: Vec<AudioCapture>,
    pub outputs: Vec<AudioCapture>,
    pub applications: Vec<AudioCapture>,
}

impl AudioSettings {
    pub fn captures(&self) -> impl Iterator<Item = &AudioCapture> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.applications.iter())
    }

    pub fn contains_device(&self, id: &str) -> bool {
        self.captures().any(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.captures().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_mask() {
        let mask = AudioTracks::TRACK1 | AudioTracks::TRACK3;
        assert!(mask.contains_track(1));
        assert!(!mask.contains_track(2));
        assert!(mask.contains_track(3));
        assert_eq!(mask.tracks().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(AudioTracks::ALL.tracks().count(), 6);
        assert!(AudioTracks::NONE.is_empty());
    }

    #[test]
    fn test_speaker_layout_channels() {
        assert_eq!(SpeakerLayout::SpeakersMono.channels(), 1);
        assert_eq!(SpeakerLayout::default().channels(), 2);
        assert_eq!(SpeakerLayout::Speakers7Point1.channels(), 8);
    }

    #[test]
    fn test_device_settings_validation() {
        assert!(AudioDeviceSettings::default().validate().is_ok());

        let loud = AudioDeviceSettings {
            volume: 25.0,
            ..AudioDeviceSettings::default()
        };
        assert!(loud.validate().is_err());

        let skewed = AudioDeviceSettings {
            balance: 1.5,
            ..AudioDeviceSettings::default()
        };
        assert!(skewed.validate().is_err());
    }

    #[test]
    fn test_sample_rate_validation() {
        let settings = AudioGeneralSettings {
            sample_rate: 16000,
            ..AudioGeneralSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(AudioGeneralSettings::default().validate().is_ok());
    }
}
