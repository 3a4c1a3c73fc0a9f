//! Device and encoder catalog
//!
//! Descriptive, read-only information about the machine: audio devices,
//! video adapters, monitors and the encoders the backend can drive. The
//! recorder asks the backend for a fresh catalog on every query so hot-plugged
//! devices show up immediately.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{RecorderError, RecorderResult};
use crate::settings::encoder::{EncoderProperty, VideoCodec, VideoEncoderKind, DEFAULT_AUDIO_ENCODER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDeviceType {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    #[serde(rename = "type")]
    pub device_type: AudioDeviceType,
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEncoderInfo {
    /// e.g. "ffmpeg_aac"
    #[serde(rename = "type")]
    pub kind: String,
    pub codec: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEncoderInfo {
    #[serde(rename = "type")]
    pub kind: VideoEncoderKind,
    pub codec: VideoCodec,
    pub name: String,
    pub properties: BTreeMap<String, EncoderProperty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInfo {
    pub index: u32,
    pub name: String,
    pub driver: String,
    pub hags_enabled: bool,
    pub hags_enabled_by_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub top: i32,
    pub left: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorInfo {
    pub adapter_index: u32,
    pub id: String,
    pub alt_id: String,
    pub dpi: u32,
    pub attached_to_desktop: bool,
    pub friendly_name: String,
    pub refresh_rate: u32,
    pub rect: Rect,
    pub is_primary: bool,
    pub display_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInformation {
    pub input_devices: Vec<AudioDevice>,
    pub output_devices: Vec<AudioDevice>,
    pub encoders: Vec<AudioEncoderInfo>,
    pub default_encoder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInformation {
    pub encoders: Vec<VideoEncoderInfo>,
    pub adapters: Vec<AdapterInfo>,
    pub default_encoder: Option<VideoEncoderKind>,
}

/// Snapshot of what the machine can capture and encode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInformation {
    pub audio: AudioInformation,
    pub video: VideoInformation,
    pub monitors: Vec<MonitorInfo>,
}

/// Hardware encoders first, H.264 before HEVC before AV1
const VIDEO_ENCODER_PREFERENCE: [VideoEncoderKind; 12] = [
    VideoEncoderKind::JimNvenc,
    VideoEncoderKind::H264TextureAmf,
    VideoEncoderKind::ObsQsv11V2,
    VideoEncoderKind::JimHevcNvenc,
    VideoEncoderKind::H265TextureAmf,
    VideoEncoderKind::ObsQsv11Hevc,
    VideoEncoderKind::JimAv1Nvenc,
    VideoEncoderKind::Av1TextureAmf,
    VideoEncoderKind::ObsQsv11Av1,
    VideoEncoderKind::ObsX264,
    VideoEncoderKind::FfmpegSvtAv1,
    VideoEncoderKind::FfmpegAomAv1,
];

impl RecordingInformation {
    pub fn has_video_encoder(&self, kind: VideoEncoderKind) -> bool {
        self.video.encoders.iter().any(|e| e.kind == kind)
    }

    pub fn audio_devices(&self) -> impl Iterator<Item = &AudioDevice> {
        self.audio
            .input_devices
            .iter()
            .chain(self.audio.output_devices.iter())
    }

    pub fn find_audio_device(&self, id: &str) -> Option<&AudioDevice> {
        self.audio_devices().find(|d| d.id == id)
    }

    pub fn default_audio_device(&self, device_type: AudioDeviceType) -> Option<&AudioDevice> {
        let devices = match device_type {
            AudioDeviceType::Input => &self.audio.input_devices,
            AudioDeviceType::Output => &self.audio.output_devices,
        };
        devices.iter().find(|d| d.is_default)
    }

    /// Match on either the monitor ID or its alternate ID
    pub fn find_monitor(&self, id: &str) -> Option<&MonitorInfo> {
        self.monitors.iter().find(|m| m.id == id || m.alt_id == id)
    }

    pub fn primary_monitor(&self) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .find(|m| m.is_primary)
            .or_else(|| self.monitors.first())
    }

    /// Pick the video encoder: the explicit choice if the machine has it,
    /// otherwise the best available one (GPU first, then x264)
    pub fn select_video_encoder(
        &self,
        explicit: Option<VideoEncoderKind>,
    ) -> RecorderResult<VideoEncoderKind> {
        if let Some(kind) = explicit {
            if self.has_video_encoder(kind) {
                return Ok(kind);
            }
            return Err(RecorderError::invalid(format!(
                "Video encoder {} is not available on this machine",
                kind
            )));
        }

        let selected = VIDEO_ENCODER_PREFERENCE
            .iter()
            .copied()
            .find(|kind| self.has_video_encoder(*kind))
            .ok_or_else(|| RecorderError::encoder("No video encoder available"))?;

        debug!("Selected video encoder: {}", selected);
        Ok(selected)
    }

    pub fn select_audio_encoder(&self, explicit: Option<&str>) -> RecorderResult<AudioEncoderInfo> {
        let find = |kind: &str| self.audio.encoders.iter().find(|e| e.kind == kind).cloned();

        if let Some(kind) = explicit {
            return find(kind).ok_or_else(|| {
                RecorderError::invalid(format!("Audio encoder {} is not available", kind))
            });
        }

        find(DEFAULT_AUDIO_ENCODER)
            .or_else(|| find(&self.audio.default_encoder))
            .or_else(|| self.audio.encoders.first().cloned())
            .ok_or_else(|| RecorderError::encoder("No audio encoder available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::encoder::describe_properties;

    fn video_encoder(kind: VideoEncoderKind) -> VideoEncoderInfo {
        VideoEncoderInfo {
            kind,
            codec: kind.codec(),
            name: kind.as_str().to_string(),
            properties: describe_properties(kind),
        }
    }

    fn info(encoders: &[VideoEncoderKind]) -> RecordingInformation {
        RecordingInformation {
            audio: AudioInformation {
                input_devices: vec![AudioDevice {
                    device_type: AudioDeviceType::Input,
                    id: "mic-1".to_string(),
                    name: "Microphone".to_string(),
                    is_default: true,
                }],
                output_devices: Vec::new(),
                encoders: vec![AudioEncoderInfo {
                    kind: "ffmpeg_opus".to_string(),
                    codec: "opus".to_string(),
                    name: "FFmpeg Opus".to_string(),
                }],
                default_encoder: "ffmpeg_opus".to_string(),
            },
            video: VideoInformation {
                encoders: encoders.iter().copied().map(video_encoder).collect(),
                adapters: Vec::new(),
                default_encoder: encoders.first().copied(),
            },
            monitors: Vec::new(),
        }
    }

    #[test]
    fn test_only_x264_is_selected() {
        let info = info(&[VideoEncoderKind::ObsX264]);
        assert_eq!(info.select_video_encoder(None).unwrap(), VideoEncoderKind::ObsX264);
    }

    #[test]
    fn test_prefers_hardware() {
        let info = info(&[
            VideoEncoderKind::ObsX264,
            VideoEncoderKind::ObsQsv11Hevc,
            VideoEncoderKind::H264TextureAmf,
        ]);
        assert_eq!(
            info.select_video_encoder(None).unwrap(),
            VideoEncoderKind::H264TextureAmf
        );
    }

    #[test]
    fn test_explicit_missing_encoder() {
        let info = info(&[VideoEncoderKind::ObsX264]);
        let err = info
            .select_video_encoder(Some(VideoEncoderKind::JimNvenc))
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::MissingOrInvalidParameters);
    }

    #[test]
    fn test_empty_catalog() {
        let info = info(&[]);
        let err = info.select_video_encoder(None).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::EncoderError);
    }

    #[test]
    fn test_audio_encoder_falls_back_to_catalog_default() {
        let info = info(&[VideoEncoderKind::ObsX264]);
        assert_eq!(info.select_audio_encoder(None).unwrap().kind, "ffmpeg_opus");
        assert!(info.select_audio_encoder(Some("ffmpeg_flac")).is_err());
    }

    #[test]
    fn test_default_device_lookup() {
        let info = info(&[VideoEncoderKind::ObsX264]);
        assert_eq!(
            info.default_audio_device(AudioDeviceType::Input).map(|d| d.id.as_str()),
            Some("mic-1")
        );
        assert!(info.default_audio_device(AudioDeviceType::Output).is_none());
    }
}
