use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::audio::{
    AudioCapture, AudioCaptureKind, AudioDeviceSettings, AudioGeneralSettings, AudioSettings,
    AudioTracks,
};
use super::encoder::{VideoEncoderKind, VideoEncoderSettings};
use super::source::{
    CaptureSource, GameCaptureSourceSettings, MonitorCaptureSourceSettings,
    WindowCaptureSourceSettings,
};
use super::video::VideoSettings;
use super::{CaptureSettings, LastBuiltSettings, SettingsData};
use crate::catalog::{AudioDeviceType, AudioEncoderInfo, RecordingInformation};
use crate::error::{RecorderError, RecorderResult};

/// How a builder is seeded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettingsOptions {
    /// Default: best available encoder (GPU, then x264)
    pub video_encoder: Option<VideoEncoderKind>,
    /// Default: "ffmpeg_aac"
    pub audio_encoder: Option<String>,
    /// Add the default input and output devices
    pub include_default_audio_sources: bool,
    /// Default devices get dedicated tracks: output on 2, input on 3,
    /// and track 1 carries both
    pub separate_audio_tracks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultAudioDeviceParams {
    pub separate_audio_tracks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioDeviceParams {
    pub id: String,
    pub name: String,
    pub separate_audio_tracks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationAudioCaptureParams {
    /// Process to capture (e.g. "discord.exe")
    pub process_name: String,
    pub separate_audio_tracks: bool,
}

/// Incrementally assembles [`CaptureSettings`]
///
/// Every `add_*`/`set_*` call validates its input first; a rejected call
/// leaves the builder exactly as it was.
#[derive(Debug, Clone)]
pub struct CaptureSettingsBuilder {
    catalog: RecordingInformation,
    video_settings: VideoSettings,
    audio_settings: AudioSettings,
    video_encoder_settings: VideoEncoderSettings,
    audio_encoder: AudioEncoderInfo,
    sources: Vec<CaptureSource>,
    separate_audio_tracks: bool,
    last_built: Option<LastBuiltSettings>,
}

impl CaptureSettingsBuilder {
    /// Seed a builder from a catalog snapshot
    pub fn new(catalog: RecordingInformation, options: CaptureSettingsOptions) -> RecorderResult<Self> {
        let video_kind = catalog.select_video_encoder(options.video_encoder)?;
        let audio_encoder = catalog.select_audio_encoder(options.audio_encoder.as_deref())?;

        let video_settings = match catalog.primary_monitor() {
            Some(monitor) => VideoSettings::with_base(monitor.rect.width, monitor.rect.height),
            None => VideoSettings::default(),
        };

        info!(
            "Settings builder created: video encoder {}, audio encoder {}",
            video_kind, audio_encoder.kind
        );

        let mut builder = Self {
            catalog,
            video_settings,
            audio_settings: AudioSettings::default(),
            video_encoder_settings: VideoEncoderSettings::defaults_for(video_kind),
            audio_encoder,
            sources: Vec::new(),
            separate_audio_tracks: options.separate_audio_tracks,
            last_built: None,
        };

        if options.include_default_audio_sources {
            let params = DefaultAudioDeviceParams {
                separate_audio_tracks: options.separate_audio_tracks,
            };
            for device_type in [AudioDeviceType::Output, AudioDeviceType::Input] {
                if builder.catalog.default_audio_device(device_type).is_some() {
                    builder.add_audio_default_capture(device_type, params.clone(), None)?;
                } else {
                    debug!("No default {:?} device to add", device_type);
                }
            }
        }

        Ok(builder)
    }

    pub(crate) fn with_last_built(mut self, slot: LastBuiltSettings) -> Self {
        self.last_built = Some(slot);
        self
    }

    pub fn catalog(&self) -> &RecordingInformation {
        &self.catalog
    }

    pub fn video_settings(&self) -> &VideoSettings {
        &self.video_settings
    }

    pub fn audio_settings(&self) -> &AudioSettings {
        &self.audio_settings
    }

    pub fn video_encoder_settings(&self) -> &VideoEncoderSettings {
        &self.video_encoder_settings
    }

    pub fn audio_encoder(&self) -> &AudioEncoderInfo {
        &self.audio_encoder
    }

    pub fn sources(&self) -> &[CaptureSource] {
        &self.sources
    }

    pub fn set_video_settings(&mut self, settings: VideoSettings) -> RecorderResult<&mut Self> {
        settings.validate()?;
        self.video_settings = settings;
        Ok(self)
    }

    pub fn set_audio_general_settings(
        &mut self,
        settings: AudioGeneralSettings,
    ) -> RecorderResult<&mut Self> {
        settings.validate()?;
        self.audio_settings.general = settings;
        Ok(self)
    }

    pub fn set_video_encoder_settings(
        &mut self,
        settings: VideoEncoderSettings,
    ) -> RecorderResult<&mut Self> {
        settings.validate()?;
        if !self.catalog.has_video_encoder(settings.kind) {
            return Err(RecorderError::invalid(format!(
                "Video encoder {} is not available on this machine",
                settings.kind
            )));
        }
        self.video_encoder_settings = settings;
        Ok(self)
    }

    /// Add a monitor capture source
    pub fn add_screen_source(
        &mut self,
        settings: MonitorCaptureSourceSettings,
    ) -> RecorderResult<&mut Self> {
        let source = CaptureSource::Display(settings);
        source.validate()?;
        if let CaptureSource::Display(s) = &source {
            if self.catalog.find_monitor(&s.monitor_id).is_none() {
                return Err(RecorderError::invalid(format!(
                    "Unknown monitor '{}'",
                    s.monitor_id
                )));
            }
        }
        self.push_source(source);
        Ok(self)
    }

    /// Add a game capture source (one per settings)
    pub fn add_game_source(
        &mut self,
        settings: GameCaptureSourceSettings,
    ) -> RecorderResult<&mut Self> {
        let source = CaptureSource::Game(settings);
        source.validate()?;
        if self.sources.iter().any(|s| matches!(s, CaptureSource::Game(_))) {
            return Err(RecorderError::invalid("Only one game source is supported"));
        }
        self.push_source(source);
        Ok(self)
    }

    pub fn add_window_source(
        &mut self,
        settings: WindowCaptureSourceSettings,
    ) -> RecorderResult<&mut Self> {
        let source = CaptureSource::Window(settings);
        source.validate()?;
        self.push_source(source);
        Ok(self)
    }

    /// Add a specific audio device from the catalog
    pub fn add_audio_capture(
        &mut self,
        params: AudioDeviceParams,
        settings: Option<AudioDeviceSettings>,
    ) -> RecorderResult<&mut Self> {
        let device = self
            .catalog
            .find_audio_device(&params.id)
            .cloned()
            .ok_or_else(|| {
                RecorderError::invalid(format!("Unknown audio device '{}'", params.id))
            })?;
        if self.audio_settings.contains_device(&device.id) {
            return Err(RecorderError::invalid(format!(
                "Audio device '{}' was already added",
                device.id
            )));
        }

        let kind = match device.device_type {
            AudioDeviceType::Input => AudioCaptureKind::Input,
            AudioDeviceType::Output => AudioCaptureKind::Output,
        };
        let name = if params.name.is_empty() {
            device.name
        } else {
            params.name
        };
        let capture = make_capture(kind, device.id, name, params.separate_audio_tracks, settings)?;
        self.push_audio(capture);
        Ok(self)
    }

    /// Add the system default input or output device; no-op when it is
    /// already part of the settings
    pub fn add_audio_default_capture(
        &mut self,
        device_type: AudioDeviceType,
        params: DefaultAudioDeviceParams,
        settings: Option<AudioDeviceSettings>,
    ) -> RecorderResult<&mut Self> {
        let device = self
            .catalog
            .default_audio_device(device_type)
            .cloned()
            .ok_or_else(|| {
                RecorderError::invalid(format!("No default {:?} audio device", device_type))
            })?;

        if self.audio_settings.contains_device(&device.id) {
            debug!("Default {:?} device '{}' already added", device_type, device.id);
            return Ok(self);
        }

        let kind = match device_type {
            AudioDeviceType::Input => AudioCaptureKind::Input,
            AudioDeviceType::Output => AudioCaptureKind::Output,
        };
        let capture = make_capture(
            kind,
            device.id,
            device.name,
            params.separate_audio_tracks,
            settings,
        )?;
        self.push_audio(capture);
        Ok(self)
    }

    /// Capture the audio of a single application
    pub fn add_application_audio_capture(
        &mut self,
        params: ApplicationAudioCaptureParams,
        settings: Option<AudioDeviceSettings>,
    ) -> RecorderResult<&mut Self> {
        let process_name = params.process_name.trim().to_string();
        if process_name.is_empty() {
            return Err(RecorderError::invalid("Application process name is required"));
        }
        if self.audio_settings.contains_device(&process_name) {
            return Err(RecorderError::invalid(format!(
                "Application '{}' was already added",
                process_name
            )));
        }

        let capture = make_capture(
            AudioCaptureKind::Application,
            process_name.clone(),
            process_name,
            params.separate_audio_tracks,
            settings,
        )?;
        self.push_audio(capture);
        Ok(self)
    }

    /// Freeze the current state into an independent snapshot
    pub fn build(&self) -> CaptureSettings {
        let settings = CaptureSettings {
            data: Arc::new(SettingsData {
                video_settings: self.video_settings.clone(),
                audio_settings: self.audio_settings.clone(),
                video_encoder_settings: self.video_encoder_settings.clone(),
                audio_encoder: self.audio_encoder.clone(),
                sources: self.sources.clone(),
                separate_audio_tracks: self.separate_audio_tracks,
            }),
        };

        info!(
            "Capture settings built: {} video sources, {} audio captures",
            settings.sources().len(),
            settings.audio_settings().captures().count()
        );

        if let Some(slot) = &self.last_built {
            slot.store(settings.clone());
        }
        settings
    }

    fn push_source(&mut self, source: CaptureSource) {
        info!("Added capture source: {}", source.label());
        self.sources.push(source);
    }

    fn push_audio(&mut self, capture: AudioCapture) {
        info!("Added audio capture: {:?} '{}'", capture.kind, capture.name);
        match capture.kind {
            AudioCaptureKind::Input => self.audio_settings.inputs.push(capture),
            AudioCaptureKind::Output => self.audio_settings.outputs.push(capture),
            AudioCaptureKind::Application => self.audio_settings.applications.push(capture),
        }
    }
}

/// Dedicated track per capture kind when tracks are separated
fn separate_tracks_for(kind: AudioCaptureKind) -> AudioTracks {
    match kind {
        AudioCaptureKind::Output => AudioTracks::TRACK1 | AudioTracks::TRACK2,
        AudioCaptureKind::Input => AudioTracks::TRACK1 | AudioTracks::TRACK3,
        AudioCaptureKind::Application => AudioTracks::TRACK1 | AudioTracks::TRACK4,
    }
}

fn make_capture(
    kind: AudioCaptureKind,
    id: String,
    name: String,
    separate_audio_tracks: bool,
    settings: Option<AudioDeviceSettings>,
) -> RecorderResult<AudioCapture> {
    let mut settings = settings.unwrap_or_default();
    settings.validate()?;
    if settings.tracks.is_none() && separate_audio_tracks {
        settings.tracks = Some(separate_tracks_for(kind));
    }

    Ok(AudioCapture {
        kind,
        id,
        name,
        settings,
    })
}
