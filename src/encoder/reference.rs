use crate::capture::VideoFrame;
use crate::catalog::AudioEncoderInfo;
use crate::error::{RecorderError, RecorderResult};
use crate::settings::{AudioGeneralSettings, VideoEncoderSettings, VideoSettings};

use super::{AudioEncoder, EncodedPacket, EncoderFactory, VideoEncoder, VIDEO_TRACK};

/// Keyframe interval used when the settings ask for the encoder default
pub const REFERENCE_KEYINT_SEC: u32 = 1;

pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 160;

const MIN_PACKET_BYTES: usize = 16;
const HEADER_BYTES: usize = 12;

/// Fill a packet body of `size` bytes: pts, a content checksum, then a
/// repeating pattern
fn packet_body(size: usize, pts_ms: u64, checksum: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    data.extend_from_slice(&pts_ms.to_le_bytes());
    data.extend_from_slice(&checksum.to_le_bytes());
    let seed = checksum as u8;
    data.extend((0..size.saturating_sub(HEADER_BYTES)).map(|i| seed.wrapping_add(i as u8)));
    data
}

/// Bytes one packet of `duration_ms` takes at `bitrate_kbps`
fn cbr_size(bitrate_kbps: u32, duration_ms: u64) -> usize {
    let bytes = bitrate_kbps as u64 * duration_ms / 8;
    (bytes as usize).max(MIN_PACKET_BYTES)
}

pub struct ReferenceVideoEncoder {
    name: String,
    bitrate_kbps: u32,
    keyint_frames: u64,
    frames_since_keyframe: Option<u64>,
}

impl ReferenceVideoEncoder {
    pub fn new(settings: &VideoEncoderSettings, video: &VideoSettings) -> Self {
        let keyint_sec = match settings.keyint_sec {
            0 => REFERENCE_KEYINT_SEC,
            sec => sec,
        };
        Self {
            name: settings.kind.as_str().to_string(),
            bitrate_kbps: settings.bitrate,
            keyint_frames: (keyint_sec as u64 * video.fps as u64).max(1),
            frames_since_keyframe: None,
        }
    }

    pub fn keyint_frames(&self) -> u64 {
        self.keyint_frames
    }
}

impl VideoEncoder for ReferenceVideoEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        pts_ms: u64,
        duration_ms: u64,
        force_keyframe: bool,
    ) -> RecorderResult<EncodedPacket> {
        if !frame.is_well_formed() {
            return Err(RecorderError::encoder(format!(
                "Malformed {}x{} frame ({} bytes)",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let keyframe = match self.frames_since_keyframe {
            None => true,
            Some(n) => force_keyframe || n + 1 >= self.keyint_frames,
        };
        self.frames_since_keyframe = match self.frames_since_keyframe {
            Some(n) if !keyframe => Some(n + 1),
            _ => Some(0),
        };

        // Sample every 64th byte; enough to tell frames apart
        let checksum = frame
            .data
            .iter()
            .step_by(64)
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32));

        Ok(EncodedPacket {
            track: VIDEO_TRACK,
            pts_ms,
            duration_ms,
            keyframe,
            data: packet_body(cbr_size(self.bitrate_kbps, duration_ms), pts_ms, checksum),
        })
    }
}

pub struct ReferenceAudioEncoder {
    name: String,
    bitrate_kbps: u32,
}

impl ReferenceAudioEncoder {
    pub fn new(info: &AudioEncoderInfo) -> Self {
        Self {
            name: info.kind.clone(),
            bitrate_kbps: DEFAULT_AUDIO_BITRATE_KBPS,
        }
    }
}

impl AudioEncoder for ReferenceAudioEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(
        &mut self,
        track: u8,
        samples: &[i16],
        pts_ms: u64,
        duration_ms: u64,
    ) -> RecorderResult<EncodedPacket> {
        if !(1..=6).contains(&track) {
            return Err(RecorderError::encoder(format!("Invalid audio track {}", track)));
        }

        let peak = samples.iter().map(|s| s.unsigned_abs() as u32).max().unwrap_or(0);

        Ok(EncodedPacket {
            track,
            pts_ms,
            duration_ms,
            keyframe: true,
            data: packet_body(cbr_size(self.bitrate_kbps, duration_ms), pts_ms, peak),
        })
    }
}

/// Factory for the built-in constant bitrate encoders
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEncoderFactory;

impl EncoderFactory for ReferenceEncoderFactory {
    fn create_video(
        &self,
        settings: &VideoEncoderSettings,
        video: &VideoSettings,
    ) -> RecorderResult<Box<dyn VideoEncoder>> {
        Ok(Box::new(ReferenceVideoEncoder::new(settings, video)))
    }

    fn create_audio(
        &self,
        info: &AudioEncoderInfo,
        general: &AudioGeneralSettings,
    ) -> RecorderResult<Box<dyn AudioEncoder>> {
        general.validate()?;
        Ok(Box::new(ReferenceAudioEncoder::new(info)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::VideoEncoderKind;

    fn encoder(keyint_sec: u32, bitrate: u32) -> ReferenceVideoEncoder {
        let mut settings = VideoEncoderSettings::defaults_for(VideoEncoderKind::ObsX264);
        settings.keyint_sec = keyint_sec;
        settings.bitrate = bitrate;
        ReferenceVideoEncoder::new(&settings, &VideoSettings::with_base(4, 4))
    }

    fn frame() -> VideoFrame {
        VideoFrame::filled(4, 4, [1, 2, 3, 255], 0)
    }

    #[test]
    fn test_default_keyint_is_one_second() {
        let mut enc = encoder(0, 8000);
        assert_eq!(enc.keyint_frames(), 30);

        let keyframes: Vec<u64> = (0..90)
            .filter(|i| enc.encode(&frame(), i * 33, 33, false).unwrap().keyframe)
            .collect();
        assert_eq!(keyframes, vec![0, 30, 60]);
    }

    #[test]
    fn test_forced_keyframe_restarts_interval() {
        let mut enc = encoder(2, 8000);
        for i in 0..10 {
            enc.encode(&frame(), i, 33, false).unwrap();
        }
        assert!(enc.encode(&frame(), 10, 33, true).unwrap().keyframe);
        for i in 11..70 {
            assert!(!enc.encode(&frame(), i, 33, false).unwrap().keyframe);
        }
        assert!(enc.encode(&frame(), 70, 33, false).unwrap().keyframe);
    }

    #[test]
    fn test_packet_size_follows_bitrate() {
        let mut enc = encoder(0, 8000);
        let packet = enc.encode(&frame(), 0, 33, false).unwrap();
        assert_eq!(packet.data.len(), 8000 * 33 / 8);
        assert_eq!(&packet.data[..8], &0u64.to_le_bytes());

        let mut tiny = encoder(0, 1);
        assert_eq!(tiny.encode(&frame(), 0, 33, false).unwrap().data.len(), MIN_PACKET_BYTES);
    }

    #[test]
    fn test_rejects_malformed_frame() {
        let mut enc = encoder(0, 8000);
        let mut bad = frame();
        bad.data.truncate(3);
        assert!(enc.encode(&bad, 0, 33, false).is_err());
    }

    #[test]
    fn test_audio_track_range() {
        let info = AudioEncoderInfo {
            kind: "ffmpeg_aac".to_string(),
            codec: "aac".to_string(),
            name: "AAC".to_string(),
        };
        let mut enc = ReferenceAudioEncoder::new(&info);
        assert!(enc.encode(1, &[0; 64], 0, 33).unwrap().keyframe);
        assert!(enc.encode(0, &[0; 64], 0, 33).is_err());
        assert!(enc.encode(7, &[0; 64], 0, 33).is_err());
    }
}
