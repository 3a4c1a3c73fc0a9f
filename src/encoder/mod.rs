//! Encoder adapter
//!
//! Turns captured batches into encoded packets. Codecs plug in through
//! [`EncoderFactory`]; [`ReferenceEncoderFactory`] is the built-in encoder
//! that emits constant-bitrate packets with correct timing and keyframe
//! structure, without a real bit-stream.

mod queue;
mod reference;

pub use queue::FrameQueue;
pub use reference::{
    ReferenceAudioEncoder, ReferenceEncoderFactory, ReferenceVideoEncoder,
    DEFAULT_AUDIO_BITRATE_KBPS, REFERENCE_KEYINT_SEC,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::{RawBatch, VideoFrame};
use crate::catalog::AudioEncoderInfo;
use crate::error::RecorderResult;
use crate::settings::{AudioGeneralSettings, VideoEncoderSettings, VideoSettings};

/// Track 0 carries video, tracks 1-6 carry audio
pub const VIDEO_TRACK: u8 = 0;

/// One compressed unit of a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPacket {
    pub track: u8,
    pub pts_ms: u64,
    pub duration_ms: u64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl EncodedPacket {
    pub fn is_video(&self) -> bool {
        self.track == VIDEO_TRACK
    }

    pub fn end_ms(&self) -> u64 {
        self.pts_ms + self.duration_ms
    }
}

pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    /// Encode one frame. `force_keyframe` makes this frame an IDR
    fn encode(
        &mut self,
        frame: &VideoFrame,
        pts_ms: u64,
        duration_ms: u64,
        force_keyframe: bool,
    ) -> RecorderResult<EncodedPacket>;
}

pub trait AudioEncoder: Send {
    fn name(&self) -> &str;

    fn encode(
        &mut self,
        track: u8,
        samples: &[i16],
        pts_ms: u64,
        duration_ms: u64,
    ) -> RecorderResult<EncodedPacket>;
}

/// Creates encoder instances for a session
pub trait EncoderFactory: Send + Sync {
    fn create_video(
        &self,
        settings: &VideoEncoderSettings,
        video: &VideoSettings,
    ) -> RecorderResult<Box<dyn VideoEncoder>>;

    fn create_audio(
        &self,
        info: &AudioEncoderInfo,
        general: &AudioGeneralSettings,
    ) -> RecorderResult<Box<dyn AudioEncoder>>;
}

/// The video/audio encoder pair of a session
pub struct EncoderAdapter {
    video: Box<dyn VideoEncoder>,
    audio: Box<dyn AudioEncoder>,
    force_keyframe: bool,
}

impl EncoderAdapter {
    pub fn new(
        factory: &dyn EncoderFactory,
        encoder_settings: &VideoEncoderSettings,
        video: &VideoSettings,
        audio_encoder: &AudioEncoderInfo,
        general: &AudioGeneralSettings,
    ) -> RecorderResult<Self> {
        encoder_settings.validate()?;
        let video_encoder = factory.create_video(encoder_settings, video)?;
        let audio = factory.create_audio(audio_encoder, general)?;

        info!(
            "Encoders ready: video {} @ {}kbps, audio {}",
            video_encoder.name(),
            encoder_settings.bitrate,
            audio.name()
        );

        Ok(Self {
            video: video_encoder,
            audio,
            force_keyframe: false,
        })
    }

    /// The next encoded frame will be a keyframe
    pub fn request_keyframe(&mut self) {
        debug!("Keyframe requested");
        self.force_keyframe = true;
    }

    /// Encode a batch: the video packet first, then one packet per audio
    /// track, all sharing the batch timestamp
    pub fn encode(&mut self, batch: &RawBatch) -> RecorderResult<Vec<EncodedPacket>> {
        let mut packets = Vec::with_capacity(1 + batch.audio.len());

        let force = std::mem::take(&mut self.force_keyframe);
        packets.push(
            self.video
                .encode(&batch.video, batch.pts_ms, batch.duration_ms, force)?,
        );

        for track in &batch.audio {
            packets.push(self.audio.encode(
                track.track,
                &track.samples,
                batch.pts_ms,
                batch.duration_ms,
            )?);
        }

        Ok(packets)
    }
}
