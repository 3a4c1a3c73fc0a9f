use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, RecorderResult};

pub const DEFAULT_FPS: u32 = 30;
pub const MAX_FPS: u32 = 240;
pub const DEFAULT_BASE_WIDTH: u32 = 1920;
pub const DEFAULT_BASE_HEIGHT: u32 = 1080;
/// Nits
pub const DEFAULT_SDR_WHITE: u32 = 300;
/// Nits
pub const DEFAULT_HDR_PEAK: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoColorFormat {
    #[default]
    #[serde(rename = "NV12")]
    Nv12,
    #[serde(rename = "I420")]
    I420,
    #[serde(rename = "I444")]
    I444,
    #[serde(rename = "P010")]
    P010,
    #[serde(rename = "I010")]
    I010,
    #[serde(rename = "P216")]
    P216,
    #[serde(rename = "P416")]
    P416,
    #[serde(rename = "BGRA")]
    Bgra,
}

impl VideoColorFormat {
    /// 10+ bit formats
    pub fn is_high_bit_depth(self) -> bool {
        matches!(
            self,
            VideoColorFormat::P010
                | VideoColorFormat::I010
                | VideoColorFormat::P216
                | VideoColorFormat::P416
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoColorSpec {
    #[serde(rename = "sRGB")]
    Srgb,
    #[default]
    #[serde(rename = "709")]
    Rec709,
    #[serde(rename = "601")]
    Rec601,
    #[serde(rename = "2100PQ")]
    Rec2100Pq,
    #[serde(rename = "2100HLG")]
    Rec2100Hlg,
}

impl VideoColorSpec {
    pub fn is_hdr(self) -> bool {
        matches!(self, VideoColorSpec::Rec2100Pq | VideoColorSpec::Rec2100Hlg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoColorRange {
    #[default]
    Partial,
    Full,
}

/// Video output parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    /// Canvas the sources are composited onto
    pub base_width: u32,
    pub base_height: u32,

    pub fps: u32,

    /// Scaled output resolution, same as the base canvas by default
    pub output_width: u32,
    pub output_height: u32,

    pub color_format: VideoColorFormat,
    pub color_range: VideoColorRange,
    pub color_spec: VideoColorSpec,

    pub sdr_white: u32,
    pub hdr_peak: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self::with_base(DEFAULT_BASE_WIDTH, DEFAULT_BASE_HEIGHT)
    }
}

impl VideoSettings {
    pub fn with_base(width: u32, height: u32) -> Self {
        Self {
            base_width: width,
            base_height: height,
            fps: DEFAULT_FPS,
            output_width: width,
            output_height: height,
            color_format: VideoColorFormat::default(),
            color_range: VideoColorRange::default(),
            color_spec: VideoColorSpec::default(),
            sdr_white: DEFAULT_SDR_WHITE,
            hdr_peak: DEFAULT_HDR_PEAK,
        }
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.base_width == 0 || self.base_height == 0 {
            return Err(RecorderError::invalid("Base resolution must be non-zero"));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(RecorderError::invalid("Output resolution must be non-zero"));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(RecorderError::invalid(format!(
                "FPS must be between 1 and {}, got {}",
                MAX_FPS, self.fps
            )));
        }
        if self.color_spec.is_hdr() && !self.color_format.is_high_bit_depth() {
            return Err(RecorderError::invalid(format!(
                "HDR color spec {:?} requires a 10-bit color format",
                self.color_spec
            )));
        }
        Ok(())
    }

    /// Duration of one output frame in milliseconds
    pub fn frame_duration_ms(&self) -> f64 {
        1000.0 / self.fps as f64
    }
}
