//! Encoder kinds and their tunable parameters
//!
//! Every vendor family has its own parameter block. Defaults live in named
//! constants and are applied when settings are created for a kind; the same
//! constants feed the catalog's property descriptions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{RecorderError, RecorderResult};

pub const DEFAULT_BITRATE_KBPS: u32 = 8000;
/// 0 = encoder default
pub const DEFAULT_KEYINT_SEC: u32 = 0;
pub const DEFAULT_AUDIO_ENCODER: &str = "ffmpeg_aac";

pub const RATE_CONTROL_DEFAULT: &str = "CBR";

pub const X264_RATE_CONTROLS: &[&str] = &["CBR", "ABR", "VBR", "CRF"];
pub const X264_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower",
    "veryslow", "placebo",
];
pub const X264_DEFAULT_PRESET: &str = "veryfast";
pub const X264_PROFILES: &[&str] = &["", "baseline", "main", "high"];
pub const X264_TUNES: &[&str] = &[
    "", "film", "animation", "grain", "stillimage", "psnr", "ssim", "fastdecode",
    "zerolatency",
];

pub const NVENC_RATE_CONTROLS: &[&str] = &["CBR", "CQP", "VBR", "Lossless"];
pub const NVENC_PRESETS: &[&str] = &["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
pub const NVENC_DEFAULT_PRESET: &str = "p5";
pub const NVENC_MULTIPASS: &[&str] = &["qres", "fullres", "disabled"];
pub const NVENC_DEFAULT_MULTIPASS: &str = "qres";
pub const NVENC_TUNINGS: &[&str] = &["hq", "ll", "ull"];
pub const NVENC_DEFAULT_TUNING: &str = "hq";
pub const NVENC_DEFAULT_BFRAMES: u32 = 2;
pub const NVENC_PROFILES_H264: &[&str] = &["main", "high", "baseline"];
pub const NVENC_PROFILES_HEVC: &[&str] = &["main", "main10"];

pub const AMF_RATE_CONTROLS: &[&str] = &["CBR", "CQP", "VBR", "VBR_LAT", "QVBR", "HQVBR", "HQCBR"];
pub const AMF_PRESETS: &[&str] = &["quality", "balanced", "speed"];
pub const AMF_PRESETS_AV1: &[&str] = &["quality", "balanced", "speed", "highQuality"];
pub const AMF_DEFAULT_PRESET: &str = "quality";
pub const AMF_PROFILES_H264: &[&str] = &["main", "high", "baseline"];
pub const AMF_PROFILES_MAIN: &[&str] = &["main"];
pub const AMF_DEFAULT_CQP: u32 = 20;
pub const AMF_DEFAULT_BFRAMES: u32 = 3;

pub const QSV_RATE_CONTROLS: &[&str] = &["CBR", "CQP", "VBR", "ICQ"];
pub const QSV_TARGET_USAGES: &[&str] = &["TU1", "TU2", "TU3", "TU4", "TU5", "TU6", "TU7"];
pub const QSV_DEFAULT_TARGET_USAGE: &str = "TU4";
pub const QSV_DEFAULT_BFRAMES: u32 = 3;

pub const PROFILE_HIGH: &str = "high";
pub const PROFILE_MAIN: &str = "main";

/// Supported video encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VideoEncoderKind {
    #[serde(rename = "ffmpeg_svt_av1")]
    FfmpegSvtAv1,
    #[serde(rename = "ffmpeg_aom_av1")]
    FfmpegAomAv1,
    #[serde(rename = "jim_nvenc")]
    JimNvenc,
    #[serde(rename = "jim_hevc_nvenc")]
    JimHevcNvenc,
    #[serde(rename = "jim_av1_nvenc")]
    JimAv1Nvenc,
    #[serde(rename = "obs_x264")]
    ObsX264,
    #[serde(rename = "h264_texture_amf")]
    H264TextureAmf,
    #[serde(rename = "h265_texture_amf")]
    H265TextureAmf,
    #[serde(rename = "av1_texture_amf")]
    Av1TextureAmf,
    #[serde(rename = "obs_qsv11_v2")]
    ObsQsv11V2,
    #[serde(rename = "obs_qsv11_hevc")]
    ObsQsv11Hevc,
    #[serde(rename = "obs_qsv11_av1")]
    ObsQsv11Av1,
}

/// Vendor family: decides which parameter block applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderFamily {
    X264,
    Nvenc,
    Amf,
    QuickSync,
    SoftwareAv1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Av1,
}

impl VideoEncoderKind {
    pub const ALL: [VideoEncoderKind; 12] = [
        VideoEncoderKind::FfmpegSvtAv1,
        VideoEncoderKind::FfmpegAomAv1,
        VideoEncoderKind::JimNvenc,
        VideoEncoderKind::JimHevcNvenc,
        VideoEncoderKind::JimAv1Nvenc,
        VideoEncoderKind::ObsX264,
        VideoEncoderKind::H264TextureAmf,
        VideoEncoderKind::H265TextureAmf,
        VideoEncoderKind::Av1TextureAmf,
        VideoEncoderKind::ObsQsv11V2,
        VideoEncoderKind::ObsQsv11Hevc,
        VideoEncoderKind::ObsQsv11Av1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VideoEncoderKind::FfmpegSvtAv1 => "ffmpeg_svt_av1",
            VideoEncoderKind::FfmpegAomAv1 => "ffmpeg_aom_av1",
            VideoEncoderKind::JimNvenc => "jim_nvenc",
            VideoEncoderKind::JimHevcNvenc => "jim_hevc_nvenc",
            VideoEncoderKind::JimAv1Nvenc => "jim_av1_nvenc",
            VideoEncoderKind::ObsX264 => "obs_x264",
            VideoEncoderKind::H264TextureAmf => "h264_texture_amf",
            VideoEncoderKind::H265TextureAmf => "h265_texture_amf",
            VideoEncoderKind::Av1TextureAmf => "av1_texture_amf",
            VideoEncoderKind::ObsQsv11V2 => "obs_qsv11_v2",
            VideoEncoderKind::ObsQsv11Hevc => "obs_qsv11_hevc",
            VideoEncoderKind::ObsQsv11Av1 => "obs_qsv11_av1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn family(self) -> EncoderFamily {
        match self {
            VideoEncoderKind::ObsX264 => EncoderFamily::X264,
            VideoEncoderKind::JimNvenc
            | VideoEncoderKind::JimHevcNvenc
            | VideoEncoderKind::JimAv1Nvenc => EncoderFamily::Nvenc,
            VideoEncoderKind::H264TextureAmf
            | VideoEncoderKind::H265TextureAmf
            | VideoEncoderKind::Av1TextureAmf => EncoderFamily::Amf,
            VideoEncoderKind::ObsQsv11V2
            | VideoEncoderKind::ObsQsv11Hevc
            | VideoEncoderKind::ObsQsv11Av1 => EncoderFamily::QuickSync,
            VideoEncoderKind::FfmpegSvtAv1 | VideoEncoderKind::FfmpegAomAv1 => {
                EncoderFamily::SoftwareAv1
            }
        }
    }

    pub fn codec(self) -> VideoCodec {
        match self {
            VideoEncoderKind::ObsX264
            | VideoEncoderKind::JimNvenc
            | VideoEncoderKind::H264TextureAmf
            | VideoEncoderKind::ObsQsv11V2 => VideoCodec::H264,
            VideoEncoderKind::JimHevcNvenc
            | VideoEncoderKind::H265TextureAmf
            | VideoEncoderKind::ObsQsv11Hevc => VideoCodec::Hevc,
            VideoEncoderKind::JimAv1Nvenc
            | VideoEncoderKind::Av1TextureAmf
            | VideoEncoderKind::ObsQsv11Av1
            | VideoEncoderKind::FfmpegSvtAv1
            | VideoEncoderKind::FfmpegAomAv1 => VideoCodec::Av1,
        }
    }

    /// GPU encoders
    pub fn is_hardware(self) -> bool {
        !matches!(
            self.family(),
            EncoderFamily::X264 | EncoderFamily::SoftwareAv1
        )
    }
}

impl std::fmt::Display for VideoEncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct X264Tuning {
    pub rate_control: String,
    pub preset: String,
    pub profile: String,
    pub tune: String,
    pub x264opts: String,
    pub use_bufsize: bool,
    /// Valid when `use_bufsize` is set
    pub buffer_size: u32,
}

impl Default for X264Tuning {
    fn default() -> Self {
        Self {
            rate_control: RATE_CONTROL_DEFAULT.to_string(),
            preset: X264_DEFAULT_PRESET.to_string(),
            profile: String::new(),
            tune: String::new(),
            x264opts: String::new(),
            use_bufsize: false,
            buffer_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NvencTuning {
    pub rate_control: String,
    pub preset2: String,
    pub multipass: String,
    pub tune: String,
    pub psycho_aq: bool,
    /// Max B-frames
    pub bf: u32,
    /// Dynamic B-frames
    pub lookahead: bool,
    pub gpu: u32,
    pub profile: String,
}

impl NvencTuning {
    fn for_codec(codec: VideoCodec) -> Self {
        Self {
            rate_control: RATE_CONTROL_DEFAULT.to_string(),
            preset2: NVENC_DEFAULT_PRESET.to_string(),
            multipass: NVENC_DEFAULT_MULTIPASS.to_string(),
            tune: NVENC_DEFAULT_TUNING.to_string(),
            psycho_aq: true,
            bf: NVENC_DEFAULT_BFRAMES,
            lookahead: false,
            gpu: 0,
            profile: default_profile(codec).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AmfTuning {
    pub rate_control: String,
    pub preset: String,
    pub profile: String,
    pub cpq: u32,
    pub bf: u32,
    /// Custom AMF/FFmpeg options, e.g. "level=5.2 profile=main"
    pub ffmpeg_opts: String,
}

impl AmfTuning {
    fn for_codec(codec: VideoCodec) -> Self {
        Self {
            rate_control: RATE_CONTROL_DEFAULT.to_string(),
            preset: AMF_DEFAULT_PRESET.to_string(),
            profile: default_profile(codec).to_string(),
            cpq: AMF_DEFAULT_CQP,
            bf: AMF_DEFAULT_BFRAMES,
            ffmpeg_opts: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QuickSyncTuning {
    pub rate_control: String,
    pub target_usage: String,
    pub bframes: u32,
    pub enhancements: bool,
    pub profile: String,
}

impl QuickSyncTuning {
    fn for_codec(codec: VideoCodec) -> Self {
        Self {
            rate_control: RATE_CONTROL_DEFAULT.to_string(),
            target_usage: QSV_DEFAULT_TARGET_USAGE.to_string(),
            bframes: QSV_DEFAULT_BFRAMES,
            enhancements: true,
            profile: default_profile(codec).to_string(),
        }
    }
}

fn default_profile(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => PROFILE_HIGH,
        VideoCodec::Hevc | VideoCodec::Av1 => PROFILE_MAIN,
    }
}

/// Family specific parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum EncoderTuning {
    X264(X264Tuning),
    Nvenc(NvencTuning),
    Amf(AmfTuning),
    QuickSync(QuickSyncTuning),
    SoftwareAv1,
}

impl EncoderTuning {
    pub fn family(&self) -> EncoderFamily {
        match self {
            EncoderTuning::X264(_) => EncoderFamily::X264,
            EncoderTuning::Nvenc(_) => EncoderFamily::Nvenc,
            EncoderTuning::Amf(_) => EncoderFamily::Amf,
            EncoderTuning::QuickSync(_) => EncoderFamily::QuickSync,
            EncoderTuning::SoftwareAv1 => EncoderFamily::SoftwareAv1,
        }
    }
}

/// Chosen video encoder and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VideoEncoderSettings {
    #[serde(rename = "type")]
    pub kind: VideoEncoderKind,
    /// Kbps
    pub bitrate: u32,
    /// Seconds between keyframes, 0 = encoder default
    pub keyint_sec: u32,
    pub max_bitrate: Option<u32>,
    pub tuning: EncoderTuning,
}

impl VideoEncoderSettings {
    /// Settings with every parameter at its documented default
    pub fn defaults_for(kind: VideoEncoderKind) -> Self {
        let codec = kind.codec();
        let tuning = match kind.family() {
            EncoderFamily::X264 => EncoderTuning::X264(X264Tuning::default()),
            EncoderFamily::Nvenc => EncoderTuning::Nvenc(NvencTuning::for_codec(codec)),
            EncoderFamily::Amf => EncoderTuning::Amf(AmfTuning::for_codec(codec)),
            EncoderFamily::QuickSync => {
                EncoderTuning::QuickSync(QuickSyncTuning::for_codec(codec))
            }
            EncoderFamily::SoftwareAv1 => EncoderTuning::SoftwareAv1,
        };

        Self {
            kind,
            bitrate: DEFAULT_BITRATE_KBPS,
            keyint_sec: DEFAULT_KEYINT_SEC,
            max_bitrate: None,
            tuning,
        }
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.tuning.family() != self.kind.family() {
            return Err(RecorderError::invalid(format!(
                "Encoder parameters for {:?} do not apply to {}",
                self.tuning.family(),
                self.kind
            )));
        }
        if self.bitrate == 0 {
            return Err(RecorderError::invalid("Bitrate must be non-zero"));
        }
        if let Some(max) = self.max_bitrate {
            if max < self.bitrate {
                return Err(RecorderError::invalid(format!(
                    "Max bitrate {} is below bitrate {}",
                    max, self.bitrate
                )));
            }
        }

        let codec = self.kind.codec();
        match &self.tuning {
            EncoderTuning::X264(t) => {
                check_value("rate_control", &t.rate_control, X264_RATE_CONTROLS)?;
                check_value("preset", &t.preset, X264_PRESETS)?;
                check_value("profile", &t.profile, X264_PROFILES)?;
                check_value("tune", &t.tune, X264_TUNES)?;
                if t.use_bufsize && t.buffer_size == 0 {
                    return Err(RecorderError::invalid(
                        "buffer_size must be set when use_bufsize is enabled",
                    ));
                }
            }
            EncoderTuning::Nvenc(t) => {
                check_value("rate_control", &t.rate_control, NVENC_RATE_CONTROLS)?;
                check_value("preset2", &t.preset2, NVENC_PRESETS)?;
                check_value("multipass", &t.multipass, NVENC_MULTIPASS)?;
                check_value("tune", &t.tune, NVENC_TUNINGS)?;
                check_value("profile", &t.profile, nvenc_profiles(codec))?;
            }
            EncoderTuning::Amf(t) => {
                check_value("rate_control", &t.rate_control, AMF_RATE_CONTROLS)?;
                check_value("preset", &t.preset, amf_presets(codec))?;
                check_value("profile", &t.profile, amf_profiles(codec))?;
            }
            EncoderTuning::QuickSync(t) => {
                check_value("rate_control", &t.rate_control, QSV_RATE_CONTROLS)?;
                check_value("target_usage", &t.target_usage, QSV_TARGET_USAGES)?;
                check_value("profile", &t.profile, nvenc_profiles(codec))?;
            }
            EncoderTuning::SoftwareAv1 => {}
        }
        Ok(())
    }
}

fn nvenc_profiles(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::H264 => NVENC_PROFILES_H264,
        VideoCodec::Hevc => NVENC_PROFILES_HEVC,
        VideoCodec::Av1 => AMF_PROFILES_MAIN,
    }
}

fn amf_profiles(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::H264 => AMF_PROFILES_H264,
        VideoCodec::Hevc | VideoCodec::Av1 => AMF_PROFILES_MAIN,
    }
}

fn amf_presets(codec: VideoCodec) -> &'static [&'static str] {
    match codec {
        VideoCodec::Av1 => AMF_PRESETS_AV1,
        VideoCodec::H264 | VideoCodec::Hevc => AMF_PRESETS,
    }
}

fn check_value(name: &str, value: &str, allowed: &[&str]) -> RecorderResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(RecorderError::invalid(format!(
            "Invalid {} '{}' (allowed: {:?})",
            name, value, allowed
        )))
    }
}

/// Descriptive metadata for one tunable encoder property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderProperty {
    pub default: Value,
    pub description: String,
    pub values: Option<BTreeMap<String, String>>,
}

impl EncoderProperty {
    fn new(default: Value, description: &str) -> Self {
        Self {
            default,
            description: description.to_string(),
            values: None,
        }
    }

    fn with_values(default: Value, description: &str, values: &[&str]) -> Self {
        Self {
            default,
            description: description.to_string(),
            values: Some(
                values
                    .iter()
                    .map(|v| (v.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }
}

/// Catalog description of the properties an encoder kind accepts
pub fn describe_properties(kind: VideoEncoderKind) -> BTreeMap<String, EncoderProperty> {
    let defaults = VideoEncoderSettings::defaults_for(kind);
    let codec = kind.codec();
    let mut props = BTreeMap::new();

    props.insert(
        "bitrate".to_string(),
        EncoderProperty::new(json!(defaults.bitrate), "Bitrate (Kbps)"),
    );
    props.insert(
        "keyint_sec".to_string(),
        EncoderProperty::new(
            json!(defaults.keyint_sec),
            "Keyframe interval in seconds (0 = auto)",
        ),
    );
    props.insert(
        "max_bitrate".to_string(),
        EncoderProperty::new(Value::Null, "Max bitrate (Kbps)"),
    );

    match defaults.tuning {
        EncoderTuning::X264(t) => {
            props.insert(
                "rate_control".to_string(),
                EncoderProperty::with_values(json!(t.rate_control), "Rate control", X264_RATE_CONTROLS),
            );
            props.insert(
                "preset".to_string(),
                EncoderProperty::with_values(json!(t.preset), "CPU usage preset", X264_PRESETS),
            );
            props.insert(
                "profile".to_string(),
                EncoderProperty::with_values(json!(t.profile), "Profile", X264_PROFILES),
            );
            props.insert(
                "tune".to_string(),
                EncoderProperty::with_values(json!(t.tune), "Tune", X264_TUNES),
            );
            props.insert(
                "x264opts".to_string(),
                EncoderProperty::new(json!(t.x264opts), "x264 options (separated by space)"),
            );
            props.insert(
                "use_bufsize".to_string(),
                EncoderProperty::new(json!(t.use_bufsize), "Use custom buffer size"),
            );
            props.insert(
                "buffer_size".to_string(),
                EncoderProperty::new(json!(t.buffer_size), "Custom buffer size"),
            );
        }
        EncoderTuning::Nvenc(t) => {
            props.insert(
                "rate_control".to_string(),
                EncoderProperty::with_values(json!(t.rate_control), "Rate control", NVENC_RATE_CONTROLS),
            );
            props.insert(
                "preset2".to_string(),
                EncoderProperty::with_values(json!(t.preset2), "Preset (p1 fastest .. p7 slowest)", NVENC_PRESETS),
            );
            props.insert(
                "multipass".to_string(),
                EncoderProperty::with_values(json!(t.multipass), "Multipass mode", NVENC_MULTIPASS),
            );
            props.insert(
                "tune".to_string(),
                EncoderProperty::with_values(json!(t.tune), "Tuning", NVENC_TUNINGS),
            );
            props.insert(
                "psycho_aq".to_string(),
                EncoderProperty::new(json!(t.psycho_aq), "Psycho visual tuning"),
            );
            props.insert("bf".to_string(), EncoderProperty::new(json!(t.bf), "Max B-frames"));
            props.insert(
                "lookahead".to_string(),
                EncoderProperty::new(json!(t.lookahead), "Dynamic B-frames"),
            );
            props.insert("gpu".to_string(), EncoderProperty::new(json!(t.gpu), "GPU index"));
            props.insert(
                "profile".to_string(),
                EncoderProperty::with_values(json!(t.profile), "Profile", nvenc_profiles(codec)),
            );
        }
        EncoderTuning::Amf(t) => {
            props.insert(
                "rate_control".to_string(),
                EncoderProperty::with_values(json!(t.rate_control), "Rate control", AMF_RATE_CONTROLS),
            );
            props.insert(
                "preset".to_string(),
                EncoderProperty::with_values(json!(t.preset), "Preset", amf_presets(codec)),
            );
            props.insert(
                "profile".to_string(),
                EncoderProperty::with_values(json!(t.profile), "Profile", amf_profiles(codec)),
            );
            props.insert("cpq".to_string(), EncoderProperty::new(json!(t.cpq), "CQP level"));
            props.insert("bf".to_string(), EncoderProperty::new(json!(t.bf), "Max B-frames"));
            props.insert(
                "ffmpeg_opts".to_string(),
                EncoderProperty::new(json!(t.ffmpeg_opts), "Custom AMF or FFmpeg options"),
            );
        }
        EncoderTuning::QuickSync(t) => {
            props.insert(
                "rate_control".to_string(),
                EncoderProperty::with_values(json!(t.rate_control), "Rate control", QSV_RATE_CONTROLS),
            );
            props.insert(
                "target_usage".to_string(),
                EncoderProperty::with_values(
                    json!(t.target_usage),
                    "Target usage (TU1 best quality .. TU7 best speed)",
                    QSV_TARGET_USAGES,
                ),
            );
            props.insert("bframes".to_string(), EncoderProperty::new(json!(t.bframes), "B-frames"));
            props.insert(
                "enhancements".to_string(),
                EncoderProperty::new(json!(t.enhancements), "Subjective video enhancements"),
            );
            props.insert(
                "profile".to_string(),
                EncoderProperty::with_values(json!(t.profile), "Profile", nvenc_profiles(codec)),
            );
        }
        EncoderTuning::SoftwareAv1 => {}
    }

    props
}
